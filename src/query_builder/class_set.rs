//! Class-set resolution.
//!
//! Turns rule-authored class selectors into concrete selectable class sets:
//! polymorphic selections expand to the class plus all non-abstract derived
//! classes, exclusion lists remove whole branches (polymorphic exclusion) or
//! single classes (non-polymorphic exclusion), and supported-schema lists
//! drop classes the rule set does not allow.

use crate::rules::{ClassSelector, SupportedSchemas};
use crate::schema_catalog::{ClassDescriptor, ClassId};

use super::context::ResolutionContext;
use super::errors::QueryBuilderError;

/// One selectable class branch, with polymorphism already expanded.
#[derive(Debug, Clone)]
pub struct ResolvedClass {
    pub descriptor: ClassDescriptor,
    pub polymorphic: bool,
    /// Concrete class ids removed from the polymorphic selection.
    pub excluded_ids: Vec<ClassId>,
    /// Concrete class ids actually selectable at this level.
    pub concrete_ids: Vec<ClassId>,
}

impl ResolvedClass {
    pub fn concrete_class_names(&self, ctx: &ResolutionContext<'_>) -> Vec<String> {
        self.concrete_ids
            .iter()
            .filter_map(|id| ctx.catalog.class_by_id(*id))
            .map(|c| c.qualified_name())
            .collect()
    }
}

/// Resolves one selector against the catalog. Unknown classes and classes
/// outside the supported-schema list resolve to None rather than failing the
/// request.
pub fn resolve_selector(
    ctx: &ResolutionContext<'_>,
    selector: &ClassSelector,
    supported: &SupportedSchemas,
) -> Result<Option<ResolvedClass>, QueryBuilderError> {
    let Some(class) = ctx.catalog.class_opt(&selector.class) else {
        log::warn!("select class '{}' does not exist", selector.class);
        return Ok(None);
    };
    if !supported.allows(&class.schema, ctx.target_schema) {
        log::debug!(
            "select class '{}' dropped: schema '{}' is not supported",
            selector.class,
            class.schema
        );
        return Ok(None);
    }

    let excluded_ids = expand_exclusions(ctx, &selector.excluded);
    let concrete_ids = concrete_selection(ctx, class, selector.polymorphic, &excluded_ids, supported);

    ctx.notify_class_used(&class.qualified_name(), selector.polymorphic);

    if concrete_ids.is_empty() {
        log::debug!(
            "select class '{}' dropped: no concrete classes remain after exclusions",
            selector.class
        );
        return Ok(None);
    }

    Ok(Some(ResolvedClass {
        descriptor: class.clone(),
        polymorphic: selector.polymorphic,
        excluded_ids,
        concrete_ids,
    }))
}

/// Expands exclusion selectors: a polymorphic exclusion removes the whole
/// subtree, a non-polymorphic one removes only the named class, leaving its
/// own subclasses selectable.
fn expand_exclusions(ctx: &ResolutionContext<'_>, excluded: &[ClassSelector]) -> Vec<ClassId> {
    let mut ids = Vec::new();
    for selector in excluded {
        let Some(class) = ctx.catalog.class_opt(&selector.class) else {
            log::warn!("excluded class '{}' does not exist", selector.class);
            continue;
        };
        ids.push(class.id);
        if selector.polymorphic {
            ids.extend(ctx.catalog.derived_classes(&class.name).iter().map(|c| c.id));
        }
        ctx.notify_class_used(&class.qualified_name(), selector.polymorphic);
    }
    ids
}

fn concrete_selection(
    ctx: &ResolutionContext<'_>,
    class: &ClassDescriptor,
    polymorphic: bool,
    excluded_ids: &[ClassId],
    supported: &SupportedSchemas,
) -> Vec<ClassId> {
    let mut ids = Vec::new();
    if !class.is_abstract {
        ids.push(class.id);
    }
    if polymorphic {
        ids.extend(
            ctx.catalog
                .derived_classes(&class.name)
                .iter()
                .filter(|c| !c.is_abstract)
                .filter(|c| supported.allows(&c.schema, ctx.target_schema))
                .map(|c| c.id),
        );
    }
    ids.retain(|id| !excluded_ids.contains(id));
    ids
}

/// Class set of an unconditional all-instances scan: one polymorphic branch
/// per base-most class in the supported schemas.
pub fn resolve_all_instances(
    ctx: &ResolutionContext<'_>,
    supported: &SupportedSchemas,
) -> Result<Vec<ResolvedClass>, QueryBuilderError> {
    let mut branches = Vec::new();
    for class in ctx.catalog.all_classes() {
        if !supported.allows(&class.schema, ctx.target_schema) {
            continue;
        }
        // Base-most within the allowed set: the parent class (if any) is not
        // itself selectable, so this class roots its own branch.
        let base_selectable = class
            .base
            .as_deref()
            .and_then(|b| ctx.catalog.class_opt(b))
            .is_some_and(|b| supported.allows(&b.schema, ctx.target_schema));
        if base_selectable {
            continue;
        }
        if let Some(resolved) = resolve_selector(
            ctx,
            &ClassSelector::new(&class.name),
            supported,
        )? {
            branches.push(resolved);
        }
    }
    Ok(branches)
}
