//! Display-label resolution.
//!
//! Builds the composite label field of a class: a first-non-empty-value-wins
//! chain over the matching label-override property lists (highest priority
//! first, declaration order on ties), falling back to the class's built-in
//! label source.

use crate::query_ast::functions::{engine_fn, FN_CLASS_LABEL};
use crate::query_ast::sql_expr::{ParamValue, ScalarFnCall, SqlExpr};
use crate::query_ast::FIELD_CLASS_ID;
use crate::schema_catalog::ClassDescriptor;

use super::context::ResolutionContext;

/// The class's built-in label source, inherited from the nearest base class
/// that declares one.
fn builtin_label_property(
    ctx: &ResolutionContext<'_>,
    class: &ClassDescriptor,
) -> Option<String> {
    let mut current = Some(class);
    while let Some(descriptor) = current {
        if let Some(property) = &descriptor.label_property {
            return Some(property.clone());
        }
        current = descriptor
            .base
            .as_deref()
            .and_then(|b| ctx.catalog.class_opt(b));
    }
    None
}

/// Wraps a property access so empty strings lose against later chain links.
fn non_empty(expr: SqlExpr) -> SqlExpr {
    SqlExpr::ScalarFnCall(ScalarFnCall {
        name: "NULLIF".to_string(),
        args: vec![expr, SqlExpr::Literal(ParamValue::String(String::new()))],
    })
}

/// The composite display-label expression for a class selected under
/// `alias`.
pub fn display_label_expr(
    ctx: &ResolutionContext<'_>,
    class: &ClassDescriptor,
    alias: &str,
) -> SqlExpr {
    let mut chain = Vec::new();

    for label_override in ctx.ruleset.label_overrides_by_priority() {
        let matches = if label_override.class.polymorphic {
            ctx.catalog
                .is_derived_from(&class.name, &label_override.class.class)
        } else {
            label_override.class.class == class.name
                || label_override.class.class == class.qualified_name()
        };
        if !matches {
            continue;
        }
        for property in &label_override.properties {
            // An override naming a nonexistent property is treated as
            // absent, not a failure.
            if ctx.catalog.property_opt(&class.name, property).is_none() {
                log::debug!(
                    "label override property '{}' does not exist on '{}'",
                    property,
                    class.name
                );
                continue;
            }
            chain.push(non_empty(SqlExpr::property(alias, property)));
        }
    }

    if let Some(label_property) = builtin_label_property(ctx, class) {
        chain.push(non_empty(SqlExpr::property(alias, &label_property)));
    }

    let fallback = engine_fn(
        FN_CLASS_LABEL,
        vec![SqlExpr::property(alias, FIELD_CLASS_ID)],
    )
    .expect("registered function");

    if chain.is_empty() {
        return fallback;
    }
    chain.push(fallback);
    SqlExpr::ScalarFnCall(ScalarFnCall {
        name: "COALESCE".to_string(),
        args: chain,
    })
}
