//! Relationship-path resolution.
//!
//! Resolves a path specification into one or more branches, each a
//! (selectable class set, join path) pair, and picks the SQL shape that
//! preserves row cardinality: a single hop joins directly, while a
//! multi-hop path with any to-one hop becomes an IN-subquery chain so the
//! join can neither multiply nor deduplicate selected rows.

use crate::query_ast::sql_expr::{BoundQuery, SqlExpr};
use crate::query_ast::{JoinClause, JoinKind, SelectQuery, FIELD_INSTANCE_ID};
use crate::rules::{ClassSelector, PathStepSpec, RelDirection, SupportedSchemas};
use crate::schema_catalog::{Multiplicity, RelationshipDescriptor};

use super::class_set::{resolve_selector, ResolvedClass};
use super::context::{AliasAllocator, ResolutionContext};
use super::errors::QueryBuilderError;

pub const COL_SOURCE_ID: &str = "SourceId";
pub const COL_TARGET_ID: &str = "TargetId";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathShape {
    Joined,
    Filtered,
}

#[derive(Debug, Clone)]
pub struct ResolvedHop {
    pub relationship: RelationshipDescriptor,
    /// true when traversal runs along source → target.
    pub forward: bool,
    pub alias: String,
    /// Fan-out of the hop in traversal direction.
    pub to_many: bool,
}

impl ResolvedHop {
    /// Column bound to the instances the hop starts from.
    pub fn start_column(&self) -> &'static str {
        if self.forward { COL_SOURCE_ID } else { COL_TARGET_ID }
    }

    /// Column holding the instances the hop arrives at.
    pub fn end_column(&self) -> &'static str {
        if self.forward { COL_TARGET_ID } else { COL_SOURCE_ID }
    }

    pub fn end_class(&self) -> &str {
        if self.forward {
            &self.relationship.target
        } else {
            &self.relationship.source
        }
    }
}

#[derive(Debug, Clone)]
pub struct PathBranch {
    pub target: ResolvedClass,
    pub hops: Vec<ResolvedHop>,
    pub shape: PathShape,
    pub direction: RelDirection,
}

fn shape_of(hops: &[ResolvedHop]) -> PathShape {
    if hops.len() <= 1 {
        PathShape::Joined
    } else if hops.iter().any(|h| !h.to_many) {
        PathShape::Filtered
    } else {
        PathShape::Joined
    }
}

/// Resolves which way a hop runs from the given class, honoring the
/// requested direction. None means the class cannot enter this relationship
/// in that direction.
fn hop_forwardness(
    ctx: &ResolutionContext<'_>,
    relationship: &RelationshipDescriptor,
    requested: RelDirection,
    from_class: &str,
) -> Option<bool> {
    let fits_forward = ctx.catalog.is_derived_from(from_class, &relationship.source);
    let fits_backward = ctx.catalog.is_derived_from(from_class, &relationship.target);
    match requested {
        RelDirection::Forward => fits_forward.then_some(true),
        RelDirection::Backward => fits_backward.then_some(false),
        RelDirection::Either => {
            if fits_forward {
                Some(true)
            } else if fits_backward {
                Some(false)
            } else {
                None
            }
        }
    }
}

fn hop_fan_out(relationship: &RelationshipDescriptor, forward: bool) -> bool {
    if forward {
        relationship.target_multiplicity == Multiplicity::Many
    } else {
        relationship.source_multiplicity == Multiplicity::Many
    }
}

/// Walks the explicit path steps from the parent's concrete classes and
/// emits one branch per leaf target class, each with freshly allocated hop
/// aliases. An unreachable path yields an empty branch list, not an error.
pub fn resolve_path_branches(
    ctx: &ResolutionContext<'_>,
    alloc: &mut AliasAllocator,
    parent_classes: &[String],
    steps: &[PathStepSpec],
    supported: &SupportedSchemas,
) -> Result<Vec<PathBranch>, QueryBuilderError> {
    let mut states: Vec<(String, Vec<ResolvedHop>)> = parent_classes
        .iter()
        .map(|c| (c.clone(), Vec::new()))
        .collect();

    for step in steps {
        ctx.check_cancelled()?;
        let Some(relationship) = ctx.catalog.relationship_opt(&step.relationship) else {
            log::warn!("relationship '{}' does not exist", step.relationship);
            return Ok(Vec::new());
        };
        ctx.notify_class_used(&relationship.qualified_name(), true);

        let mut next_states = Vec::new();
        for (current_class, hops) in states {
            let Some(forward) =
                hop_forwardness(ctx, relationship, step.direction, &current_class)
            else {
                continue;
            };
            let hop = ResolvedHop {
                relationship: relationship.clone(),
                forward,
                alias: alloc.next("r"),
                to_many: hop_fan_out(relationship, forward),
            };
            let end_class = hop.end_class().to_string();
            let mut extended = hops.clone();
            extended.push(hop);
            next_states.push((end_class, extended));
        }
        states = next_states;
        if states.is_empty() {
            return Ok(Vec::new());
        }
    }

    let last_step = steps.last();
    let mut branches = Vec::new();
    for (end_class, hops) in states {
        let selector = last_step.and_then(|s| s.target_class.clone());
        for target in expand_targets(ctx, &end_class, selector.as_ref(), supported)? {
            // Every branch numbers its own hop aliases so two hops through
            // the same class pair never collide across branches.
            let hops: Vec<ResolvedHop> = hops
                .iter()
                .map(|h| ResolvedHop {
                    alias: alloc.next("r"),
                    ..h.clone()
                })
                .collect();
            let direction = steps.first().map(|s| s.direction).unwrap_or_default();
            branches.push(PathBranch {
                shape: shape_of(&hops),
                target,
                hops,
                direction,
            });
        }
    }
    Ok(branches)
}

/// Leaf target classes at the end of a path: an explicit target selector is
/// honored when it fits the hop's end class; an abstract end class without a
/// selector splits into one branch per direct subclass.
fn expand_targets(
    ctx: &ResolutionContext<'_>,
    end_class: &str,
    selector: Option<&ClassSelector>,
    supported: &SupportedSchemas,
) -> Result<Vec<ResolvedClass>, QueryBuilderError> {
    if let Some(selector) = selector {
        if !ctx.catalog.is_derived_from(&selector.class, end_class) {
            log::debug!(
                "target class '{}' does not fit relationship end '{}'",
                selector.class,
                end_class
            );
            return Ok(Vec::new());
        }
        return Ok(resolve_selector(ctx, selector, supported)?
            .into_iter()
            .collect());
    }

    let Some(end) = ctx.catalog.class_opt(end_class) else {
        return Ok(Vec::new());
    };
    if !end.is_abstract {
        return Ok(resolve_selector(ctx, &ClassSelector::new(&end.name), supported)?
            .into_iter()
            .collect());
    }
    let mut targets = Vec::new();
    for subclass in ctx.catalog.direct_subclasses(&end.name) {
        if let Some(resolved) =
            resolve_selector(ctx, &ClassSelector::new(&subclass.name), supported)?
        {
            targets.push(resolved);
        }
    }
    Ok(targets)
}

/// Walks `levels` related hops away from the parent's classes following any
/// relationship the catalog knows, without changing the parent-matching
/// instance binding. Yields no branches when the walk cannot be completed.
pub fn resolve_skip_levels(
    ctx: &ResolutionContext<'_>,
    alloc: &mut AliasAllocator,
    parent_classes: &[String],
    levels: usize,
    direction: RelDirection,
    supported: &SupportedSchemas,
) -> Result<Vec<PathBranch>, QueryBuilderError> {
    let mut states: Vec<(String, Vec<ResolvedHop>)> = parent_classes
        .iter()
        .map(|c| (c.clone(), Vec::new()))
        .collect();

    for _ in 0..levels {
        ctx.check_cancelled()?;
        let mut next_states = Vec::new();
        for (current_class, hops) in &states {
            for relationship in ctx.catalog.relationships_from(current_class) {
                let Some(forward) =
                    hop_forwardness(ctx, relationship, direction, current_class)
                else {
                    continue;
                };
                ctx.notify_class_used(&relationship.qualified_name(), true);
                let hop = ResolvedHop {
                    relationship: relationship.clone(),
                    forward,
                    alias: alloc.next("r"),
                    to_many: hop_fan_out(relationship, forward),
                };
                let end_class = hop.end_class().to_string();
                let mut extended = hops.clone();
                extended.push(hop);
                next_states.push((end_class, extended));
            }
        }
        states = next_states;
        if states.is_empty() {
            return Ok(Vec::new());
        }
    }

    let mut branches = Vec::new();
    for (end_class, hops) in states {
        for target in expand_targets(ctx, &end_class, None, supported)? {
            branches.push(PathBranch {
                shape: shape_of(&hops),
                target,
                hops: hops.clone(),
                direction,
            });
        }
    }
    Ok(branches)
}

/// Attaches the branch's path to the base select: joins for the joined
/// shape, an IN-subquery chain for the filtered shape. `parent_query` is the
/// parent node's bound instance-key query.
pub fn attach_path(
    select: &mut SelectQuery,
    branch: &PathBranch,
    target_alias: &str,
    parent_query: &BoundQuery,
) {
    if branch.hops.is_empty() {
        return;
    }
    match branch.shape {
        PathShape::Joined => {
            // Join back from the selected class toward the parent.
            let mut bound_to: (String, &'static str) =
                (target_alias.to_string(), FIELD_INSTANCE_ID);
            for hop in branch.hops.iter().rev() {
                select.add_join(JoinClause {
                    table: hop.relationship.qualified_name(),
                    alias: hop.alias.clone(),
                    on: vec![SqlExpr::eq(
                        SqlExpr::property(&hop.alias, hop.end_column()),
                        SqlExpr::property(&bound_to.0, bound_to.1),
                    )],
                    kind: JoinKind::Inner,
                });
                bound_to = (hop.alias.clone(), hop.start_column());
            }
            let first = &branch.hops[0];
            select.add_filter(SqlExpr::InBoundQuery(
                crate::query_ast::sql_expr::InBoundQuery {
                    expr: Box::new(SqlExpr::property(&first.alias, first.start_column())),
                    query: parent_query.clone(),
                    negated: false,
                },
            ));
        }
        PathShape::Filtered => {
            let mut inner = parent_query.clone();
            for hop in &branch.hops {
                inner = BoundQuery {
                    sql: format!(
                        "SELECT {alias}.{end} FROM {table} AS {alias} WHERE {alias}.{start} IN ({inner})",
                        alias = hop.alias,
                        end = hop.end_column(),
                        start = hop.start_column(),
                        table = hop.relationship.qualified_name(),
                        inner = inner.sql,
                    ),
                    params: inner.params,
                };
            }
            select.add_filter(SqlExpr::InBoundQuery(
                crate::query_ast::sql_expr::InBoundQuery {
                    expr: Box::new(SqlExpr::property(target_alias, FIELD_INSTANCE_ID)),
                    query: inner,
                    negated: false,
                },
            ));
        }
    }
}
