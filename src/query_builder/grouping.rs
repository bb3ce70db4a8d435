//! Grouping engine.
//!
//! Per branch, grouping advances through a fixed sequence of layers:
//! class grouping, property grouping (level 1..k), label grouping, then the
//! terminal same-label coalescing. The handlers active for a branch come
//! from the specification's flags plus the highest-priority matching
//! grouping rule (first matching rule wins entirely; declaration order
//! breaks priority ties). The parent node's key chain decides how many
//! layers are already applied; this module materializes the next one and
//! restricts the selection to the ancestor groups' members.

use crate::hierarchy::{CachedNode, NodeKey};
use crate::query_ast::functions::{
    engine_fn, FN_AGGREGATE_KEYS, FN_CLASS_LABEL, FN_DISPLAY_VALUE,
};
use crate::query_ast::sql_expr::{
    AggregateFnCall, Operator, OperatorApplication, ParamValue, SqlCase, SqlExpr,
};
use crate::query_ast::{
    QueryTree, RowContract, SelectQuery, SelectSource, FIELD_CLASS_ID, FIELD_DISPLAY_LABEL,
    FIELD_GROUPED_COUNT, FIELD_GROUPING_VALUE, FIELD_GROUP_CLASS_ID, FIELD_INSTANCE_COUNT,
    FIELD_INSTANCE_ID, FIELD_INSTANCE_KEYS, FIELD_SORTING_VALUE,
};
use crate::rules::{
    ClassGroupSpec, ClassMatch, GroupSpec, GroupValueKind, PropertyGroupSpec, PropertyRange,
    SpecificationFlags,
};
use crate::schema_catalog::ClassId;

use super::context::{AliasAllocator, ResolutionContext};
use super::errors::QueryBuilderError;
use super::BranchParts;

#[derive(Debug, Clone)]
pub enum Handler<'a> {
    /// Group by concrete class (specification flag).
    Class,
    /// Group by direct subclasses of a declared base (grouping rule).
    BaseClass { spec: &'a ClassGroupSpec },
    /// One property-grouping level.
    Property { spec: &'a PropertyGroupSpec },
    /// Group by display label (specification flag).
    Label,
    /// Terminal same-label instance coalescing.
    SameLabel,
}

/// Restriction a previously applied grouping layer places on this level's
/// selection.
#[derive(Debug, Clone)]
enum Restriction {
    Class {
        class: ClassId,
        polymorphic: bool,
    },
    PropertyValues {
        property: String,
        values: Vec<ParamValue>,
    },
    PropertyRange {
        property: String,
        ranges: Vec<PropertyRange>,
        index: i32,
    },
    Label {
        label: String,
    },
}

pub struct GroupingPlan<'a> {
    handlers: Vec<Handler<'a>>,
    applied: usize,
    restrictions: Vec<Restriction>,
}

impl GroupingPlan<'_> {
    pub fn next_handler(&self) -> Option<&Handler<'_>> {
        self.handlers.get(self.applied)
    }
}

pub struct LevelQuery {
    pub tree: QueryTree,
    /// true when a grouping layer was produced; grouped levels are never
    /// rule-sorted.
    pub grouped: bool,
}

pub(crate) fn class_matches(
    ctx: &ResolutionContext<'_>,
    matcher: &ClassMatch,
    class_name: &str,
) -> bool {
    if matcher.polymorphic {
        ctx.catalog.is_derived_from(class_name, &matcher.class)
    } else {
        let bare = matcher
            .class
            .rsplit_once('.')
            .map(|(_, b)| b)
            .unwrap_or(&matcher.class);
        class_name == bare
    }
}

/// Collects the handler stack for a branch and matches it against the
/// parent node's grouping-key chain to find the current state.
pub fn resolve_plan<'a>(
    ctx: &'a ResolutionContext<'a>,
    class_name: &str,
    flags: &SpecificationFlags,
    parent: Option<&CachedNode>,
) -> GroupingPlan<'a> {
    let mut handlers: Vec<Handler<'a>> = Vec::new();

    if flags.group_by_class {
        handlers.push(Handler::Class);
    }

    let mut same_label = false;
    let mut rule_consumed = false;
    for rule in ctx.ruleset.grouping_rules_by_priority() {
        if !class_matches(ctx, &rule.class, class_name) {
            continue;
        }
        // Same-label layering applies from any matching rule, independent
        // of which rule wins the class/property layers.
        if rule
            .groups
            .iter()
            .any(|g| matches!(g, GroupSpec::SameLabelInstance))
        {
            same_label = true;
        }
        if rule_consumed {
            continue;
        }
        rule_consumed = true;

        let chosen = ctx
            .active_groups
            .and_then(|chooser| chooser.active_group(rule))
            .and_then(|idx| rule.groups.get(idx));
        let active: Vec<&GroupSpec> = match chosen {
            Some(spec) => vec![spec],
            None => rule.groups.iter().collect(),
        };

        let mut class_layer_pushed = false;
        for group in active.iter().copied() {
            match group {
                GroupSpec::ByClass(spec) if !class_layer_pushed => {
                    handlers.push(Handler::BaseClass { spec });
                    class_layer_pushed = true;
                }
                _ => {}
            }
        }
        for group in active.iter().copied() {
            if let GroupSpec::ByProperty(spec) = group {
                handlers.push(Handler::Property { spec });
            }
        }
    }

    if flags.group_by_label {
        handlers.push(Handler::Label);
    }
    if same_label {
        handlers.push(Handler::SameLabel);
    }

    let chain = grouping_chain(ctx, parent);
    let (applied, restrictions) = match_applied(&handlers, &chain);

    GroupingPlan {
        handlers,
        applied,
        restrictions,
    }
}

/// Grouping-node keys above the request, outermost first. The walk stops at
/// the first non-grouping ancestor: anything above it belongs to another
/// hierarchy level.
fn grouping_chain(ctx: &ResolutionContext<'_>, parent: Option<&CachedNode>) -> Vec<NodeKey> {
    let mut chain = Vec::new();
    let mut current = parent.cloned();
    while let Some(node) = current {
        match &node.key {
            NodeKey::ClassGroup { .. } | NodeKey::PropertyGroup { .. } | NodeKey::LabelGroup { .. } => {
                chain.push(node.key.clone());
                current = node
                    .parent
                    .as_ref()
                    .and_then(|id| ctx.node_cache.node(id));
            }
            NodeKey::Instances { .. } => break,
        }
    }
    chain.reverse();
    chain
}

fn match_applied(handlers: &[Handler<'_>], chain: &[NodeKey]) -> (usize, Vec<Restriction>) {
    let mut applied = 0;
    let mut restrictions = Vec::new();
    for key in chain {
        let Some(handler) = handlers.get(applied) else {
            break;
        };
        let restriction = match (handler, key) {
            (Handler::Class | Handler::BaseClass { .. }, NodeKey::ClassGroup { class, polymorphic }) => {
                Some(Restriction::Class {
                    class: *class,
                    polymorphic: *polymorphic,
                })
            }
            (
                Handler::Property { spec },
                NodeKey::PropertyGroup {
                    property,
                    values,
                    range_index,
                    ..
                },
            ) if *property == spec.property => match range_index {
                Some(index) => Some(Restriction::PropertyRange {
                    property: property.clone(),
                    ranges: spec.ranges.clone(),
                    index: *index,
                }),
                None => Some(Restriction::PropertyValues {
                    property: property.clone(),
                    values: values.clone(),
                }),
            },
            (Handler::Label | Handler::SameLabel, NodeKey::LabelGroup { label }) => {
                Some(Restriction::Label {
                    label: label.clone(),
                })
            }
            _ => None,
        };
        match restriction {
            Some(restriction) => {
                restrictions.push(restriction);
                applied += 1;
            }
            None => break,
        }
    }
    (applied, restrictions)
}

/// Builds the query for the level the plan's state machine is at.
pub fn build_level(
    ctx: &ResolutionContext<'_>,
    plan: &GroupingPlan<'_>,
    parts: &BranchParts,
    alloc: &mut AliasAllocator,
) -> Result<LevelQuery, QueryBuilderError> {
    ctx.check_cancelled()?;

    match plan.next_handler() {
        None => {
            let mut select = parts.instance_select(RowContract::Instances, None);
            apply_restrictions(ctx, &mut select, &plan.restrictions, parts);
            Ok(LevelQuery {
                tree: select.into_tree(),
                grouped: false,
            })
        }
        Some(Handler::SameLabel) => {
            let mut inner = parts.instance_select(RowContract::Instances, None);
            apply_restrictions(ctx, &mut inner, &plan.restrictions, parts);
            Ok(LevelQuery {
                tree: wrap_same_label(inner, alloc)?,
                grouped: true,
            })
        }
        Some(Handler::Class) => {
            let mut inner = parts.instance_select(RowContract::Instances, None);
            apply_restrictions(ctx, &mut inner, &plan.restrictions, parts);
            Ok(LevelQuery {
                tree: wrap_class_groups(inner, None, ctx, parts, alloc),
                grouped: true,
            })
        }
        Some(Handler::BaseClass { spec }) => {
            let mut inner = parts.instance_select(RowContract::Instances, None);
            apply_restrictions(ctx, &mut inner, &plan.restrictions, parts);
            Ok(LevelQuery {
                tree: wrap_class_groups(inner, Some(*spec), ctx, parts, alloc),
                grouped: true,
            })
        }
        Some(Handler::Property { spec }) => {
            let grouping_value = grouping_value_expr(spec, &parts.alias);
            let mut inner =
                parts.instance_select(RowContract::PropertyGroupingInput, Some(grouping_value));
            apply_restrictions(ctx, &mut inner, &plan.restrictions, parts);
            Ok(LevelQuery {
                tree: wrap_property_groups(inner, *spec, alloc),
                grouped: true,
            })
        }
        Some(Handler::Label) => {
            let mut inner = parts.instance_select(RowContract::Instances, None);
            apply_restrictions(ctx, &mut inner, &plan.restrictions, parts);
            Ok(LevelQuery {
                tree: wrap_label_groups(inner, alloc),
                grouped: true,
            })
        }
    }
}

fn count_star() -> SqlExpr {
    SqlExpr::AggregateFnCall(AggregateFnCall {
        name: "COUNT".to_string(),
        args: vec![SqlExpr::Star],
    })
}

fn apply_restrictions(
    ctx: &ResolutionContext<'_>,
    select: &mut SelectQuery,
    restrictions: &[Restriction],
    parts: &BranchParts,
) {
    for restriction in restrictions {
        match restriction {
            Restriction::Class { class, polymorphic } => {
                let mut ids: Vec<ParamValue> = Vec::new();
                if *polymorphic {
                    if let Some(descriptor) = ctx.catalog.class_by_id(*class) {
                        ids.push(ParamValue::Id(class.0));
                        ids.extend(
                            ctx.catalog
                                .derived_classes(&descriptor.name)
                                .iter()
                                .map(|c| ParamValue::Id(c.id.0)),
                        );
                    }
                } else {
                    ids.push(ParamValue::Id(class.0));
                }
                if ids.is_empty() {
                    continue;
                }
                select.add_filter(SqlExpr::InList {
                    expr: Box::new(SqlExpr::property(&parts.alias, FIELD_CLASS_ID)),
                    items: ids,
                    negated: false,
                });
            }
            Restriction::PropertyValues { property, values } => {
                select.add_filter(SqlExpr::InList {
                    expr: Box::new(SqlExpr::property(&parts.alias, property)),
                    items: values.clone(),
                    negated: false,
                });
            }
            Restriction::PropertyRange {
                property,
                ranges,
                index,
            } => {
                let value = SqlExpr::property(&parts.alias, property);
                if *index >= 0 {
                    if let Some(range) = ranges.get(*index as usize) {
                        select.add_filter(SqlExpr::Between {
                            expr: Box::new(value),
                            low: ParamValue::Float(range.from),
                            high: ParamValue::Float(range.to),
                            negated: false,
                        });
                    }
                } else {
                    // The "other" bucket is the negation of every range.
                    for range in ranges {
                        select.add_filter(SqlExpr::Between {
                            expr: Box::new(SqlExpr::property(&parts.alias, property)),
                            low: ParamValue::Float(range.from),
                            high: ParamValue::Float(range.to),
                            negated: true,
                        });
                    }
                }
            }
            Restriction::Label { label } => {
                select.add_filter(SqlExpr::eq(
                    parts.label.clone(),
                    SqlExpr::Literal(ParamValue::String(label.clone())),
                ));
            }
        }
    }
}

/// Grouping key of a property-grouping level: the raw or display value, or
/// the first matching range's index with `-1` for values outside all ranges.
fn grouping_value_expr(spec: &PropertyGroupSpec, alias: &str) -> SqlExpr {
    let value = SqlExpr::property(alias, &spec.property);
    if spec.ranges.is_empty() {
        return match spec.grouping_value {
            GroupValueKind::RawValue => value,
            GroupValueKind::DisplayLabel => {
                engine_fn(FN_DISPLAY_VALUE, vec![value]).expect("registered function")
            }
        };
    }
    // Ranges are evaluated in declaration order; CASE gives first-match-wins.
    let when_then = spec
        .ranges
        .iter()
        .enumerate()
        .map(|(index, range)| {
            (
                SqlExpr::Between {
                    expr: Box::new(value.clone()),
                    low: ParamValue::Float(range.from),
                    high: ParamValue::Float(range.to),
                    negated: false,
                },
                SqlExpr::Literal(ParamValue::Integer(index as i64)),
            )
        })
        .collect();
    SqlExpr::Case(SqlCase {
        expr: None,
        when_then,
        else_expr: Some(Box::new(SqlExpr::Literal(ParamValue::Integer(-1)))),
    })
}

fn wrap_class_groups(
    inner: SelectQuery,
    base_spec: Option<&ClassGroupSpec>,
    ctx: &ResolutionContext<'_>,
    parts: &BranchParts,
    alloc: &mut AliasAllocator,
) -> QueryTree {
    let alias = alloc.next("q");
    let inner_class_id = SqlExpr::property(&alias, FIELD_CLASS_ID);

    // With a declared grouping base, concrete classes group under their
    // direct subclass of the base; anything outside the base keeps its own
    // class id.
    let group_id_expr = match base_spec.and_then(|s| s.base_class.as_deref()) {
        Some(base_name) => {
            let mut when_then = Vec::new();
            for concrete in &parts.class.concrete_ids {
                if let Some(bucket) = direct_subclass_bucket(ctx, *concrete, base_name) {
                    if bucket != *concrete {
                        when_then.push((
                            SqlExpr::Literal(ParamValue::Id(concrete.0)),
                            SqlExpr::Literal(ParamValue::Id(bucket.0)),
                        ));
                    }
                }
            }
            if when_then.is_empty() {
                inner_class_id.clone()
            } else {
                SqlExpr::Case(SqlCase {
                    expr: Some(Box::new(inner_class_id.clone())),
                    when_then,
                    else_expr: Some(Box::new(inner_class_id.clone())),
                })
            }
        }
        None => inner_class_id.clone(),
    };

    let mut outer = SelectQuery::new(
        SelectSource::Subquery {
            input: std::sync::Arc::new(inner.into_tree()),
            alias: alias.clone(),
        },
        RowContract::ClassGroups,
        parts.metadata.clone(),
    );
    outer.add_field(group_id_expr.clone(), FIELD_GROUP_CLASS_ID);
    outer.add_field(
        engine_fn(FN_CLASS_LABEL, vec![group_id_expr.clone()]).expect("registered function"),
        FIELD_DISPLAY_LABEL,
    );
    outer.add_field(count_star(), FIELD_GROUPED_COUNT);
    outer.set_group_by(vec![group_id_expr]);
    outer.into_tree()
}

/// The direct subclass of `base_name` that `concrete` falls under, or the
/// base itself when `concrete` is the base.
fn direct_subclass_bucket(
    ctx: &ResolutionContext<'_>,
    concrete: ClassId,
    base_name: &str,
) -> Option<ClassId> {
    let base = ctx.catalog.class_opt(base_name)?;
    let mut current = ctx.catalog.class_by_id(concrete)?;
    if current.id == base.id {
        return Some(base.id);
    }
    loop {
        let parent = ctx.catalog.class_opt(current.base.as_deref()?)?;
        if parent.id == base.id {
            return Some(current.id);
        }
        current = parent;
    }
}

fn wrap_property_groups(
    inner: SelectQuery,
    spec: &PropertyGroupSpec,
    alloc: &mut AliasAllocator,
) -> QueryTree {
    let alias = alloc.next("q");
    let grouping_value = SqlExpr::property(&alias, FIELD_GROUPING_VALUE);
    let metadata = inner.metadata.clone();

    let display_label = if spec.ranges.is_empty() {
        match spec.grouping_value {
            GroupValueKind::DisplayLabel => grouping_value.clone(),
            GroupValueKind::RawValue => {
                engine_fn(FN_DISPLAY_VALUE, vec![grouping_value.clone()])
                    .expect("registered function")
            }
        }
    } else {
        let when_then = spec
            .ranges
            .iter()
            .enumerate()
            .map(|(index, range)| {
                let label = range
                    .label
                    .clone()
                    .unwrap_or_else(|| format!("{} - {}", range.from, range.to));
                (
                    SqlExpr::Literal(ParamValue::Integer(index as i64)),
                    SqlExpr::Literal(ParamValue::String(label)),
                )
            })
            .collect();
        SqlExpr::Case(SqlCase {
            expr: Some(Box::new(grouping_value.clone())),
            when_then,
            else_expr: Some(Box::new(SqlExpr::Literal(ParamValue::String(
                "Other".to_string(),
            )))),
        })
    };

    let sorting_value = if spec.ranges.is_empty() {
        match spec.sorting_value {
            GroupValueKind::RawValue => grouping_value.clone(),
            GroupValueKind::DisplayLabel => {
                engine_fn(FN_DISPLAY_VALUE, vec![grouping_value.clone()])
                    .expect("registered function")
            }
        }
    } else {
        // Range groups keep declaration order.
        grouping_value.clone()
    };

    let mut outer = SelectQuery::new(
        SelectSource::Subquery {
            input: std::sync::Arc::new(inner.into_tree()),
            alias,
        },
        RowContract::PropertyGroups,
        metadata,
    );
    outer.add_field(grouping_value.clone(), FIELD_GROUPING_VALUE);
    outer.add_field(display_label, FIELD_DISPLAY_LABEL);
    outer.add_field(sorting_value, FIELD_SORTING_VALUE);
    outer.add_field(count_star(), FIELD_GROUPED_COUNT);
    outer.set_group_by(vec![grouping_value]);
    outer.into_tree()
}

fn wrap_label_groups(inner: SelectQuery, alloc: &mut AliasAllocator) -> QueryTree {
    let alias = alloc.next("q");
    let label = SqlExpr::property(&alias, FIELD_DISPLAY_LABEL);
    let metadata = inner.metadata.clone();
    let mut outer = SelectQuery::new(
        SelectSource::Subquery {
            input: std::sync::Arc::new(inner.into_tree()),
            alias,
        },
        RowContract::LabelGroups,
        metadata,
    );
    outer.add_field(label.clone(), FIELD_DISPLAY_LABEL);
    outer.add_field(count_star(), FIELD_GROUPED_COUNT);
    outer.set_group_by(vec![label]);
    outer.into_tree()
}

/// Same-label coalescing, evaluated by the data rather than statically: a
/// groups branch keeps labels shared by at least two siblings, a singles
/// branch carries every label with exactly one member (materialized as
/// plain instance nodes by the caller, via InstanceCount = 1). Both expose
/// the same contract, so the union's field set is stable.
fn wrap_same_label(
    inner: SelectQuery,
    alloc: &mut AliasAllocator,
) -> Result<QueryTree, QueryBuilderError> {
    let shared = std::sync::Arc::new(inner.into_tree());
    let groups = same_label_branch(shared.clone(), alloc, Operator::GreaterThanEqual, 2);
    let singles = same_label_branch(shared, alloc, Operator::Equal, 1);
    Ok(QueryTree::union(vec![groups, singles])?)
}

fn same_label_branch(
    inner: std::sync::Arc<QueryTree>,
    alloc: &mut AliasAllocator,
    count_op: Operator,
    count: i64,
) -> QueryTree {
    let alias = alloc.next("q");
    let label = SqlExpr::property(&alias, FIELD_DISPLAY_LABEL);
    let metadata = inner.metadata().clone();
    let mut select = SelectQuery::new(
        SelectSource::Subquery {
            input: inner,
            alias: alias.clone(),
        },
        RowContract::GroupedInstances,
        metadata,
    );
    select.add_field(label.clone(), FIELD_DISPLAY_LABEL);
    select.add_field(
        engine_fn(
            FN_AGGREGATE_KEYS,
            vec![
                SqlExpr::property(&alias, FIELD_CLASS_ID),
                SqlExpr::property(&alias, FIELD_INSTANCE_ID),
            ],
        )
        .expect("registered function"),
        FIELD_INSTANCE_KEYS,
    );
    select.add_field(count_star(), FIELD_INSTANCE_COUNT);
    select.set_group_by(vec![label]);
    select.add_having(SqlExpr::OperatorApplicationExp(OperatorApplication {
        operator: count_op,
        operands: vec![count_star(), SqlExpr::Literal(ParamValue::Integer(count))],
    }));
    select.into_tree()
}
