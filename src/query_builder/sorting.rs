//! Sorting resolution.
//!
//! Precedence, highest first: the specification's do-not-sort flag, then
//! the highest-priority matching sorting rule, then the default label sort.
//! A class with an explicit don't-sort rule ends up unsorted; a class with
//! no rule at all is label-sorted. Grouped levels are never rule-sorted;
//! only their contract's natural order applies.

use crate::query_ast::functions::{engine_fn, FN_SORT_KEY};
use crate::query_ast::sql_expr::SqlExpr;
use crate::query_ast::{
    OrderByItem, OrderByOrder, RowContract, FIELD_DISPLAY_LABEL, FIELD_SORTING_VALUE,
};
use crate::rules::{SortKind, SpecificationFlags};

use super::context::ResolutionContext;
use super::grouping::class_matches;

#[derive(Debug, Clone, PartialEq)]
pub enum SortDecision {
    Unsorted,
    /// Natural order of a grouping contract.
    Natural(RowContract),
    /// Rule-driven property sort on the instance level.
    ByProperty { property: String, ascending: bool },
    /// Default: sort by resolved display label.
    ByLabel,
}

pub fn resolve_instance_sorting(
    ctx: &ResolutionContext<'_>,
    class_name: &str,
    flags: &SpecificationFlags,
) -> SortDecision {
    if flags.do_not_sort || ctx.ruleset.default_do_not_sort {
        return SortDecision::Unsorted;
    }
    for rule in ctx.ruleset.sorting_rules_by_priority() {
        if !class_matches(ctx, &rule.class, class_name) {
            continue;
        }
        match &rule.sort {
            SortKind::DoNotSort => return SortDecision::Unsorted,
            SortKind::ByProperty {
                property,
                ascending,
            } => {
                if ctx.catalog.property_opt(class_name, property).is_none() {
                    log::debug!(
                        "sorting rule property '{}' does not exist on '{}'",
                        property,
                        class_name
                    );
                    continue;
                }
                return SortDecision::ByProperty {
                    property: property.clone(),
                    ascending: *ascending,
                };
            }
        }
    }
    SortDecision::ByLabel
}

/// ORDER BY items applied inside one branch, where the entity alias is in
/// scope.
pub fn branch_order_by(decision: &SortDecision, entity_alias: &str) -> Vec<OrderByItem> {
    match decision {
        SortDecision::Unsorted => Vec::new(),
        SortDecision::ByProperty {
            property,
            ascending,
        } => vec![OrderByItem {
            expression: engine_fn(FN_SORT_KEY, vec![SqlExpr::property(entity_alias, property)])
                .expect("registered function"),
            order: if *ascending {
                OrderByOrder::Asc
            } else {
                OrderByOrder::Desc
            },
        }],
        SortDecision::ByLabel => vec![label_order_item()],
        SortDecision::Natural(contract) => contract_order_by(*contract),
    }
}

/// ORDER BY items referencing contract fields, usable at the outermost
/// level of a union.
pub fn contract_order_by(contract: RowContract) -> Vec<OrderByItem> {
    match contract {
        RowContract::PropertyGroups => vec![OrderByItem {
            expression: SqlExpr::column(FIELD_SORTING_VALUE),
            order: OrderByOrder::Asc,
        }],
        _ => vec![label_order_item()],
    }
}

/// true when the decision orders by contract fields only, so it can be
/// hoisted above a union.
pub fn is_hoistable(decision: &SortDecision) -> bool {
    matches!(decision, SortDecision::ByLabel | SortDecision::Natural(_))
}

fn label_order_item() -> OrderByItem {
    OrderByItem {
        expression: engine_fn(FN_SORT_KEY, vec![SqlExpr::column(FIELD_DISPLAY_LABEL)])
            .expect("registered function"),
        order: OrderByOrder::Asc,
    }
}
