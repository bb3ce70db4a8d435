//! Composable query-AST model.
//!
//! Query trees are immutable once a layer wraps them: every producer
//! (filtering, labeling, grouping, sorting) either appends clauses to the
//! select it is currently building or constructs a new parent select that
//! owns the previous tree as a subquery source. No construction operation
//! ever un-sets a previously attached clause.

use std::collections::BTreeSet;
use std::sync::Arc;

pub mod errors;
pub mod functions;
pub mod sql_expr;
mod to_sql;

use crate::rules::{ChildrenHint, RelDirection};
use crate::schema_catalog::ClassId;
use errors::QueryAstError;
use sql_expr::{BoundQuery, ParamValue, SqlExpr};

pub const FIELD_CLASS_ID: &str = "ClassId";
pub const FIELD_INSTANCE_ID: &str = "InstanceId";
pub const FIELD_DISPLAY_LABEL: &str = "DisplayLabel";
pub const FIELD_GROUPING_VALUE: &str = "GroupingValue";
pub const FIELD_SORTING_VALUE: &str = "SortingValue";
pub const FIELD_GROUP_CLASS_ID: &str = "GroupClassId";
pub const FIELD_GROUPED_COUNT: &str = "GroupedCount";
pub const FIELD_INSTANCE_KEYS: &str = "InstanceKeys";
pub const FIELD_INSTANCE_COUNT: &str = "InstanceCount";

/// The shape of rows a query exposes. Outer layers (grouping, sorting,
/// unioning) reference inner-layer output exclusively through these fixed
/// field names, which makes the field list of every query load-bearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowContract {
    /// One row per selectable instance.
    Instances,
    /// Instance rows extended with the grouping value a property-grouping
    /// layer consumes.
    PropertyGroupingInput,
    /// One row per class group.
    ClassGroups,
    /// One row per property value / range group.
    PropertyGroups,
    /// One row per distinct display label.
    LabelGroups,
    /// One row per label with aggregated instance keys.
    GroupedInstances,
}

impl RowContract {
    pub fn fields(&self) -> &'static [&'static str] {
        match self {
            RowContract::Instances => &[FIELD_CLASS_ID, FIELD_INSTANCE_ID, FIELD_DISPLAY_LABEL],
            RowContract::PropertyGroupingInput => &[
                FIELD_CLASS_ID,
                FIELD_INSTANCE_ID,
                FIELD_DISPLAY_LABEL,
                FIELD_GROUPING_VALUE,
            ],
            RowContract::ClassGroups => &[FIELD_GROUP_CLASS_ID, FIELD_DISPLAY_LABEL, FIELD_GROUPED_COUNT],
            RowContract::PropertyGroups => &[
                FIELD_GROUPING_VALUE,
                FIELD_DISPLAY_LABEL,
                FIELD_SORTING_VALUE,
                FIELD_GROUPED_COUNT,
            ],
            RowContract::LabelGroups => &[FIELD_DISPLAY_LABEL, FIELD_GROUPED_COUNT],
            RowContract::GroupedInstances => &[FIELD_DISPLAY_LABEL, FIELD_INSTANCE_KEYS, FIELD_INSTANCE_COUNT],
        }
    }
}

/// Per-node hint flags carried through to whoever materializes UI nodes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeHints {
    pub hide_if_no_children: bool,
    pub hide_if_only_one_child: bool,
    pub hide_in_hierarchy: bool,
    pub hide_expression: Option<String>,
    pub children_hint: ChildrenHint,
}

/// Metadata owned by the outermost query of a branch. Unioning branches
/// merges these by set union.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultMetadata {
    pub direction: Option<RelDirection>,
    pub relationship_classes: BTreeSet<String>,
    pub instance_classes: BTreeSet<String>,
    pub hints: NodeHints,
}

impl ResultMetadata {
    pub fn new() -> Self {
        ResultMetadata::default()
    }

    pub fn merge(&mut self, other: &ResultMetadata) {
        if self.direction != other.direction {
            self.direction = None;
        }
        self.relationship_classes
            .extend(other.relationship_classes.iter().cloned());
        self.instance_classes
            .extend(other.instance_classes.iter().cloned());
        self.hints.hide_if_no_children |= other.hints.hide_if_no_children;
        self.hints.hide_if_only_one_child |= other.hints.hide_if_only_one_child;
        self.hints.hide_in_hierarchy |= other.hints.hide_in_hierarchy;
        if self.hints.hide_expression.is_none() {
            self.hints.hide_expression = other.hints.hide_expression.clone();
        }
        if self.hints.children_hint != other.hints.children_hint {
            self.hints.children_hint = ChildrenHint::Unknown;
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct SelectField {
    pub expression: SqlExpr,
    pub alias: String,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, PartialEq, Clone)]
pub struct JoinClause {
    pub table: String,
    pub alias: String,
    pub on: Vec<SqlExpr>,
    pub kind: JoinKind,
}

/// A class selection with polymorphism pre-resolved: the resolver expands
/// exclusions to concrete class-id sets before the AST is built.
#[derive(Debug, PartialEq, Clone)]
pub struct ClassSelect {
    pub class: ClassId,
    pub qualified_name: String,
    pub alias: String,
    pub polymorphic: bool,
    pub excluded_class_ids: Vec<ClassId>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum SelectSource {
    Class(ClassSelect),
    Subquery { input: Arc<QueryTree>, alias: String },
    /// Externally-supplied parameterized query (search specifications).
    Raw {
        sql: String,
        params: Vec<ParamValue>,
        alias: String,
    },
}

impl SelectSource {
    pub fn alias(&self) -> &str {
        match self {
            SelectSource::Class(c) => &c.alias,
            SelectSource::Subquery { alias, .. } => alias,
            SelectSource::Raw { alias, .. } => alias,
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum OrderByOrder {
    Asc,
    Desc,
}

#[derive(Debug, PartialEq, Clone)]
pub struct OrderByItem {
    pub expression: SqlExpr,
    pub order: OrderByOrder,
}

#[derive(Debug, PartialEq, Clone)]
pub struct SelectQuery {
    pub source: SelectSource,
    pub fields: Vec<SelectField>,
    pub joins: Vec<JoinClause>,
    /// AND-ed together.
    pub filters: Vec<SqlExpr>,
    pub group_by: Vec<SqlExpr>,
    pub having: Vec<SqlExpr>,
    pub order_by: Vec<OrderByItem>,
    pub contract: RowContract,
    pub metadata: ResultMetadata,
}

impl SelectQuery {
    pub fn new(source: SelectSource, contract: RowContract, metadata: ResultMetadata) -> Self {
        SelectQuery {
            source,
            fields: Vec::new(),
            joins: Vec::new(),
            filters: Vec::new(),
            group_by: Vec::new(),
            having: Vec::new(),
            order_by: Vec::new(),
            contract,
            metadata,
        }
    }

    pub fn add_field(&mut self, expression: SqlExpr, alias: &str) {
        self.fields.push(SelectField {
            expression,
            alias: alias.to_string(),
        });
    }

    pub fn add_join(&mut self, join: JoinClause) {
        self.joins.push(join);
    }

    pub fn add_filter(&mut self, filter: SqlExpr) {
        self.filters.push(filter);
    }

    pub fn add_having(&mut self, predicate: SqlExpr) {
        self.having.push(predicate);
    }

    pub fn add_order_by(&mut self, item: OrderByItem) {
        self.order_by.push(item);
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.alias.as_str()).collect()
    }

    /// Attaches GROUP BY expressions. The select list must match the query's
    /// row contract exactly at this point; a mismatch is an internal bug in
    /// whatever layer produced the select list, so it fails immediately.
    pub fn set_group_by(&mut self, expressions: Vec<SqlExpr>) {
        let expected = self.contract.fields();
        let actual = self.field_names();
        if actual != expected {
            panic!(
                "grouped select must expose exactly its contract fields; expected {:?}, found {:?}",
                expected, actual
            );
        }
        self.group_by = expressions;
    }

    pub fn into_tree(self) -> QueryTree {
        QueryTree::Select(Box::new(self))
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct UnionQuery {
    pub branches: Vec<QueryTree>,
    /// Hoisted outer ordering, applied once across all branches.
    pub order_by: Vec<OrderByItem>,
    pub contract: RowContract,
    pub metadata: ResultMetadata,
}

#[derive(Debug, PartialEq, Clone)]
pub enum QueryTree {
    Select(Box<SelectQuery>),
    Union(UnionQuery),
}

impl QueryTree {
    pub fn contract(&self) -> RowContract {
        match self {
            QueryTree::Select(select) => select.contract,
            QueryTree::Union(union) => union.contract,
        }
    }

    pub fn metadata(&self) -> &ResultMetadata {
        match self {
            QueryTree::Select(select) => &select.metadata,
            QueryTree::Union(union) => &union.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ResultMetadata {
        match self {
            QueryTree::Select(select) => &mut select.metadata,
            QueryTree::Union(union) => &mut union.metadata,
        }
    }

    /// Combines branches with UNION ALL. A single branch is returned
    /// unchanged. All branches must expose the same row contract; a mismatch
    /// means some layer produced an inconsistent field set, which is an
    /// internal bug, not bad input.
    pub fn union(mut branches: Vec<QueryTree>) -> Result<QueryTree, QueryAstError> {
        if branches.is_empty() {
            return Err(QueryAstError::EmptyUnion);
        }
        if branches.len() == 1 {
            return Ok(branches.pop().expect("non-empty"));
        }
        let contract = branches[0].contract();
        let mut metadata = branches[0].metadata().clone();
        for branch in branches.iter().skip(1) {
            if branch.contract() != contract {
                panic!(
                    "union branches must share one row contract; found {:?} and {:?}",
                    contract,
                    branch.contract()
                );
            }
            metadata.merge(branch.metadata());
        }
        Ok(QueryTree::Union(UnionQuery {
            branches,
            order_by: Vec::new(),
            contract,
            metadata,
        }))
    }

    /// Attaches the final outer ordering of a union, applied once at the
    /// outermost level.
    pub fn set_outer_order_by(&mut self, order_by: Vec<OrderByItem>) {
        match self {
            QueryTree::Select(select) => select.order_by = order_by,
            QueryTree::Union(union) => union.order_by = order_by,
        }
    }

    /// Serializes the tree to query text with bound parameters.
    pub fn to_bound_query(&self) -> BoundQuery {
        let mut sql = String::new();
        let mut params = Vec::new();
        to_sql::write_query_tree(self, &mut sql, &mut params);
        BoundQuery { sql, params }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance_select(alias: &str) -> SelectQuery {
        let mut select = SelectQuery::new(
            SelectSource::Class(ClassSelect {
                class: ClassId(1),
                qualified_name: "Core.Widget".to_string(),
                alias: alias.to_string(),
                polymorphic: true,
                excluded_class_ids: vec![],
            }),
            RowContract::Instances,
            ResultMetadata::new(),
        );
        select.add_field(SqlExpr::property(alias, FIELD_CLASS_ID), FIELD_CLASS_ID);
        select.add_field(SqlExpr::property(alias, FIELD_INSTANCE_ID), FIELD_INSTANCE_ID);
        select.add_field(SqlExpr::property(alias, "Label"), FIELD_DISPLAY_LABEL);
        select
    }

    #[test]
    #[should_panic(expected = "contract fields")]
    fn group_by_on_mismatched_field_set_panics() {
        let mut select = instance_select("w0");
        select.fields.pop();
        select.set_group_by(vec![SqlExpr::column(FIELD_CLASS_ID)]);
    }

    #[test]
    #[should_panic(expected = "row contract")]
    fn union_of_mixed_contracts_panics() {
        let a = instance_select("a0").into_tree();
        let mut b = instance_select("b0");
        b.contract = RowContract::LabelGroups;
        let _ = QueryTree::union(vec![a, b.into_tree()]);
    }

    #[test]
    fn union_merges_metadata_sets() {
        let mut a = instance_select("a0");
        a.metadata.instance_classes.insert("Core.Widget".to_string());
        let mut b = instance_select("b0");
        b.metadata.instance_classes.insert("Core.Gadget".to_string());
        b.metadata.relationship_classes.insert("Core.Owns".to_string());
        let tree = QueryTree::union(vec![a.into_tree(), b.into_tree()]).unwrap();
        let meta = tree.metadata();
        assert_eq!(meta.instance_classes.len(), 2);
        assert!(meta.relationship_classes.contains("Core.Owns"));
    }

    #[test]
    fn single_branch_union_is_identity() {
        let tree = instance_select("a0").into_tree();
        let unioned = QueryTree::union(vec![tree.clone()]).unwrap();
        assert_eq!(tree, unioned);
    }
}
