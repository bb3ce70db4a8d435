//! Relationship-path shape and traversal tests.

use super::{as_select, as_union, nav_rule, Fixture};
use crate::query_ast::sql_expr::SqlExpr;
use crate::query_ast::RowContract;
use crate::query_builder::QueryBuilder;
use crate::rules::{
    PathStepSpec, RelDirection, RelatedInstancesSpec, Specification, SpecificationFlags,
};

fn related_spec(path: Vec<PathStepSpec>, skip: usize) -> Specification {
    Specification::RelatedInstances(RelatedInstancesSpec {
        path,
        skip_related_level: skip,
        direction: RelDirection::Forward,
        instance_filter: None,
        related_aliases: vec![],
        supported_schemas: None,
        flags: SpecificationFlags::default(),
    })
}

fn step(relationship: &str) -> PathStepSpec {
    PathStepSpec {
        relationship: relationship.to_string(),
        direction: RelDirection::Forward,
        target_class: None,
    }
}

/// A single to-many hop compiles to a direct JOIN on the relationship
/// table, bound to the parent's instance-key query.
#[test]
fn single_forward_hop_compiles_to_join() {
    let mut fixture = Fixture::new();
    let parent = fixture.insert_folder_parent();
    let spec = related_spec(vec![step("Owns")], 0);
    let builder = QueryBuilder::new(fixture.ctx());
    let queries = builder.queries(Some(&parent), &nav_rule(&spec), &spec).unwrap();
    assert_eq!(queries.len(), 1);

    let select = as_select(&queries[0]);
    assert_eq!(select.joins.len(), 1);
    assert!(select.joins[0].table.contains("Owns"));
    let has_parent_binding = select
        .filters
        .iter()
        .any(|f| matches!(f, SqlExpr::InBoundQuery(b) if b.query.sql.contains("Core.Folder")));
    assert!(has_parent_binding);
}

/// A path whose second hop lands on a to-one end must not join (a join
/// could collapse or multiply selected rows); it compiles to an IN-subquery
/// chain over the relationship tables instead.
#[test]
fn many_to_one_tail_compiles_to_in_filter() {
    let mut fixture = Fixture::new();
    let parent = fixture.insert_folder_parent();
    let spec = related_spec(vec![step("Owns"), step("MadeBy")], 0);
    let builder = QueryBuilder::new(fixture.ctx());
    let queries = builder.queries(Some(&parent), &nav_rule(&spec), &spec).unwrap();
    assert_eq!(queries.len(), 1);

    let select = as_select(&queries[0]);
    assert!(select.joins.is_empty());
    let chain = select
        .filters
        .iter()
        .find_map(|f| match f {
            SqlExpr::InBoundQuery(b) => Some(&b.query.sql),
            _ => None,
        })
        .expect("IN-subquery chain");
    assert!(chain.contains("Core.MadeBy"));
    assert!(chain.contains("Core.Owns"));
    assert!(chain.contains("Core.Folder"));

    // The selected class is the path's end class.
    assert_eq!(select.metadata.instance_classes.len(), 1);
    assert!(select.metadata.instance_classes.contains("Core.Maker"));
}

/// A hop ending on an abstract class splits into one branch per direct
/// subclass, merged by union.
#[test]
fn abstract_hop_end_branches_per_leaf_target() {
    let mut fixture = Fixture::new();
    let parent = fixture.insert_folder_parent();
    let spec = related_spec(vec![step("Holds")], 0);
    let builder = QueryBuilder::new(fixture.ctx());
    let queries = builder.queries(Some(&parent), &nav_rule(&spec), &spec).unwrap();
    assert_eq!(queries.len(), 1);

    let union = as_union(&queries[0]);
    assert_eq!(union.branches.len(), 2);
    let sources: Vec<&str> = union
        .branches
        .iter()
        .map(|b| as_select(b).source.alias())
        .collect();
    // Each branch numbers its own aliases.
    assert_ne!(sources[0], sources[1]);
}

/// Skipping two related levels walks Folder -> Widget -> Maker.
#[test]
fn skip_levels_walks_the_relationship_chain() {
    let mut fixture = Fixture::new();
    let parent = fixture.insert_folder_parent();
    let spec = related_spec(vec![], 2);
    let builder = QueryBuilder::new(fixture.ctx());
    let queries = builder.queries(Some(&parent), &nav_rule(&spec), &spec).unwrap();
    assert_eq!(queries.len(), 1);

    let metadata = queries[0].metadata();
    assert!(metadata.instance_classes.contains("Core.Maker"));
    assert!(metadata.relationship_classes.contains("Core.Owns"));
    assert!(metadata.relationship_classes.contains("Core.MadeBy"));
}

/// A walk that cannot complete produces an empty sequence, not an error.
#[test]
fn skip_levels_beyond_the_schema_is_empty() {
    let mut fixture = Fixture::new();
    let parent = fixture.insert_folder_parent();
    let spec = related_spec(vec![], 4);
    let builder = QueryBuilder::new(fixture.ctx());
    let queries = builder.queries(Some(&parent), &nav_rule(&spec), &spec).unwrap();
    assert!(queries.is_empty());
}

#[test]
fn related_request_without_parent_instances_is_empty() {
    let fixture = Fixture::new();
    let spec = related_spec(vec![step("Owns")], 0);
    let builder = QueryBuilder::new(fixture.ctx());
    let queries = builder.queries(None, &nav_rule(&spec), &spec).unwrap();
    assert!(queries.is_empty());
}

#[test]
fn unknown_relationship_is_empty_not_an_error() {
    let mut fixture = Fixture::new();
    let parent = fixture.insert_folder_parent();
    let spec = related_spec(vec![step("NoSuchRel")], 0);
    let builder = QueryBuilder::new(fixture.ctx());
    let queries = builder.queries(Some(&parent), &nav_rule(&spec), &spec).unwrap();
    assert!(queries.is_empty());
}

#[test]
fn related_branches_stay_on_instances_contract() {
    let mut fixture = Fixture::new();
    let parent = fixture.insert_folder_parent();
    let spec = related_spec(vec![step("Owns")], 0);
    let builder = QueryBuilder::new(fixture.ctx());
    let queries = builder.queries(Some(&parent), &nav_rule(&spec), &spec).unwrap();
    assert_eq!(queries[0].contract(), RowContract::Instances);
}
