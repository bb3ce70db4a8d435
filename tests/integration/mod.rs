//! End-to-end: rule set in YAML, catalog built in code, queries serialized
//! to SQL with bound parameters.

use navquery::hierarchy::{CachedNode, MemoryNodeCache, NodeId, NodeKey};
use navquery::query_ast::sql_expr::{BoundQuery, ParamValue};
use navquery::query_ast::RowContract;
use navquery::query_builder::{QueryBuilder, ResolutionContext};
use navquery::rules::config::load_ruleset_from_yaml;
use navquery::rules::Specification;
use navquery::schema_catalog::{
    Multiplicity, PrimitiveType, PropertyDescriptor, PropertyKind, SchemaCatalog,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

const RULESET: &str = r#"
id: project-tree
supportedSchemas: "Core"
rootRules:
  - priority: 1000
    specifications:
      - kind: instancesOfClasses
        classes:
          - class: Widget
        groupByClass: true
childRules:
  - priority: 1000
    specifications:
      - kind: relatedInstances
        path:
          - relationship: Owns
            direction: forward
sortingRules:
  - class: { class: Widget, polymorphic: true }
    priority: 10
    kind: byProperty
    property: Code
labelOverrides:
  - class: { class: Widget, polymorphic: true }
    priority: 1
    properties: [Code]
groupingRules:
  - class: { class: Widget, polymorphic: true }
    priority: 5
    groups:
      - kind: byProperty
        property: Size
        ranges:
          - { from: 0, to: 10, label: "small" }
          - { from: 11, to: 100, label: "large" }
"#;

fn catalog() -> SchemaCatalog {
    let mut catalog = SchemaCatalog::new();
    catalog.insert_class("Core", "Folder", None, false).unwrap();
    catalog.insert_class("Core", "Widget", None, false).unwrap();
    for (class, prop, kind) in [
        ("Folder", "Name", PrimitiveType::Text),
        ("Widget", "Code", PrimitiveType::Text),
        ("Widget", "Size", PrimitiveType::Double),
    ] {
        catalog
            .insert_property(
                class,
                PropertyDescriptor {
                    name: prop.to_string(),
                    kind: PropertyKind::Primitive(kind),
                },
            )
            .unwrap();
    }
    catalog
        .insert_relationship(
            "Core",
            "Owns",
            "Folder",
            "Widget",
            Multiplicity::One,
            Multiplicity::Many,
        )
        .unwrap();
    catalog
}

#[test]
fn root_level_produces_class_groups_over_the_rule_classes() {
    init_logging();
    let catalog = catalog();
    let cache = MemoryNodeCache::new();
    let ruleset = load_ruleset_from_yaml(RULESET).unwrap();
    let ctx = ResolutionContext::new(&catalog, &cache, &ruleset, "Core");
    let builder = QueryBuilder::new(ctx);

    let rule = &ruleset.root_rules[0];
    let spec = &rule.specifications[0];
    let queries = builder.queries(None, rule, spec).unwrap();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].contract(), RowContract::ClassGroups);

    let bound = queries[0].to_bound_query();
    assert!(bound.sql.contains("GROUP BY"));
    assert!(bound.sql.contains("class_label("));
    assert!(bound.sql.contains("FROM Core.Widget"));
}

#[test]
fn child_level_under_a_folder_is_filtered_grouped_and_labeled() -> anyhow::Result<()> {
    init_logging();
    let catalog = catalog();
    let folder_id = catalog.class("Folder")?.id;

    let mut cache = MemoryNodeCache::new();
    let parent = NodeId("folder-7".to_string());
    cache.insert(CachedNode {
        id: parent.clone(),
        key: NodeKey::Instances {
            classes: vec![folder_id],
        },
        instance_query: Some(BoundQuery {
            sql: "SELECT InstanceId FROM Core.Folder WHERE InstanceId = ?".to_string(),
            params: vec![ParamValue::Id(7)],
        }),
        parent: None,
    });

    let ruleset = load_ruleset_from_yaml(RULESET)?;
    let ctx = ResolutionContext::new(&catalog, &cache, &ruleset, "Core");
    let builder = QueryBuilder::new(ctx);

    let rule = &ruleset.child_rules[0];
    let spec = &rule.specifications[0];
    let queries = builder.queries(Some(&parent), rule, spec)?;
    assert_eq!(queries.len(), 1);

    // The Widget grouping rule applies to the related level too: the first
    // level under the folder is the Size range groups.
    assert_eq!(queries[0].contract(), RowContract::PropertyGroups);

    let bound = queries[0].to_bound_query();
    // Parent binding travels as a bound parameter.
    assert!(bound.params.contains(&ParamValue::Id(7)));
    // Range bounds and labels are bound, never inlined.
    assert!(bound.params.contains(&ParamValue::String("small".to_string())));
    assert!(bound.params.contains(&ParamValue::Float(11.0)));
    assert!(!bound.sql.contains("small"));

    // The label override's Code property feeds the display label.
    assert!(bound.sql.contains("NULLIF"));
    assert!(bound.sql.contains("COALESCE"));
    Ok(())
}

#[test]
fn builds_are_deterministic_across_identical_requests() {
    let catalog = catalog();
    let cache = MemoryNodeCache::new();
    let ruleset = load_ruleset_from_yaml(RULESET).unwrap();
    let ctx = ResolutionContext::new(&catalog, &cache, &ruleset, "Core");
    let builder = QueryBuilder::new(ctx);

    let rule = &ruleset.root_rules[0];
    let spec = &rule.specifications[0];
    let first = builder.queries(None, rule, spec).unwrap();
    let second = builder.queries(None, rule, spec).unwrap();
    assert_eq!(
        first.iter().map(|q| q.to_bound_query()).collect::<Vec<_>>(),
        second.iter().map(|q| q.to_bound_query()).collect::<Vec<_>>()
    );
}

#[test]
fn search_specifications_flow_through_the_same_pipeline() {
    let catalog = catalog();
    let cache = MemoryNodeCache::new();
    let yaml = r#"
id: search
rootRules:
  - specifications:
      - kind: search
        queries:
          - class: Widget
            query: "SELECT ClassId, InstanceId, Code FROM widget_index WHERE match = ?"
            parameters: ["chassis"]
        groupByLabel: true
"#;
    let ruleset = load_ruleset_from_yaml(yaml).unwrap();
    let ctx = ResolutionContext::new(&catalog, &cache, &ruleset, "Core");
    let builder = QueryBuilder::new(ctx);

    let rule = &ruleset.root_rules[0];
    let spec: &Specification = &rule.specifications[0];
    let queries = builder.queries(None, rule, spec).unwrap();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].contract(), RowContract::LabelGroups);

    let bound = queries[0].to_bound_query();
    assert!(bound.sql.contains("widget_index"));
    assert!(bound
        .params
        .contains(&ParamValue::String("chassis".to_string())));
}
