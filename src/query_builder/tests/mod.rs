//! Query-builder tests: shared catalog/ruleset fixtures plus themed suites.

mod grouping_tests;
mod path_tests;

use std::cell::RefCell;

use crate::hierarchy::{CachedNode, MemoryNodeCache, NodeId, NodeKey};
use crate::query_ast::sql_expr::BoundQuery;
use crate::query_ast::{QueryTree, SelectQuery, SelectSource, UnionQuery};
use crate::query_builder::context::{ResolutionContext, UsedClassesListener};
use crate::rules::{NavigationRule, RuleSet, Specification};
use crate::schema_catalog::{
    Multiplicity, PrimitiveType, PropertyDescriptor, PropertyKind, SchemaCatalog,
};

/// Catalog used across the suites:
///
/// Element (abstract)
///   Widget  [Code, Size, Name; label = Name]
///     Gadget
///       MiniGadget
///     Sprocket
///   Doodad  [Name]
/// Folder  [Name; label = Name]
/// Maker   [Name]
///
/// Owns:   Folder -> Widget   (1:N)
/// MadeBy: Widget -> Maker    (N:1)
/// Holds:  Folder -> Element  (1:N)
pub(crate) fn test_catalog() -> SchemaCatalog {
    let mut catalog = SchemaCatalog::new();
    catalog.insert_class("Core", "Element", None, true).unwrap();
    catalog
        .insert_class("Core", "Widget", Some("Element"), false)
        .unwrap();
    catalog
        .insert_class("Core", "Gadget", Some("Widget"), false)
        .unwrap();
    catalog
        .insert_class("Core", "MiniGadget", Some("Gadget"), false)
        .unwrap();
    catalog
        .insert_class("Core", "Sprocket", Some("Widget"), false)
        .unwrap();
    catalog
        .insert_class("Core", "Doodad", Some("Element"), false)
        .unwrap();
    catalog.insert_class("Core", "Folder", None, false).unwrap();
    catalog.insert_class("Core", "Maker", None, false).unwrap();

    for (class, property, kind) in [
        ("Widget", "Code", PrimitiveType::Text),
        ("Widget", "Size", PrimitiveType::Double),
        ("Widget", "Name", PrimitiveType::Text),
        ("Doodad", "Name", PrimitiveType::Text),
        ("Folder", "Name", PrimitiveType::Text),
        ("Maker", "Name", PrimitiveType::Text),
    ] {
        catalog
            .insert_property(
                class,
                PropertyDescriptor {
                    name: property.to_string(),
                    kind: PropertyKind::Primitive(kind),
                },
            )
            .unwrap();
    }
    catalog.set_label_property("Widget", "Name").unwrap();
    catalog.set_label_property("Folder", "Name").unwrap();

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
        .insert_relationship(
            "Core",
            "MadeBy",
            "Widget",
            "Maker",
            Multiplicity::Many,
            Multiplicity::One,
        )
        .unwrap();
    catalog
        .insert_relationship(
            "Core",
            "Holds",
            "Folder",
            "Element",
            Multiplicity::One,
            Multiplicity::Many,
        )
        .unwrap();
    catalog
}

pub(crate) struct Fixture {
    pub catalog: SchemaCatalog,
    pub cache: MemoryNodeCache,
    pub ruleset: RuleSet,
}

impl Fixture {
    pub fn new() -> Self {
        Fixture {
            catalog: test_catalog(),
            cache: MemoryNodeCache::new(),
            ruleset: RuleSet::new("test"),
        }
    }

    pub fn ctx(&self) -> ResolutionContext<'_> {
        ResolutionContext::new(&self.catalog, &self.cache, &self.ruleset, "Core")
    }

    /// Inserts an instance-bearing Folder node and returns its id.
    pub fn insert_folder_parent(&mut self) -> NodeId {
        let folder_id = self.catalog.class("Folder").unwrap().id;
        let id = NodeId("folder-1".to_string());
        self.cache.insert(CachedNode {
            id: id.clone(),
            key: NodeKey::Instances {
                classes: vec![folder_id],
            },
            instance_query: Some(BoundQuery {
                sql: "SELECT InstanceId FROM Core.Folder WHERE Name = ?".to_string(),
                params: vec![crate::query_ast::sql_expr::ParamValue::String(
                    "root".to_string(),
                )],
            }),
            parent: None,
        });
        id
    }
}

pub(crate) fn nav_rule(spec: &Specification) -> NavigationRule {
    NavigationRule {
        priority: 1000,
        specifications: vec![spec.clone()],
    }
}

pub(crate) fn as_select(tree: &QueryTree) -> &SelectQuery {
    match tree {
        QueryTree::Select(select) => select,
        other => panic!("expected a select, found {other:?}"),
    }
}

pub(crate) fn as_union(tree: &QueryTree) -> &UnionQuery {
    match tree {
        QueryTree::Union(union) => union,
        other => panic!("expected a union, found {other:?}"),
    }
}

/// The subquery input of a wrapping select.
pub(crate) fn inner_of(select: &SelectQuery) -> &QueryTree {
    match &select.source {
        SelectSource::Subquery { input, .. } => input,
        other => panic!("expected a subquery source, found {other:?}"),
    }
}

#[derive(Default)]
pub(crate) struct RecordingListener {
    seen: RefCell<Vec<(String, bool)>>,
}

impl RecordingListener {
    pub fn names(&self) -> Vec<String> {
        self.seen.borrow().iter().map(|(n, _)| n.clone()).collect()
    }
}

impl UsedClassesListener for RecordingListener {
    fn on_class_used(&self, class: &str, polymorphic: bool) {
        self.seen
            .borrow_mut()
            .push((class.to_string(), polymorphic));
    }
}
