//! In-memory schema catalog.
//!
//! The catalog resolves entity class names to descriptors (with inheritance
//! chains), relationship classes to their endpoints and multiplicities, and
//! property names to property descriptors. All lookups are read-only and
//! assumed stable for the duration of one query-building call.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub mod errors;

use errors::SchemaCatalogError;

/// Stable numeric id of an entity class. Used as a bound parameter wherever
/// a query restricts or exposes class membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClassId(pub u64);

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Multiplicity {
    One,
    Many,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrimitiveType {
    Boolean,
    Integer,
    Double,
    Text,
    Point,
    DateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyKind {
    Primitive(PrimitiveType),
    /// Navigation property backed by a relationship class.
    Navigation { relationship: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    pub kind: PropertyKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDescriptor {
    pub id: ClassId,
    pub schema: String,
    pub name: String,
    pub base: Option<String>,
    pub is_abstract: bool,
    /// Property used as the built-in default label source, if the class
    /// declares one.
    pub label_property: Option<String>,
    pub properties: Vec<PropertyDescriptor>,
}

impl ClassDescriptor {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipDescriptor {
    pub id: ClassId,
    pub schema: String,
    pub name: String,
    pub source: String,
    pub target: String,
    pub source_multiplicity: Multiplicity,
    pub target_multiplicity: Multiplicity,
    /// false means the relationship may be traversed in both directions.
    pub directed: bool,
}

impl RelationshipDescriptor {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// In-memory catalog of entity and relationship classes.
///
/// Insertion order of classes is preserved so that resolution output is
/// deterministic across identical builds.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    classes: HashMap<String, ClassDescriptor>,
    relationships: HashMap<String, RelationshipDescriptor>,
    /// Class names in insertion order.
    class_order: Vec<String>,
    rel_order: Vec<String>,
    next_id: u64,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        SchemaCatalog {
            classes: HashMap::new(),
            relationships: HashMap::new(),
            class_order: Vec::new(),
            rel_order: Vec::new(),
            next_id: 1,
        }
    }

    fn allocate_id(&mut self) -> ClassId {
        let id = ClassId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn insert_class(
        &mut self,
        schema: &str,
        name: &str,
        base: Option<&str>,
        is_abstract: bool,
    ) -> Result<ClassId, SchemaCatalogError> {
        if self.classes.contains_key(name) {
            return Err(SchemaCatalogError::DuplicateClass {
                class_name: name.to_string(),
            });
        }
        let id = self.allocate_id();
        self.classes.insert(
            name.to_string(),
            ClassDescriptor {
                id,
                schema: schema.to_string(),
                name: name.to_string(),
                base: base.map(|b| b.to_string()),
                is_abstract,
                label_property: None,
                properties: Vec::new(),
            },
        );
        self.class_order.push(name.to_string());
        Ok(id)
    }

    pub fn insert_property(
        &mut self,
        class_name: &str,
        property: PropertyDescriptor,
    ) -> Result<(), SchemaCatalogError> {
        let class = self
            .classes
            .get_mut(class_name)
            .ok_or(SchemaCatalogError::Class {
                class_name: class_name.to_string(),
            })?;
        class.properties.push(property);
        Ok(())
    }

    pub fn set_label_property(
        &mut self,
        class_name: &str,
        property_name: &str,
    ) -> Result<(), SchemaCatalogError> {
        let class = self
            .classes
            .get_mut(class_name)
            .ok_or(SchemaCatalogError::Class {
                class_name: class_name.to_string(),
            })?;
        class.label_property = Some(property_name.to_string());
        Ok(())
    }

    pub fn insert_relationship(
        &mut self,
        schema: &str,
        name: &str,
        source: &str,
        target: &str,
        source_multiplicity: Multiplicity,
        target_multiplicity: Multiplicity,
    ) -> Result<ClassId, SchemaCatalogError> {
        if !self.classes.contains_key(source) {
            return Err(SchemaCatalogError::UnknownEndpoint {
                rel_name: name.to_string(),
                class_name: source.to_string(),
            });
        }
        if !self.classes.contains_key(target) {
            return Err(SchemaCatalogError::UnknownEndpoint {
                rel_name: name.to_string(),
                class_name: target.to_string(),
            });
        }
        let id = self.allocate_id();
        self.relationships.insert(
            name.to_string(),
            RelationshipDescriptor {
                id,
                schema: schema.to_string(),
                name: name.to_string(),
                source: source.to_string(),
                target: target.to_string(),
                source_multiplicity,
                target_multiplicity,
                directed: true,
            },
        );
        self.rel_order.push(name.to_string());
        Ok(id)
    }

    /// Accepts bare ("Widget") or schema-qualified ("Core.Widget") names.
    fn bare_name(name: &str) -> &str {
        match name.rsplit_once('.') {
            Some((_, bare)) => bare,
            None => name,
        }
    }

    pub fn class(&self, name: &str) -> Result<&ClassDescriptor, SchemaCatalogError> {
        self.classes
            .get(Self::bare_name(name))
            .ok_or(SchemaCatalogError::Class {
                class_name: name.to_string(),
            })
    }

    pub fn class_opt(&self, name: &str) -> Option<&ClassDescriptor> {
        self.classes.get(Self::bare_name(name))
    }

    pub fn class_by_id(&self, id: ClassId) -> Option<&ClassDescriptor> {
        self.classes.values().find(|c| c.id == id)
    }

    pub fn relationship(&self, name: &str) -> Result<&RelationshipDescriptor, SchemaCatalogError> {
        self.relationships
            .get(Self::bare_name(name))
            .ok_or(SchemaCatalogError::Relationship {
                rel_name: name.to_string(),
            })
    }

    pub fn relationship_opt(&self, name: &str) -> Option<&RelationshipDescriptor> {
        self.relationships.get(Self::bare_name(name))
    }

    /// Resolves a property on a class, walking the inheritance chain upward.
    pub fn property(
        &self,
        class_name: &str,
        property_name: &str,
    ) -> Result<&PropertyDescriptor, SchemaCatalogError> {
        let mut current = Some(self.class(class_name)?);
        while let Some(class) = current {
            if let Some(prop) = class.properties.iter().find(|p| p.name == property_name) {
                return Ok(prop);
            }
            current = class.base.as_deref().and_then(|b| self.class_opt(b));
        }
        Err(SchemaCatalogError::Property {
            class_name: class_name.to_string(),
            property_name: property_name.to_string(),
        })
    }

    pub fn property_opt(&self, class_name: &str, property_name: &str) -> Option<&PropertyDescriptor> {
        self.property(class_name, property_name).ok()
    }

    /// true when `class_name` is `base_name` or transitively derives from it.
    pub fn is_derived_from(&self, class_name: &str, base_name: &str) -> bool {
        let base_bare = Self::bare_name(base_name);
        let mut current = self.class_opt(class_name);
        while let Some(class) = current {
            if class.name == base_bare {
                return true;
            }
            current = class.base.as_deref().and_then(|b| self.class_opt(b));
        }
        false
    }

    /// Direct subclasses of a class, in catalog insertion order.
    pub fn direct_subclasses(&self, class_name: &str) -> Vec<&ClassDescriptor> {
        let bare = Self::bare_name(class_name);
        self.class_order
            .iter()
            .filter_map(|n| self.classes.get(n))
            .filter(|c| c.base.as_deref() == Some(bare))
            .collect()
    }

    /// All transitive subclasses (excluding the class itself), insertion order.
    pub fn derived_classes(&self, class_name: &str) -> Vec<&ClassDescriptor> {
        let bare = Self::bare_name(class_name);
        self.class_order
            .iter()
            .filter_map(|n| self.classes.get(n))
            .filter(|c| c.name != bare && self.is_derived_from(&c.name, bare))
            .collect()
    }

    /// Relationships whose source (or, for undirected ones, either end)
    /// matches the given class or one of its base classes.
    pub fn relationships_from(&self, class_name: &str) -> Vec<&RelationshipDescriptor> {
        self.rel_order
            .iter()
            .filter_map(|n| self.relationships.get(n))
            .filter(|r| {
                self.is_derived_from(class_name, &r.source)
                    || (!r.directed && self.is_derived_from(class_name, &r.target))
            })
            .collect()
    }

    pub fn all_classes(&self) -> Vec<&ClassDescriptor> {
        self.class_order
            .iter()
            .filter_map(|n| self.classes.get(n))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_with_hierarchy() -> SchemaCatalog {
        let mut catalog = SchemaCatalog::new();
        catalog.insert_class("Core", "Element", None, true).unwrap();
        catalog
            .insert_class("Core", "Widget", Some("Element"), false)
            .unwrap();
        catalog
            .insert_class("Core", "Gadget", Some("Widget"), false)
            .unwrap();
        catalog
            .insert_property(
                "Widget",
                PropertyDescriptor {
                    name: "Code".to_string(),
                    kind: PropertyKind::Primitive(PrimitiveType::Text),
                },
            )
            .unwrap();
        catalog
    }

    #[test]
    fn property_lookup_walks_inheritance_chain() {
        let catalog = catalog_with_hierarchy();
        let prop = catalog.property("Gadget", "Code").unwrap();
        assert_eq!(prop.name, "Code");
        assert!(catalog.property("Element", "Code").is_err());
    }

    #[test]
    fn is_derived_from_is_reflexive_and_transitive() {
        let catalog = catalog_with_hierarchy();
        assert!(catalog.is_derived_from("Gadget", "Gadget"));
        assert!(catalog.is_derived_from("Gadget", "Element"));
        assert!(!catalog.is_derived_from("Element", "Gadget"));
    }

    #[test]
    fn derived_classes_preserve_insertion_order() {
        let catalog = catalog_with_hierarchy();
        let derived: Vec<&str> = catalog
            .derived_classes("Element")
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(derived, vec!["Widget", "Gadget"]);
    }

    #[test]
    fn qualified_names_resolve() {
        let catalog = catalog_with_hierarchy();
        assert_eq!(
            catalog.class("Core.Widget").unwrap().id,
            catalog.class("Widget").unwrap().id
        );
    }
}
