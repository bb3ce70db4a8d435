use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SchemaCatalogError {
    #[error("Entity class not found: {class_name}")]
    Class { class_name: String },

    #[error("Relationship class not found: {rel_name}")]
    Relationship { rel_name: String },

    #[error("Property '{property_name}' not found on class '{class_name}'")]
    Property {
        class_name: String,
        property_name: String,
    },

    #[error("Duplicate class name: {class_name}")]
    DuplicateClass { class_name: String },

    #[error("Relationship '{rel_name}' references unknown endpoint class '{class_name}'")]
    UnknownEndpoint {
        rel_name: String,
        class_name: String,
    },
}
