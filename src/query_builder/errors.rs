use thiserror::Error;

use crate::query_ast::errors::QueryAstError;
use crate::schema_catalog::errors::SchemaCatalogError;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum QueryBuilderError {
    #[error("Query building was cancelled.")]
    Cancelled,

    #[error(transparent)]
    Schema(#[from] SchemaCatalogError),

    #[error(transparent)]
    Ast(#[from] QueryAstError),
}
