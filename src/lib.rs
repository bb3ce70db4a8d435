//! navquery - rules-driven hierarchy query compiler
//!
//! This crate translates a declarative, rule-based hierarchy description
//! (which entity classes appear as nodes, how they are grouped, sorted,
//! filtered and labeled) into executable, parameterized query trees:
//! - Schema catalog with polymorphic class hierarchies
//! - Rule-set model (specifications, grouping, sorting, label overrides)
//! - Filter-expression parsing and compilation to bound predicates
//! - Query-AST construction and SQL serialization

pub mod filter_expr;
pub mod hierarchy;
pub mod query_ast;
pub mod query_builder;
pub mod rules;
pub mod schema_catalog;

pub use query_builder::{QueryBuilder, ResolutionContext};
