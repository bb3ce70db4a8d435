//! Registry of functions the execution engine is expected to provide.
//!
//! The compiler never evaluates these; it only emits calls to them. The
//! registry exists so that expression construction can verify names and
//! arity instead of shipping typos to the engine.

use lazy_static::lazy_static;
use std::collections::HashMap;

use super::errors::QueryAstError;
use super::sql_expr::{AggregateFnCall, ScalarFnCall, SqlExpr};

/// Locale-aware sort key over any scalar value.
pub const FN_SORT_KEY: &str = "sort_key";
/// Display label of a class, resolved by class id.
pub const FN_CLASS_LABEL: &str = "class_label";
/// Human-readable rendition of a raw property value.
pub const FN_DISPLAY_VALUE: &str = "display_value";
/// Aggregates (class id, instance id) pairs of a group into one key list.
pub const FN_AGGREGATE_KEYS: &str = "aggregate_keys";

#[derive(Debug, Clone, Copy)]
pub struct FunctionDef {
    pub arity: usize,
    pub aggregate: bool,
}

lazy_static! {
    static ref ENGINE_FUNCTIONS: HashMap<&'static str, FunctionDef> = {
        let mut m = HashMap::new();
        m.insert(FN_SORT_KEY, FunctionDef { arity: 1, aggregate: false });
        m.insert(FN_CLASS_LABEL, FunctionDef { arity: 1, aggregate: false });
        m.insert(FN_DISPLAY_VALUE, FunctionDef { arity: 1, aggregate: false });
        m.insert(FN_AGGREGATE_KEYS, FunctionDef { arity: 2, aggregate: true });
        m
    };
}

pub fn lookup(name: &str) -> Option<FunctionDef> {
    ENGINE_FUNCTIONS.get(name).copied()
}

/// Builds a call to a registered engine function, checking name and arity.
pub fn engine_fn(name: &str, args: Vec<SqlExpr>) -> Result<SqlExpr, QueryAstError> {
    let def = lookup(name).ok_or_else(|| QueryAstError::UnknownFunction(name.to_string()))?;
    if args.len() != def.arity {
        return Err(QueryAstError::FunctionArity {
            name: name.to_string(),
            expected: def.arity,
            got: args.len(),
        });
    }
    if def.aggregate {
        Ok(SqlExpr::AggregateFnCall(AggregateFnCall {
            name: name.to_string(),
            args,
        }))
    } else {
        Ok(SqlExpr::ScalarFnCall(ScalarFnCall {
            name: name.to_string(),
            args,
        }))
    }
}
