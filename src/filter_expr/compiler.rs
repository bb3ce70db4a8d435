//! Compiles parsed filter expressions into bound WHERE predicates.
//!
//! Compilation is conjunct-by-conjunct: a top-level AND operand that cannot
//! be resolved (unknown property, missing ancestor, undeclared alias) is
//! dropped with a debug log, leaving the rest of the filter intact. Nothing
//! here ever fails the whole request.

use std::collections::HashMap;
use std::fmt;

use crate::hierarchy::{CachedNode, NodeKey};
use crate::query_ast::sql_expr::{
    BoundQuery, Operator, OperatorApplication, ParamValue, SqlExpr,
};
use crate::query_ast::FIELD_CLASS_ID;
use crate::query_builder::context::UsedClassesListener;
use crate::schema_catalog::SchemaCatalog;

use super::ast::{
    FilterExpr, FilterFnCall, FilterLiteral, FilterOpApplication, FilterOperator, InstanceAccess,
    InstanceRef,
};

/// A related-instance alias the specification declared, already resolved to
/// its SQL alias and target class.
#[derive(Debug, Clone)]
pub struct RelatedTarget {
    pub sql_alias: String,
    pub class: String,
}

pub struct CompileEnv<'a> {
    pub catalog: &'a SchemaCatalog,
    /// Name of the class the branch selects from.
    pub this_class: &'a str,
    /// SQL alias bound to `this`.
    pub this_alias: &'a str,
    /// Instance-bearing ancestors, nearest first. `parent` is index 0.
    pub ancestors: &'a [CachedNode],
    pub related: &'a HashMap<String, RelatedTarget>,
    pub listener: Option<&'a dyn UsedClassesListener>,
}

enum DropReason {
    UnknownProperty { class: String, property: String },
    MissingAncestor(usize),
    UndeclaredAlias(String),
    UnknownClass(String),
    Unsupported(String),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::UnknownProperty { class, property } => {
                write!(f, "property '{property}' does not exist on '{class}'")
            }
            DropReason::MissingAncestor(depth) => {
                write!(f, "no instance-bearing ancestor at depth {depth}")
            }
            DropReason::UndeclaredAlias(alias) => {
                write!(f, "related alias '{alias}' is not declared")
            }
            DropReason::UnknownClass(class) => write!(f, "class '{class}' does not exist"),
            DropReason::Unsupported(what) => write!(f, "{what}"),
        }
    }
}

/// Compiles a filter into a single predicate, dropping unresolvable
/// top-level conjuncts. Returns None when every conjunct dropped.
pub fn compile_filter(expression: &FilterExpr, env: &CompileEnv<'_>) -> Option<SqlExpr> {
    let mut compiled = Vec::new();
    for conjunct in expression.conjuncts() {
        match compile_expr(conjunct, env) {
            Ok(predicate) => compiled.push(predicate),
            Err(reason) => log::debug!("dropping filter clause: {reason}"),
        }
    }
    match compiled.len() {
        0 => None,
        1 => compiled.pop(),
        _ => Some(SqlExpr::and(compiled)),
    }
}

fn compile_expr(expression: &FilterExpr, env: &CompileEnv<'_>) -> Result<SqlExpr, DropReason> {
    match expression {
        FilterExpr::Literal(literal) => Ok(SqlExpr::Literal(literal_to_param(literal))),
        FilterExpr::Access(access) => compile_access(access, env),
        FilterExpr::FnCall(call) => compile_fn_call(call, env),
        FilterExpr::OperatorApplicationExp(application) => compile_operator(application, env),
    }
}

fn literal_to_param(literal: &FilterLiteral) -> ParamValue {
    match literal {
        FilterLiteral::Integer(i) => ParamValue::Integer(*i),
        FilterLiteral::Float(v) => ParamValue::Float(*v),
        FilterLiteral::Boolean(b) => ParamValue::Boolean(*b),
        FilterLiteral::String(s) => ParamValue::String(s.clone()),
        FilterLiteral::Null => ParamValue::Null,
    }
}

fn compile_access(access: &InstanceAccess, env: &CompileEnv<'_>) -> Result<SqlExpr, DropReason> {
    match &access.base {
        InstanceRef::This => {
            require_property(env, env.this_class, &access.property)?;
            Ok(SqlExpr::property(env.this_alias, &access.property))
        }
        InstanceRef::Related(alias) => {
            let target = env
                .related
                .get(alias)
                .ok_or_else(|| DropReason::UndeclaredAlias(alias.clone()))?;
            require_property(env, &target.class, &access.property)?;
            Ok(SqlExpr::property(&target.sql_alias, &access.property))
        }
        InstanceRef::Ancestor(depth) => compile_ancestor_access(*depth, &access.property, env),
    }
}

/// An ancestor property reference becomes a scalar subquery over the
/// ancestor node's bound instance-key query.
fn compile_ancestor_access(
    depth: usize,
    property: &str,
    env: &CompileEnv<'_>,
) -> Result<SqlExpr, DropReason> {
    let ancestor = env
        .ancestors
        .get(depth.saturating_sub(1))
        .ok_or(DropReason::MissingAncestor(depth))?;
    let instance_query = ancestor
        .instance_query
        .as_ref()
        .ok_or(DropReason::MissingAncestor(depth))?;

    let classes = match &ancestor.key {
        NodeKey::Instances { classes } => classes,
        _ => return Err(DropReason::MissingAncestor(depth)),
    };
    let class = classes
        .iter()
        .filter_map(|id| env.catalog.class_by_id(*id))
        .find(|c| env.catalog.property_opt(&c.name, property).is_some())
        .ok_or_else(|| DropReason::UnknownProperty {
            class: "ancestor".to_string(),
            property: property.to_string(),
        })?;

    let sql = format!(
        "SELECT anc.{property} FROM {} AS anc WHERE anc.InstanceId IN ({})",
        class.qualified_name(),
        instance_query.sql
    );
    Ok(SqlExpr::BoundSubquery(BoundQuery {
        sql,
        params: instance_query.params.clone(),
    }))
}

fn compile_fn_call(call: &FilterFnCall, env: &CompileEnv<'_>) -> Result<SqlExpr, DropReason> {
    if !call.name.eq_ignore_ascii_case("IsOfClass") {
        return Err(DropReason::Unsupported(format!(
            "unsupported filter function '{}'",
            call.name
        )));
    }

    let class_name = match call.args.first() {
        Some(FilterExpr::Literal(FilterLiteral::String(name))) => name.clone(),
        _ => {
            return Err(DropReason::Unsupported(
                "IsOfClass expects a class name literal".to_string(),
            ))
        }
    };
    // An optional second argument qualifies the schema.
    let qualified = match call.args.get(1) {
        Some(FilterExpr::Literal(FilterLiteral::String(schema))) => {
            format!("{schema}.{class_name}")
        }
        _ => class_name.clone(),
    };

    let class = env
        .catalog
        .class_opt(&qualified)
        .ok_or(DropReason::UnknownClass(qualified.clone()))?;
    if let Some(listener) = env.listener {
        listener.on_class_used(&class.qualified_name(), true);
    }

    let mut ids: Vec<ParamValue> = vec![ParamValue::Id(class.id.0)];
    ids.extend(
        env.catalog
            .derived_classes(&class.name)
            .iter()
            .map(|c| ParamValue::Id(c.id.0)),
    );

    let alias = match &call.base {
        InstanceRef::This => env.this_alias.to_string(),
        InstanceRef::Related(alias) => env
            .related
            .get(alias)
            .map(|t| t.sql_alias.clone())
            .ok_or_else(|| DropReason::UndeclaredAlias(alias.clone()))?,
        InstanceRef::Ancestor(_) => {
            return Err(DropReason::Unsupported(
                "class test on an ancestor reference".to_string(),
            ))
        }
    };

    Ok(SqlExpr::InList {
        expr: Box::new(SqlExpr::property(&alias, FIELD_CLASS_ID)),
        items: ids,
        negated: false,
    })
}

fn compile_operator(
    application: &FilterOpApplication,
    env: &CompileEnv<'_>,
) -> Result<SqlExpr, DropReason> {
    match application.operator {
        FilterOperator::Match => {
            let lhs = compile_expr(&application.operands[0], env)?;
            match &application.operands[1] {
                FilterExpr::Literal(FilterLiteral::String(pattern)) => Ok(SqlExpr::Like {
                    expr: Box::new(lhs),
                    pattern: ParamValue::String(pattern.clone()),
                }),
                _ => Err(DropReason::Unsupported(
                    "pattern match expects a string literal".to_string(),
                )),
            }
        }
        FilterOperator::And | FilterOperator::Or | FilterOperator::Not => {
            let operator = match application.operator {
                FilterOperator::And => Operator::And,
                FilterOperator::Or => Operator::Or,
                _ => Operator::Not,
            };
            let operands = application
                .operands
                .iter()
                .map(|o| compile_expr(o, env))
                .collect::<Result<Vec<SqlExpr>, DropReason>>()?;
            Ok(SqlExpr::OperatorApplicationExp(OperatorApplication {
                operator,
                operands,
            }))
        }
        _ => {
            // NULL comparisons compile to IS [NOT] NULL rather than =/<>.
            if let FilterExpr::Literal(FilterLiteral::Null) = application.operands[1] {
                let lhs = compile_expr(&application.operands[0], env)?;
                let operator = match application.operator {
                    FilterOperator::Equal => Operator::IsNull,
                    FilterOperator::NotEqual => Operator::IsNotNull,
                    _ => {
                        return Err(DropReason::Unsupported(
                            "ordered comparison against NULL".to_string(),
                        ))
                    }
                };
                return Ok(SqlExpr::OperatorApplicationExp(OperatorApplication {
                    operator,
                    operands: vec![lhs],
                }));
            }
            let operator = match application.operator {
                FilterOperator::Equal => Operator::Equal,
                FilterOperator::NotEqual => Operator::NotEqual,
                FilterOperator::LessThan => Operator::LessThan,
                FilterOperator::GreaterThan => Operator::GreaterThan,
                FilterOperator::LessThanEqual => Operator::LessThanEqual,
                FilterOperator::GreaterThanEqual => Operator::GreaterThanEqual,
                _ => unreachable!("boolean operators handled above"),
            };
            let lhs = compile_expr(&application.operands[0], env)?;
            let rhs = compile_expr(&application.operands[1], env)?;
            Ok(SqlExpr::OperatorApplicationExp(OperatorApplication {
                operator,
                operands: vec![lhs, rhs],
            }))
        }
    }
}

fn require_property(
    env: &CompileEnv<'_>,
    class: &str,
    property: &str,
) -> Result<(), DropReason> {
    env.catalog
        .property_opt(class, property)
        .map(|_| ())
        .ok_or_else(|| DropReason::UnknownProperty {
            class: class.to_string(),
            property: property.to_string(),
        })
}
