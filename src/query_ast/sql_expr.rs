use serde::{Deserialize, Serialize};
use std::fmt;

/// A value bound into a query as a positional parameter. Literals are never
/// inlined into SQL text; they always travel through the parameter list.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub enum ParamValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    /// Class or instance id.
    Id(u64),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Null => f.write_str("NULL"),
            ParamValue::Boolean(b) => write!(f, "{b}"),
            ParamValue::Integer(i) => write!(f, "{i}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::String(s) => write!(f, "'{s}'"),
            ParamValue::Id(id) => write!(f, "{id}"),
        }
    }
}

/// Serialized query text plus its bound parameters, in placeholder order.
/// This is the unit handed to the execution engine, and also the shape of
/// instance-key queries stored in the hierarchy-node cache.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct BoundQuery {
    pub sql: String,
    pub params: Vec<ParamValue>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct TableAlias(pub String);

#[derive(Debug, PartialEq, Clone)]
pub struct Column(pub String);

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Operator {
    Equal,
    NotEqual,
    LessThan,
    GreaterThan,
    LessThanEqual,
    GreaterThanEqual,
    And,
    Or,
    Not,
    IsNull,
    IsNotNull,
}

impl Operator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Operator::Equal => "=",
            Operator::NotEqual => "<>",
            Operator::LessThan => "<",
            Operator::GreaterThan => ">",
            Operator::LessThanEqual => "<=",
            Operator::GreaterThanEqual => ">=",
            Operator::And => "AND",
            Operator::Or => "OR",
            Operator::Not => "NOT",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct OperatorApplication {
    pub operator: Operator,
    pub operands: Vec<SqlExpr>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct PropertyAccess {
    pub table_alias: TableAlias,
    pub column: Column,
}

#[derive(Debug, PartialEq, Clone)]
pub struct ScalarFnCall {
    pub name: String,
    pub args: Vec<SqlExpr>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct AggregateFnCall {
    pub name: String,
    pub args: Vec<SqlExpr>,
}

/// `expr [NOT] IN (<pre-bound query>)`, used where the right-hand side is a
/// query owned by a collaborator (e.g. an ancestor node's instance-key query
/// fetched from the node cache).
#[derive(Debug, PartialEq, Clone)]
pub struct InBoundQuery {
    pub expr: Box<SqlExpr>,
    pub query: BoundQuery,
    pub negated: bool,
}

#[derive(Debug, PartialEq, Clone)]
pub struct SqlCase {
    /// Operand for simple CASE (CASE x WHEN ...), None for searched CASE.
    pub expr: Option<Box<SqlExpr>>,
    pub when_then: Vec<(SqlExpr, SqlExpr)>,
    pub else_expr: Option<Box<SqlExpr>>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum SqlExpr {
    /// A literal value; serialized as a `?` placeholder with the value
    /// appended to the parameter list.
    Literal(ParamValue),

    /// Bare column of the current select scope (a contract field name).
    Column(Column),

    /// `alias.column`
    PropertyAccessExp(PropertyAccess),

    /// `COUNT(*)` shorthand operand.
    Star,

    ScalarFnCall(ScalarFnCall),

    AggregateFnCall(AggregateFnCall),

    OperatorApplicationExp(OperatorApplication),

    /// `expr LIKE ? ESCAPE '\'`, a case-sensitive pattern match.
    Like {
        expr: Box<SqlExpr>,
        pattern: ParamValue,
    },

    /// `expr [NOT] IN (?, ?, ...)` with every item bound.
    InList {
        expr: Box<SqlExpr>,
        items: Vec<ParamValue>,
        negated: bool,
    },

    InBoundQuery(InBoundQuery),

    /// Scalar subquery over a pre-bound query.
    BoundSubquery(BoundQuery),

    /// `expr [NOT] BETWEEN ? AND ?`
    Between {
        expr: Box<SqlExpr>,
        low: ParamValue,
        high: ParamValue,
        negated: bool,
    },

    Case(SqlCase),
}

impl SqlExpr {
    pub fn eq(left: SqlExpr, right: SqlExpr) -> SqlExpr {
        SqlExpr::OperatorApplicationExp(OperatorApplication {
            operator: Operator::Equal,
            operands: vec![left, right],
        })
    }

    pub fn and(operands: Vec<SqlExpr>) -> SqlExpr {
        SqlExpr::OperatorApplicationExp(OperatorApplication {
            operator: Operator::And,
            operands,
        })
    }

    pub fn column(name: &str) -> SqlExpr {
        SqlExpr::Column(Column(name.to_string()))
    }

    pub fn property(alias: &str, column: &str) -> SqlExpr {
        SqlExpr::PropertyAccessExp(PropertyAccess {
            table_alias: TableAlias(alias.to_string()),
            column: Column(column.to_string()),
        })
    }
}
