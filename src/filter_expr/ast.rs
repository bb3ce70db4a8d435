//! AST of rule-authored filter expressions.
//!
//! Expressions reference the current instance (`this`), ancestor instances
//! (`parent`, `parent.parent`, ...) or related-instance aliases declared by
//! the specification, and combine comparisons with boolean operators.

#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    Literal(FilterLiteral),
    Access(InstanceAccess),
    /// Instance-scoped function call, e.g. `this.IsOfClass("Widget", "Core")`.
    FnCall(FilterFnCall),
    OperatorApplicationExp(FilterOpApplication),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterLiteral {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
    Null,
}

/// What an access is rooted at.
#[derive(Debug, Clone, PartialEq)]
pub enum InstanceRef {
    This,
    /// `parent` is depth 1, `parent.parent` depth 2, and so on.
    Ancestor(usize),
    /// A related-instance alias declared by the specification.
    Related(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceAccess {
    pub base: InstanceRef,
    pub property: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterFnCall {
    pub base: InstanceRef,
    pub name: String,
    pub args: Vec<FilterExpr>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterOperator {
    Equal,
    NotEqual,
    LessThan,
    GreaterThan,
    LessThanEqual,
    GreaterThanEqual,
    /// `~`, a case-sensitive pattern match.
    Match,
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterOpApplication {
    pub operator: FilterOperator,
    pub operands: Vec<FilterExpr>,
}

impl FilterExpr {
    /// Top-level AND conjuncts. Each one compiles (or drops) independently.
    pub fn conjuncts(&self) -> Vec<&FilterExpr> {
        match self {
            FilterExpr::OperatorApplicationExp(application)
                if application.operator == FilterOperator::And =>
            {
                application.operands.iter().flat_map(|o| o.conjuncts()).collect()
            }
            other => vec![other],
        }
    }
}
