use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum QueryAstError {
    #[error("Cannot union an empty branch list.")]
    EmptyUnion,

    #[error("Unknown engine function: {0}")]
    UnknownFunction(String),

    #[error("Function '{name}' called with {got} arguments, expected {expected}")]
    FunctionArity {
        name: String,
        expected: usize,
        got: usize,
    },
}
