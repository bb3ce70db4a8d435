use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FilterParseError {
    #[error("Failed to parse filter expression near: '{remainder}'")]
    Syntax { remainder: String },

    #[error("Trailing input after filter expression: '{remainder}'")]
    TrailingInput { remainder: String },
}
