use thiserror::Error;

#[derive(Debug, Error)]
pub enum RulesConfigError {
    #[error("Failed to read rule set file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML rule set: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON rule set: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported rule set file extension: {0}")]
    UnsupportedExtension(String),

    #[error("Invalid rule set: {0}")]
    Invalid(String),
}
