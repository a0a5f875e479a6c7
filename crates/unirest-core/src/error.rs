use thiserror::Error;

/// Core error types for unirest operations
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid {value_type} value: '{value}'")]
    InvalidLiteral { value_type: String, value: String },

    #[error("Unknown value type: {0}")]
    UnknownValueType(String),
}

impl CoreError {
    /// Create a new InvalidLiteral error
    pub fn invalid_literal(value_type: impl ToString, value: impl Into<String>) -> Self {
        Self::InvalidLiteral {
            value_type: value_type.to_string(),
            value: value.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
