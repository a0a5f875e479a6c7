//! Status codes reported by the remote API.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status code returned by remote write, read and posting operations.
///
/// The remote API spells its success code `Succes`; both spellings are
/// accepted on input and the remote spelling is used on output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorCode {
    Success,
    NoLinesToUpdate,
    Other(String),
}

impl ErrorCode {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Success => "Succes",
            Self::NoLinesToUpdate => "NoLinesToUpdate",
            Self::Other(code) => code,
        }
    }
}

impl From<String> for ErrorCode {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Succes" | "Success" => Self::Success,
            "NoLinesToUpdate" => Self::NoLinesToUpdate,
            _ => Self::Other(value),
        }
    }
}

impl From<ErrorCode> for String {
    fn from(value: ErrorCode) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a remote login attempt.
pub type LoginStatus = ErrorCode;
