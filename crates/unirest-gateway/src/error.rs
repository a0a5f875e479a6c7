//! Gateway error types.
//!
//! These describe failures talking to the remote API. Remote *business*
//! outcomes (a rejected login, a failed insert) are not errors here; they come
//! back as [`unirest_core::ErrorCode`] values.

/// Errors that can occur while calling the remote API.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The remote API could not be reached.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection failure.
        message: String,
    },

    /// The remote call did not complete in time.
    #[error("Remote call timed out: {operation}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
    },

    /// The remote API answered with an HTTP error status.
    #[error("Remote API returned {status}: {message}")]
    Remote {
        /// HTTP status returned by the remote API.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// The response could not be understood.
    #[error("Invalid response from remote API: {message}")]
    Protocol {
        /// Description of what was wrong with the response.
        message: String,
    },

    /// A session was used before a successful login.
    #[error("Session is not logged in")]
    NotLoggedIn,

    /// The backend does not support the requested operation.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl GatewayError {
    /// Creates a new `Connection` error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a new `Protocol` error.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            let operation = e
                .url()
                .map(|u| u.path().to_string())
                .unwrap_or_else(|| "request".to_string());
            Self::timeout(operation)
        } else if e.is_connect() {
            Self::connection(e.to_string())
        } else if e.is_decode() {
            Self::protocol(e.to_string())
        } else if let Some(status) = e.status() {
            Self::Remote {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            Self::connection(e.to_string())
        }
    }
}
