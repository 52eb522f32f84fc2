//! Shared error taxonomy used across all choir crates.
//!
//! Every variant maps to exactly one [`ErrorKind`], which in turn carries
//! the retryability and HTTP-status mapping used by the gateway.

use serde::Serialize;

/// Coarse classification of an [`Error`], used by FaultCore to decide
/// retryability and by the gateway to pick an HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Validation,
    Authentication,
    Authorization,
    RateLimited,
    Dependency,
    CircuitOpen,
    NoAgentResponses,
    Cancelled,
}

impl ErrorKind {
    /// Whether an operation that failed with this kind should be retried.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Dependency | Self::RateLimited | Self::CircuitOpen)
    }

    /// The HTTP status this kind should surface as.
    pub fn http_status(self) -> u16 {
        match self {
            Self::Configuration => 500,
            Self::Validation => 400,
            Self::Authentication => 401,
            Self::Authorization => 403,
            Self::RateLimited => 429,
            Self::Dependency => 503,
            Self::CircuitOpen => 503,
            Self::NoAgentResponses => 502,
            Self::Cancelled => 499,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("configuration: {0}")]
    Configuration(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("authentication: {0}")]
    Authentication(String),

    #[error("authorization: {0}")]
    Authorization(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("{dependency} dependency error: {message}")]
    Dependency { dependency: String, message: String },

    #[error("circuit '{name}' is open")]
    CircuitOpen { name: String },

    #[error("no agent produced a response this turn")]
    NoAgentResponses,

    #[error("cancelled")]
    Cancelled,
}

impl Error {
    pub fn dependency(dependency: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Dependency {
            dependency: dependency.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Authentication(_) => ErrorKind::Authentication,
            Self::Authorization(_) => ErrorKind::Authorization,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Dependency { .. } => ErrorKind::Dependency,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::NoAgentResponses => ErrorKind::NoAgentResponses,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_errors_are_retryable() {
        let e = Error::dependency("bus", "connection reset");
        assert!(e.is_retryable());
        assert_eq!(e.kind().http_status(), 503);
    }

    #[test]
    fn validation_errors_are_not_retryable() {
        let e = Error::Validation("empty message".into());
        assert!(!e.is_retryable());
        assert_eq!(e.kind().http_status(), 400);
    }

    #[test]
    fn circuit_open_is_retryable_from_caller_perspective() {
        let e = Error::CircuitOpen { name: "llm:gemini".into() };
        assert!(e.is_retryable());
    }
}
