//! Engine error taxonomy
//!
//! Every failure observable at a component boundary is classified into one
//! of the kinds below. The kind decides retryability and the HTTP status
//! the API surfaces.

use serde::{Deserialize, Serialize};

/// Classified error kinds observable at component boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Input failed structural validation
    InvalidArgument,

    /// Referenced workflow/artifact/capsule absent
    NotFound,

    /// A layered deadline elapsed
    DeadlineExceeded,

    /// Cooperative cancellation
    Cancelled,

    /// Bulkhead queue full or rate-limited downstream
    Overloaded,

    /// Downstream 5xx or connect failure
    DependencyUnavailable,

    /// All model providers in the fallback chain failed
    ProviderExhausted,

    /// Per-workflow cost ceiling hit
    BudgetExhausted,

    /// A dependency-gate predecessor failed
    UpstreamFailed,

    /// Unexpected engine bug
    Internal,
}

impl ErrorKind {
    /// Whether an error of this kind may consume retry budget
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DeadlineExceeded | Self::Overloaded | Self::DependencyUnavailable
        )
    }

    /// HTTP status the API maps this kind to
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidArgument => 400,
            Self::NotFound => 404,
            Self::DeadlineExceeded => 504,
            Self::Cancelled => 499,
            Self::Overloaded => 429,
            Self::DependencyUnavailable => 502,
            Self::ProviderExhausted => 502,
            Self::BudgetExhausted => 402,
            Self::UpstreamFailed => 500,
            Self::Internal => 500,
        }
    }

    /// Stable string form used in events, records, and API bodies
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::NotFound => "not_found",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Cancelled => "cancelled",
            Self::Overloaded => "overloaded",
            Self::DependencyUnavailable => "dependency_unavailable",
            Self::ProviderExhausted => "provider_exhausted",
            Self::BudgetExhausted => "budget_exhausted",
            Self::UpstreamFailed => "upstream_failed",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified engine error
///
/// Carried across crate boundaries; the message is safe to surface to API
/// callers (never a stack trace).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct EngineError {
    /// Classified kind
    pub kind: ErrorKind,

    /// Human-readable message, free of internal detail
    pub message: String,
}

impl EngineError {
    /// Create an error of the given kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Input failed structural validation
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// Referenced entity absent
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// A deadline elapsed
    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DeadlineExceeded, message)
    }

    /// Cooperative cancellation
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Bulkhead rejection or downstream rate limit
    pub fn overloaded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Overloaded, message)
    }

    /// Downstream 5xx or connect failure
    pub fn dependency_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DependencyUnavailable, message)
    }

    /// Unexpected engine bug
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Whether this error may consume retry budget
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("serialization error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ErrorKind::DeadlineExceeded.is_retryable());
        assert!(ErrorKind::Overloaded.is_retryable());
        assert!(ErrorKind::DependencyUnavailable.is_retryable());

        assert!(!ErrorKind::InvalidArgument.is_retryable());
        assert!(!ErrorKind::ProviderExhausted.is_retryable());
        assert!(!ErrorKind::BudgetExhausted.is_retryable());
        assert!(!ErrorKind::UpstreamFailed.is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
        assert!(!ErrorKind::Internal.is_retryable());
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(ErrorKind::InvalidArgument.http_status(), 400);
        assert_eq!(ErrorKind::NotFound.http_status(), 404);
        assert_eq!(ErrorKind::DeadlineExceeded.http_status(), 504);
        assert_eq!(ErrorKind::Overloaded.http_status(), 429);
        assert_eq!(ErrorKind::DependencyUnavailable.http_status(), 502);
        assert_eq!(ErrorKind::Internal.http_status(), 500);
    }

    #[test]
    fn test_error_display() {
        let err = EngineError::invalid_argument("prompt must not be empty");
        assert_eq!(err.to_string(), "invalid_argument: prompt must not be empty");
    }

    #[test]
    fn test_serialization_round_trip() {
        let err = EngineError::new(ErrorKind::ProviderExhausted, "all providers failed");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("provider_exhausted"));
        let parsed: EngineError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, parsed);
    }
}
