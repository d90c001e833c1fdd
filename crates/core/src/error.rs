use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// HTTP statuses that the retry executor treats as transient.
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Failure taxonomy shared by every stage of action execution.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    /// A required parameter is missing or malformed. Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// The remote endpoint answered with a non-success HTTP status.
    #[error("HTTP {status}: {message}")]
    Network {
        status: u16,
        message: String,
        body: Option<serde_json::Value>,
    },

    /// The request never produced an HTTP response (DNS, reset, refused).
    #[error("transport error: {0}")]
    Transport(String),

    /// The request exceeded its time budget.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The invocation was cancelled by its owner.
    #[error("operation cancelled")]
    Cancelled,

    /// A read was attempted while offline and nothing was cached for it.
    #[error("offline and no cached response for {0}")]
    OfflineUnavailable(String),

    /// Exchanging the refresh token failed.
    #[error("token refresh failed: {0}")]
    TokenRefresh(String),

    /// A result-mapping step threw.
    #[error("transform error: {0}")]
    Transform(String),

    /// A referenced data source is not registered.
    #[error("data source not found: {0}")]
    NotFound(String),

    /// The GraphQL endpoint returned an error envelope without data.
    #[error("graphql error: {0}")]
    GraphQl(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),

    /// The host does not provide the capability an action needs.
    #[error("unsupported action: {0}")]
    Unsupported(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ActionError {
    /// Build a network error from a status and a short message.
    pub fn network(status: u16, message: impl Into<String>) -> Self {
        Self::Network {
            status,
            message: message.into(),
            body: None,
        }
    }

    /// Returns `true` if the failure is transient and another attempt may
    /// succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { status, .. } => RETRYABLE_STATUSES.contains(status),
            Self::Transport(_) | Self::Timeout(_) => true,
            _ => false,
        }
    }

    /// Returns `true` for user-initiated cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Network { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Short error code used in logs and telemetry.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::Network { .. } => "NETWORK",
            Self::Transport(_) => "TRANSPORT",
            Self::Timeout(_) => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::OfflineUnavailable(_) => "OFFLINE_UNAVAILABLE",
            Self::TokenRefresh(_) => "TOKEN_REFRESH",
            Self::Transform(_) => "TRANSFORM",
            Self::NotFound(_) => "NOT_FOUND",
            Self::GraphQl(_) => "GRAPHQL",
            Self::Serialization(_) => "SERIALIZATION",
            Self::Storage(_) => "STORAGE",
            Self::Unsupported(_) => "UNSUPPORTED",
            Self::Configuration(_) => "CONFIGURATION",
        }
    }

    /// Normalise into the `{message, status?}` shape handed to error
    /// sub-handlers.
    pub fn info(&self) -> ErrorInfo {
        let message = match self {
            Self::Network { message, .. } => message.clone(),
            other => other.to_string(),
        };
        ErrorInfo {
            message,
            status: self.status(),
        }
    }
}

impl From<serde_json::Error> for ActionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Normalised error passed to error sub-handlers and transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        for status in RETRYABLE_STATUSES {
            assert!(ActionError::network(status, "x").is_retryable(), "{status}");
        }
        for status in [400, 401, 403, 404, 409, 422, 501] {
            assert!(!ActionError::network(status, "x").is_retryable(), "{status}");
        }
    }

    #[test]
    fn non_http_failures_are_retryable() {
        assert!(ActionError::Transport("reset".into()).is_retryable());
        assert!(ActionError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!ActionError::Cancelled.is_retryable());
        assert!(!ActionError::Validation("x".into()).is_retryable());
        assert!(!ActionError::OfflineUnavailable("x".into()).is_retryable());
    }

    #[test]
    fn info_keeps_status_and_message() {
        let info = ActionError::network(404, "Not Found").info();
        assert_eq!(info.message, "Not Found");
        assert_eq!(info.status, Some(404));

        let info = ActionError::Validation("missing dataSourceId".into()).info();
        assert_eq!(info.message, "validation error: missing dataSourceId");
        assert_eq!(info.status, None);
    }

    #[test]
    fn info_serializes_without_absent_status() {
        let json = serde_json::to_value(ActionError::Cancelled.info()).unwrap();
        assert_eq!(json, serde_json::json!({"message": "operation cancelled"}));
    }
}
