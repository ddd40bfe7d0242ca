use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::RoomLifecycleState;

/// Broad error category used for user-facing handling and retry behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BackendErrorCategory {
    /// Invalid configuration or unsupported state.
    Config,
    /// No authenticated identity, or the backend refused the identity.
    Auth,
    /// Transient transport failure.
    Network,
    /// Rate-limited by the backend.
    RateLimited,
    /// Local input validation failure (for example an empty message).
    Validation,
    /// Attachment could not be resolved or stored.
    Attachment,
    /// Backend persistence failure.
    Storage,
    /// Internal bug or invariant break.
    Internal,
}

/// Stable error payload emitted across the runtime/rendering boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct BackendError {
    /// High-level error category.
    pub category: BackendErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional retry hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl BackendError {
    /// Construct a new backend error.
    pub fn new(
        category: BackendErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Attach a retry hint to the error.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Build a standard invalid-state-transition error.
    pub fn invalid_state(current: RoomLifecycleState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            BackendErrorCategory::Internal,
            "invalid_state_transition",
            format!("cannot run '{action}' while room session is in state {current:?}"),
        )
    }

    /// The user tried to send a message with no text.
    pub fn empty_message() -> Self {
        Self::new(
            BackendErrorCategory::Validation,
            "empty_message",
            "You cannot send an empty message",
        )
    }

    /// Build an attachment failure with a stable code.
    pub fn attachment(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(BackendErrorCategory::Attachment, code, message)
    }

    /// Whether retrying the failed operation may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.category,
            BackendErrorCategory::Network | BackendErrorCategory::RateLimited
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_retry_hint_saturates() {
        let err = BackendError::new(BackendErrorCategory::RateLimited, "rate_limited", "slow down")
            .with_retry_after(Duration::MAX);
        assert_eq!(err.retry_after_ms, Some(u64::MAX));
    }

    #[test]
    fn keeps_invalid_state_error_code_stable() {
        let err = BackendError::invalid_state(RoomLifecycleState::Closed, "load_older");
        assert_eq!(err.code, "invalid_state_transition");
        assert_eq!(err.category, BackendErrorCategory::Internal);
        assert!(err.message.contains("Closed"));
    }

    #[test]
    fn persists_retry_after_in_millis() {
        let err = BackendError::new(BackendErrorCategory::RateLimited, "rate_limited", "wait")
            .with_retry_after(Duration::from_secs(3));
        assert_eq!(err.retry_after_ms, Some(3000));
    }

    #[test]
    fn only_transport_categories_are_recoverable() {
        let network = BackendError::new(BackendErrorCategory::Network, "feed_unavailable", "x");
        let limited = BackendError::new(BackendErrorCategory::RateLimited, "rate_limited", "x");
        assert!(network.is_recoverable());
        assert!(limited.is_recoverable());
        assert!(!BackendError::empty_message().is_recoverable());
        assert!(!BackendError::attachment("attachment_missing_uri", "x").is_recoverable());
    }

    #[test]
    fn empty_message_is_a_validation_failure() {
        let err = BackendError::empty_message();
        assert_eq!(err.category, BackendErrorCategory::Validation);
        assert_eq!(err.code, "empty_message");
    }
}
