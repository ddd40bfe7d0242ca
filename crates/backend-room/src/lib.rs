//! Room session runtime.
//!
//! One task per open room owns the [`LiveMessageLog`](backend_core::LiveMessageLog),
//! consumes the change feed, serializes history merges, and publishes
//! snapshots over the room event channel.

use std::sync::Arc;

use backend_core::{BackendError, BackendErrorCategory, RetryPolicy};
use backend_platform::{
    BlobStore, ChangeFeed, IdentityProvider, MessageWriter, PageFetcher, PlatformError,
};

mod controller;
mod directory;
mod session;

pub use controller::ChatController;
pub use directory::RoomDirectory;
pub use session::{RoomSessionHandle, spawn_room_session};

pub const DEFAULT_FEED_LIMIT: u16 = 50;
/// Ten older messages plus the boundary message the inclusive query returns again.
pub const DEFAULT_PAGE_SIZE: u16 = 11;
const SERVER_PAGE_LIMIT_CAP: u16 = 100;
/// The inclusive boundary returns the oldest known message again, so a page
/// needs at least one more slot to reach anything older.
const MIN_PAGE_SIZE: u16 = 2;

/// Per-room session settings, passed explicitly to every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSessionConfig {
    /// Room (collection) name.
    pub room: String,
    /// Size of the feed's initial batch.
    pub feed_limit: u16,
    /// History page size.
    pub page_size: u16,
    /// Resubscribe attempts after a recoverable feed failure. `0` disables retry.
    pub max_resubscribe_attempts: u32,
    /// Backoff between resubscribe attempts.
    pub retry_policy: RetryPolicy,
}

impl RoomSessionConfig {
    pub fn new(room: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            feed_limit: DEFAULT_FEED_LIMIT,
            page_size: DEFAULT_PAGE_SIZE,
            max_resubscribe_attempts: 0,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_page_size(mut self, page_size: u16) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_feed_limit(mut self, feed_limit: u16) -> Self {
        self.feed_limit = feed_limit;
        self
    }

    pub fn with_resubscribe(mut self, max_attempts: u32, retry_policy: RetryPolicy) -> Self {
        self.max_resubscribe_attempts = max_attempts;
        self.retry_policy = retry_policy;
        self
    }

    /// Page size clamped to `2..=100`.
    pub fn bounded_page_size(&self) -> u16 {
        self.page_size.clamp(MIN_PAGE_SIZE, SERVER_PAGE_LIMIT_CAP)
    }

    /// Feed limit clamped to `1..=100`.
    pub fn bounded_feed_limit(&self) -> u16 {
        self.feed_limit.clamp(1, SERVER_PAGE_LIMIT_CAP)
    }
}

/// The hosted backend capabilities a room session consumes.
#[derive(Clone)]
pub struct Collaborators {
    pub identity: Arc<dyn IdentityProvider>,
    pub feed: Arc<dyn ChangeFeed>,
    pub pages: Arc<dyn PageFetcher>,
    pub writer: Arc<dyn MessageWriter>,
    pub blobs: Arc<dyn BlobStore>,
}

impl Collaborators {
    /// Use one backend value for every capability.
    pub fn from_backend<B>(backend: B) -> Self
    where
        B: IdentityProvider + ChangeFeed + PageFetcher + MessageWriter + BlobStore + Clone + 'static,
    {
        Self {
            identity: Arc::new(backend.clone()),
            feed: Arc::new(backend.clone()),
            pages: Arc::new(backend.clone()),
            writer: Arc::new(backend.clone()),
            blobs: Arc::new(backend),
        }
    }
}

fn map_platform_error(operation: &str, err: PlatformError) -> BackendError {
    match err {
        PlatformError::NotFound => BackendError::new(
            BackendErrorCategory::Storage,
            "not_found",
            format!("document not found during {operation}"),
        ),
        PlatformError::Unavailable(message) => BackendError::new(
            BackendErrorCategory::Network,
            "backend_unavailable",
            format!("backend unavailable during {operation}: {message}"),
        ),
        PlatformError::RateLimited { retry_after } => BackendError::new(
            BackendErrorCategory::RateLimited,
            "rate_limited",
            format!("rate limited during {operation}"),
        )
        .with_retry_after(retry_after),
        PlatformError::Rejected(message) => BackendError::new(
            BackendErrorCategory::Storage,
            "request_rejected",
            format!("backend rejected {operation}: {message}"),
        ),
        PlatformError::Backend(message) => BackendError::new(
            BackendErrorCategory::Storage,
            "backend_error",
            format!("backend error during {operation}: {message}"),
        ),
    }
}

fn not_authenticated() -> BackendError {
    BackendError::new(
        BackendErrorCategory::Auth,
        "not_authenticated",
        "no signed-in user to send as",
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn config_defaults_match_feed_and_page_sizes() {
        let config = RoomSessionConfig::new("general");
        assert_eq!(config.feed_limit, 50);
        assert_eq!(config.page_size, 11);
        assert_eq!(config.max_resubscribe_attempts, 0);
    }

    #[test]
    fn bounds_limits_for_safety() {
        assert_eq!(RoomSessionConfig::new("r").with_page_size(0).bounded_page_size(), 2);
        assert_eq!(RoomSessionConfig::new("r").with_page_size(1).bounded_page_size(), 2);
        assert_eq!(RoomSessionConfig::new("r").with_page_size(25).bounded_page_size(), 25);
        assert_eq!(RoomSessionConfig::new("r").with_feed_limit(500).bounded_feed_limit(), 100);
    }

    #[test]
    fn unavailable_maps_to_recoverable_network_error() {
        let err = map_platform_error("subscribe", PlatformError::Unavailable("offline".into()));
        assert_eq!(err.category, BackendErrorCategory::Network);
        assert!(err.is_recoverable());
        assert!(err.message.contains("subscribe"));
    }

    #[test]
    fn rate_limit_keeps_retry_hint() {
        let err = map_platform_error(
            "fetch_page",
            PlatformError::RateLimited {
                retry_after: Duration::from_secs(2),
            },
        );
        assert_eq!(err.code, "rate_limited");
        assert_eq!(err.retry_after_ms, Some(2_000));
    }

    #[test]
    fn rejected_is_not_recoverable() {
        let err = map_platform_error("append", PlatformError::Rejected("too large".into()));
        assert_eq!(err.code, "request_rejected");
        assert!(!err.is_recoverable());
    }
}
