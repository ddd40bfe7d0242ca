//! External collaborator seams consumed by room sessions.
//!
//! The hosted backend (identity, document feed, history queries, writes and
//! blob storage) is reached only through these traits. [`InMemoryBackend`]
//! implements all of them for tests and local runs.

use std::time::Duration;

use async_trait::async_trait;
use backend_core::{FeedBatch, Identity, Message, OutgoingMessage};
use thiserror::Error;
use tokio::sync::mpsc;

mod memory;

pub use memory::{InMemoryBackend, MemoryStats};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("document not found")]
    NotFound,
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("backend failure: {0}")]
    Backend(String),
}

/// Receiving side of a change feed subscription. Dropping it unsubscribes.
///
/// An `Err` item reports a transport failure; the feed delivers nothing after it.
pub type FeedSubscription = mpsc::UnboundedReceiver<Result<FeedBatch, PlatformError>>;

/// History query boundary relative to a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// `timestamp <= t`
    AtOrBefore(u64),
    /// `timestamp < t`
    Before(u64),
}

impl Boundary {
    pub fn admits(&self, timestamp_ms: u64) -> bool {
        match *self {
            Boundary::AtOrBefore(t) => timestamp_ms <= t,
            Boundary::Before(t) => timestamp_ms < t,
        }
    }
}

/// Newest-first bounded history query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageQuery {
    /// Upper bound, or `None` for the most recent messages.
    pub boundary: Option<Boundary>,
    pub limit: u16,
}

pub trait IdentityProvider: Send + Sync {
    fn current_identity(&self) -> Option<Identity>;
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Subscribe to a room ordered by timestamp descending, limited to `limit`
    /// documents in the initial batch.
    async fn subscribe(&self, room: &str, limit: u16) -> Result<FeedSubscription, PlatformError>;
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Return up to `query.limit` messages, newest-first.
    async fn fetch_page(&self, room: &str, query: PageQuery) -> Result<Vec<Message>, PlatformError>;
}

#[async_trait]
pub trait MessageWriter: Send + Sync {
    /// Persist a message; the backend assigns the ID (returned) and the timestamp.
    async fn append(&self, room: &str, message: OutgoingMessage) -> Result<String, PlatformError>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store the content at `source_uri` under `key` and return its durable access URI.
    async fn put(&self, key: &str, source_uri: &str) -> Result<String, PlatformError>;
}
