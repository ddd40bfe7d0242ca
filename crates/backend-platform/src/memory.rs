use std::{
    collections::HashMap,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use backend_core::{FeedBatch, FeedChange, Identity, Message, MessageDocument, OutgoingMessage};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::{
    BlobStore, ChangeFeed, FeedSubscription, IdentityProvider, MessageWriter, PageFetcher,
    PageQuery, PlatformError,
};

const BLOB_URI_PREFIX: &str = "mem://blobs/";

/// Call counters, used to check which collaborators an operation touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub feed_subscriptions: usize,
    pub page_queries: usize,
    pub writes: usize,
    pub blob_puts: usize,
}

type FeedSender = mpsc::UnboundedSender<Result<FeedBatch, PlatformError>>;

#[derive(Default)]
struct RoomCollection {
    documents: Vec<MessageDocument>,
    subscribers: Vec<FeedSender>,
}

impl RoomCollection {
    fn publish(&mut self, batch: FeedBatch) {
        self.subscribers
            .retain(|subscriber| subscriber.send(Ok(batch.clone())).is_ok());
    }

    fn newest_first(&self) -> Vec<&MessageDocument> {
        let mut stamped: Vec<&MessageDocument> = self
            .documents
            .iter()
            .rev()
            .filter(|document| document.timestamp_ms.is_some())
            .collect();
        stamped.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms));
        stamped
    }
}

#[derive(Default)]
struct MemoryState {
    rooms: HashMap<String, RoomCollection>,
    blobs: HashMap<String, String>,
    identity: Option<Identity>,
    last_timestamp_ms: u64,
    unavailable: Option<String>,
    stats: MemoryStats,
}

impl MemoryState {
    fn check_available(&self) -> Result<(), PlatformError> {
        match &self.unavailable {
            Some(reason) => Err(PlatformError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    fn next_timestamp(&mut self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        self.last_timestamp_ms = now.max(self.last_timestamp_ms.saturating_add(1));
        self.last_timestamp_ms
    }
}

/// Single-process stand-in for the hosted backend.
///
/// Writes behave like a server-timestamped document store: subscribers first
/// see an `added` change with a pending timestamp, then a `modified` change
/// carrying the resolved one.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, identity: Identity) -> Result<(), PlatformError> {
        self.write()?.identity = Some(identity);
        Ok(())
    }

    pub fn sign_out(&self) -> Result<(), PlatformError> {
        self.write()?.identity = None;
        Ok(())
    }

    /// Store a message with a fixed timestamp and publish it as `added`.
    pub fn insert_message(&self, room: &str, message: Message) -> Result<(), PlatformError> {
        let mut state = self.write()?;
        state.last_timestamp_ms = state.last_timestamp_ms.max(message.timestamp_ms);
        let document = MessageDocument::from(message);
        let collection = state.rooms.entry(room.to_owned()).or_default();
        collection.documents.push(document.clone());
        collection.publish(vec![FeedChange::added(document)]);
        Ok(())
    }

    /// Republish a stored document as `modified` after changing its text.
    pub fn edit_text(&self, room: &str, id: &str, text: &str) -> Result<(), PlatformError> {
        let mut state = self.write()?;
        let collection = state.rooms.get_mut(room).ok_or(PlatformError::NotFound)?;
        let document = collection
            .documents
            .iter_mut()
            .find(|document| document.id == id)
            .ok_or(PlatformError::NotFound)?;
        document.text = text.to_owned();
        let change = FeedChange::modified(document.clone());
        collection.publish(vec![change]);
        Ok(())
    }

    /// Fail every open subscription of `room` with `error` and drop them.
    pub fn break_feeds(&self, room: &str, error: PlatformError) -> Result<usize, PlatformError> {
        let mut state = self.write()?;
        let Some(collection) = state.rooms.get_mut(room) else {
            return Ok(0);
        };
        let subscribers = std::mem::take(&mut collection.subscribers);
        let count = subscribers.len();
        for subscriber in subscribers {
            let _ = subscriber.send(Err(error.clone()));
        }
        debug!(room, count, "in-memory feeds broken");
        Ok(count)
    }

    /// Make every call fail with `PlatformError::Unavailable` until cleared with `None`.
    pub fn set_unavailable(&self, reason: Option<&str>) -> Result<(), PlatformError> {
        self.write()?.unavailable = reason.map(ToOwned::to_owned);
        Ok(())
    }

    /// Stored documents of `room` in write order.
    pub fn documents(&self, room: &str) -> Result<Vec<MessageDocument>, PlatformError> {
        Ok(self
            .read()?
            .rooms
            .get(room)
            .map(|collection| collection.documents.clone())
            .unwrap_or_default())
    }

    /// Source URI recorded for a blob key.
    pub fn blob_source(&self, key: &str) -> Result<Option<String>, PlatformError> {
        Ok(self.read()?.blobs.get(key).cloned())
    }

    pub fn open_subscriptions(&self, room: &str) -> Result<usize, PlatformError> {
        let mut state = self.write()?;
        Ok(state
            .rooms
            .get_mut(room)
            .map(|collection| {
                collection
                    .subscribers
                    .retain(|subscriber| !subscriber.is_closed());
                collection.subscribers.len()
            })
            .unwrap_or(0))
    }

    pub fn stats(&self) -> Result<MemoryStats, PlatformError> {
        Ok(self.read()?.stats)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryState>, PlatformError> {
        self.state
            .read()
            .map_err(|_| PlatformError::Backend("poisoned lock".to_owned()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryState>, PlatformError> {
        self.state
            .write()
            .map_err(|_| PlatformError::Backend("poisoned lock".to_owned()))
    }
}

impl IdentityProvider for InMemoryBackend {
    fn current_identity(&self) -> Option<Identity> {
        self.read().ok().and_then(|state| state.identity.clone())
    }
}

#[async_trait]
impl ChangeFeed for InMemoryBackend {
    async fn subscribe(&self, room: &str, limit: u16) -> Result<FeedSubscription, PlatformError> {
        let mut state = self.write()?;
        state.check_available()?;
        state.stats.feed_subscriptions += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        let collection = state.rooms.entry(room.to_owned()).or_default();
        let initial: FeedBatch = collection
            .newest_first()
            .into_iter()
            .take(usize::from(limit))
            .cloned()
            .map(FeedChange::added)
            .collect();
        trace!(room, initial = initial.len(), "in-memory feed subscribed");

        // The receiver is still held locally, so this cannot fail.
        let _ = tx.send(Ok(initial));
        collection.subscribers.push(tx);
        Ok(rx)
    }
}

#[async_trait]
impl PageFetcher for InMemoryBackend {
    async fn fetch_page(&self, room: &str, query: PageQuery) -> Result<Vec<Message>, PlatformError> {
        let mut state = self.write()?;
        state.check_available()?;
        state.stats.page_queries += 1;

        let Some(collection) = state.rooms.get(room) else {
            return Ok(Vec::new());
        };
        Ok(collection
            .newest_first()
            .into_iter()
            .filter(|document| match (query.boundary, document.timestamp_ms) {
                (Some(boundary), Some(timestamp)) => boundary.admits(timestamp),
                (None, Some(_)) => true,
                (_, None) => false,
            })
            .take(usize::from(query.limit))
            .filter_map(|document| document.clone().into_message())
            .collect())
    }
}

#[async_trait]
impl MessageWriter for InMemoryBackend {
    async fn append(&self, room: &str, message: OutgoingMessage) -> Result<String, PlatformError> {
        let mut state = self.write()?;
        state.check_available()?;
        state.stats.writes += 1;

        let id = Uuid::new_v4().to_string();
        let mut document = MessageDocument {
            id: id.clone(),
            author_handle: message.author_handle,
            display_name: message.display_name,
            avatar_ref: message.avatar_ref,
            text: message.text,
            attachment: message.attachment,
            timestamp_ms: None,
        };

        let pending = document.clone();
        document.timestamp_ms = Some(state.next_timestamp());

        let collection = state.rooms.entry(room.to_owned()).or_default();
        collection.publish(vec![FeedChange::added(pending)]);
        collection.documents.push(document.clone());
        collection.publish(vec![FeedChange::modified(document)]);
        debug!(room, %id, "in-memory message written");
        Ok(id)
    }
}

#[async_trait]
impl BlobStore for InMemoryBackend {
    async fn put(&self, key: &str, source_uri: &str) -> Result<String, PlatformError> {
        let mut state = self.write()?;
        state.check_available()?;
        state.stats.blob_puts += 1;

        if source_uri.trim().is_empty() {
            return Err(PlatformError::Rejected("empty blob source".to_owned()));
        }
        state.blobs.insert(key.to_owned(), source_uri.to_owned());
        Ok(format!("{BLOB_URI_PREFIX}{key}"))
    }
}
