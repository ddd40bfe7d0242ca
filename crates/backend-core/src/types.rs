use serde::{Deserialize, Serialize};

/// Lifecycle of one open room session as reported to the rendering layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RoomLifecycleState {
    /// Feed subscription requested; waiting for the first batch.
    Subscribing,
    /// First batch received; live changes are being merged.
    Live,
    /// Feed failed with a recoverable error and a resubscribe is pending.
    Reconnecting,
    /// Feed failed and no resubscribe will be attempted.
    Stalled,
    /// Session torn down. No further mutations are applied.
    Closed,
}

/// Image attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    /// Durable access URI produced by the blob store.
    pub uri: String,
    /// Pixel width reported by the picker.
    pub width: u32,
    /// Pixel height reported by the picker.
    pub height: u32,
}

/// One materialized chat entry. Always carries a server timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Backend-assigned ID, unique within a room.
    pub id: String,
    /// Sender handle (the author's email).
    pub author_handle: String,
    /// Optional sender display name.
    pub display_name: Option<String>,
    /// Optional avatar URI.
    pub avatar_ref: Option<String>,
    /// Message text, possibly empty for image-only messages.
    pub text: String,
    /// Optional image attachment.
    pub attachment: Option<Attachment>,
    /// Server-assigned timestamp in milliseconds since Unix epoch.
    pub timestamp_ms: u64,
}

impl Message {
    /// Compare every field except the backend ID.
    pub fn same_content(&self, other: &Message) -> bool {
        self.author_handle == other.author_handle
            && self.display_name == other.display_name
            && self.avatar_ref == other.avatar_ref
            && self.text == other.text
            && self.attachment == other.attachment
            && self.timestamp_ms == other.timestamp_ms
    }
}

/// Message document as stored by the backend.
///
/// A freshly written document has no timestamp until the server resolves its
/// timestamp placeholder; such documents are not yet messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageDocument {
    pub id: String,
    pub author_handle: String,
    pub display_name: Option<String>,
    pub avatar_ref: Option<String>,
    pub text: String,
    pub attachment: Option<Attachment>,
    pub timestamp_ms: Option<u64>,
}

impl MessageDocument {
    /// Convert into a [`Message`], or `None` while the timestamp is pending.
    pub fn into_message(self) -> Option<Message> {
        let timestamp_ms = self.timestamp_ms?;
        Some(Message {
            id: self.id,
            author_handle: self.author_handle,
            display_name: self.display_name,
            avatar_ref: self.avatar_ref,
            text: self.text,
            attachment: self.attachment,
            timestamp_ms,
        })
    }
}

impl From<Message> for MessageDocument {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            author_handle: message.author_handle,
            display_name: message.display_name,
            avatar_ref: message.avatar_ref,
            text: message.text,
            attachment: message.attachment,
            timestamp_ms: Some(message.timestamp_ms),
        }
    }
}

/// Message record submitted for persistence. The backend assigns ID and timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub author_handle: String,
    pub display_name: Option<String>,
    pub avatar_ref: Option<String>,
    pub text: String,
    pub attachment: Option<Attachment>,
}

/// Currently authenticated user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    /// Account email, used as the author handle.
    pub email: String,
    /// Optional display name.
    pub display_name: Option<String>,
    /// Optional avatar URI attached to outgoing messages.
    pub avatar_ref: Option<String>,
}

/// Result handed back by the platform image picker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PickedImage {
    /// The user dismissed the picker.
    Cancelled,
    /// An image was chosen. `uri` is `None` when the picker failed to resolve a source.
    Picked {
        uri: Option<String>,
        width: u32,
        height: u32,
    },
}

/// Kind of a document change delivered by the change feed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
}

/// One change inside a feed batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedChange {
    pub kind: ChangeKind,
    pub document: MessageDocument,
}

impl FeedChange {
    pub fn added(document: MessageDocument) -> Self {
        Self {
            kind: ChangeKind::Added,
            document,
        }
    }

    pub fn modified(document: MessageDocument) -> Self {
        Self {
            kind: ChangeKind::Modified,
            document,
        }
    }
}

/// Changes delivered together by one feed snapshot, newest-first.
pub type FeedBatch = Vec<FeedChange>;

/// Room listing row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomSummary {
    /// Room (collection) name.
    pub name: String,
    /// Timestamp of the most recent message, when the room has any.
    pub last_message_timestamp_ms: Option<u64>,
}

/// Command channel input accepted by a room session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RoomCommand {
    /// Fetch one page of history older than the oldest materialized message.
    LoadOlder,
    /// Send a text message.
    SendMessage {
        /// Client transaction ID echoed in `SendAck`.
        client_txn_id: String,
        /// Message body.
        text: String,
    },
    /// Upload an image and send it with an optional caption.
    ///
    /// A cancelled picker is acknowledged with neither a message ID nor an
    /// error code.
    SendImageMessage {
        /// Client transaction ID echoed in `SendAck`.
        client_txn_id: String,
        /// Caption, may be empty.
        text: String,
        /// Picker result.
        image: PickedImage,
    },
    /// Tear down the session.
    Close,
}

/// Acknowledgement for send commands.
///
/// Both fields empty means nothing was sent (cancelled image picker).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendAck {
    /// Client transaction ID from the send command.
    pub client_txn_id: String,
    /// Backend message ID on success.
    pub message_id: Option<String>,
    /// Stable error code on failure.
    pub error_code: Option<String>,
}

/// Event channel output emitted by a room session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RoomEvent {
    /// Session lifecycle transition.
    StateChanged {
        room: String,
        state: RoomLifecycleState,
    },
    /// Full ordered log after an atomic transition.
    Snapshot {
        room: String,
        /// Messages ascending by timestamp.
        messages: Vec<Message>,
        loading: bool,
    },
    /// A history page was merged.
    PageMerged {
        room: String,
        /// Number of entries the page added.
        added: usize,
        /// `true` when the page added nothing new.
        exhausted: bool,
    },
    /// Send acknowledgement.
    SendAck(SendAck),
    /// Operation failure surfaced to the user.
    Error {
        room: String,
        code: String,
        message: String,
        recoverable: bool,
    },
}
