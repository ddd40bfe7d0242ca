//! Core room contract shared between the session runtime and rendering consumers.
//!
//! This crate defines the message model, the live message log merge engine,
//! the composer, the command/event protocol, lifecycle model, retry policy,
//! and common error/channel abstractions.

/// Async command/event channel primitives.
pub mod channel;
/// Pending input buffer and send-side validation.
pub mod composer;
/// Stable backend error types.
pub mod error;
/// Event normalization helpers (send acknowledgements, user-facing errors).
pub mod normalization;
/// Backoff policy used by feed resubscription.
pub mod retry;
/// Room session lifecycle state machine.
pub mod state_machine;
/// Live message log merge engine.
pub mod timeline;
/// Message model and rendering-facing protocol types.
pub mod types;

pub use channel::{EventStream, RoomChannelError, RoomChannels};
pub use composer::{Composer, ImageSource, resolve_picked_image, validate_message_text};
pub use error::{BackendError, BackendErrorCategory};
pub use normalization::{SendOutcome, normalize_room_error, normalize_send_outcome};
pub use retry::RetryPolicy;
pub use state_machine::RoomStateMachine;
pub use timeline::{IgnoreReason, LiveMessageLog, MergeOutcome, PageMerge};
pub use types::{
    Attachment, ChangeKind, FeedBatch, FeedChange, Identity, Message, MessageDocument,
    OutgoingMessage, PickedImage, RoomCommand, RoomEvent, RoomLifecycleState, RoomSummary,
    SendAck,
};
