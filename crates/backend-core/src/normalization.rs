use crate::{
    error::BackendError,
    types::{RoomEvent, SendAck},
};

/// Send command success/failure before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The message record was written and received a backend ID.
    Success { message_id: String },
    /// The send was aborted.
    Failure { error: BackendError },
}

/// Convert a send outcome to a stable `RoomEvent::SendAck`.
pub fn normalize_send_outcome(client_txn_id: impl Into<String>, outcome: SendOutcome) -> RoomEvent {
    let client_txn_id = client_txn_id.into();
    match outcome {
        SendOutcome::Success { message_id } => RoomEvent::SendAck(SendAck {
            client_txn_id,
            message_id: Some(message_id),
            error_code: None,
        }),
        SendOutcome::Failure { error } => RoomEvent::SendAck(SendAck {
            client_txn_id,
            message_id: None,
            error_code: Some(error.code),
        }),
    }
}

/// Convert an error into a user-facing `RoomEvent::Error`.
pub fn normalize_room_error(room: impl Into<String>, error: BackendError) -> RoomEvent {
    let recoverable = error.is_recoverable();
    RoomEvent::Error {
        room: room.into(),
        code: error.code,
        message: error.message,
        recoverable,
    }
}
