//! Rendering-side reducer over room events.

use std::collections::HashSet;

use backend_core::{Message, RoomEvent, RoomLifecycleState, RoomSummary, SendAck};
use tracing::{debug, trace, warn};

const DEFAULT_STATUS: &str = "Idle";

/// Room listing row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomView {
    pub name: String,
    pub last_activity_ms: Option<u64>,
    pub is_selected: bool,
}

/// Message row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageView {
    pub id: String,
    pub sender: String,
    pub body: String,
    pub image_uri: Option<String>,
    pub is_own: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSnapshot {
    pub rooms: Vec<RoomView>,
    pub messages: Vec<MessageView>,
    pub status_text: String,
    pub error_text: Option<String>,
    pub loading: bool,
    pub history_exhausted: bool,
    pub pending_sends: usize,
}

/// Mutable view state fed with room events and listing refreshes.
#[derive(Debug, Clone)]
pub struct ViewState {
    own_handle: String,
    selected_room: String,
    rooms: Vec<RoomView>,
    messages: Vec<MessageView>,
    status_text: String,
    error_text: Option<String>,
    loading: bool,
    history_exhausted: bool,
    pending_sends: HashSet<String>,
}

impl ViewState {
    pub fn new(own_handle: impl Into<String>, selected_room: impl Into<String>) -> Self {
        Self {
            own_handle: own_handle.into(),
            selected_room: selected_room.into(),
            rooms: Vec::new(),
            messages: Vec::new(),
            status_text: DEFAULT_STATUS.to_owned(),
            error_text: None,
            loading: true,
            history_exhausted: false,
            pending_sends: HashSet::new(),
        }
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        ViewSnapshot {
            rooms: self.rooms.clone(),
            messages: self.messages.clone(),
            status_text: self.status_text.clone(),
            error_text: self.error_text.clone(),
            loading: self.loading,
            history_exhausted: self.history_exhausted,
            pending_sends: self.pending_sends.len(),
        }
    }

    /// Replace the room list, keeping the directory's ordering.
    pub fn replace_rooms(&mut self, rooms: Vec<RoomSummary>) {
        self.rooms = rooms
            .into_iter()
            .map(|room| RoomView {
                is_selected: room.name == self.selected_room,
                name: room.name,
                last_activity_ms: room.last_message_timestamp_ms,
            })
            .collect();
        debug!(room_count = self.rooms.len(), "room list replaced");
    }

    pub fn mark_send_requested(&mut self, client_txn_id: String) {
        self.pending_sends.insert(client_txn_id);
    }

    pub fn handle_room_event(&mut self, event: RoomEvent) {
        if let Some(room) = event_room(&event)
            && room != self.selected_room
        {
            trace!(%room, "ignoring event for unselected room");
            return;
        }

        match event {
            RoomEvent::StateChanged { state, .. } => {
                self.status_text = lifecycle_label(state).to_owned();
            }
            RoomEvent::Snapshot {
                messages, loading, ..
            } => {
                trace!(item_count = messages.len(), loading, "received room snapshot");
                self.loading = loading;
                self.messages = messages.iter().map(|m| self.message_view(m)).collect();
            }
            RoomEvent::PageMerged {
                added, exhausted, ..
            } => {
                debug!(added, exhausted, "history page merged");
                self.history_exhausted = exhausted;
            }
            RoomEvent::SendAck(ack) => self.handle_send_ack(ack),
            RoomEvent::Error {
                code,
                message,
                recoverable,
                ..
            } => {
                warn!(%code, %message, recoverable, "room error surfaced to view");
                self.error_text = Some(format!("{code}: {message}"));
            }
        }
    }

    fn handle_send_ack(&mut self, ack: SendAck) {
        self.pending_sends.remove(&ack.client_txn_id);
        if let Some(error_code) = ack.error_code {
            warn!(
                client_txn_id = %ack.client_txn_id,
                error_code = %error_code,
                "send acknowledgement reported failure"
            );
            self.error_text = Some(send_error_text(&error_code));
        } else {
            debug!(client_txn_id = %ack.client_txn_id, "send acknowledgement succeeded");
            self.error_text = None;
        }
    }

    fn message_view(&self, message: &Message) -> MessageView {
        MessageView {
            id: message.id.clone(),
            sender: message
                .display_name
                .clone()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| message.author_handle.clone()),
            body: message.text.clone(),
            image_uri: message.attachment.as_ref().map(|a| a.uri.clone()),
            is_own: message.author_handle == self.own_handle,
        }
    }
}

fn event_room(event: &RoomEvent) -> Option<&str> {
    match event {
        RoomEvent::StateChanged { room, .. }
        | RoomEvent::Snapshot { room, .. }
        | RoomEvent::PageMerged { room, .. }
        | RoomEvent::Error { room, .. } => Some(room),
        RoomEvent::SendAck(_) => None,
    }
}

fn lifecycle_label(state: RoomLifecycleState) -> &'static str {
    match state {
        RoomLifecycleState::Subscribing => "Connecting",
        RoomLifecycleState::Live => "Live",
        RoomLifecycleState::Reconnecting => "Reconnecting",
        RoomLifecycleState::Stalled => "Disconnected",
        RoomLifecycleState::Closed => "Closed",
    }
}

fn send_error_text(code: &str) -> String {
    if code.starts_with("attachment_") {
        "Error occurred with the image".to_owned()
    } else {
        format!("send failed ({code})")
    }
}

#[cfg(test)]
mod tests {
    use backend_core::Attachment;

    use super::*;

    fn message(id: &str, author: &str, display_name: Option<&str>) -> Message {
        Message {
            id: id.to_owned(),
            author_handle: author.to_owned(),
            display_name: display_name.map(ToOwned::to_owned),
            avatar_ref: None,
            text: format!("body {id}"),
            attachment: None,
            timestamp_ms: 1,
        }
    }

    #[test]
    fn snapshot_builds_rows_with_ownership() {
        let mut state = ViewState::new("alice@example.org", "general");
        let mut with_image = message("m2", "bob@example.org", Some("  "));
        with_image.attachment = Some(Attachment {
            uri: "mem://blobs/1-bob".into(),
            width: 1,
            height: 1,
        });

        state.handle_room_event(RoomEvent::Snapshot {
            room: "general".into(),
            messages: vec![message("m1", "alice@example.org", Some("Alice")), with_image],
            loading: false,
        });

        let snapshot = state.snapshot();
        assert!(!snapshot.loading);
        assert_eq!(snapshot.messages[0].sender, "Alice");
        assert!(snapshot.messages[0].is_own);
        assert_eq!(snapshot.messages[1].sender, "bob@example.org");
        assert!(!snapshot.messages[1].is_own);
        assert_eq!(snapshot.messages[1].image_uri.as_deref(), Some("mem://blobs/1-bob"));
    }

    #[test]
    fn events_for_other_rooms_are_ignored() {
        let mut state = ViewState::new("alice@example.org", "general");
        state.handle_room_event(RoomEvent::Snapshot {
            room: "random".into(),
            messages: vec![message("m1", "bob@example.org", None)],
            loading: false,
        });
        assert!(state.snapshot().messages.is_empty());
        assert!(state.snapshot().loading);
    }

    #[test]
    fn send_ack_clears_pending_and_reports_failures() {
        let mut state = ViewState::new("alice@example.org", "general");
        state.mark_send_requested("txn-1".into());
        state.mark_send_requested("txn-2".into());

        state.handle_room_event(RoomEvent::SendAck(SendAck {
            client_txn_id: "txn-1".into(),
            message_id: None,
            error_code: Some("attachment_upload_failed".into()),
        }));
        let snapshot = state.snapshot();
        assert_eq!(snapshot.pending_sends, 1);
        assert_eq!(snapshot.error_text.as_deref(), Some("Error occurred with the image"));

        state.handle_room_event(RoomEvent::SendAck(SendAck {
            client_txn_id: "txn-2".into(),
            message_id: Some("abc".into()),
            error_code: None,
        }));
        let snapshot = state.snapshot();
        assert_eq!(snapshot.pending_sends, 0);
        assert_eq!(snapshot.error_text, None);
    }

    #[test]
    fn lifecycle_and_pagination_update_status() {
        let mut state = ViewState::new("alice@example.org", "general");
        state.handle_room_event(RoomEvent::StateChanged {
            room: "general".into(),
            state: RoomLifecycleState::Reconnecting,
        });
        state.handle_room_event(RoomEvent::PageMerged {
            room: "general".into(),
            added: 0,
            exhausted: true,
        });

        let snapshot = state.snapshot();
        assert_eq!(snapshot.status_text, "Reconnecting");
        assert!(snapshot.history_exhausted);
    }

    #[test]
    fn room_list_marks_selection_and_keeps_order() {
        let mut state = ViewState::new("alice@example.org", "general");
        state.replace_rooms(vec![
            RoomSummary {
                name: "random".into(),
                last_message_timestamp_ms: Some(9),
            },
            RoomSummary {
                name: "general".into(),
                last_message_timestamp_ms: None,
            },
        ]);

        let rooms = state.snapshot().rooms;
        assert_eq!(rooms[0].name, "random");
        assert!(!rooms[0].is_selected);
        assert!(rooms[1].is_selected);
    }
}
