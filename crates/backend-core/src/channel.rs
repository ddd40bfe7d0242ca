use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::types::{RoomCommand, RoomEvent};

/// Broadcast event stream type used by rendering-layer subscribers.
pub type EventStream = broadcast::Receiver<RoomEvent>;

/// Errors returned by room channel operations.
#[derive(Debug, Error)]
pub enum RoomChannelError {
    /// The command receiver side is closed.
    #[error("command channel is closed")]
    CommandChannelClosed,
}

/// Command/event channel pair shared by a room session and its handles.
#[derive(Clone, Debug)]
pub struct RoomChannels {
    command_tx: mpsc::Sender<RoomCommand>,
    event_tx: broadcast::Sender<RoomEvent>,
}

impl RoomChannels {
    /// Create a new channel set and return it with the command receiver.
    pub fn new(command_buffer: usize, event_buffer: usize) -> (Self, mpsc::Receiver<RoomCommand>) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));

        (
            Self {
                command_tx,
                event_tx,
            },
            command_rx,
        )
    }

    /// Subscribe to emitted room events.
    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Send one command to the session.
    pub async fn send_command(&self, command: RoomCommand) -> Result<(), RoomChannelError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| RoomChannelError::CommandChannelClosed)
    }

    /// Emit an event to all subscribers.
    ///
    /// Emission is best-effort; lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, event: RoomEvent) {
        let _ = self.event_tx.send(event);
    }
}
