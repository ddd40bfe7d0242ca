use crate::{
    error::BackendError,
    types::{RoomCommand, RoomLifecycleState},
};

#[derive(Debug, Clone)]
pub struct RoomStateMachine {
    state: RoomLifecycleState,
}

impl Default for RoomStateMachine {
    fn default() -> Self {
        Self {
            state: RoomLifecycleState::Subscribing,
        }
    }
}

impl RoomStateMachine {
    pub fn state(&self) -> RoomLifecycleState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == RoomLifecycleState::Closed
    }

    /// Check whether `command` may run, applying the transition for `Close`.
    pub fn apply(
        &mut self,
        command: &RoomCommand,
    ) -> Result<Option<RoomLifecycleState>, BackendError> {
        match command {
            RoomCommand::Close => {
                self.transition_from_any_open(RoomLifecycleState::Closed, "close")
            }
            RoomCommand::LoadOlder
            | RoomCommand::SendMessage { .. }
            | RoomCommand::SendImageMessage { .. } => {
                if self.is_closed() {
                    Err(BackendError::invalid_state(self.state, "room command"))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// A feed batch arrived.
    pub fn on_feed_batch(&mut self) -> Option<RoomLifecycleState> {
        match self.state {
            RoomLifecycleState::Subscribing | RoomLifecycleState::Reconnecting => {
                self.state = RoomLifecycleState::Live;
                Some(self.state)
            }
            _ => None,
        }
    }

    /// The feed failed; `will_retry` selects between reconnecting and stalled.
    pub fn on_feed_failure(
        &mut self,
        will_retry: bool,
    ) -> Result<RoomLifecycleState, BackendError> {
        let next = if will_retry {
            RoomLifecycleState::Reconnecting
        } else {
            RoomLifecycleState::Stalled
        };
        self.transition_from_any_open(next, "feed_failure")?;
        Ok(next)
    }

    /// A resubscribe attempt started.
    pub fn on_resubscribe(&mut self) -> Result<RoomLifecycleState, BackendError> {
        if self.state != RoomLifecycleState::Reconnecting {
            return Err(BackendError::invalid_state(self.state, "resubscribe"));
        }
        self.state = RoomLifecycleState::Subscribing;
        Ok(self.state)
    }

    fn transition_from_any_open(
        &mut self,
        next: RoomLifecycleState,
        action: &str,
    ) -> Result<Option<RoomLifecycleState>, BackendError> {
        if self.is_closed() {
            return Err(BackendError::invalid_state(self.state, action));
        }
        self.state = next;
        Ok(Some(next))
    }
}
