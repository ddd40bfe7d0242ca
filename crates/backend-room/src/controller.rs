use backend_core::{
    BackendError, BackendErrorCategory, Composer, EventStream, PickedImage, RoomCommand,
    resolve_picked_image, validate_message_text,
};
use tracing::debug;
use uuid::Uuid;

use crate::RoomSessionHandle;

/// Input-side glue between a room screen and its session.
///
/// Owns the composer buffer: text is cleared only once a send has been
/// enqueued, and restored untouched when validation fails.
pub struct ChatController {
    session: RoomSessionHandle,
    composer: Composer,
}

impl ChatController {
    pub fn new(session: RoomSessionHandle) -> Self {
        Self {
            session,
            composer: Composer::default(),
        }
    }

    pub fn room(&self) -> &str {
        self.session.room()
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.composer.set_text(text);
    }

    pub fn subscribe(&self) -> EventStream {
        self.session.subscribe()
    }

    /// Enqueue the composer text. Returns the client transaction id.
    pub async fn send_text(&mut self) -> Result<String, BackendError> {
        self.composer.begin_send();
        if let Err(err) = validate_message_text(self.composer.text()) {
            self.composer.restore();
            return Err(err);
        }

        let client_txn_id = Uuid::new_v4().to_string();
        let command = RoomCommand::SendMessage {
            client_txn_id: client_txn_id.clone(),
            text: self.composer.text().to_owned(),
        };
        self.enqueue(command).await?;
        self.composer.finish_enqueued();
        Ok(client_txn_id)
    }

    /// Enqueue an image message captioned with the composer text.
    ///
    /// A cancelled picker returns `Ok(None)` and changes nothing.
    pub async fn send_image(&mut self, image: PickedImage) -> Result<Option<String>, BackendError> {
        self.composer.begin_send();
        match resolve_picked_image(&image) {
            Ok(Some(_)) => {}
            Ok(None) => {
                self.composer.restore();
                debug!(room = %self.session.room(), "image picker cancelled");
                return Ok(None);
            }
            Err(err) => {
                self.composer.restore();
                return Err(err);
            }
        }

        let client_txn_id = Uuid::new_v4().to_string();
        let command = RoomCommand::SendImageMessage {
            client_txn_id: client_txn_id.clone(),
            text: self.composer.text().to_owned(),
            image,
        };
        self.enqueue(command).await?;
        self.composer.finish_enqueued();
        Ok(Some(client_txn_id))
    }

    pub async fn load_older(&self) -> Result<(), BackendError> {
        self.session
            .send(RoomCommand::LoadOlder)
            .await
            .map_err(session_gone)
    }

    pub async fn close(self) {
        self.session.close().await;
    }

    async fn enqueue(&mut self, command: RoomCommand) -> Result<(), BackendError> {
        if let Err(err) = self.session.send(command).await {
            self.composer.restore();
            return Err(session_gone(err));
        }
        Ok(())
    }
}

fn session_gone(err: impl std::fmt::Display) -> BackendError {
    BackendError::new(BackendErrorCategory::Internal, "room_closed", err.to_string())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use backend_core::{Identity, RoomEvent};
    use backend_platform::InMemoryBackend;
    use tokio::sync::broadcast::error::RecvError;

    use super::*;
    use crate::{Collaborators, RoomSessionConfig, spawn_room_session};

    fn controller_with(backend: &InMemoryBackend) -> ChatController {
        let (session, _events) = spawn_room_session(
            RoomSessionConfig::new("general"),
            Collaborators::from_backend(backend.clone()),
        );
        ChatController::new(session)
    }

    fn signed_in_backend() -> InMemoryBackend {
        let backend = InMemoryBackend::new();
        backend
            .sign_in(Identity {
                email: "alice@example.org".into(),
                display_name: None,
                avatar_ref: None,
            })
            .expect("sign in");
        backend
    }

    async fn wait_for_ack(events: &mut EventStream, client_txn_id: &str) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Ok(RoomEvent::SendAck(ack)) if ack.client_txn_id == client_txn_id => {
                        return ack.message_id;
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => panic!("event stream closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for ack")
    }

    #[tokio::test]
    async fn blank_text_is_kept_and_nothing_is_enqueued() {
        let backend = signed_in_backend();
        let mut controller = controller_with(&backend);
        controller.set_text("   ");

        let err = controller.send_text().await.expect_err("blank text must fail");
        assert_eq!(err.code, "empty_message");
        assert_eq!(controller.composer().text(), "   ");
        assert!(controller.composer().is_editable());
        assert_eq!(backend.stats().expect("stats").writes, 0);
    }

    #[tokio::test]
    async fn text_clears_once_enqueued_and_message_is_written() {
        let backend = signed_in_backend();
        let mut controller = controller_with(&backend);
        let mut events = controller.subscribe();
        controller.set_text("hello");

        let txn = controller.send_text().await.expect("send");
        assert_eq!(controller.composer().text(), "");
        assert!(controller.composer().is_editable());

        let message_id = wait_for_ack(&mut events, &txn).await.expect("written");
        let documents = backend.documents("general").expect("documents");
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].id, message_id);
        assert_eq!(documents[0].text, "hello");
    }

    #[tokio::test]
    async fn cancelled_picker_keeps_caption() {
        let backend = signed_in_backend();
        let mut controller = controller_with(&backend);
        controller.set_text("caption");

        let sent = controller
            .send_image(PickedImage::Cancelled)
            .await
            .expect("cancel is not an error");
        assert_eq!(sent, None);
        assert_eq!(controller.composer().text(), "caption");
        assert_eq!(backend.stats().expect("stats").blob_puts, 0);
    }

    #[tokio::test]
    async fn invalid_picker_uri_is_reported_without_upload() {
        let backend = signed_in_backend();
        let mut controller = controller_with(&backend);

        let err = controller
            .send_image(PickedImage::Picked {
                uri: Some("not a uri".into()),
                width: 10,
                height: 10,
            })
            .await
            .expect_err("invalid uri");
        assert_eq!(err.code, "attachment_invalid_uri");
        assert!(controller.composer().is_editable());
        assert_eq!(backend.stats().expect("stats").blob_puts, 0);
    }

    #[tokio::test]
    async fn image_with_empty_caption_is_sent() {
        let backend = signed_in_backend();
        let mut controller = controller_with(&backend);
        let mut events = controller.subscribe();

        let txn = controller
            .send_image(PickedImage::Picked {
                uri: Some("file:///tmp/cat.png".into()),
                width: 3,
                height: 2,
            })
            .await
            .expect("send image")
            .expect("enqueued");

        wait_for_ack(&mut events, &txn).await.expect("written");
        let documents = backend.documents("general").expect("documents");
        assert_eq!(documents[0].text, "");
        assert!(documents[0].attachment.is_some());
        assert_eq!(backend.stats().expect("stats").blob_puts, 1);
    }
}
