use std::{
    ops::ControlFlow,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use backend_core::{
    Attachment, BackendError, BackendErrorCategory, EventStream, FeedBatch, Identity, ImageSource,
    LiveMessageLog, MergeOutcome, Message, OutgoingMessage, PickedImage, RoomChannelError,
    RoomChannels, RoomCommand, RoomEvent, RoomLifecycleState, RoomStateMachine, SendAck,
    SendOutcome, normalize_room_error, normalize_send_outcome, resolve_picked_image,
    validate_message_text,
};
use backend_platform::{
    BlobStore, Boundary, FeedSubscription, MessageWriter, PageQuery, PlatformError,
};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, sleep_until},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{Collaborators, RoomSessionConfig, map_platform_error, not_authenticated};

const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 256;

/// Owner-side handle of a running room session.
///
/// Dropping the handle tears the session down: the feed is unsubscribed and
/// in-flight history fetches are discarded.
#[derive(Debug)]
pub struct RoomSessionHandle {
    room: String,
    channels: RoomChannels,
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RoomSessionHandle {
    pub fn room(&self) -> &str {
        &self.room
    }

    pub async fn send(&self, command: RoomCommand) -> Result<(), RoomChannelError> {
        self.channels.send_command(command).await
    }

    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }

    /// Close the session and wait for its task to finish.
    pub async fn close(mut self) {
        let _ = self.channels.send_command(RoomCommand::Close).await;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for RoomSessionHandle {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Start a session for `config.room`.
///
/// The returned stream is subscribed before the session starts, so it sees
/// every event including the first snapshot.
pub fn spawn_room_session(
    config: RoomSessionConfig,
    collaborators: Collaborators,
) -> (RoomSessionHandle, EventStream) {
    let (channels, command_rx) = RoomChannels::new(COMMAND_BUFFER, EVENT_BUFFER);
    let events = channels.subscribe();
    let stop = CancellationToken::new();
    let room = config.room.clone();

    let session = RoomSession::new(
        config,
        collaborators,
        channels.clone(),
        command_rx,
        stop.child_token(),
    );
    let task = tokio::spawn(session.run());

    (
        RoomSessionHandle {
            room,
            channels,
            stop,
            task: Some(task),
        },
        events,
    )
}

#[derive(Debug)]
struct PageResult {
    boundary: u64,
    result: Result<Vec<Message>, BackendError>,
}

struct RoomSession {
    config: RoomSessionConfig,
    collaborators: Collaborators,
    channels: RoomChannels,
    command_rx: mpsc::Receiver<RoomCommand>,
    stop: CancellationToken,
    log: LiveMessageLog,
    state_machine: RoomStateMachine,
    feed: Option<FeedSubscription>,
    page_tx: mpsc::UnboundedSender<PageResult>,
    page_rx: mpsc::UnboundedReceiver<PageResult>,
    resubscribe_at: Option<Instant>,
    attempt: u32,
}

impl RoomSession {
    fn new(
        config: RoomSessionConfig,
        collaborators: Collaborators,
        channels: RoomChannels,
        command_rx: mpsc::Receiver<RoomCommand>,
        stop: CancellationToken,
    ) -> Self {
        let (page_tx, page_rx) = mpsc::unbounded_channel();
        Self {
            log: LiveMessageLog::new(config.room.clone()),
            config,
            collaborators,
            channels,
            command_rx,
            stop,
            state_machine: RoomStateMachine::default(),
            feed: None,
            page_tx,
            page_rx,
            resubscribe_at: None,
            attempt: 0,
        }
    }

    async fn run(mut self) {
        info!(room = %self.config.room, "room session started");
        self.emit_state(self.state_machine.state());
        self.emit_snapshot();
        self.open_feed().await;

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => {
                    debug!(room = %self.config.room, "room session cancelled");
                    break;
                }
                command = self.command_rx.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    if self.handle_command(command).is_break() {
                        break;
                    }
                }
                item = next_feed_item(&mut self.feed) => self.handle_feed_item(item),
                Some(page) = self.page_rx.recv() => self.handle_page_result(page),
                _ = wait_until(self.resubscribe_at) => self.resubscribe().await,
            }
        }

        self.shutdown();
    }

    fn handle_command(&mut self, command: RoomCommand) -> ControlFlow<()> {
        match self.state_machine.apply(&command) {
            Ok(Some(state)) => self.emit_state(state),
            Ok(None) => {}
            Err(err) => {
                warn!(room = %self.config.room, code = %err.code, "room command rejected");
                self.channels
                    .emit(normalize_room_error(self.config.room.clone(), err));
                return ControlFlow::Continue(());
            }
        }

        match command {
            RoomCommand::LoadOlder => self.load_older(),
            RoomCommand::SendMessage {
                client_txn_id,
                text,
            } => self.send_message(client_txn_id, text),
            RoomCommand::SendImageMessage {
                client_txn_id,
                text,
                image,
            } => self.send_image_message(client_txn_id, text, image),
            RoomCommand::Close => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    async fn open_feed(&mut self) {
        self.log.begin_subscription();
        let feed = Arc::clone(&self.collaborators.feed);
        let stop = self.stop.clone();
        let limit = self.config.bounded_feed_limit();

        let subscribed = tokio::select! {
            _ = stop.cancelled() => return,
            subscribed = feed.subscribe(&self.config.room, limit) => subscribed,
        };

        match subscribed {
            Ok(subscription) => {
                debug!(room = %self.config.room, limit, "change feed subscribed");
                self.feed = Some(subscription);
            }
            Err(err) => self.handle_feed_failure(map_platform_error("subscribe", err)),
        }
    }

    fn handle_feed_item(&mut self, item: Option<Result<FeedBatch, PlatformError>>) {
        match item {
            Some(Ok(batch)) => self.apply_feed_batch(batch),
            Some(Err(err)) => self.handle_feed_failure(map_platform_error("change feed", err)),
            None => self.handle_feed_failure(BackendError::new(
                BackendErrorCategory::Network,
                "feed_closed",
                "change feed closed unexpectedly",
            )),
        }
    }

    fn apply_feed_batch(&mut self, batch: FeedBatch) {
        let outcomes = self.log.apply_feed_batch(&batch);
        self.attempt = 0;

        let ignored = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, MergeOutcome::Ignored(_)))
            .count();
        trace!(
            room = %self.config.room,
            changes = batch.len(),
            ignored,
            "feed batch merged"
        );

        if let Some(state) = self.state_machine.on_feed_batch() {
            self.emit_state(state);
        }
        self.emit_snapshot();
    }

    fn handle_feed_failure(&mut self, error: BackendError) {
        self.feed = None;
        self.log.subscription_failed();

        let will_retry =
            error.is_recoverable() && self.attempt < self.config.max_resubscribe_attempts;
        warn!(
            room = %self.config.room,
            code = %error.code,
            message = %error.message,
            attempt = self.attempt,
            will_retry,
            "change feed failed"
        );

        match self.state_machine.on_feed_failure(will_retry) {
            Ok(state) => self.emit_state(state),
            Err(err) => warn!(room = %self.config.room, code = %err.code, "feed failure ignored"),
        }

        if will_retry {
            let delay = self
                .config
                .retry_policy
                .delay_for_attempt(self.attempt, error.retry_after_ms);
            self.attempt = self.attempt.saturating_add(1);
            self.resubscribe_at = Some(Instant::now() + delay);
        }

        self.channels
            .emit(normalize_room_error(self.config.room.clone(), error));
        self.emit_snapshot();
    }

    async fn resubscribe(&mut self) {
        self.resubscribe_at = None;
        match self.state_machine.on_resubscribe() {
            Ok(state) => self.emit_state(state),
            Err(err) => {
                warn!(room = %self.config.room, code = %err.code, "resubscribe skipped");
                return;
            }
        }

        info!(room = %self.config.room, attempt = self.attempt, "resubscribing to change feed");
        self.open_feed().await;
        self.emit_snapshot();
    }

    fn load_older(&mut self) {
        if self.log.page_in_flight() {
            debug!(room = %self.config.room, "history fetch already in flight");
            return;
        }
        let Some(boundary) = self.log.begin_page() else {
            debug!(room = %self.config.room, "log is empty; nothing older to load");
            return;
        };

        let query = PageQuery {
            boundary: Some(Boundary::AtOrBefore(boundary)),
            limit: self.config.bounded_page_size(),
        };
        debug!(room = %self.config.room, boundary, limit = query.limit, "fetching history page");

        let pages = Arc::clone(&self.collaborators.pages);
        let room = self.config.room.clone();
        let page_tx = self.page_tx.clone();
        let stop = self.stop.child_token();
        tokio::spawn(async move {
            tokio::select! {
                _ = stop.cancelled() => {
                    trace!(%room, boundary, "history fetch discarded after teardown");
                }
                result = pages.fetch_page(&room, query) => {
                    let result = result.map_err(|err| map_platform_error("fetch_page", err));
                    let _ = page_tx.send(PageResult { boundary, result });
                }
            }
        });

        self.emit_snapshot();
    }

    fn handle_page_result(&mut self, page: PageResult) {
        if self.state_machine.is_closed() {
            trace!(room = %self.config.room, "history page discarded after close");
            return;
        }

        match page.result {
            Ok(messages) => {
                let fetched = messages.len();
                let merge = self.log.merge_page(messages);
                debug!(
                    room = %self.config.room,
                    boundary = page.boundary,
                    fetched,
                    added = merge.added,
                    skipped = merge.skipped,
                    "history page merged"
                );
                self.channels.emit(RoomEvent::PageMerged {
                    room: self.config.room.clone(),
                    added: merge.added,
                    exhausted: merge.is_exhausted(),
                });
            }
            Err(error) => {
                self.log.abort_page();
                warn!(
                    room = %self.config.room,
                    boundary = page.boundary,
                    code = %error.code,
                    "history fetch failed"
                );
                self.channels
                    .emit(normalize_room_error(self.config.room.clone(), error));
            }
        }
        self.emit_snapshot();
    }

    fn send_message(&mut self, client_txn_id: String, text: String) {
        if let Err(error) = validate_message_text(&text) {
            self.ack_failure(client_txn_id, error);
            return;
        }
        let Some(identity) = self.collaborators.identity.current_identity() else {
            self.ack_failure(client_txn_id, not_authenticated());
            return;
        };

        let message = outgoing_message(&identity, text, None);
        let writer = Arc::clone(&self.collaborators.writer);
        let channels = self.channels.clone();
        let room = self.config.room.clone();
        tokio::spawn(async move {
            let outcome = match writer.append(&room, message).await {
                Ok(message_id) => SendOutcome::Success { message_id },
                Err(err) => SendOutcome::Failure {
                    error: map_platform_error("append", err),
                },
            };
            log_send_outcome(&room, &client_txn_id, &outcome);
            channels.emit(normalize_send_outcome(client_txn_id, outcome));
        });
    }

    fn send_image_message(&mut self, client_txn_id: String, text: String, image: PickedImage) {
        let source = match resolve_picked_image(&image) {
            Ok(Some(source)) => source,
            Ok(None) => {
                debug!(room = %self.config.room, %client_txn_id, "image picker cancelled");
                self.channels.emit(RoomEvent::SendAck(SendAck {
                    client_txn_id,
                    message_id: None,
                    error_code: None,
                }));
                return;
            }
            Err(error) => {
                self.ack_failure(client_txn_id, error);
                return;
            }
        };
        let Some(identity) = self.collaborators.identity.current_identity() else {
            self.ack_failure(client_txn_id, not_authenticated());
            return;
        };

        let blobs = Arc::clone(&self.collaborators.blobs);
        let writer = Arc::clone(&self.collaborators.writer);
        let channels = self.channels.clone();
        let room = self.config.room.clone();
        tokio::spawn(async move {
            let outcome =
                match upload_then_append(&*blobs, &*writer, &room, &identity, text, source).await
                {
                    Ok(message_id) => SendOutcome::Success { message_id },
                    Err(error) => SendOutcome::Failure { error },
                };
            log_send_outcome(&room, &client_txn_id, &outcome);
            channels.emit(normalize_send_outcome(client_txn_id, outcome));
        });
    }

    fn ack_failure(&self, client_txn_id: String, error: BackendError) {
        let outcome = SendOutcome::Failure { error };
        log_send_outcome(&self.config.room, &client_txn_id, &outcome);
        self.channels
            .emit(normalize_send_outcome(client_txn_id, outcome));
    }

    fn emit_state(&self, state: RoomLifecycleState) {
        self.channels.emit(RoomEvent::StateChanged {
            room: self.config.room.clone(),
            state,
        });
    }

    fn emit_snapshot(&self) {
        self.channels.emit(RoomEvent::Snapshot {
            room: self.config.room.clone(),
            messages: self.log.items().to_vec(),
            loading: self.log.loading(),
        });
    }

    fn shutdown(&mut self) {
        if !self.state_machine.is_closed()
            && let Ok(Some(state)) = self.state_machine.apply(&RoomCommand::Close)
        {
            self.emit_state(state);
        }
        self.stop.cancel();
        self.feed = None;
        self.resubscribe_at = None;
        info!(room = %self.config.room, messages = self.log.len(), "room session closed");
    }
}

/// Store the image, then write the message that references it.
async fn upload_then_append(
    blobs: &dyn BlobStore,
    writer: &dyn MessageWriter,
    room: &str,
    identity: &Identity,
    text: String,
    source: ImageSource,
) -> Result<String, BackendError> {
    let key = blob_key(&identity.email);
    let durable_uri = blobs.put(&key, &source.uri).await.map_err(|err| {
        BackendError::attachment(
            "attachment_upload_failed",
            format!("image upload failed: {err}"),
        )
    })?;
    debug!(%room, %key, "image stored");

    let message = outgoing_message(identity, text, Some(source.into_attachment(durable_uri)));
    writer
        .append(room, message)
        .await
        .map_err(|err| map_platform_error("append", err))
}

fn outgoing_message(
    identity: &Identity,
    text: String,
    attachment: Option<Attachment>,
) -> OutgoingMessage {
    OutgoingMessage {
        author_handle: identity.email.clone(),
        display_name: identity.display_name.clone(),
        avatar_ref: identity.avatar_ref.clone(),
        text,
        attachment,
    }
}

fn blob_key(author_handle: &str) -> String {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or(0);
    format!("{now_ms}-{author_handle}")
}

fn log_send_outcome(room: &str, client_txn_id: &str, outcome: &SendOutcome) {
    match outcome {
        SendOutcome::Success { message_id } => {
            debug!(%room, %client_txn_id, %message_id, "message sent");
        }
        SendOutcome::Failure { error } => {
            warn!(%room, %client_txn_id, code = %error.code, "send failed");
        }
    }
}

async fn next_feed_item(
    feed: &mut Option<FeedSubscription>,
) -> Option<Result<FeedBatch, PlatformError>> {
    match feed {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
