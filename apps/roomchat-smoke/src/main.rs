mod config;
mod logging;
mod view;

use std::{error::Error, sync::Arc, time::Duration};

use backend_core::{EventStream, Message, PickedImage, RoomEvent, RoomLifecycleState};
use backend_platform::{InMemoryBackend, PlatformError};
use backend_room::{ChatController, Collaborators, RoomDirectory, spawn_room_session};
use tokio::{sync::broadcast::error::RecvError, time::Instant};
use tracing::{info, warn};

use crate::{config::SmokeConfig, view::ViewState};

type SmokeResult<T = ()> = Result<T, Box<dyn Error + Send + Sync>>;

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);
const SEEDED_MESSAGES: u64 = 75;
const SEED_BASE_MS: u64 = 1_700_000_000_000;
const MAX_PAGES: usize = 32;

#[tokio::main]
async fn main() {
    logging::init();

    let config = match SmokeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            std::process::exit(2);
        }
    };

    if let Err(err) = run(config).await {
        eprintln!("Smoke run failed: {err}");
        std::process::exit(1);
    }
}

async fn run(config: SmokeConfig) -> SmokeResult {
    let backend = InMemoryBackend::new();
    backend.sign_in(config.identity())?;
    seed(&backend, &config)?;

    let directory = RoomDirectory::new(Arc::new(backend.clone()), config.known_rooms.clone());
    let mut view = ViewState::new(config.user_email.clone(), config.room.clone());
    view.replace_rooms(directory.refresh().await?);

    let (session, mut events) = spawn_room_session(
        config.session_config(),
        Collaborators::from_backend(backend.clone()),
    );
    let mut controller = ChatController::new(session);

    pump_until(&mut events, &mut view, |event| {
        matches!(event, RoomEvent::Snapshot { loading: false, .. })
    })
    .await?;
    info!(messages = view.snapshot().messages.len(), "initial burst rendered");

    controller.set_text("hello from roomchat-smoke");
    let txn = controller.send_text().await?;
    view.mark_send_requested(txn.clone());
    pump_until(&mut events, &mut view, |event| is_ack_for(event, &txn)).await?;

    for page in 1..=MAX_PAGES {
        controller.load_older().await?;
        let mut exhausted = false;
        pump_until(&mut events, &mut view, |event| match event {
            RoomEvent::PageMerged { exhausted: done, .. } => {
                exhausted = *done;
                true
            }
            RoomEvent::Error { .. } => true,
            _ => false,
        })
        .await?;
        info!(page, messages = view.snapshot().messages.len(), "history page loaded");
        if exhausted {
            break;
        }
    }

    let picked = PickedImage::Picked {
        uri: Some("file:///tmp/roomchat-smoke.png".to_owned()),
        width: 640,
        height: 480,
    };
    if let Some(txn) = controller.send_image(picked).await? {
        view.mark_send_requested(txn.clone());
        pump_until(&mut events, &mut view, |event| is_ack_for(event, &txn)).await?;
    }

    let broken = backend.break_feeds(
        &config.room,
        PlatformError::Unavailable("simulated connection reset".to_owned()),
    )?;
    info!(broken, "simulated feed failure");
    pump_until(&mut events, &mut view, |event| {
        matches!(
            event,
            RoomEvent::StateChanged {
                state: RoomLifecycleState::Live | RoomLifecycleState::Stalled,
                ..
            }
        )
    })
    .await?;

    view.replace_rooms(directory.refresh().await?);
    let snapshot = view.snapshot();
    controller.close().await;

    println!("room '{}' ({})", config.room, snapshot.status_text);
    for room in &snapshot.rooms {
        let marker = if room.is_selected { '*' } else { ' ' };
        println!(" {marker} {} last={:?}", room.name, room.last_activity_ms);
    }
    println!(
        "{} messages, history exhausted: {}, pending sends: {}",
        snapshot.messages.len(),
        snapshot.history_exhausted,
        snapshot.pending_sends
    );
    for message in snapshot.messages.iter().rev().take(3) {
        let own = if message.is_own { " (you)" } else { "" };
        println!("  {}{own}: {}", message.sender, message.body);
    }
    if let Some(error) = &snapshot.error_text {
        println!("last error: {error}");
    }
    Ok(())
}

fn seed(backend: &InMemoryBackend, config: &SmokeConfig) -> SmokeResult {
    for index in 0..SEEDED_MESSAGES {
        // Every tenth message shares its predecessor's timestamp.
        let step = if index % 10 == 9 { index - 1 } else { index };
        backend.insert_message(
            &config.room,
            seed_message(&format!("{}-{index}", config.room), SEED_BASE_MS + step * 1_000),
        )?;
    }
    for (offset, room) in (1u64..).zip(config.known_rooms.iter().filter(|r| **r != config.room)) {
        backend.insert_message(
            room,
            seed_message(&format!("{room}-0"), SEED_BASE_MS + offset * 60_000),
        )?;
    }
    Ok(())
}

fn seed_message(id: &str, timestamp_ms: u64) -> Message {
    Message {
        id: id.to_owned(),
        author_handle: "bot@roomchat.local".to_owned(),
        display_name: Some("Seed Bot".to_owned()),
        avatar_ref: None,
        text: format!("seeded message {id}"),
        attachment: None,
        timestamp_ms,
    }
}

fn is_ack_for(event: &RoomEvent, client_txn_id: &str) -> bool {
    matches!(event, RoomEvent::SendAck(ack) if ack.client_txn_id == client_txn_id)
}

/// Feed room events into `view` until `done` accepts one.
async fn pump_until<F>(events: &mut EventStream, view: &mut ViewState, mut done: F) -> SmokeResult
where
    F: FnMut(&RoomEvent) -> bool,
{
    let deadline = Instant::now() + EVENT_TIMEOUT;
    loop {
        let event = match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Ok(event)) => event,
            Ok(Err(RecvError::Lagged(skipped))) => {
                warn!(skipped, "view lagged behind room events");
                continue;
            }
            Ok(Err(RecvError::Closed)) => return Err("room event stream closed".into()),
            Err(_) => return Err("timed out waiting for room events".into()),
        };
        let finished = done(&event);
        view.handle_room_event(event);
        if finished {
            return Ok(());
        }
    }
}
