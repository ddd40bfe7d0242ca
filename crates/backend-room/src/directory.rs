use std::sync::Arc;

use backend_core::{BackendError, RoomSummary};
use backend_platform::{PageFetcher, PageQuery};
use tracing::debug;

use crate::map_platform_error;

/// Lists the configured rooms, most recently active first.
pub struct RoomDirectory {
    pages: Arc<dyn PageFetcher>,
    known_rooms: Vec<String>,
}

impl RoomDirectory {
    pub fn new<I, S>(pages: Arc<dyn PageFetcher>, known_rooms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut known_rooms: Vec<String> = known_rooms.into_iter().map(Into::into).collect();
        known_rooms.sort();
        known_rooms.dedup();
        Self { pages, known_rooms }
    }

    pub fn known_rooms(&self) -> &[String] {
        &self.known_rooms
    }

    /// Fetch the newest message of every known room and order the rooms by it.
    ///
    /// Rooms without messages sort last, then by name.
    pub async fn refresh(&self) -> Result<Vec<RoomSummary>, BackendError> {
        let latest_only = PageQuery {
            boundary: None,
            limit: 1,
        };

        let mut summaries = Vec::with_capacity(self.known_rooms.len());
        for room in &self.known_rooms {
            let latest = self
                .pages
                .fetch_page(room, latest_only)
                .await
                .map_err(|err| map_platform_error("list_rooms", err))?;
            summaries.push(RoomSummary {
                name: room.clone(),
                last_message_timestamp_ms: latest.first().map(|message| message.timestamp_ms),
            });
        }

        sort_by_activity(&mut summaries);
        debug!(rooms = summaries.len(), "room listing refreshed");
        Ok(summaries)
    }
}

fn sort_by_activity(summaries: &mut [RoomSummary]) {
    summaries.sort_by(|a, b| {
        b.last_message_timestamp_ms
            .cmp(&a.last_message_timestamp_ms)
            .then_with(|| a.name.cmp(&b.name))
    });
}
