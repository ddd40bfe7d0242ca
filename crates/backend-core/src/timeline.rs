use crate::types::{ChangeKind, FeedChange, Message};

/// Where a merged entry ended up, or why it was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Placed after the current newest entry.
    Appended,
    /// Placed before the current oldest entry.
    Prepended,
    /// Placed between existing entries by timestamp.
    Inserted { index: usize },
    /// An existing entry with the same ID had its fields replaced in place.
    Replaced { index: usize },
    /// The entry was not merged.
    Ignored(IgnoreReason),
}

/// Reason a change or fetched entry was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The document has no server timestamp yet.
    PendingTimestamp,
    /// An entry with the same ID is already materialized.
    DuplicateId,
    /// An entry with identical content is already materialized.
    DuplicateContent,
}

/// Summary of one merged history page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageMerge {
    /// Entries added to the front of the log.
    pub added: usize,
    /// Entries dropped as duplicates.
    pub skipped: usize,
}

impl PageMerge {
    /// A page that added nothing means no older history is reachable.
    pub fn is_exhausted(&self) -> bool {
        self.added == 0
    }
}

/// Ordered, deduplicated view of one room's messages.
///
/// Entries are kept non-decreasing by `timestamp_ms`. Feed changes and history
/// pages arrive newest-first; placement is decided per entry against the
/// current head and tail, so the initial feed burst lands at the front and
/// live messages land at the end without tracking subscription phase.
///
/// `loading` is derived: it is set while a subscription waits for its first
/// batch or while a history page is in flight.
#[derive(Debug, Clone)]
pub struct LiveMessageLog {
    room: String,
    items: Vec<Message>,
    awaiting_feed: bool,
    page_in_flight: bool,
}

impl LiveMessageLog {
    /// Create an empty log for `room`, waiting for its first feed batch.
    pub fn new(room: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            items: Vec::new(),
            awaiting_feed: true,
            page_in_flight: false,
        }
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    /// Current entries, ascending by timestamp.
    pub fn items(&self) -> &[Message] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn loading(&self) -> bool {
        self.awaiting_feed || self.page_in_flight
    }

    pub fn page_in_flight(&self) -> bool {
        self.page_in_flight
    }

    /// A (re)subscription started; `loading` holds until its first batch.
    pub fn begin_subscription(&mut self) {
        self.awaiting_feed = true;
    }

    /// The subscription failed before or after its first batch.
    pub fn subscription_failed(&mut self) {
        self.awaiting_feed = false;
    }

    /// Reserve the single history fetch slot.
    ///
    /// Returns the inclusive boundary timestamp to query from, or `None` when
    /// the log is empty or a fetch is already in flight.
    pub fn begin_page(&mut self) -> Option<u64> {
        if self.page_in_flight {
            return None;
        }
        let boundary = self.boundary_timestamp()?;
        self.page_in_flight = true;
        Some(boundary)
    }

    /// Release the fetch slot without merging (fetch failure).
    pub fn abort_page(&mut self) {
        self.page_in_flight = false;
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.position_of(id).is_some()
    }

    /// Timestamp of the oldest entry, used to bound the next history query.
    pub fn boundary_timestamp(&self) -> Option<u64> {
        self.items.first().map(|message| message.timestamp_ms)
    }

    /// Apply one feed batch. The first batch of a subscription clears `loading`.
    pub fn apply_feed_batch(&mut self, changes: &[FeedChange]) -> Vec<MergeOutcome> {
        let outcomes = changes
            .iter()
            .map(|change| self.apply_feed_change(change))
            .collect();
        self.awaiting_feed = false;
        outcomes
    }

    /// Apply a single feed change.
    ///
    /// `Added` for an ID already present is ignored. `Modified` for a known ID
    /// replaces the entry in place; for an unknown ID it is placed like an add.
    pub fn apply_feed_change(&mut self, change: &FeedChange) -> MergeOutcome {
        let Some(message) = change.document.clone().into_message() else {
            return MergeOutcome::Ignored(IgnoreReason::PendingTimestamp);
        };

        match (change.kind, self.position_of(&message.id)) {
            (ChangeKind::Added, Some(_)) => MergeOutcome::Ignored(IgnoreReason::DuplicateId),
            (ChangeKind::Modified, Some(index))
                if self.items[index].timestamp_ms == message.timestamp_ms =>
            {
                self.items[index] = message;
                MergeOutcome::Replaced { index }
            }
            (ChangeKind::Modified, Some(index)) => {
                // A moved timestamp must not break ascending order.
                self.items.remove(index);
                self.place(message)
            }
            (_, None) => self.place(message),
        }
    }

    /// Merge one history page, given newest-first as returned by the page
    /// fetcher, and release the fetch slot.
    ///
    /// Entries already present by ID, or by identical content, are skipped.
    pub fn merge_page(&mut self, page: Vec<Message>) -> PageMerge {
        self.page_in_flight = false;
        let mut merge = PageMerge::default();
        for message in page {
            if self.contains_id(&message.id) {
                merge.skipped += 1;
                continue;
            }
            if self.items.iter().any(|item| item.same_content(&message)) {
                merge.skipped += 1;
                continue;
            }
            self.place(message);
            merge.added += 1;
        }
        merge
    }

    fn place(&mut self, message: Message) -> MergeOutcome {
        let timestamp = message.timestamp_ms;
        let head = self.items.first().map(|item| item.timestamp_ms);
        let tail = self.items.last().map(|item| item.timestamp_ms);
        let (Some(head), Some(tail)) = (head, tail) else {
            self.items.push(message);
            return MergeOutcome::Appended;
        };

        if timestamp > tail {
            self.items.push(message);
            MergeOutcome::Appended
        } else if timestamp <= head {
            self.items.insert(0, message);
            MergeOutcome::Prepended
        } else {
            let index = self
                .items
                .partition_point(|item| item.timestamp_ms <= timestamp);
            self.items.insert(index, message);
            MergeOutcome::Inserted { index }
        }
    }

    fn position_of(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }
}
