//! Poll cursor tracking for incremental conversation sync

use super::ConnectionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tracks polling progress for one connection
///
/// Persisted separately from messages so a crashed poll resumes from the
/// last fully-applied page instead of refetching everything. Only one
/// cursor per connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollCursor {
    pub connection_id: ConnectionId,
    /// Platform pagination cursor for an in-progress listing; None when the
    /// last poll ran to completion
    pub page_cursor: Option<String>,
    /// When the in-progress listing's first pass started; carried across
    /// resumes so completion records the original start, not the resume's
    pub listing_started_at: Option<DateTime<Utc>>,
    /// Lower bound for the next incremental poll; None until one full poll
    /// has completed
    pub last_synced_at: Option<DateTime<Utc>>,
    /// When the cursor was last written
    pub updated_at: DateTime<Utc>,
}

impl PollCursor {
    /// Create an empty cursor for a connection that has never polled
    pub fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            page_cursor: None,
            listing_started_at: None,
            last_synced_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Record the start of a listing pass
    ///
    /// A resumed pass (page cursor still set) keeps the original start
    /// time. Pages applied before the interruption are never refetched on
    /// resume, so the watermark must not move past when they were fetched.
    pub fn started(mut self, now: DateTime<Utc>) -> Self {
        if self.page_cursor.is_none() || self.listing_started_at.is_none() {
            self.listing_started_at = Some(now);
        }
        self.updated_at = Utc::now();
        self
    }

    /// Record progress after a page has been fully applied
    pub fn advanced(mut self, page_cursor: Option<String>) -> Self {
        self.page_cursor = page_cursor;
        self.updated_at = Utc::now();
        self
    }

    /// Record a completed poll
    ///
    /// The sync watermark becomes the listing's start time, not its end
    /// time, so messages that arrived while the listing ran are refetched
    /// next time (the idempotent sink absorbs the overlap).
    pub fn completed(mut self) -> Self {
        self.page_cursor = None;
        if let Some(started) = self.listing_started_at.take() {
            self.last_synced_at = Some(started);
        }
        self.updated_at = Utc::now();
        self
    }
}
