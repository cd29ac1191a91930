//! Storage seams the engine depends on, with the SQLite repos plugged in.

use chrono::{DateTime, Duration, Utc};

use pulse_core::{Category, EventId, FeedbackEvent, RoomId, ValueCounts};
use pulse_store::{FeedbackRepo, RoomStateRepo, StoreError};

/// Append-only feedback log queried by time window.
pub trait EventStore: Send + Sync {
    fn append(&self, event: &FeedbackEvent) -> Result<EventId, StoreError>;

    /// Counts per value with `created_at >= now - window`, in first-seen order.
    fn query_counts(
        &self,
        room_id: &RoomId,
        category: Category,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<ValueCounts, StoreError>;

    fn last_event_time(
        &self,
        room_id: &RoomId,
        category: Category,
        client_hash: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    fn delete_all(&self, room_id: &RoomId) -> Result<usize, StoreError>;
}

/// Per-room lock expiry.
pub trait LockStore: Send + Sync {
    fn locked_until(&self, room_id: &RoomId) -> Result<Option<DateTime<Utc>>, StoreError>;
    fn set_locked_until(&self, room_id: &RoomId, until: DateTime<Utc>) -> Result<(), StoreError>;
}

impl EventStore for FeedbackRepo {
    fn append(&self, event: &FeedbackEvent) -> Result<EventId, StoreError> {
        FeedbackRepo::append(self, event)
    }

    fn query_counts(
        &self,
        room_id: &RoomId,
        category: Category,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<ValueCounts, StoreError> {
        self.counts_since(room_id, category, now - window)
    }

    fn last_event_time(
        &self,
        room_id: &RoomId,
        category: Category,
        client_hash: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        FeedbackRepo::last_event_time(self, room_id, category, client_hash)
    }

    fn delete_all(&self, room_id: &RoomId) -> Result<usize, StoreError> {
        FeedbackRepo::delete_all(self, room_id)
    }
}

impl LockStore for RoomStateRepo {
    fn locked_until(&self, room_id: &RoomId) -> Result<Option<DateTime<Utc>>, StoreError> {
        RoomStateRepo::locked_until(self, room_id)
    }

    fn set_locked_until(&self, room_id: &RoomId, until: DateTime<Utc>) -> Result<(), StoreError> {
        RoomStateRepo::set_locked_until(self, room_id, until)
    }
}
