use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use pulse_core::RoomId;
use pulse_store::StoreError;

use crate::store::LockStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockStatus {
    Open,
    Locked { until: DateTime<Utc> },
}

impl LockStatus {
    /// No record, or a record at or before `now`, means open.
    pub fn evaluate(locked_until: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        match locked_until {
            Some(until) if until > now => Self::Locked { until },
            _ => Self::Open,
        }
    }
}

/// Host-imposed hold on all submissions to a room.
pub struct LockGate {
    store: Arc<dyn LockStore>,
    min_minutes: u32,
    max_minutes: u32,
}

impl LockGate {
    pub fn new(store: Arc<dyn LockStore>, min_minutes: u32, max_minutes: u32) -> Self {
        Self {
            store,
            min_minutes,
            max_minutes,
        }
    }

    pub fn check(&self, room_id: &RoomId, now: DateTime<Utc>) -> Result<LockStatus, StoreError> {
        let locked_until = self.store.locked_until(room_id)?;
        Ok(LockStatus::evaluate(locked_until, now))
    }

    pub fn clamp_minutes(&self, minutes: i64) -> u32 {
        minutes.clamp(i64::from(self.min_minutes), i64::from(self.max_minutes)) as u32
    }

    /// Lock the room for `minutes` (clamped) from `now`. Replaces any
    /// existing lock rather than extending it.
    pub fn set_lock(
        &self,
        room_id: &RoomId,
        minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, StoreError> {
        let minutes = self.clamp_minutes(minutes);
        let until = now + Duration::minutes(i64::from(minutes));
        self.store.set_locked_until(room_id, until)?;
        info!(room_id = %room_id, minutes, %until, "room locked");
        Ok(until)
    }
}
