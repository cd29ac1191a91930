use chrono::{DateTime, Utc};

use pulse_core::{Category, RoomId};
use pulse_store::StoreError;

use crate::store::EventStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CooldownDecision {
    Accept,
    Reject { retry_after_seconds: u64 },
}

/// Per (room, category, client) cooldown.
///
/// Holds no state beyond the cooldown length: the last submission time is
/// always read from the event store, so a room reset also clears cooldowns.
/// The check and the later append are not atomic; two submissions from one
/// client in the same instant can both pass.
#[derive(Clone, Copy, Debug)]
pub struct RateLimiter {
    cooldown_seconds: u64,
}

impl RateLimiter {
    pub fn new(cooldown_seconds: u64) -> Self {
        Self { cooldown_seconds }
    }

    pub fn cooldown_seconds(&self) -> u64 {
        self.cooldown_seconds
    }

    /// Pure decision. A `last` in the future counts as zero elapsed.
    /// Cooldowns too long to express in milliseconds saturate rather than wrap.
    pub fn decide(&self, last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> CooldownDecision {
        let Some(last) = last else {
            return CooldownDecision::Accept;
        };

        let elapsed_ms = (now - last).num_milliseconds().max(0);
        let cooldown_ms = i64::try_from(self.cooldown_seconds)
            .ok()
            .and_then(|secs| secs.checked_mul(1000))
            .unwrap_or(i64::MAX);
        if elapsed_ms >= cooldown_ms {
            return CooldownDecision::Accept;
        }

        let remaining_ms = cooldown_ms - elapsed_ms;
        let retry_after = remaining_ms / 1000 + i64::from(remaining_ms % 1000 != 0);
        CooldownDecision::Reject {
            retry_after_seconds: retry_after.unsigned_abs(),
        }
    }

    pub fn check(
        &self,
        store: &dyn EventStore,
        room_id: &RoomId,
        category: Category,
        client_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<CooldownDecision, StoreError> {
        let last = store.last_event_time(room_id, category, client_hash)?;
        Ok(self.decide(last, now))
    }
}
