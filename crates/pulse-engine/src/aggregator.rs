use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Duration;
use tracing::instrument;

use pulse_core::{AggregateSnapshot, Category, CategoryAggregate, Clock, RoomId, ValueCounts};
use pulse_store::StoreError;

use crate::store::EventStore;

pub const RECENT_WINDOW_MINUTES: i64 = 5;
pub const EXTENDED_WINDOW_MINUTES: i64 = 30;

/// Builds aggregate snapshots straight from the event store. Nothing is
/// cached, so a snapshot always reflects every event appended before it.
pub struct Aggregator {
    store: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
}

impl Aggregator {
    pub fn new(store: Arc<dyn EventStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Snapshot of all categories, with every window anchored on one `now`.
    #[instrument(skip(self), fields(room_id = %room_id))]
    pub fn compute(&self, room_id: &RoomId) -> Result<AggregateSnapshot, StoreError> {
        let now = self.clock.now();
        let recent = Duration::minutes(RECENT_WINDOW_MINUTES);
        let extended = Duration::minutes(EXTENDED_WINDOW_MINUTES);

        let mut by_category = BTreeMap::new();
        for category in Category::ALL {
            let counts_5m = self.store.query_counts(room_id, category, recent, now)?;
            let counts_30m = self.store.query_counts(room_id, category, extended, now)?;
            by_category.insert(category, summarize(counts_5m, counts_30m));
        }

        Ok(AggregateSnapshot {
            room_id: room_id.clone(),
            generated_at: now,
            by_category,
        })
    }
}

/// Combine both windows of one category. The headline prefers the short
/// window and falls back to the long one when it is empty.
pub fn summarize(counts_5m: ValueCounts, counts_30m: ValueCounts) -> CategoryAggregate {
    let mostly = mostly(&counts_5m).or_else(|| mostly(&counts_30m));
    let heat = heat(&counts_5m);
    CategoryAggregate {
        mostly,
        counts_5m,
        counts_30m,
        heat,
    }
}

/// Value with the highest count. Ties go to the value seen first; no
/// positive count means no headline.
pub fn mostly(counts: &ValueCounts) -> Option<String> {
    let mut best: Option<(&str, u64)> = None;
    for (value, n) in counts.iter() {
        if best.map_or(true, |(_, top)| n > top) {
            best = Some((value, n));
        }
    }
    best.filter(|(_, n)| *n > 0).map(|(value, _)| value.to_string())
}

/// Consensus strength in `[0, 1]`: lead of the top value over the runner-up,
/// relative to the total.
pub fn heat(counts: &ValueCounts) -> f64 {
    let total = counts.total();
    if total == 0 {
        return 0.0;
    }

    let mut sorted: Vec<u64> = counts.iter().map(|(_, n)| n).collect();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    let top = sorted.first().copied().unwrap_or(0);
    let second = sorted.get(1).copied().unwrap_or(0);

    ((top - second) as f64 / total as f64).clamp(0.0, 1.0)
}
