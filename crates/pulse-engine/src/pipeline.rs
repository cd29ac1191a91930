use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, error, info, instrument, warn};

use pulse_core::feedback::{UnknownCategory, CLIENT_HASH_CHARS, MAX_VALUE_CHARS};
use pulse_core::settings::FeedbackSettings;
use pulse_core::{AggregateSnapshot, Category, Clock, EventId, FeedbackEvent, RoomId};
use pulse_store::{Database, FeedbackRepo, RoomStateRepo, StoreError};

use crate::aggregator::Aggregator;
use crate::error::FeedbackError;
use crate::lock_gate::{LockGate, LockStatus};
use crate::publisher::Publisher;
use crate::rate_limit::{CooldownDecision, RateLimiter};
use crate::store::{EventStore, LockStore};

/// A submission exactly as the client sent it. Missing fields default to
/// empty and fail validation.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Submission {
    pub category: String,
    pub value: String,
    pub client_hash: String,
    pub not_robot: Option<bool>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Accepted {
    pub event_id: EventId,
    /// Lets the client predict when its next submission will be allowed.
    pub cooldown_seconds: u64,
}

/// Single entry point for writes.
///
/// Each submission runs lock gate, cooldown, append, recompute and publish
/// in order. Rejections before the append leave no trace in the store.
pub struct IngestionPipeline {
    events: Arc<dyn EventStore>,
    lock_gate: LockGate,
    rate_limiter: RateLimiter,
    aggregator: Aggregator,
    publisher: Arc<dyn Publisher>,
    clock: Arc<dyn Clock>,
    default_lock_minutes: u32,
}

impl IngestionPipeline {
    pub fn new(
        events: Arc<dyn EventStore>,
        locks: Arc<dyn LockStore>,
        publisher: Arc<dyn Publisher>,
        clock: Arc<dyn Clock>,
        settings: &FeedbackSettings,
    ) -> Self {
        Self {
            lock_gate: LockGate::new(locks, settings.lock_min_minutes, settings.lock_max_minutes),
            rate_limiter: RateLimiter::new(settings.cooldown_seconds),
            aggregator: Aggregator::new(events.clone(), clock.clone()),
            events,
            publisher,
            clock,
            default_lock_minutes: settings.default_lock_minutes,
        }
    }

    /// Wire the pipeline to the SQLite repos sharing `db`.
    pub fn from_database(
        db: &Database,
        publisher: Arc<dyn Publisher>,
        clock: Arc<dyn Clock>,
        settings: &FeedbackSettings,
    ) -> Self {
        Self::new(
            Arc::new(FeedbackRepo::new(db.clone())),
            Arc::new(RoomStateRepo::new(db.clone())),
            publisher,
            clock,
            settings,
        )
    }

    pub fn cooldown_seconds(&self) -> u64 {
        self.rate_limiter.cooldown_seconds()
    }

    #[instrument(skip(self, submission), fields(room_id = %room_id))]
    pub async fn submit(
        &self,
        room_id: &RoomId,
        submission: Submission,
    ) -> Result<Accepted, FeedbackError> {
        let now = self.clock.now();
        let event = validate(room_id, submission, now)?;

        if let LockStatus::Locked { until } = self.lock_gate.check(room_id, now)? {
            debug!(%until, "rejected: room locked");
            return Err(FeedbackError::RoomLocked { locked_until: until });
        }

        let decision = self.rate_limiter.check(
            self.events.as_ref(),
            room_id,
            event.category,
            &event.client_hash,
            now,
        )?;
        if let CooldownDecision::Reject { retry_after_seconds } = decision {
            debug!(category = %event.category, retry_after_seconds, "rejected: cooldown");
            return Err(FeedbackError::Cooldown { retry_after_seconds });
        }

        let event_id = self.events.append(&event).inspect_err(|e| {
            error!(error = %e, "failed to append feedback");
        })?;
        info!(event_id = event_id.get(), category = %event.category, "feedback accepted");

        // The event is durable at this point; a failed recompute only costs
        // subscribers one update, so it does not fail the submission.
        match self.aggregator.compute(room_id) {
            Ok(snapshot) => self.publish(room_id, &snapshot).await,
            Err(e) => warn!(error = %e, "aggregate recompute failed, broadcast skipped"),
        }

        Ok(Accepted {
            event_id,
            cooldown_seconds: self.rate_limiter.cooldown_seconds(),
        })
    }

    /// Pull path: current snapshot without touching the write path.
    pub fn get_aggregate(&self, room_id: &RoomId) -> Result<AggregateSnapshot, StoreError> {
        self.aggregator.compute(room_id)
    }

    /// Lock for `minutes` (default when `None`), clamped to the configured
    /// bounds. Returns the new expiry.
    pub fn lock_room(
        &self,
        room_id: &RoomId,
        minutes: Option<i64>,
    ) -> Result<DateTime<Utc>, StoreError> {
        let minutes = minutes.unwrap_or(i64::from(self.default_lock_minutes));
        self.lock_gate.set_lock(room_id, minutes, self.clock.now())
    }

    /// Expiry of the room's lock if it is still in force.
    pub fn active_lock(&self, room_id: &RoomId) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(match self.lock_gate.check(room_id, self.clock.now())? {
            LockStatus::Locked { until } => Some(until),
            LockStatus::Open => None,
        })
    }

    /// Delete every event of the room and publish the now-empty aggregate.
    /// Cooldowns go with the events.
    #[instrument(skip(self), fields(room_id = %room_id))]
    pub async fn reset_room(&self, room_id: &RoomId) -> Result<AggregateSnapshot, StoreError> {
        let removed = self.events.delete_all(room_id)?;
        info!(removed, "room reset");

        let snapshot = self.aggregator.compute(room_id)?;
        self.publish(room_id, &snapshot).await;
        Ok(snapshot)
    }

    async fn publish(&self, room_id: &RoomId, snapshot: &AggregateSnapshot) {
        let delivered = self.publisher.publish(room_id, snapshot).await;
        debug!(room_id = %room_id, delivered, "aggregate published");
    }
}

/// Steps one and two: shape checks, then the not-robot flag.
fn validate(
    room_id: &RoomId,
    submission: Submission,
    now: DateTime<Utc>,
) -> Result<FeedbackEvent, FeedbackError> {
    let category: Category = submission
        .category
        .parse()
        .map_err(|e: UnknownCategory| FeedbackError::Validation(e.to_string()))?;

    let value_len = submission.value.chars().count();
    if value_len == 0 || value_len > MAX_VALUE_CHARS {
        return Err(FeedbackError::Validation(format!(
            "value must be 1 to {MAX_VALUE_CHARS} characters"
        )));
    }

    if !CLIENT_HASH_CHARS.contains(&submission.client_hash.chars().count()) {
        return Err(FeedbackError::Validation(format!(
            "clientHash must be {} to {} characters",
            CLIENT_HASH_CHARS.start(),
            CLIENT_HASH_CHARS.end()
        )));
    }

    if submission.not_robot == Some(false) {
        return Err(FeedbackError::RobotCheckFailed);
    }

    Ok(FeedbackEvent {
        room_id: room_id.clone(),
        category,
        value: submission.value,
        client_hash: submission.client_hash,
        created_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use parking_lot::Mutex;
    use pulse_core::{CategoryAggregate, ManualClock, ValueCounts};

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<(RoomId, AggregateSnapshot)>>,
    }

    impl RecordingPublisher {
        fn count(&self) -> usize {
            self.published.lock().len()
        }

        fn last(&self) -> Option<(RoomId, AggregateSnapshot)> {
            self.published.lock().last().cloned()
        }
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, room_id: &RoomId, snapshot: &AggregateSnapshot) -> usize {
            self.published.lock().push((room_id.clone(), snapshot.clone()));
            1
        }
    }

    /// Event store whose appends always fail.
    struct BrokenAppends(FeedbackRepo);

    impl EventStore for BrokenAppends {
        fn append(&self, _event: &FeedbackEvent) -> Result<EventId, StoreError> {
            Err(StoreError::Database("disk I/O error".into()))
        }

        fn query_counts(
            &self,
            room_id: &RoomId,
            category: Category,
            window: Duration,
            now: DateTime<Utc>,
        ) -> Result<ValueCounts, StoreError> {
            self.0.query_counts(room_id, category, window, now)
        }

        fn last_event_time(
            &self,
            room_id: &RoomId,
            category: Category,
            client_hash: &str,
        ) -> Result<Option<DateTime<Utc>>, StoreError> {
            EventStore::last_event_time(&self.0, room_id, category, client_hash)
        }

        fn delete_all(&self, room_id: &RoomId) -> Result<usize, StoreError> {
            EventStore::delete_all(&self.0, room_id)
        }
    }

    struct Harness {
        pipeline: IngestionPipeline,
        publisher: Arc<RecordingPublisher>,
        clock: Arc<ManualClock>,
        events: Arc<FeedbackRepo>,
    }

    fn harness() -> Harness {
        let db = Database::in_memory().unwrap();
        let events = Arc::new(FeedbackRepo::new(db.clone()));
        let publisher = Arc::new(RecordingPublisher::default());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let pipeline = IngestionPipeline::new(
            events.clone(),
            Arc::new(RoomStateRepo::new(db)),
            publisher.clone(),
            clock.clone(),
            &FeedbackSettings::default(),
        );
        Harness {
            pipeline,
            publisher,
            clock,
            events,
        }
    }

    fn submission(category: &str, value: &str, client: &str) -> Submission {
        Submission {
            category: category.into(),
            value: value.into(),
            client_hash: client.into(),
            not_robot: None,
        }
    }

    fn room() -> RoomId {
        RoomId::from_raw("ABCDE")
    }

    #[tokio::test]
    async fn abcde_scenario() {
        let h = harness();
        let room = room();

        let accepted = h
            .pipeline
            .submit(&room, submission("MUSIC", "HIGHER", "h1-client"))
            .await
            .unwrap();
        assert_eq!(accepted.cooldown_seconds, 60);

        let err = h
            .pipeline
            .submit(&room, submission("MUSIC", "HIGHER", "h1-client"))
            .await
            .unwrap_err();
        assert!(matches!(err, FeedbackError::Cooldown { retry_after_seconds: 60 }));

        h.pipeline
            .submit(&room, submission("MUSIC", "LOWER", "h2-client"))
            .await
            .unwrap();

        let snapshot = h.pipeline.get_aggregate(&room).unwrap();
        let music = snapshot.category(Category::Music).unwrap();
        assert_eq!(
            music.counts_5m.iter().collect::<Vec<_>>(),
            vec![("HIGHER", 1), ("LOWER", 1)]
        );
        assert_eq!(music.mostly.as_deref(), Some("HIGHER"));
        assert_eq!(music.heat, 0.0);
    }

    #[tokio::test]
    async fn empty_room_aggregate() {
        let h = harness();
        let snapshot = h.pipeline.get_aggregate(&room()).unwrap();
        assert_eq!(snapshot.by_category.len(), 3);
        for category in Category::ALL {
            let agg = snapshot.category(category).unwrap();
            assert_eq!(agg.heat, 0.0);
            assert!(agg.mostly.is_none());
        }
    }

    #[tokio::test]
    async fn get_aggregate_is_idempotent() {
        let h = harness();
        let room = room();
        h.pipeline
            .submit(&room, submission("TEMP", "WARMER", "client-aa"))
            .await
            .unwrap();

        let first = h.pipeline.get_aggregate(&room).unwrap();
        h.clock.advance(Duration::milliseconds(5));
        let second = h.pipeline.get_aggregate(&room).unwrap();
        assert_eq!(first.by_category, second.by_category);
        assert_ne!(first.generated_at, second.generated_at);
    }

    #[tokio::test]
    async fn cooldown_expires_and_retry_after_shrinks() {
        let h = harness();
        let room = room();
        h.pipeline
            .submit(&room, submission("MUSIC", "LOWER", "client-aa"))
            .await
            .unwrap();

        h.clock.advance(Duration::seconds(45));
        let err = h
            .pipeline
            .submit(&room, submission("MUSIC", "LOWER", "client-aa"))
            .await
            .unwrap_err();
        assert!(matches!(err, FeedbackError::Cooldown { retry_after_seconds: 15 }));

        // Other categories are not affected.
        h.pipeline
            .submit(&room, submission("TEMP", "COLDER", "client-aa"))
            .await
            .unwrap();

        h.clock.advance(Duration::seconds(15));
        h.pipeline
            .submit(&room, submission("MUSIC", "LOWER", "client-aa"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn lock_takes_precedence_over_cooldown() {
        let h = harness();
        let room = room();
        h.pipeline
            .submit(&room, submission("MUSIC", "LOWER", "client-aa"))
            .await
            .unwrap();
        h.clock.advance(Duration::seconds(120));
        h.pipeline
            .submit(&room, submission("TEMP", "WARMER", "client-bb"))
            .await
            .unwrap();

        let until = h.pipeline.lock_room(&room, Some(10)).unwrap();

        // Cooldown already expired for this one.
        let err = h
            .pipeline
            .submit(&room, submission("MUSIC", "LOWER", "client-aa"))
            .await
            .unwrap_err();
        match err {
            FeedbackError::RoomLocked { locked_until } => {
                assert_eq!(locked_until.timestamp_millis(), until.timestamp_millis());
            }
            other => panic!("expected RoomLocked, got {other:?}"),
        }

        // Still cooling down, but the lock is reported first.
        let err = h
            .pipeline
            .submit(&room, submission("TEMP", "WARMER", "client-bb"))
            .await
            .unwrap_err();
        assert!(matches!(err, FeedbackError::RoomLocked { .. }));
        assert_eq!(h.events.list(&room).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn lock_defaults_and_clamps() {
        let h = harness();
        let room = room();
        let now = h.clock.now();

        assert_eq!(h.pipeline.lock_room(&room, None).unwrap(), now + Duration::minutes(5));
        assert_eq!(h.pipeline.lock_room(&room, Some(0)).unwrap(), now + Duration::minutes(1));
        assert_eq!(h.pipeline.lock_room(&room, Some(99)).unwrap(), now + Duration::minutes(30));

        h.clock.advance(Duration::minutes(30));
        assert!(h.pipeline.active_lock(&room).unwrap().is_none());
        h.pipeline
            .submit(&room, submission("MUSIC", "LOWER", "client-aa"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn active_lock_reports_expiry() {
        let h = harness();
        let room = room();
        assert!(h.pipeline.active_lock(&room).unwrap().is_none());
        let until = h.pipeline.lock_room(&room, Some(3)).unwrap();
        let active = h.pipeline.active_lock(&room).unwrap().unwrap();
        assert_eq!(active.timestamp_millis(), until.timestamp_millis());
    }

    #[tokio::test]
    async fn validation_failures_write_nothing() {
        let h = harness();
        let room = room();
        let long_value = "x".repeat(MAX_VALUE_CHARS + 1);
        let long_hash = "h".repeat(129);
        let cases = [
            submission("LIGHTS", "ON", "client-aa"),
            submission("music", "LOWER", "client-aa"),
            submission("MUSIC", "", "client-aa"),
            submission("MUSIC", &long_value, "client-aa"),
            submission("MUSIC", "LOWER", "short"),
            submission("MUSIC", "LOWER", &long_hash),
        ];
        for case in cases {
            let err = h.pipeline.submit(&room, case.clone()).await.unwrap_err();
            assert!(matches!(err, FeedbackError::Validation(_)), "{case:?} gave {err:?}");
        }
        assert!(h.events.list(&room).unwrap().is_empty());
        assert_eq!(h.publisher.count(), 0);
    }

    #[tokio::test]
    async fn value_length_counts_characters() {
        let h = harness();
        let value = "é".repeat(MAX_VALUE_CHARS);
        h.pipeline
            .submit(&room(), submission("READING", &value, "client-aa"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn not_robot_false_is_rejected() {
        let h = harness();
        let room = room();
        let mut s = submission("MUSIC", "LOWER", "client-aa");
        s.not_robot = Some(false);
        let err = h.pipeline.submit(&room, s.clone()).await.unwrap_err();
        assert!(matches!(err, FeedbackError::RobotCheckFailed));

        s.not_robot = Some(true);
        h.pipeline.submit(&room, s).await.unwrap();
    }

    #[tokio::test]
    async fn each_accept_publishes_once_to_its_room() {
        let h = harness();
        let room = room();
        h.pipeline
            .submit(&room, submission("MUSIC", "LOWER", "client-aa"))
            .await
            .unwrap();
        assert_eq!(h.publisher.count(), 1);

        let (published_room, snapshot) = h.publisher.last().unwrap();
        assert_eq!(published_room, room);
        assert_eq!(
            snapshot.category(Category::Music).unwrap().counts_5m.get("LOWER"),
            Some(1)
        );

        let _ = h
            .pipeline
            .submit(&room, submission("MUSIC", "LOWER", "client-aa"))
            .await;
        assert_eq!(h.publisher.count(), 1, "rejections must not publish");
    }

    #[tokio::test]
    async fn reset_clears_events_and_cooldowns() {
        let h = harness();
        let room = room();
        let other = RoomId::from_raw("FGHJK");
        h.pipeline
            .submit(&room, submission("MUSIC", "LOWER", "client-aa"))
            .await
            .unwrap();
        h.pipeline
            .submit(&other, submission("MUSIC", "LOWER", "client-aa"))
            .await
            .unwrap();

        let snapshot = h.pipeline.reset_room(&room).await.unwrap();
        for category in Category::ALL {
            assert_eq!(*snapshot.category(category).unwrap(), CategoryAggregate::empty());
        }
        let (published_room, _) = h.publisher.last().unwrap();
        assert_eq!(published_room, room);
        assert_eq!(h.publisher.count(), 3);

        // Same client, same category, well within the old cooldown.
        h.pipeline
            .submit(&room, submission("MUSIC", "LOWER", "client-aa"))
            .await
            .unwrap();
        assert_eq!(h.events.list(&other).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn storage_failure_is_fatal_and_not_published() {
        let db = Database::in_memory().unwrap();
        let publisher = Arc::new(RecordingPublisher::default());
        let pipeline = IngestionPipeline::new(
            Arc::new(BrokenAppends(FeedbackRepo::new(db.clone()))),
            Arc::new(RoomStateRepo::new(db)),
            publisher.clone(),
            Arc::new(ManualClock::default()),
            &FeedbackSettings::default(),
        );

        let err = pipeline
            .submit(&room(), submission("MUSIC", "LOWER", "client-aa"))
            .await
            .unwrap_err();
        assert!(matches!(err, FeedbackError::Storage(_)));
        assert_eq!(err.status_code(), 500);
        assert_eq!(publisher.count(), 0);
    }

    #[tokio::test]
    async fn configured_cooldown_is_reported() {
        let db = Database::in_memory().unwrap();
        let settings = FeedbackSettings {
            cooldown_seconds: 15,
            ..FeedbackSettings::default()
        };
        let pipeline = IngestionPipeline::from_database(
            &db,
            Arc::new(crate::publisher::NullPublisher),
            Arc::new(ManualClock::default()),
            &settings,
        );
        let accepted = pipeline
            .submit(&room(), submission("TEMP", "WARMER", "client-aa"))
            .await
            .unwrap();
        assert_eq!(accepted.cooldown_seconds, 15);
        assert_eq!(pipeline.cooldown_seconds(), 15);
    }

    #[test]
    fn submission_deserializes_with_missing_fields() {
        let s: Submission = serde_json::from_str(r#"{"category":"MUSIC","notRobot":true}"#).unwrap();
        assert_eq!(s.category, "MUSIC");
        assert!(s.value.is_empty());
        assert_eq!(s.not_robot, Some(true));
        assert!(matches!(
            validate(&room(), s, Utc::now()),
            Err(FeedbackError::Validation(_))
        ));
    }
}
