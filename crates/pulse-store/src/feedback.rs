use chrono::{DateTime, Utc};
use tracing::instrument;

use pulse_core::{Category, EventId, FeedbackEvent, RoomId, StoredEvent, ValueCounts};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Append-only log of accepted feedback.
///
/// Events are only ever inserted, or deleted in bulk by a room reset.
pub struct FeedbackRepo {
    db: Database,
}

impl FeedbackRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert one event and return the id the database assigned it.
    #[instrument(skip(self, event), fields(room_id = %event.room_id, category = %event.category))]
    pub fn append(&self, event: &FeedbackEvent) -> Result<EventId, StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO feedback_events (room_id, category, value, client_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    event.room_id.as_str(),
                    event.category.as_str(),
                    event.value,
                    event.client_hash,
                    event.created_at.timestamp_millis(),
                ],
            )?;
            Ok(EventId::from_raw(conn.last_insert_rowid()))
        })
    }

    /// Count values for a room and category at or after `since`.
    ///
    /// Values come back in order of their first occurrence inside the
    /// window, which is what `mostly` tie-breaks on.
    #[instrument(skip(self), fields(room_id = %room_id, category = %category))]
    pub fn counts_since(
        &self,
        room_id: &RoomId,
        category: Category,
        since: DateTime<Utc>,
    ) -> Result<ValueCounts, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT value, COUNT(*) AS n
                 FROM feedback_events
                 WHERE room_id = ?1 AND category = ?2 AND created_at >= ?3
                 GROUP BY value
                 ORDER BY MIN(id) ASC",
            )?;
            let mut rows = stmt.query(rusqlite::params![
                room_id.as_str(),
                category.as_str(),
                since.timestamp_millis(),
            ])?;

            let mut counts = ValueCounts::new();
            while let Some(row) = rows.next()? {
                let value: String = row_helpers::get(row, 0, "feedback_events", "value")?;
                let n: i64 = row_helpers::get(row, 1, "feedback_events", "value")?;
                counts.add(value, n.max(0) as u64);
            }
            Ok(counts)
        })
    }

    /// Most recent `created_at` for this exact room, category and client.
    #[instrument(skip(self, client_hash), fields(room_id = %room_id, category = %category))]
    pub fn last_event_time(
        &self,
        room_id: &RoomId,
        category: Category,
        client_hash: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.db.with_conn(|conn| {
            let latest: Option<i64> = conn.query_row(
                "SELECT MAX(created_at) FROM feedback_events
                 WHERE room_id = ?1 AND category = ?2 AND client_hash = ?3",
                rusqlite::params![room_id.as_str(), category.as_str(), client_hash],
                |row| row.get(0),
            )?;
            latest
                .map(|ms| row_helpers::parse_millis(ms, "feedback_events", "created_at"))
                .transpose()
        })
    }

    /// Delete every event of a room. Returns how many rows went away.
    #[instrument(skip(self), fields(room_id = %room_id))]
    pub fn delete_all(&self, room_id: &RoomId) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM feedback_events WHERE room_id = ?1",
                [room_id.as_str()],
            )?;
            Ok(removed)
        })
    }

    /// All events of a room in insertion order.
    #[instrument(skip(self), fields(room_id = %room_id))]
    pub fn list(&self, room_id: &RoomId) -> Result<Vec<StoredEvent>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, room_id, category, value, client_hash, created_at
                 FROM feedback_events WHERE room_id = ?1
                 ORDER BY id ASC",
            )?;
            let mut rows = stmt.query([room_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_event(row)?);
            }
            Ok(results)
        })
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> Result<StoredEvent, StoreError> {
    let category: String = row_helpers::get(row, 2, "feedback_events", "category")?;
    let created_at: i64 = row_helpers::get(row, 5, "feedback_events", "created_at")?;

    Ok(StoredEvent {
        id: EventId::from_raw(row_helpers::get(row, 0, "feedback_events", "id")?),
        event: FeedbackEvent {
            room_id: RoomId::from_raw(row_helpers::get::<String>(row, 1, "feedback_events", "room_id")?),
            category: row_helpers::parse_enum(&category, "feedback_events", "category")?,
            value: row_helpers::get(row, 3, "feedback_events", "value")?,
            client_hash: row_helpers::get(row, 4, "feedback_events", "client_hash")?,
            created_at: row_helpers::parse_millis(created_at, "feedback_events", "created_at")?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    fn repo() -> FeedbackRepo {
        FeedbackRepo::new(Database::in_memory().unwrap())
    }

    fn event(room: &str, category: Category, value: &str, client: &str, at: DateTime<Utc>) -> FeedbackEvent {
        FeedbackEvent {
            room_id: RoomId::from_raw(room),
            category,
            value: value.into(),
            client_hash: client.into(),
            created_at: at,
        }
    }

    #[test]
    fn append_assigns_increasing_ids() {
        let repo = repo();
        let now = Utc::now();
        let a = repo.append(&event("r1", Category::Music, "HIGHER", "client-aa", now)).unwrap();
        let b = repo.append(&event("r1", Category::Music, "LOWER", "client-bb", now)).unwrap();
        assert!(b > a);
    }

    #[test]
    fn counts_group_by_value_in_first_seen_order() {
        let repo = repo();
        let now = Utc::now();
        repo.append(&event("r1", Category::Music, "LOWER", "client-aa", now)).unwrap();
        repo.append(&event("r1", Category::Music, "HIGHER", "client-bb", now)).unwrap();
        repo.append(&event("r1", Category::Music, "HIGHER", "client-cc", now)).unwrap();
        repo.append(&event("r1", Category::Temp, "WARMER", "client-aa", now)).unwrap();
        repo.append(&event("r2", Category::Music, "LOWER", "client-aa", now)).unwrap();

        let counts = repo
            .counts_since(&RoomId::from_raw("r1"), Category::Music, now - Duration::minutes(5))
            .unwrap();
        let entries: Vec<_> = counts.iter().collect();
        assert_eq!(entries, vec![("LOWER", 1), ("HIGHER", 2)]);
    }

    #[test]
    fn counts_exclude_events_before_window() {
        let repo = repo();
        let now = Utc::now();
        repo.append(&event("r1", Category::Temp, "COLDER", "client-aa", now - Duration::minutes(10)))
            .unwrap();
        repo.append(&event("r1", Category::Temp, "WARMER", "client-bb", now - Duration::minutes(1)))
            .unwrap();

        let room = RoomId::from_raw("r1");
        let recent = repo.counts_since(&room, Category::Temp, now - Duration::minutes(5)).unwrap();
        assert_eq!(recent.get("WARMER"), Some(1));
        assert_eq!(recent.get("COLDER"), None);

        let wide = repo.counts_since(&room, Category::Temp, now - Duration::minutes(30)).unwrap();
        assert_eq!(wide.len(), 2);
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let repo = repo();
        let since = Utc::now() - Duration::minutes(5);
        repo.append(&event("r1", Category::Reading, "QUIET", "client-aa", since)).unwrap();
        let counts = repo.counts_since(&RoomId::from_raw("r1"), Category::Reading, since).unwrap();
        assert_eq!(counts.get("QUIET"), Some(1));
    }

    #[test]
    fn counts_empty_room() {
        let repo = repo();
        let counts = repo
            .counts_since(&RoomId::from_raw("nobody"), Category::Music, Utc::now())
            .unwrap();
        assert!(counts.is_empty());
    }

    #[test]
    fn last_event_time_matches_exact_triple() {
        let repo = repo();
        let t0 = Utc::now() - Duration::seconds(90);
        let t1 = Utc::now() - Duration::seconds(30);
        repo.append(&event("r1", Category::Music, "HIGHER", "client-aa", t0)).unwrap();
        repo.append(&event("r1", Category::Music, "LOWER", "client-aa", t1)).unwrap();
        repo.append(&event("r1", Category::Temp, "WARMER", "client-bb", t1)).unwrap();

        let room = RoomId::from_raw("r1");
        let last = repo.last_event_time(&room, Category::Music, "client-aa").unwrap();
        assert_eq!(last.map(|t| t.timestamp_millis()), Some(t1.timestamp_millis()));
        assert!(repo.last_event_time(&room, Category::Temp, "client-aa").unwrap().is_none());
        assert!(repo.last_event_time(&room, Category::Music, "client-bb").unwrap().is_none());
    }

    #[test]
    fn delete_all_only_touches_one_room() {
        let repo = repo();
        let now = Utc::now();
        repo.append(&event("r1", Category::Music, "HIGHER", "client-aa", now)).unwrap();
        repo.append(&event("r1", Category::Temp, "WARMER", "client-aa", now)).unwrap();
        repo.append(&event("r2", Category::Music, "HIGHER", "client-aa", now)).unwrap();

        let removed = repo.delete_all(&RoomId::from_raw("r1")).unwrap();
        assert_eq!(removed, 2);
        assert!(repo.list(&RoomId::from_raw("r1")).unwrap().is_empty());
        assert_eq!(repo.list(&RoomId::from_raw("r2")).unwrap().len(), 1);
    }

    #[test]
    fn list_roundtrips_fields() {
        let repo = repo();
        let now = Utc::now();
        let id = repo.append(&event("r1", Category::Reading, "QUIET", "client-aa", now)).unwrap();
        let rows = repo.list(&RoomId::from_raw("r1")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, id);
        assert_eq!(rows[0].event.category, Category::Reading);
        assert_eq!(rows[0].event.client_hash, "client-aa");
        assert_eq!(rows[0].event.created_at.timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn unknown_category_row_is_corrupt() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO feedback_events (room_id, category, value, client_hash, created_at)
                 VALUES ('r1', 'LIGHTS', 'ON', 'client-aa', 0)",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        let repo = FeedbackRepo::new(db);
        let result = repo.list(&RoomId::from_raw("r1"));
        assert!(matches!(result, Err(StoreError::CorruptRow { column: "category", .. })));
    }

    #[test]
    fn concurrent_appends_all_land() {
        let repo = Arc::new(repo());
        let now = Utc::now();

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let repo = repo.clone();
                std::thread::spawn(move || {
                    repo.append(&event("r1", Category::Music, "HIGHER", &format!("client-{i:03}"), now))
                        .unwrap()
                })
            })
            .collect();
        let mut ids: Vec<EventId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 10);

        let counts = repo
            .counts_since(&RoomId::from_raw("r1"), Category::Music, now)
            .unwrap();
        assert_eq!(counts.get("HIGHER"), Some(10));
    }
}
