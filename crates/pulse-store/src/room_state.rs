use chrono::{DateTime, Utc};
use tracing::instrument;

use pulse_core::RoomId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// One lock record per room. Upsert-only: a new lock replaces the old one.
pub struct RoomStateRepo {
    db: Database,
}

impl RoomStateRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Current `locked_until`, or `None` when the room was never locked.
    /// Expired locks are returned as-is; callers compare against their clock.
    #[instrument(skip(self), fields(room_id = %room_id))]
    pub fn locked_until(&self, room_id: &RoomId) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT locked_until FROM room_state WHERE room_id = ?1")?;
            let mut rows = stmt.query([room_id.as_str()])?;
            match rows.next()? {
                Some(row) => row_helpers::get_opt::<i64>(row, 0, "room_state", "locked_until")?
                    .map(|ms| row_helpers::parse_millis(ms, "room_state", "locked_until"))
                    .transpose(),
                None => Ok(None),
            }
        })
    }

    /// Overwrite the room's lock expiry.
    #[instrument(skip(self), fields(room_id = %room_id))]
    pub fn set_locked_until(&self, room_id: &RoomId, until: DateTime<Utc>) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO room_state (room_id, locked_until) VALUES (?1, ?2)
                 ON CONFLICT(room_id) DO UPDATE SET locked_until = excluded.locked_until",
                rusqlite::params![room_id.as_str(), until.timestamp_millis()],
            )?;
            Ok(())
        })
    }
}
