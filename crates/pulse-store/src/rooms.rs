use base64::Engine;
use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use tracing::{info, instrument};

use pulse_core::{RoomId, RoomType};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Join-code alphabet without look-alike characters (no I, O, 0, 1).
pub const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const JOIN_CODE_ATTEMPTS: usize = 5;
const HOST_SECRET_BYTES: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRow {
    pub id: RoomId,
    pub name: String,
    pub location_label: Option<String>,
    pub join_code: String,
    pub room_type: RoomType,
    pub created_at: i64,
}

#[derive(Clone, Debug, Default)]
pub struct NewRoom {
    pub name: String,
    pub location_label: Option<String>,
    pub room_type: RoomType,
}

/// A freshly created room with the secret its host uses for lock/reset.
/// The secret is only ever returned here.
#[derive(Clone, Debug)]
pub struct CreatedRoom {
    pub room: RoomRow,
    pub host_secret: String,
}

/// Room directory: creation, join-code and host-secret lookups.
pub struct RoomRepo {
    db: Database,
    join_code_length: usize,
}

impl RoomRepo {
    pub fn new(db: Database, join_code_length: usize) -> Self {
        Self { db, join_code_length }
    }

    /// Create a room with a fresh join code and host secret.
    #[instrument(skip(self, new), fields(name = %new.name))]
    pub fn create(&self, new: &NewRoom) -> Result<CreatedRoom, StoreError> {
        let len = self.join_code_length;
        self.create_with_codes(new, || make_join_code(len))
    }

    fn create_with_codes(
        &self,
        new: &NewRoom,
        mut next_code: impl FnMut() -> String,
    ) -> Result<CreatedRoom, StoreError> {
        let host_secret = make_secret();

        self.db.with_conn(|conn| {
            for _ in 0..JOIN_CODE_ATTEMPTS {
                let join_code = next_code();
                let id = RoomId::new();
                let created_at = Utc::now().timestamp_millis();

                let inserted = conn.execute(
                    "INSERT INTO rooms (id, name, location_label, join_code, host_secret, room_type, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(join_code) DO NOTHING",
                    rusqlite::params![
                        id.as_str(),
                        new.name,
                        new.location_label,
                        join_code,
                        host_secret,
                        new.room_type.as_str(),
                        created_at,
                    ],
                )?;
                if inserted == 0 {
                    continue;
                }

                conn.execute(
                    "INSERT INTO room_state (room_id) VALUES (?1) ON CONFLICT DO NOTHING",
                    [id.as_str()],
                )?;

                info!(room_id = %id, join_code = %join_code, "room created");
                return Ok(CreatedRoom {
                    room: RoomRow {
                        id,
                        name: new.name.clone(),
                        location_label: new.location_label.clone(),
                        join_code,
                        room_type: new.room_type,
                        created_at,
                    },
                    host_secret: host_secret.clone(),
                });
            }
            Err(StoreError::Conflict("join code generation failed".into()))
        })
    }

    #[instrument(skip(self), fields(room_id = %id))]
    pub fn get(&self, id: &RoomId) -> Result<RoomRow, StoreError> {
        self.find_one("WHERE id = ?1", id.as_str())?
            .ok_or_else(|| StoreError::NotFound(format!("room {id}")))
    }

    /// Resolve a participant-entered join code. Case-insensitive, trimmed.
    #[instrument(skip(self))]
    pub fn resolve_join_code(&self, code: &str) -> Result<RoomRow, StoreError> {
        let code = code.trim().to_uppercase();
        self.find_one("WHERE join_code = ?1", &code)?
            .ok_or_else(|| StoreError::NotFound(format!("join code {code}")))
    }

    /// Find the room a host secret belongs to.
    #[instrument(skip(self, secret))]
    pub fn find_by_host_secret(&self, secret: &str) -> Result<RoomRow, StoreError> {
        self.find_one("WHERE host_secret = ?1", secret)?
            .ok_or_else(|| StoreError::NotFound("host secret".into()))
    }

    pub fn exists(&self, id: &RoomId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM rooms WHERE id = ?1",
                [id.as_str()],
                |row| row.get(0),
            )?;
            Ok(n > 0)
        })
    }

    pub fn room_type(&self, id: &RoomId) -> Result<RoomType, StoreError> {
        self.get(id).map(|room| room.room_type)
    }

    /// Whether `secret` is the host secret of room `id`.
    #[instrument(skip(self, secret), fields(room_id = %id))]
    pub fn verify_host(&self, id: &RoomId, secret: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM rooms WHERE id = ?1 AND host_secret = ?2",
                rusqlite::params![id.as_str(), secret],
                |row| row.get(0),
            )?;
            Ok(n > 0)
        })
    }

    fn find_one(&self, filter: &str, arg: &str) -> Result<Option<RoomRow>, StoreError> {
        let sql = format!(
            "SELECT id, name, location_label, join_code, room_type, created_at FROM rooms {filter}"
        );
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([arg])?;
            let room = rows.next()?.map(row_to_room).transpose()?;
            Ok(room)
        })
    }
}

fn row_to_room(row: &rusqlite::Row<'_>) -> Result<RoomRow, StoreError> {
    let room_type: String = row_helpers::get(row, 4, "rooms", "room_type")?;
    Ok(RoomRow {
        id: RoomId::from_raw(row_helpers::get::<String>(row, 0, "rooms", "id")?),
        name: row_helpers::get(row, 1, "rooms", "name")?,
        location_label: row_helpers::get_opt(row, 2, "rooms", "location_label")?,
        join_code: row_helpers::get(row, 3, "rooms", "join_code")?,
        room_type: row_helpers::parse_enum(&room_type, "rooms", "room_type")?,
        created_at: row_helpers::get(row, 5, "rooms", "created_at")?,
    })
}

/// Random join code of `len` characters from [`JOIN_CODE_ALPHABET`].
pub fn make_join_code(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| JOIN_CODE_ALPHABET[rng.gen_range(0..JOIN_CODE_ALPHABET.len())] as char)
        .collect()
}

/// URL-safe host secret from 32 random bytes.
pub fn make_secret() -> String {
    let mut bytes = [0u8; HOST_SECRET_BYTES];
    rand::thread_rng().fill(&mut bytes[..]);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
