/// SQL DDL for the roompulse database.
/// Timestamps are Unix milliseconds so window comparisons are plain integer math.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS rooms (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    location_label TEXT,
    join_code TEXT NOT NULL UNIQUE,
    host_secret TEXT NOT NULL UNIQUE,
    room_type TEXT NOT NULL DEFAULT 'NORMAL',
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS room_state (
    room_id TEXT PRIMARY KEY,
    locked_until INTEGER
);

CREATE TABLE IF NOT EXISTS feedback_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    room_id TEXT NOT NULL,
    category TEXT NOT NULL,
    value TEXT NOT NULL,
    client_hash TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_feedback_window ON feedback_events(room_id, category, created_at);
CREATE INDEX IF NOT EXISTS idx_feedback_client ON feedback_events(room_id, category, client_hash, created_at);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
