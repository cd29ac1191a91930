//! Layered configuration.
//!
//! Loading flow:
//! 1. Start with compiled [`PulseSettings::default()`]
//! 2. If a settings file is given and exists, deep-merge its values over the defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Invalid environment values are ignored with a warning, so a typo in one
//! variable never prevents startup. Values from the settings file are not
//! second-guessed: an out-of-range file value fails [`PulseSettings::validate`]
//! and aborts loading.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Upper bound for the per-client cooldown.
pub const MAX_COOLDOWN_SECONDS: u64 = 86_400;
/// Upper bound for either lock bound.
pub const MAX_LOCK_MINUTES: u32 = 1_440;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PulseSettings {
    pub feedback: FeedbackSettings,
    pub rooms: RoomSettings,
    pub server: ServerSettings,
}

impl Default for PulseSettings {
    fn default() -> Self {
        Self {
            feedback: FeedbackSettings::default(),
            rooms: RoomSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FeedbackSettings {
    /// Minimum gap between accepted submissions per room, category and client.
    pub cooldown_seconds: u64,
    pub lock_min_minutes: u32,
    pub lock_max_minutes: u32,
    /// Lock length used when a host does not say how long.
    pub default_lock_minutes: u32,
}

impl Default for FeedbackSettings {
    fn default() -> Self {
        Self {
            cooldown_seconds: 60,
            lock_min_minutes: 1,
            lock_max_minutes: 30,
            default_lock_minutes: 5,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RoomSettings {
    pub join_code_length: usize,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            join_code_length: 5,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    /// Per-connection outbound queue; pushes beyond it are dropped.
    pub max_send_queue: usize,
    pub log_json: bool,
    /// Public origin used to build the join and host links handed out on room creation.
    pub base_url: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            db_path: default_db_path(),
            max_send_queue: 64,
            log_json: false,
            base_url: "http://localhost:3000".to_string(),
        }
    }
}

fn default_db_path() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".roompulse")
        .join("roompulse.db")
}

impl PulseSettings {
    /// Reject combinations no component can work with.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let f = &self.feedback;
        if f.lock_min_minutes == 0
            || f.lock_min_minutes > f.lock_max_minutes
            || f.lock_max_minutes > MAX_LOCK_MINUTES
        {
            return Err(SettingsError::InvalidValue(format!(
                "lock bounds {}..={} minutes",
                f.lock_min_minutes, f.lock_max_minutes
            )));
        }
        if !(1..=MAX_COOLDOWN_SECONDS).contains(&f.cooldown_seconds) {
            return Err(SettingsError::InvalidValue(format!(
                "cooldown {}s, must be 1..={MAX_COOLDOWN_SECONDS}",
                f.cooldown_seconds
            )));
        }
        if !(3..=12).contains(&self.rooms.join_code_length) {
            return Err(SettingsError::InvalidValue(format!(
                "join code length {}",
                self.rooms.join_code_length
            )));
        }
        Ok(())
    }
}

/// Load settings from an optional file with env var overrides.
pub fn load_settings(path: Option<&Path>) -> Result<PulseSettings, SettingsError> {
    let defaults = serde_json::to_value(PulseSettings::default())?;

    let merged = match path {
        Some(path) if path.exists() => {
            debug!(?path, "loading settings from file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        }
        Some(path) => {
            debug!(?path, "settings file not found, using defaults");
            defaults
        }
        None => defaults,
    };

    let mut settings: PulseSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key, everything else is replaced by `source`, and
/// nulls in `source` keep the target value.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides read through `lookup` (the process environment in production).
pub fn apply_overrides(settings: &mut PulseSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    if let Some(v) = env.u64("COOLDOWN_SECONDS", 1, MAX_COOLDOWN_SECONDS) {
        settings.feedback.cooldown_seconds = v;
    }

    // Lock bounds are applied as a pair.
    let lock_max = u64::from(MAX_LOCK_MINUTES);
    let min = env.u64("ROOM_LOCK_MIN_MINUTES", 1, lock_max);
    let max = env.u64("ROOM_LOCK_MAX_MINUTES", 1, lock_max);
    if min.is_some() || max.is_some() {
        let min = min.map_or(settings.feedback.lock_min_minutes, |v| v as u32);
        let max = max.map_or(settings.feedback.lock_max_minutes, |v| v as u32);
        if min <= max {
            settings.feedback.lock_min_minutes = min;
            settings.feedback.lock_max_minutes = max;
        } else {
            warn!(min, max, "lock bounds from env are inverted, ignoring");
        }
    }

    if let Some(v) = env.u64("ROOM_JOIN_CODE_LENGTH", 3, 12) {
        settings.rooms.join_code_length = v as usize;
    }
    if let Some(v) = env.u64("PORT", 0, 65_535) {
        settings.server.port = v as u16;
    }
    if let Some(v) = env.string("ROOMPULSE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.string("ROOMPULSE_DB") {
        settings.server.db_path = PathBuf::from(v);
    }
    if let Some(v) = env.bool("ROOMPULSE_LOG_JSON") {
        settings.server.log_json = v;
    }
    if let Some(v) = env.string("ROOMPULSE_BASE_URL") {
        settings.server.base_url = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        result
    }
}
