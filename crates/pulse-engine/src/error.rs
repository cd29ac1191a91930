use chrono::{DateTime, Utc};
use pulse_store::StoreError;

/// Terminal outcomes of a rejected submission.
///
/// Everything except `Storage` is decided before any write, so a rejected
/// submission never leaves an event behind.
#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    #[error("invalid feedback: {0}")]
    Validation(String),

    #[error("not-robot confirmation required")]
    RobotCheckFailed,

    #[error("room locked until {locked_until}")]
    RoomLocked { locked_until: DateTime<Utc> },

    #[error("cooldown active, retry after {retry_after_seconds}s")]
    Cooldown { retry_after_seconds: u64 },

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl FeedbackError {
    /// Stable wire code for clients.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::RobotCheckFailed => "NOT_ROBOT_REQUIRED",
            Self::RoomLocked { .. } => "ROOM_LOCKED",
            Self::Cooldown { .. } => "COOLDOWN",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// HTTP-equivalent status for the outcome.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::RobotCheckFailed => 400,
            Self::RoomLocked { .. } => 423,
            Self::Cooldown { .. } => 429,
            Self::Storage(_) => 500,
        }
    }

    /// Whether the client can succeed later by resubmitting unchanged.
    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::RoomLocked { .. } | Self::Cooldown { .. })
    }
}
