use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use pulse_engine::FeedbackError;
use pulse_store::StoreError;

/// Everything an HTTP handler can fail with. Rendered as
/// `{"error": CODE, ...}` with the matching status.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("host secret required")]
    Unauthorized,

    #[error("host secret does not match")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error(transparent)]
    Feedback(#[from] FeedbackError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("background task failed: {0}")]
    Task(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Feedback(e) => {
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Self::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Store(_) | Self::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound("room") => "ROOM_NOT_FOUND",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Feedback(e) => e.error_kind(),
            Self::Store(StoreError::NotFound(_)) => "NOT_FOUND",
            Self::Store(StoreError::Conflict(_)) => "JOIN_CODE_GENERATION_FAILED",
            Self::Store(_) | Self::Task(_) => "STORAGE_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let mut body = json!({ "error": self.code() });
        let retry_after = match &self {
            Self::Feedback(e) => retry_after(e),
            _ => None,
        };
        match &self {
            Self::BadRequest(detail) => body["message"] = json!(detail),
            Self::Feedback(FeedbackError::Validation(detail)) => body["message"] = json!(detail),
            Self::Feedback(FeedbackError::RoomLocked { locked_until }) => {
                body["lockedUntil"] = json!(locked_until);
            }
            Self::Feedback(FeedbackError::Cooldown { retry_after_seconds }) => {
                body["retryAfterSeconds"] = json!(retry_after_seconds);
            }
            _ => {}
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(value) = retry_after {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}

/// `Retry-After` for rejections that clear up on their own: delta-seconds
/// for a cooldown, the lock expiry as an HTTP-date for a locked room.
fn retry_after(err: &FeedbackError) -> Option<HeaderValue> {
    if !err.is_temporary() {
        return None;
    }
    match err {
        FeedbackError::Cooldown { retry_after_seconds } => Some(HeaderValue::from(*retry_after_seconds)),
        FeedbackError::RoomLocked { locked_until } => {
            let date = locked_until.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
            HeaderValue::from_str(&date).ok()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn statuses_follow_feedback_taxonomy() {
        let locked = ApiError::from(FeedbackError::RoomLocked { locked_until: Utc::now() });
        assert_eq!(locked.status(), StatusCode::LOCKED);
        assert_eq!(locked.code(), "ROOM_LOCKED");

        let cooldown = ApiError::from(FeedbackError::Cooldown { retry_after_seconds: 3 });
        assert_eq!(cooldown.status(), StatusCode::TOO_MANY_REQUESTS);

        let robot = ApiError::from(FeedbackError::RobotCheckFailed);
        assert_eq!(robot.status(), StatusCode::BAD_REQUEST);
        assert_eq!(robot.code(), "NOT_ROBOT_REQUIRED");
    }

    #[test]
    fn store_errors() {
        let missing = ApiError::from(StoreError::NotFound("room x".into()));
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        let conflict = ApiError::from(StoreError::Conflict("codes".into()));
        assert_eq!(conflict.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(conflict.code(), "JOIN_CODE_GENERATION_FAILED");
    }

    #[test]
    fn room_not_found_code() {
        assert_eq!(ApiError::NotFound("room").code(), "ROOM_NOT_FOUND");
        assert_eq!(ApiError::NotFound("host secret").code(), "NOT_FOUND");
    }

    #[test]
    fn cooldown_response_sets_retry_after() {
        let response = ApiError::from(FeedbackError::Cooldown { retry_after_seconds: 42 }).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
    }

    #[test]
    fn locked_response_sets_retry_after_date() {
        let until = chrono::DateTime::parse_from_rfc3339("2026-03-01T09:05:30Z")
            .unwrap()
            .with_timezone(&Utc);
        let response = ApiError::from(FeedbackError::RoomLocked { locked_until: until }).into_response();
        assert_eq!(response.status(), StatusCode::LOCKED);
        assert_eq!(response.headers()[header::RETRY_AFTER], "Sun, 01 Mar 2026 09:05:30 GMT");
    }

    #[test]
    fn permanent_rejections_have_no_retry_after() {
        let response = ApiError::from(FeedbackError::RobotCheckFailed).into_response();
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
        let response = ApiError::from(FeedbackError::Validation("value".into())).into_response();
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }
}
