//! HTTP handlers for the room and feedback API.

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use pulse_core::{RoomId, RoomType};
use pulse_engine::{FeedbackError, Submission};
use pulse_store::{NewRoom, RoomRow, StoreError};

use crate::auth::{host_secret, require_host};
use crate::error::ApiError;
use crate::server::AppState;

const MAX_NAME_CHARS: usize = 80;
const JOIN_CODE_INPUT_CHARS: std::ops::RangeInclusive<usize> = 3..=12;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateRoomBody {
    pub name: String,
    pub location_label: Option<String>,
    pub room_type: Option<RoomType>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JoinBody {
    pub join_code: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LockBody {
    pub minutes: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStateView {
    pub locked_until: Option<DateTime<Utc>>,
}

fn bad_json(rejection: JsonRejection) -> ApiError {
    ApiError::BadRequest(rejection.body_text())
}

/// Rooms are created on demand, so ids in paths are checked against the
/// directory before anything else touches them.
fn known_room(state: &AppState, id: String) -> Result<RoomId, ApiError> {
    let room_id = RoomId::from_raw(id);
    if state.rooms.exists(&room_id)? {
        Ok(room_id)
    } else {
        Err(ApiError::NotFound("room"))
    }
}

/// `POST /api/rooms`
pub async fn create_room(
    State(state): State<AppState>,
    body: Result<Json<CreateRoomBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body.map_err(bad_json)?;

    let name = body.name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_CHARS {
        return Err(ApiError::BadRequest(format!(
            "name must be 1 to {MAX_NAME_CHARS} characters"
        )));
    }
    let location_label = body
        .location_label
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty());
    if location_label
        .as_ref()
        .is_some_and(|l| l.chars().count() > MAX_NAME_CHARS)
    {
        return Err(ApiError::BadRequest(format!(
            "locationLabel must be at most {MAX_NAME_CHARS} characters"
        )));
    }

    let created = state.rooms.create(&NewRoom {
        name: name.to_string(),
        location_label,
        room_type: body.room_type.unwrap_or_default(),
    })?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "joinUrl": format!("{}/r/{}", state.base_url, created.room.join_code),
            "hostUrl": format!("{}/host/{}", state.base_url, created.host_secret),
            "room": created.room,
            "hostSecret": created.host_secret,
        })),
    ))
}

/// `POST /api/rooms/join`
pub async fn join_room(
    State(state): State<AppState>,
    body: Result<Json<JoinBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body.map_err(bad_json)?;
    let code = body.join_code.trim();
    if !JOIN_CODE_INPUT_CHARS.contains(&code.chars().count()) {
        return Err(ApiError::BadRequest("joinCode must be 3 to 12 characters".into()));
    }

    let room = match state.rooms.resolve_join_code(code) {
        Ok(room) => room,
        Err(StoreError::NotFound(_)) => return Err(ApiError::NotFound("room")),
        Err(e) => return Err(e.into()),
    };
    let locked_until = state.pipeline.active_lock(&room.id)?;

    Ok(Json(json!({
        "room": room,
        "state": RoomStateView { locked_until },
    })))
}

/// `GET /api/rooms/host-lookup`: which room a host secret belongs to.
pub async fn host_lookup(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let secret = host_secret(&headers).ok_or(ApiError::Unauthorized)?;
    let room = match state.rooms.find_by_host_secret(&secret) {
        Ok(room) => room,
        Err(StoreError::NotFound(_)) => return Err(ApiError::NotFound("host secret")),
        Err(e) => return Err(e.into()),
    };
    Ok(Json(json!({ "roomId": room.id })))
}

/// `GET /api/rooms/{id}/host`: everything the host dashboard needs at once.
pub async fn host_view(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let room_id = RoomId::from_raw(id);
    require_host(&state.rooms, &room_id, &headers)?;

    let room: RoomRow = state.rooms.get(&room_id)?;
    let locked_until = state.pipeline.active_lock(&room_id)?;
    let aggregate = state.pipeline.get_aggregate(&room_id)?;

    Ok(Json(json!({
        "room": room,
        "state": RoomStateView { locked_until },
        "aggregate": aggregate,
    })))
}

/// `GET /api/rooms/{id}/aggregate`
pub async fn get_aggregate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let room_id = known_room(&state, id)?;
    Ok(Json(state.pipeline.get_aggregate(&room_id)?))
}

/// `POST /api/rooms/{id}/feedback`
///
/// The pipeline runs on its own task so a client hanging up mid-request
/// cannot cut a submission off between the append and the broadcast.
pub async fn submit_feedback(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<Submission>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let room_id = known_room(&state, id)?;
    let Json(submission) = body
        .map_err(|rejection| FeedbackError::Validation(rejection.body_text()))?;

    let pipeline = state.pipeline.clone();
    let accepted = tokio::spawn(async move { pipeline.submit(&room_id, submission).await })
        .await
        .map_err(|e| ApiError::Task(e.to_string()))??;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "ok": true,
            "cooldownSeconds": accepted.cooldown_seconds,
        })),
    ))
}

/// `POST /api/rooms/{id}/lock` with optional `{"minutes": n}`.
pub async fn lock_room(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let room_id = RoomId::from_raw(id);
    require_host(&state.rooms, &room_id, &headers)?;

    let body: LockBody = if body.iter().all(u8::is_ascii_whitespace) {
        LockBody::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
    };

    let locked_until = state.pipeline.lock_room(&room_id, body.minutes)?;
    Ok(Json(json!({ "ok": true, "lockedUntil": locked_until })))
}

/// `POST /api/rooms/{id}/reset`
pub async fn reset_room(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let room_id = RoomId::from_raw(id);
    require_host(&state.rooms, &room_id, &headers)?;

    let pipeline = state.pipeline.clone();
    tokio::spawn(async move { pipeline.reset_room(&room_id).await })
        .await
        .map_err(|e| ApiError::Task(e.to_string()))??;

    Ok(Json(json!({ "ok": true })))
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "connections": state.broadcaster.connection_count(),
    }))
}
