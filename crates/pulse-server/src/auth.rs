use axum::http::{header, HeaderMap};

use pulse_core::RoomId;
use pulse_store::RoomRepo;

use crate::error::ApiError;

pub const HOST_SECRET_HEADER: &str = "x-host-secret";

/// Host secret from `X-Host-Secret`, falling back to `Authorization: Bearer`.
pub fn host_secret(headers: &HeaderMap) -> Option<String> {
    let from_header = headers
        .get(HOST_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty());
    if let Some(secret) = from_header {
        return Some(secret.to_string());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Require the host secret of `room_id`: missing is 401, wrong is 403.
pub fn require_host(rooms: &RoomRepo, room_id: &RoomId, headers: &HeaderMap) -> Result<(), ApiError> {
    let secret = host_secret(headers).ok_or(ApiError::Unauthorized)?;
    if rooms.verify_host(room_id, &secret)? {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn custom_header_wins() {
        let h = headers(&[("x-host-secret", " abc "), ("authorization", "Bearer other")]);
        assert_eq!(host_secret(&h).as_deref(), Some("abc"));
    }

    #[test]
    fn bearer_fallback() {
        let h = headers(&[("authorization", "Bearer tok123")]);
        assert_eq!(host_secret(&h).as_deref(), Some("tok123"));
    }

    #[test]
    fn blank_or_other_schemes_are_missing() {
        assert!(host_secret(&headers(&[("x-host-secret", "  ")])).is_none());
        assert!(host_secret(&headers(&[("authorization", "Basic abc")])).is_none());
        assert!(host_secret(&HeaderMap::new()).is_none());
    }
}
