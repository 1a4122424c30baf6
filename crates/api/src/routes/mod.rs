//! HTTP route handlers.

pub mod checkout;
pub mod health;
pub mod inventory;
pub mod metrics;
pub mod orders;
pub mod payments;

use axum::body::Bytes;
use axum::http::HeaderMap;
use common::UserId;
use serde::de::DeserializeOwned;

use crate::error::ApiError;

/// Header carrying the caller's user id, set by the upstream identity layer.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Header carrying whether the caller's email is verified.
pub const EMAIL_VERIFIED_HEADER: &str = "x-email-verified";

/// Reads the caller's user id from the identity headers.
pub(crate) fn caller_id(headers: &HeaderMap) -> Result<UserId, ApiError> {
    let raw = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized(format!("missing {USER_ID_HEADER} header")))?;
    raw.trim()
        .parse()
        .map_err(|e| ApiError::Unauthorized(format!("invalid {USER_ID_HEADER}: {e}")))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Parses a JSON body that may be omitted entirely.
pub(crate) fn optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid body: {e}")))
}
