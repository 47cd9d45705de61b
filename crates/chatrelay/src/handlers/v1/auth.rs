//! Caller identification for the v1 API.

use axum::http::{HeaderMap, header};
use axum::response::Response;
use subtle::ConstantTimeEq;

use super::{ANONYMOUS_USER, USER_ID_HEADER};
use crate::response;
use crate::server::AppState;

/// The user key from `X-User-Id`, or [`ANONYMOUS_USER`].
pub fn user_id(headers: &HeaderMap) -> String {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(ANONYMOUS_USER)
        .to_string()
}

/// Whether the request carries the configured admin bearer token.
pub fn is_admin(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected) = state.admin_token.as_deref() else {
        return false;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| bool::from(token.as_bytes().ct_eq(expected.as_bytes())))
}

/// Reject the request unless it carries the admin token.
pub fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    if state.admin_token.is_none() {
        return Err(response::forbidden("Admin API is disabled"));
    }
    if is_admin(state, headers) {
        Ok(())
    } else {
        Err(response::unauthorized("Invalid or missing admin token"))
    }
}
