//! Per-user memory management.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use super::auth;
use crate::response;
use crate::server::AppState;

#[derive(Serialize)]
pub struct ClearMemoryResponse {
    cleared: bool,
}

/// DELETE /api/v1/memory/{user_id}
///
/// Callers may clear their own memory. The admin token clears anyone's.
pub async fn clear_memory(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if auth::user_id(&headers) != user_id && !auth::is_admin(&state, &headers) {
        return response::forbidden("Cannot clear another user's memory");
    }

    let cleared = state.dispatcher.memory().clear(&user_id);
    (StatusCode::OK, Json(ClearMemoryResponse { cleared })).into_response()
}
