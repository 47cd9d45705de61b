//! Guild settings and rate limit administration.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::info;

use super::auth;
use crate::response;
use crate::server::AppState;
use crate::tenant::GuildSettingsPatch;

#[derive(Serialize)]
pub struct ListGuildsResponse {
    guilds: Vec<String>,
}

/// GET /api/v1/admin/guilds
pub async fn list_guilds(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = auth::require_admin(&state, &headers) {
        return resp;
    }
    let guilds = state.dispatcher.guilds().list_keys();
    (StatusCode::OK, Json(ListGuildsResponse { guilds })).into_response()
}

/// GET /api/v1/admin/guilds/{guild_id}
///
/// Unknown guilds are created with the defaults, like any other first access.
pub async fn get_guild(
    State(state): State<AppState>,
    Path(guild_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = auth::require_admin(&state, &headers) {
        return resp;
    }
    let settings = state.dispatcher.guilds().get(&guild_id);
    (StatusCode::OK, Json(settings)).into_response()
}

/// PATCH /api/v1/admin/guilds/{guild_id}
pub async fn patch_guild(
    State(state): State<AppState>,
    Path(guild_id): Path<String>,
    headers: HeaderMap,
    Json(patch): Json<GuildSettingsPatch>,
) -> Response {
    if let Err(resp) = auth::require_admin(&state, &headers) {
        return resp;
    }
    if patch
        .current_model
        .as_deref()
        .is_some_and(|model| model.trim().is_empty())
    {
        return response::bad_request("currentModel must not be empty");
    }

    let settings = state.dispatcher.guilds().apply(&guild_id, patch);
    info!(
        guild_id = %guild_id,
        model = %settings.current_model,
        rate_limit_max = settings.rate_limit_max,
        memory_share_enabled = settings.memory_share_enabled,
        "Guild settings updated"
    );
    (StatusCode::OK, Json(settings)).into_response()
}

#[derive(Serialize)]
pub struct ResetRateLimitResponse {
    reset: bool,
}

/// DELETE /api/v1/admin/rate-limits/{user_id}
///
/// Lifts a user's current rate limit window.
pub async fn reset_rate_limit(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = auth::require_admin(&state, &headers) {
        return resp;
    }
    let reset = state.dispatcher.limiter().reset(&user_id);
    info!(user_id = %user_id, reset, "Rate limit reset");
    (StatusCode::OK, Json(ResetRateLimitResponse { reset })).into_response()
}
