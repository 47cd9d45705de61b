use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use tower_http::timeout::TimeoutLayer;

use crate::dispatcher::Dispatcher;
use crate::handlers;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    /// Bearer token for admin routes. `None` disables them.
    pub admin_token: Option<Arc<str>>,
    pub keep_alive_interval_seconds: u64,
}

impl AppState {
    pub fn new(
        dispatcher: Dispatcher,
        admin_token: Option<String>,
        keep_alive_interval_seconds: u64,
    ) -> Self {
        Self {
            dispatcher,
            admin_token: admin_token
                .filter(|token| !token.is_empty())
                .map(Arc::from),
            keep_alive_interval_seconds: keep_alive_interval_seconds.max(1),
        }
    }
}

pub fn build_app(state: AppState, request_timeout_secs: u64) -> Router {
    let api_v1 = Router::new()
        .route("/chat/stream", post(handlers::v1::stream_chat))
        .route(
            "/conversations/{conversation_id}",
            get(handlers::v1::get_conversation),
        )
        .route("/memory/{user_id}", delete(handlers::v1::clear_memory))
        .route("/admin/guilds", get(handlers::v1::list_guilds))
        .route(
            "/admin/guilds/{guild_id}",
            get(handlers::v1::get_guild).patch(handlers::v1::patch_guild),
        )
        .route(
            "/admin/rate-limits/{user_id}",
            delete(handlers::v1::reset_rate_limit),
        )
        .with_state(state);

    Router::new()
        .route("/livez", get(handlers::livez))
        .route("/readyz", get(handlers::readyz))
        .nest("/api/v1", api_v1)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(request_timeout_secs),
        ))
}
