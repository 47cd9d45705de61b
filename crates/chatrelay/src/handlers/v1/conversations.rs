//! Conversation recovery.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use crate::conversation::ConversationStore;
use crate::response;
use crate::server::AppState;

/// GET /api/v1/conversations/{conversation_id}
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Response {
    match state
        .dispatcher
        .relay()
        .conversations()
        .get(&conversation_id)
        .await
    {
        Ok(Some(conversation)) => (StatusCode::OK, Json(conversation)).into_response(),
        Ok(None) => response::not_found("Conversation not found"),
        Err(e) => {
            error!(
                conversation_id = %conversation_id,
                error = %e,
                "Failed to load conversation"
            );
            response::internal_error("Failed to load conversation")
        }
    }
}
