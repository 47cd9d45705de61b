//! Streaming chat endpoint.

use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use super::auth;
use crate::attachment::AttachmentRef;
use crate::dispatcher::StreamChat;
use crate::response;
use crate::server::AppState;

// ============================================================================
// Request Types
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChatRequest {
    #[serde(default)]
    message: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    attachments: Vec<AttachmentBody>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachmentBody {
    /// Client-side category hint. Classification uses the name and mime type.
    #[serde(default, rename = "type")]
    _kind: Option<String>,
    url: String,
    name: String,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    size: Option<u64>,
}

impl From<AttachmentBody> for AttachmentRef {
    fn from(body: AttachmentBody) -> Self {
        Self {
            url: body.url,
            name: body.name,
            mime_type: body.mime_type,
            size: body.size,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/chat/stream
///
/// Frames are `data: <json>`: `{"conversationId"}` first, then zero or more
/// `{"content"}`, then either `[DONE]` or a single `{"error"}`.
pub async fn stream_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<StreamChatRequest>,
) -> Response {
    if req.message.trim().is_empty() && req.attachments.is_empty() {
        return response::bad_request("Message must not be empty");
    }

    let chat = StreamChat {
        user_id: auth::user_id(&headers),
        message: req.message,
        model: req.model,
        conversation_id: req.conversation_id.filter(|id| !id.is_empty()),
        attachments: req.attachments.into_iter().map(Into::into).collect(),
    };
    debug!(
        user_id = %chat.user_id,
        conversation_id = ?chat.conversation_id,
        "Chat stream requested"
    );

    let events = match state.dispatcher.stream_http(chat) {
        Ok(rx) => rx,
        Err(limited) => return response::rate_limited(limited),
    };

    let stream = ReceiverStream::new(events)
        .map(|event| Ok::<_, Infallible>(Event::default().data(event.sse_data())));

    let keep_alive = KeepAlive::new()
        .interval(Duration::from_secs(state.keep_alive_interval_seconds))
        .text("keep-alive");

    Sse::new(stream).keep_alive(keep_alive).into_response()
}
