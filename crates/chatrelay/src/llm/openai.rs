//! OpenAI-compatible LLM provider.
//!
//! Works with OpenRouter, OpenAI, Ollama, and other compatible APIs.

use async_trait::async_trait;
use reqwest::Client;

use super::error::{LLMError, check_response};
use super::frame::FrameStream;
use super::provider::LLMProvider;
use super::types::{ChatRequest, ChatResponse, ChatStream, Message};

/// OpenAI-compatible provider.
pub struct OpenAICompatibleProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAICompatibleProvider {
    #[must_use]
    pub fn new(client: Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn build_request<T: serde::Serialize>(&self, body: &T) -> reqwest::RequestBuilder {
        let url = format!("{}/chat/completions", self.base_url);

        let mut req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");

        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        req.json(body)
    }
}

#[async_trait]
impl LLMProvider for OpenAICompatibleProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        let response = self.build_request(&request).send().await?;
        let response = check_response(response).await?;
        Ok(response.json().await?)
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, LLMError> {
        let stream_request = StreamRequest {
            model: request.model,
            messages: request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: true,
        };

        let response = self.build_request(&stream_request).send().await?;
        let response = check_response(response).await?;

        let byte_stream = Box::pin(response.bytes_stream());
        Ok(Box::pin(FrameStream::new(byte_stream)))
    }
}

#[derive(serde::Serialize)]
struct StreamRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use futures::StreamExt;

    use super::*;
    use crate::llm::{Frame, Role};

    async fn spawn_upstream(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn request() -> ChatRequest {
        ChatRequest::new("test/model", vec![Message::text(Role::User, "hi")])
    }

    #[tokio::test]
    async fn streams_frames_from_upstream() {
        let router = Router::new().route(
            "/chat/completions",
            post(|headers: HeaderMap, body: String| async move {
                assert_eq!(
                    headers.get("authorization").unwrap().to_str().unwrap(),
                    "Bearer secret"
                );
                let json: serde_json::Value = serde_json::from_str(&body).unwrap();
                assert_eq!(json["stream"], true);
                assert_eq!(json["model"], "test/model");
                concat!(
                    ": keep-alive\n\n",
                    "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
                    "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
                    "data: [DONE]\n\n",
                )
            }),
        );
        let base_url = spawn_upstream(router).await;
        let provider =
            OpenAICompatibleProvider::new(Client::new(), base_url, Some("secret".to_string()));

        let frames: Vec<Frame> = provider
            .chat_stream(request())
            .await
            .unwrap()
            .map(|f| f.unwrap())
            .collect()
            .await;

        assert_eq!(
            frames,
            vec![
                Frame::Noise,
                Frame::Delta("Hel".to_string()),
                Frame::Delta("lo".to_string()),
                Frame::Done,
            ]
        );
    }

    #[tokio::test]
    async fn non_success_status_keeps_body() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async { (StatusCode::BAD_REQUEST, "{\"error\":\"no such model\"}") }),
        );
        let base_url = spawn_upstream(router).await;
        let provider = OpenAICompatibleProvider::new(Client::new(), base_url, None);

        let err = match provider.chat_stream(request()).await {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        match err {
            LLMError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "{\"error\":\"no such model\"}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn chat_parses_completion() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async {
                axum::Json(serde_json::json!({
                    "id": "c1",
                    "choices": [{"index": 0, "message": {"role": "assistant", "content": "ok"}}]
                }))
            }),
        );
        let base_url = spawn_upstream(router).await;
        let provider = OpenAICompatibleProvider::new(Client::new(), base_url, None);

        let response = provider.chat(request()).await.unwrap();
        assert_eq!(response.first_text(), "ok");
    }
}
