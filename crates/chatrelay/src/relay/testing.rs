//! A provider that replays canned responses.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, stream};

use crate::llm::{
    ChatRequest, ChatResponse, ChatStream, Choice, Frame, LLMError, LLMProvider, ResponseMessage,
    Role,
};

pub enum StreamScript {
    /// Emit these frames and end.
    Frames(Vec<Frame>),
    /// Fail the request like a non-2xx response.
    Reject { status: u16, body: String },
    /// Emit these frames and then stall forever.
    Hang(Vec<Frame>),
    /// Answer the request only after a delay, then emit these frames.
    Delayed(Duration, Vec<Frame>),
}

/// Replays scripted streams and chat replies in order.
#[derive(Default)]
pub struct ScriptedProvider {
    streams: Mutex<VecDeque<StreamScript>>,
    chats: Mutex<VecDeque<Result<String, (u16, String)>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    pub fn stream(self, script: StreamScript) -> Self {
        self.streams.lock().unwrap().push_back(script);
        self
    }

    pub fn chat(self, reply: Result<String, (u16, String)>) -> Self {
        self.chats.lock().unwrap().push_back(reply);
        self
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        self.requests.lock().unwrap().push(request);
        let reply = self.chats.lock().unwrap().pop_front();
        match reply {
            Some(Ok(text)) => Ok(ChatResponse {
                id: "scripted".to_string(),
                choices: vec![Choice {
                    index: 0,
                    message: ResponseMessage {
                        role: Role::Assistant,
                        content: Some(text),
                    },
                    finish_reason: Some("stop".to_string()),
                }],
                usage: None,
            }),
            Some(Err((status, message))) => Err(LLMError::Api { status, message }),
            None => Err(LLMError::Api {
                status: 500,
                message: "no scripted chat reply".to_string(),
            }),
        }
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, LLMError> {
        self.requests.lock().unwrap().push(request);
        let script = self.streams.lock().unwrap().pop_front();
        match script {
            Some(StreamScript::Frames(frames)) => {
                Ok(Box::pin(stream::iter(frames.into_iter().map(Ok))))
            }
            Some(StreamScript::Delayed(delay, frames)) => {
                tokio::time::sleep(delay).await;
                Ok(Box::pin(stream::iter(frames.into_iter().map(Ok))))
            }
            Some(StreamScript::Hang(frames)) => Ok(Box::pin(
                stream::iter(frames.into_iter().map(Ok)).chain(stream::pending()),
            )),
            Some(StreamScript::Reject { status, body }) => Err(LLMError::Api {
                status,
                message: body,
            }),
            None => Err(LLMError::Api {
                status: 500,
                message: "no scripted stream".to_string(),
            }),
        }
    }
}
