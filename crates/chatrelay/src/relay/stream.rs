use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{RelayConfig, RelayError, RelayEvent, RelayOutcome, RelayReply, RelayRequest};
use crate::clock::Clock;
use crate::conversation::{ConversationStore, StoreError, Turn, title_from_message};
use crate::llm::{ChatRequest, ChatStream, Frame, LLMError, LLMProvider, Message, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelayState {
    Init,
    UpstreamRequested,
    Streaming,
    Completed,
    Failed,
}

/// Bookkeeping for one relay call.
struct Session {
    state: RelayState,
    text: String,
}

impl Session {
    fn new() -> Self {
        Self {
            state: RelayState::Init,
            text: String::new(),
        }
    }

    fn transition(&mut self, next: RelayState) {
        debug!(from = ?self.state, to = ?next, "Relay state change");
        self.state = next;
    }
}

/// Forwards one upstream completion to a client and records the finished turn.
#[derive(Clone)]
pub struct StreamRelay {
    provider: Arc<dyn LLMProvider>,
    conversations: Arc<dyn ConversationStore>,
    clock: Arc<dyn Clock>,
    config: RelayConfig,
}

impl StreamRelay {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        conversations: Arc<dyn ConversationStore>,
        clock: Arc<dyn Clock>,
        config: RelayConfig,
    ) -> Self {
        Self {
            provider,
            conversations,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn conversations(&self) -> &Arc<dyn ConversationStore> {
        &self.conversations
    }

    /// Stream a completion into `sink`.
    ///
    /// The first event is always [`RelayEvent::ConversationId`]. The last one
    /// is [`RelayEvent::Done`] on success or a single [`RelayEvent::Error`] on
    /// failure. A closed sink aborts the call without recording anything.
    pub async fn stream(
        &self,
        request: RelayRequest,
        sink: mpsc::Sender<RelayEvent>,
    ) -> Result<RelayOutcome, RelayError> {
        let mut session = Session::new();
        let result = self.run_stream(&mut session, &request, &sink).await;

        match &result {
            Ok(outcome) => {
                debug!(
                    conversation_id = %outcome.conversation_id,
                    chars = outcome.text.chars().count(),
                    "Relay completed"
                );
            }
            Err(RelayError::ClientDisconnected) => {
                session.transition(RelayState::Failed);
                debug!("Client disconnected, nothing recorded");
            }
            Err(e) => {
                session.transition(RelayState::Failed);
                warn!(error = %e, "Relay failed");
                let _ = sink.send(RelayEvent::Error(e.to_string())).await;
            }
        }
        result
    }

    async fn run_stream(
        &self,
        session: &mut Session,
        request: &RelayRequest,
        sink: &mpsc::Sender<RelayEvent>,
    ) -> Result<RelayOutcome, RelayError> {
        let conversation_id = self.resolve_conversation(request).await?;
        sink.send(RelayEvent::ConversationId(conversation_id.clone()))
            .await
            .map_err(|_| RelayError::ClientDisconnected)?;

        session.transition(RelayState::UpstreamRequested);
        let frames = tokio::select! {
            biased;
            _ = sink.closed() => return Err(RelayError::ClientDisconnected),
            frames = self.provider.chat_stream(self.chat_request(request)) => {
                frames.map_err(upstream_rejected)?
            }
        };

        session.transition(RelayState::Streaming);
        self.consume(frames, session, Some(sink)).await?;
        session.transition(RelayState::Completed);

        if session.text.is_empty() {
            return Err(RelayError::EmptyResponse);
        }

        let now = self.clock.now();
        self.conversations
            .append_turns(
                &conversation_id,
                vec![
                    Turn {
                        role: Role::User,
                        content: request.user_text.clone(),
                        created_at: now,
                    },
                    Turn {
                        role: Role::Assistant,
                        content: session.text.clone(),
                        created_at: now,
                    },
                ],
            )
            .await?;

        // The turn is recorded; a client leaving now changes nothing.
        let _ = sink.send(RelayEvent::Done).await;

        Ok(RelayOutcome {
            conversation_id,
            text: std::mem::take(&mut session.text),
        })
    }

    /// Run a completion to the end and return its text, summarized when it
    /// exceeds the reply limit. Nothing is recorded in the conversation store.
    pub async fn complete(&self, request: RelayRequest) -> Result<RelayReply, RelayError> {
        let mut session = Session::new();
        let result = self.run_complete(&mut session, &request).await;
        if let Err(e) = &result {
            session.transition(RelayState::Failed);
            warn!(error = %e, "Relay failed");
        }
        result
    }

    async fn run_complete(
        &self,
        session: &mut Session,
        request: &RelayRequest,
    ) -> Result<RelayReply, RelayError> {
        session.transition(RelayState::UpstreamRequested);
        let frames = self
            .provider
            .chat_stream(self.chat_request(request))
            .await
            .map_err(upstream_rejected)?;

        session.transition(RelayState::Streaming);
        self.consume(frames, session, None).await?;
        session.transition(RelayState::Completed);

        if session.text.is_empty() {
            return Err(RelayError::EmptyResponse);
        }

        let full_text = std::mem::take(&mut session.text);
        let (text, summarized) = self.fit_reply(&request.model, &full_text).await;
        Ok(RelayReply {
            text,
            full_text,
            summarized,
        })
    }

    /// Shorten `text` to the reply limit with a second completion.
    ///
    /// Best effort: a failed, timed out or empty summary keeps the original.
    pub async fn fit_reply(&self, model: &str, text: &str) -> (String, bool) {
        let limit = self.config.reply_char_limit;
        if text.chars().count() <= limit {
            return (text.to_string(), false);
        }

        let prompt = self
            .config
            .summary_prompt
            .replace("{limit}", &limit.to_string());
        let request = ChatRequest::new(
            model,
            vec![
                Message::text(Role::System, prompt),
                Message::text(Role::User, text),
            ],
        );

        match tokio::time::timeout(self.config.idle_timeout, self.provider.chat(request)).await {
            Ok(Ok(response)) => {
                let summary = response.first_text().trim().to_string();
                if summary.is_empty() {
                    warn!("Summary was empty, keeping the original reply");
                    (text.to_string(), false)
                } else {
                    debug!(
                        original = text.chars().count(),
                        summary = summary.chars().count(),
                        "Reply summarized"
                    );
                    (summary, true)
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Summarization failed, keeping the original reply");
                (text.to_string(), false)
            }
            Err(_) => {
                warn!("Summarization timed out, keeping the original reply");
                (text.to_string(), false)
            }
        }
    }

    async fn resolve_conversation(&self, request: &RelayRequest) -> Result<String, RelayError> {
        match &request.conversation_id {
            Some(id) => match self.conversations.get(id).await? {
                Some(conversation) => Ok(conversation.id),
                None => Err(StoreError::NotFound(id.clone()).into()),
            },
            None => {
                let title = title_from_message(&request.user_text);
                let conversation = self.conversations.create(&title, &request.model).await?;
                Ok(conversation.id)
            }
        }
    }

    fn chat_request(&self, request: &RelayRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(request.prior_messages.len() + 2);
        if let Some(system) = &self.config.system_prompt {
            messages.push(Message::text(Role::System, system.clone()));
        }
        messages.extend(request.prior_messages.iter().cloned());
        messages.push(Message {
            role: Role::User,
            content: request.content.clone(),
        });
        ChatRequest::new(&request.model, messages)
    }

    /// Drain `frames` into `session.text`, forwarding deltas to `sink`.
    async fn consume(
        &self,
        mut frames: ChatStream,
        session: &mut Session,
        sink: Option<&mpsc::Sender<RelayEvent>>,
    ) -> Result<(), RelayError> {
        loop {
            let next = tokio::select! {
                biased;
                _ = sink_closed(sink) => return Err(RelayError::ClientDisconnected),
                next = tokio::time::timeout(self.config.idle_timeout, frames.next()) => next,
            };

            let frame = match next {
                Err(_) => return Err(RelayError::IdleTimeout),
                Ok(None) => return Ok(()),
                Ok(Some(Err(e))) => return Err(RelayError::TransportInterrupted(e.to_string())),
                Ok(Some(Ok(frame))) => frame,
            };

            match frame {
                Frame::Delta(text) => {
                    session.text.push_str(&text);
                    if let Some(sink) = sink {
                        sink.send(RelayEvent::Content(text))
                            .await
                            .map_err(|_| RelayError::ClientDisconnected)?;
                    }
                }
                Frame::Error(message) => return Err(RelayError::UpstreamRejected(message)),
                Frame::Noise => {}
                Frame::Done => return Ok(()),
            }
        }
    }
}

fn upstream_rejected(e: LLMError) -> RelayError {
    match e {
        LLMError::Request(e) => RelayError::TransportInterrupted(e.to_string()),
        other => RelayError::UpstreamRejected(other.client_message()),
    }
}

async fn sink_closed(sink: Option<&mpsc::Sender<RelayEvent>>) {
    match sink {
        Some(sink) => sink.closed().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::SystemClock;
    use crate::conversation::InMemoryConversationStore;
    use crate::llm::MessageContent;
    use crate::relay::testing::{ScriptedProvider, StreamScript};

    fn relay(provider: Arc<ScriptedProvider>, store: Arc<InMemoryConversationStore>) -> StreamRelay {
        StreamRelay::new(provider, store, Arc::new(SystemClock), RelayConfig::default())
    }

    fn request(text: &str) -> RelayRequest {
        RelayRequest {
            prior_messages: Vec::new(),
            content: MessageContent::Text(text.to_string()),
            user_text: text.to_string(),
            model: "m".to_string(),
            conversation_id: None,
        }
    }

    async fn collect(mut rx: mpsc::Receiver<RelayEvent>) -> Vec<RelayEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn delta(s: &str) -> Frame {
        Frame::Delta(s.to_string())
    }

    #[tokio::test]
    async fn stream_forwards_deltas_and_records_one_turn() {
        let provider = Arc::new(ScriptedProvider::default().stream(StreamScript::Frames(vec![
            Frame::Noise,
            delta("Hel"),
            delta("lo"),
            Frame::Done,
        ])));
        let store = Arc::new(InMemoryConversationStore::default());
        let relay = relay(provider, store.clone());

        let (tx, rx) = mpsc::channel(16);
        let outcome = relay.stream(request("hi"), tx).await.unwrap();
        let events = collect(rx).await;

        assert_eq!(
            events,
            vec![
                RelayEvent::ConversationId(outcome.conversation_id.clone()),
                RelayEvent::Content("Hel".to_string()),
                RelayEvent::Content("lo".to_string()),
                RelayEvent::Done,
            ]
        );

        let conversation = store.get(&outcome.conversation_id).await.unwrap().unwrap();
        assert_eq!(conversation.title, "hi");
        assert_eq!(conversation.turns.len(), 2);
        assert_eq!(conversation.turns[0].role, Role::User);
        assert_eq!(conversation.turns[0].content, "hi");
        assert_eq!(conversation.turns[1].content, "Hello");
    }

    #[tokio::test]
    async fn in_band_error_after_partial_text_records_nothing() {
        let provider = Arc::new(ScriptedProvider::default().stream(StreamScript::Frames(vec![
            delta("Hel"),
            Frame::Error("model overloaded".to_string()),
            delta("never"),
        ])));
        let store = Arc::new(InMemoryConversationStore::default());
        let relay = relay(provider, store.clone());

        let (tx, rx) = mpsc::channel(16);
        let err = relay.stream(request("hi"), tx).await.unwrap_err();
        assert!(matches!(err, RelayError::UpstreamRejected(_)));

        let events = collect(rx).await;
        let RelayEvent::ConversationId(id) = &events[0] else {
            panic!("first event must carry the conversation id");
        };
        assert_eq!(
            &events[1..],
            &[
                RelayEvent::Content("Hel".to_string()),
                RelayEvent::Error("model overloaded".to_string()),
            ]
        );
        assert!(store.get(id).await.unwrap().unwrap().turns.is_empty());
    }

    #[tokio::test]
    async fn rejected_request_passes_body_through() {
        let body = r#"{"error":{"message":"No endpoints found"}}"#;
        let provider = Arc::new(
            ScriptedProvider::default().stream(StreamScript::Reject {
                status: 404,
                body: body.to_string(),
            }),
        );
        let store = Arc::new(InMemoryConversationStore::default());
        let relay = relay(provider, store.clone());

        let (tx, rx) = mpsc::channel(16);
        relay.stream(request("hi"), tx).await.unwrap_err();

        let events = collect(rx).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], RelayEvent::Error(body.to_string()));
    }

    #[tokio::test]
    async fn empty_completion_is_an_error() {
        let provider = Arc::new(
            ScriptedProvider::default()
                .stream(StreamScript::Frames(vec![Frame::Noise, Frame::Done])),
        );
        let store = Arc::new(InMemoryConversationStore::default());
        let relay = relay(provider, store.clone());

        let (tx, rx) = mpsc::channel(16);
        let err = relay.stream(request("hi"), tx).await.unwrap_err();
        assert!(matches!(err, RelayError::EmptyResponse));

        let events = collect(rx).await;
        assert_eq!(
            events.last(),
            Some(&RelayEvent::Error("No response produced".to_string()))
        );
    }

    #[tokio::test]
    async fn existing_conversation_is_appended_to() {
        let provider = Arc::new(
            ScriptedProvider::default()
                .stream(StreamScript::Frames(vec![delta("one"), Frame::Done]))
                .stream(StreamScript::Frames(vec![delta("two"), Frame::Done])),
        );
        let store = Arc::new(InMemoryConversationStore::default());
        let relay = relay(provider, store.clone());

        let (tx, _rx) = mpsc::channel(16);
        let first = relay.stream(request("a"), tx).await.unwrap();

        let mut second = request("b");
        second.conversation_id = Some(first.conversation_id.clone());
        let (tx, _rx) = mpsc::channel(16);
        let outcome = relay.stream(second, tx).await.unwrap();
        assert_eq!(outcome.conversation_id, first.conversation_id);

        let conversation = store.get(&first.conversation_id).await.unwrap().unwrap();
        let contents: Vec<_> = conversation.turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "one", "b", "two"]);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn unknown_conversation_fails_before_upstream() {
        let provider = Arc::new(ScriptedProvider::default());
        let store = Arc::new(InMemoryConversationStore::default());
        let relay = relay(provider.clone(), store);

        let mut req = request("hi");
        req.conversation_id = Some("missing".to_string());
        let (tx, rx) = mpsc::channel(16);
        let err = relay.stream(req, tx).await.unwrap_err();

        assert!(matches!(err, RelayError::Store(StoreError::NotFound(_))));
        assert!(provider.requests().is_empty());
        let events = collect(rx).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], RelayEvent::Error(_)));
    }

    #[tokio::test]
    async fn client_disconnect_records_nothing() {
        let provider = Arc::new(
            ScriptedProvider::default().stream(StreamScript::Hang(vec![delta("partial")])),
        );
        let store = Arc::new(InMemoryConversationStore::default());
        let relay = relay(provider, store.clone());

        let (tx, mut rx) = mpsc::channel(16);
        let task = tokio::spawn(async move { relay.stream(request("hi"), tx).await });

        let Some(RelayEvent::ConversationId(id)) = rx.recv().await else {
            panic!("expected conversation id");
        };
        assert_eq!(rx.recv().await, Some(RelayEvent::Content("partial".to_string())));
        drop(rx);

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, RelayError::ClientDisconnected));
        assert!(store.get(&id).await.unwrap().unwrap().turns.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_upstream_times_out() {
        let provider = Arc::new(
            ScriptedProvider::default().stream(StreamScript::Hang(vec![delta("partial")])),
        );
        let store = Arc::new(InMemoryConversationStore::default());
        let config = RelayConfig {
            idle_timeout: Duration::from_secs(5),
            ..RelayConfig::default()
        };
        let relay = StreamRelay::new(provider, store.clone(), Arc::new(SystemClock), config);

        let (tx, rx) = mpsc::channel(16);
        let err = relay.stream(request("hi"), tx).await.unwrap_err();
        assert!(matches!(err, RelayError::IdleTimeout));

        let events = collect(rx).await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[2], RelayEvent::Error("upstream idle timeout".to_string()));
    }

    #[tokio::test]
    async fn complete_returns_short_reply_unchanged() {
        let provider = Arc::new(
            ScriptedProvider::default()
                .stream(StreamScript::Frames(vec![delta("short"), Frame::Done])),
        );
        let store = Arc::new(InMemoryConversationStore::default());
        let relay = relay(provider.clone(), store.clone());

        let reply = relay.complete(request("hi")).await.unwrap();
        assert_eq!(reply.text, "short");
        assert!(!reply.summarized);
        assert!(store.is_empty());
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn complete_summarizes_long_reply() {
        let long = "x".repeat(2500);
        let provider = Arc::new(
            ScriptedProvider::default()
                .stream(StreamScript::Frames(vec![delta(&long), Frame::Done]))
                .chat(Ok("the gist".to_string())),
        );
        let relay = relay(provider.clone(), Arc::new(InMemoryConversationStore::default()));

        let reply = relay.complete(request("hi")).await.unwrap();
        assert_eq!(reply.text, "the gist");
        assert_eq!(reply.full_text, long);
        assert!(reply.summarized);

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages[0].role, Role::System);
        assert!(requests[1].messages[0].content.as_text().contains("2000"));
    }

    #[tokio::test]
    async fn failed_summary_keeps_original() {
        let long = "y".repeat(2001);
        let provider = Arc::new(
            ScriptedProvider::default()
                .stream(StreamScript::Frames(vec![delta(&long), Frame::Done]))
                .chat(Err((500, "boom".to_string()))),
        );
        let relay = relay(provider, Arc::new(InMemoryConversationStore::default()));

        let reply = relay.complete(request("hi")).await.unwrap();
        assert_eq!(reply.text, long);
        assert!(!reply.summarized);
    }

    #[tokio::test]
    async fn empty_summary_keeps_original() {
        let long = "z".repeat(2001);
        let provider = Arc::new(
            ScriptedProvider::default()
                .stream(StreamScript::Frames(vec![delta(&long), Frame::Done]))
                .chat(Ok("   ".to_string())),
        );
        let relay = relay(provider, Arc::new(InMemoryConversationStore::default()));

        let reply = relay.complete(request("hi")).await.unwrap();
        assert_eq!(reply.text, long);
        assert!(!reply.summarized);
    }

    #[tokio::test]
    async fn system_prompt_and_history_precede_new_message() {
        let provider = Arc::new(
            ScriptedProvider::default().stream(StreamScript::Frames(vec![delta("ok"), Frame::Done])),
        );
        let config = RelayConfig {
            system_prompt: Some("be brief".to_string()),
            ..RelayConfig::default()
        };
        let relay = StreamRelay::new(
            provider.clone(),
            Arc::new(InMemoryConversationStore::default()),
            Arc::new(SystemClock),
            config,
        );

        let mut req = request("now");
        req.prior_messages = vec![
            Message::text(Role::User, "before"),
            Message::text(Role::Assistant, "reply"),
        ];
        relay.complete(req).await.unwrap();

        let sent = &provider.requests()[0];
        let texts: Vec<_> = sent.messages.iter().map(|m| m.content.as_text()).collect();
        assert_eq!(texts, vec!["be brief", "before", "reply", "now"]);
        assert_eq!(sent.model, "m");
    }
}
