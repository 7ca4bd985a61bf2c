//! Scripted model client for deterministic tests without API calls.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;

use crate::client::{
    ChunkStream, FinishReason, GenerateRequest, ModelClient, ModelResponse, StreamChunk,
};
use crate::errors::GatewayError;
use crate::ids::ParticipantId;
use crate::tools::ToolInvocation;
use crate::usage::Usage;

/// Pre-programmed replies, consumed in order across `generate` and
/// `generate_stream` calls alike.
pub enum MockReply {
    /// Plain text completion.
    Text(String),
    /// Completion that requests tool calls (optionally with leading text).
    ToolUse {
        text: String,
        calls: Vec<ToolInvocation>,
    },
    /// A well-formed should-speak decision payload.
    Decision {
        should_speak: bool,
        confidence: f64,
        reason: String,
    },
    /// Fail the call.
    Error(GatewayError),
    /// Wait, then resolve to the inner reply.
    Delay(Duration, Box<MockReply>),
}

impl MockReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn tool_use(calls: Vec<ToolInvocation>) -> Self {
        Self::ToolUse {
            text: String::new(),
            calls,
        }
    }

    pub fn decision(should_speak: bool, confidence: f64, reason: impl Into<String>) -> Self {
        Self::Decision {
            should_speak,
            confidence,
            reason: reason.into(),
        }
    }

    pub fn delayed(delay: Duration, inner: MockReply) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock participant backend that serves scripted replies in sequence.
pub struct MockClient {
    id: ParticipantId,
    display_name: String,
    available: bool,
    replies: Mutex<VecDeque<MockReply>>,
    call_count: AtomicUsize,
}

impl MockClient {
    pub fn new(id: impl AsRef<str>) -> Self {
        let id = ParticipantId::new(id);
        let display_name = {
            let mut chars = id.as_str().chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        };
        Self {
            id,
            display_name,
            available: true,
            replies: Mutex::new(VecDeque::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn with_replies(self, replies: Vec<MockReply>) -> Self {
        *self.replies.lock().unwrap() = replies.into();
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn push_reply(&self, reply: MockReply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Pop the next reply, sleeping through any Delay wrappers.
    async fn next_reply(&self) -> Result<MockReply, GatewayError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        let mut reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| GatewayError::InvalidRequest("mock: replies exhausted".into()))?;
        loop {
            match reply {
                MockReply::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
                other => return Ok(other),
            }
        }
    }

    fn mock_usage(&self, completion: &str) -> Usage {
        Usage::new(16, self.count_tokens(completion) as u32)
    }
}

#[async_trait]
impl ModelClient for MockClient {
    fn participant_id(&self) -> &ParticipantId {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn count_tokens(&self, text: &str) -> usize {
        text.len().div_ceil(4)
    }

    async fn generate(&self, _request: GenerateRequest) -> Result<ModelResponse, GatewayError> {
        match self.next_reply().await? {
            MockReply::Text(text) => Ok(ModelResponse {
                participant: self.id.clone(),
                usage: Some(self.mock_usage(&text)),
                content: text,
                finish_reason: FinishReason::Stop,
                tool_calls: vec![],
            }),
            MockReply::ToolUse { text, calls } => Ok(ModelResponse {
                participant: self.id.clone(),
                usage: Some(self.mock_usage(&text)),
                content: text,
                finish_reason: FinishReason::ToolUse,
                tool_calls: calls,
            }),
            MockReply::Decision {
                should_speak,
                confidence,
                reason,
            } => {
                let content = serde_json::json!({
                    "should_speak": should_speak,
                    "confidence": confidence,
                    "reason": reason,
                })
                .to_string();
                Ok(ModelResponse {
                    participant: self.id.clone(),
                    usage: Some(self.mock_usage(&content)),
                    content,
                    finish_reason: FinishReason::Stop,
                    tool_calls: vec![],
                })
            }
            MockReply::Error(err) => Err(err),
            MockReply::Delay(..) => unreachable!("delays are unwrapped by next_reply"),
        }
    }

    async fn generate_stream(
        &self,
        _request: GenerateRequest,
    ) -> Result<ChunkStream, GatewayError> {
        let reply = self.next_reply().await?;
        let chunks = match reply {
            MockReply::Text(text) => {
                let usage = self.mock_usage(&text);
                let mut chunks = Vec::new();
                if !text.is_empty() {
                    chunks.push(StreamChunk::text(text));
                }
                chunks.push(StreamChunk::finished(FinishReason::Stop, Some(usage)));
                chunks
            }
            MockReply::ToolUse { text, calls } => {
                let usage = self.mock_usage(&text);
                let mut chunks = Vec::new();
                if !text.is_empty() {
                    chunks.push(StreamChunk::text(text));
                }
                for call in calls {
                    chunks.push(StreamChunk::tool_call(call));
                }
                chunks.push(StreamChunk::finished(FinishReason::ToolUse, Some(usage)));
                chunks
            }
            MockReply::Decision {
                should_speak,
                confidence,
                reason,
            } => {
                let content = serde_json::json!({
                    "should_speak": should_speak,
                    "confidence": confidence,
                    "reason": reason,
                })
                .to_string();
                let usage = self.mock_usage(&content);
                vec![
                    StreamChunk::text(content),
                    StreamChunk::finished(FinishReason::Stop, Some(usage)),
                ]
            }
            MockReply::Error(err) => return Err(err),
            MockReply::Delay(..) => unreachable!("delays are unwrapped by next_reply"),
        };
        Ok(Box::pin(stream::iter(chunks)))
    }
}
