use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;
use crate::ids::ParticipantId;
use crate::messages::Message;
use crate::tools::{ToolDescriptor, ToolInvocation};
use crate::usage::Usage;

/// Why the model stopped generating.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolUse,
    Length,
    Error,
}

/// The final, fully accumulated response from one speaker pass.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelResponse {
    pub participant: ParticipantId,
    pub content: String,
    pub finish_reason: FinishReason,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// One increment of a streamed response. The final chunk carries the finish
/// reason (and usage, when the provider reports it).
#[derive(Clone, Debug, Default)]
pub struct StreamChunk {
    pub text: Option<String>,
    pub tool_call: Option<ToolInvocation>,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<Usage>,
}

impl StreamChunk {
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            text: Some(delta.into()),
            ..Default::default()
        }
    }

    pub fn tool_call(invocation: ToolInvocation) -> Self {
        Self {
            tool_call: Some(invocation),
            ..Default::default()
        }
    }

    pub fn finished(reason: FinishReason, usage: Option<Usage>) -> Self {
        Self {
            finish_reason: Some(reason),
            usage,
            ..Default::default()
        }
    }

    pub fn is_final(&self) -> bool {
        self.finish_reason.is_some()
    }
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// Everything a client needs for one generation call. The client owns the
/// translation to its provider's wire format, plus retry and backoff.
#[derive(Clone, Debug)]
pub struct GenerateRequest {
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDescriptor>,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl GenerateRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            system: None,
            messages,
            tools: Vec::new(),
            max_tokens: 4096,
            temperature: 0.7,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Interface every participant's backend implements.
#[async_trait]
pub trait ModelClient: Send + Sync {
    fn participant_id(&self) -> &ParticipantId;
    fn display_name(&self) -> &str;

    fn is_available(&self) -> bool {
        true
    }

    /// Token counting with this participant's own tokenizer (or a stand-in).
    fn count_tokens(&self, text: &str) -> usize;

    async fn generate(&self, request: GenerateRequest) -> Result<ModelResponse, GatewayError>;

    async fn generate_stream(
        &self,
        request: GenerateRequest,
    ) -> Result<ChunkStream, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_constructors() {
        let c = StreamChunk::text("hi");
        assert_eq!(c.text.as_deref(), Some("hi"));
        assert!(!c.is_final());

        let c = StreamChunk::finished(FinishReason::Stop, Some(Usage::new(1, 2)));
        assert!(c.is_final());
        assert_eq!(c.finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn finish_reason_serde() {
        assert_eq!(
            serde_json::to_string(&FinishReason::ToolUse).unwrap(),
            r#""tool_use""#
        );
        assert_eq!(
            serde_json::to_string(&FinishReason::Stop).unwrap(),
            r#""stop""#
        );
    }

    #[test]
    fn request_builder() {
        let req = GenerateRequest::new(vec![])
            .with_system("be brief")
            .with_max_tokens(150)
            .with_temperature(0.3);
        assert_eq!(req.system.as_deref(), Some("be brief"));
        assert_eq!(req.max_tokens, 150);
        assert_eq!(req.temperature, 0.3);
    }
}
