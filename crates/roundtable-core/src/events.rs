use serde::{Deserialize, Serialize};

use crate::client::ModelResponse;
use crate::ids::{ParticipantId, ToolCallId};
use crate::tools::{InvocationResult, PermissionLevel, ToolInvocation};

/// Events emitted by the turn executor, consumed by the UI collaborator as a
/// single totally-ordered stream per turn.
///
/// Ordering contract: events for distinct participants may interleave only
/// during evaluation and announcement. From `ResponseStart { p }` until the
/// matching `ResponseComplete { p }` (or a terminal `Error { p }`), no event
/// for any other participant appears.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Evaluation phase started.
    Thinking,

    /// One evaluation task was scheduled for this participant.
    Evaluating { participant: ParticipantId },

    WillSpeak {
        participant: ParticipantId,
        confidence: f64,
        reason: String,
    },

    WillStaySilent {
        participant: ParticipantId,
        reason: String,
    },

    ResponseStart { participant: ParticipantId },

    /// Non-empty incremental text.
    ResponseChunk {
        participant: ParticipantId,
        text: String,
    },

    ResponseComplete {
        participant: ParticipantId,
        response: ModelResponse,
    },

    ToolCall {
        participant: ParticipantId,
        invocation: ToolInvocation,
    },

    ToolExecuting {
        participant: ParticipantId,
        invocation_id: ToolCallId,
    },

    /// Blocks the turn until the UI collaborator resolves it.
    ToolPermissionRequest {
        participant: ParticipantId,
        invocation: ToolInvocation,
        level: PermissionLevel,
    },

    ToolResult {
        participant: ParticipantId,
        result: InvocationResult,
    },

    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        participant: Option<ParticipantId>,
        kind: String,
        message: String,
        recoverable: bool,
    },

    TurnComplete,
}

impl TurnEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Thinking => "thinking",
            Self::Evaluating { .. } => "evaluating",
            Self::WillSpeak { .. } => "will_speak",
            Self::WillStaySilent { .. } => "will_stay_silent",
            Self::ResponseStart { .. } => "response_start",
            Self::ResponseChunk { .. } => "response_chunk",
            Self::ResponseComplete { .. } => "response_complete",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolExecuting { .. } => "tool_executing",
            Self::ToolPermissionRequest { .. } => "tool_permission_request",
            Self::ToolResult { .. } => "tool_result",
            Self::Error { .. } => "error",
            Self::TurnComplete => "turn_complete",
        }
    }

    pub fn participant(&self) -> Option<&ParticipantId> {
        match self {
            Self::Thinking | Self::TurnComplete => None,
            Self::Evaluating { participant }
            | Self::WillSpeak { participant, .. }
            | Self::WillStaySilent { participant, .. }
            | Self::ResponseStart { participant }
            | Self::ResponseChunk { participant, .. }
            | Self::ResponseComplete { participant, .. }
            | Self::ToolCall { participant, .. }
            | Self::ToolExecuting { participant, .. }
            | Self::ToolPermissionRequest { participant, .. }
            | Self::ToolResult { participant, .. } => Some(participant),
            Self::Error { participant, .. } => participant.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FinishReason;

    #[test]
    fn event_type_strings() {
        assert_eq!(TurnEvent::Thinking.event_type(), "thinking");
        assert_eq!(TurnEvent::TurnComplete.event_type(), "turn_complete");
        let evt = TurnEvent::ResponseStart {
            participant: ParticipantId::new("claude"),
        };
        assert_eq!(evt.event_type(), "response_start");
    }

    #[test]
    fn participant_accessor() {
        assert!(TurnEvent::Thinking.participant().is_none());
        let p = ParticipantId::new("gpt");
        let evt = TurnEvent::ResponseChunk {
            participant: p.clone(),
            text: "hi".into(),
        };
        assert_eq!(evt.participant(), Some(&p));

        let evt = TurnEvent::Error {
            participant: None,
            kind: "store".into(),
            message: "disk full".into(),
            recoverable: false,
        };
        assert!(evt.participant().is_none());
    }

    #[test]
    fn serde_tagged_roundtrip() {
        let events = vec![
            TurnEvent::Thinking,
            TurnEvent::WillSpeak {
                participant: ParticipantId::new("claude"),
                confidence: 0.9,
                reason: "unique angle".into(),
            },
            TurnEvent::ResponseComplete {
                participant: ParticipantId::new("claude"),
                response: ModelResponse {
                    participant: ParticipantId::new("claude"),
                    content: "done".into(),
                    finish_reason: FinishReason::Stop,
                    tool_calls: vec![],
                    usage: None,
                },
            },
            TurnEvent::Error {
                participant: Some(ParticipantId::new("grok")),
                kind: "network_error".into(),
                message: "connection reset".into(),
                recoverable: true,
            },
            TurnEvent::TurnComplete,
        ];
        for evt in &events {
            let json = serde_json::to_string(evt).unwrap();
            let parsed: TurnEvent = serde_json::from_str(&json).unwrap();
            let json2 = serde_json::to_string(&parsed).unwrap();
            assert_eq!(json, json2, "roundtrip failed for {json}");
        }
    }

    #[test]
    fn tag_is_snake_case() {
        let json = serde_json::to_value(TurnEvent::ToolPermissionRequest {
            participant: ParticipantId::new("claude"),
            invocation: ToolInvocation::new("write_file", serde_json::json!({})),
            level: PermissionLevel::Cautious,
        })
        .unwrap();
        assert_eq!(json["type"], "tool_permission_request");
        assert_eq!(json["level"], "cautious");
    }
}
