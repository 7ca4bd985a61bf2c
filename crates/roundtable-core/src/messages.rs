use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, ParticipantId, SessionId};
use crate::tools::{InvocationResult, ToolInvocation};
use crate::usage::Usage;

/// Role of a message within a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            "tool" => Ok(Self::Tool),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// One record in a session's append-only message log.
///
/// `pinned` is the only attribute that may change after creation, and only
/// through the store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub session_id: SessionId,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<ParticipantId>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<InvocationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub pinned: bool,
    pub created_at: String,
}

impl Message {
    fn base(session_id: SessionId, role: Role, content: String) -> Self {
        Self {
            id: MessageId::new(),
            session_id,
            role,
            author: None,
            content,
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            usage: None,
            pinned: false,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn user(session_id: SessionId, content: impl Into<String>) -> Self {
        Self::base(session_id, Role::User, content.into())
    }

    pub fn assistant(
        session_id: SessionId,
        author: ParticipantId,
        content: impl Into<String>,
    ) -> Self {
        let mut msg = Self::base(session_id, Role::Assistant, content.into());
        msg.author = Some(author);
        msg
    }

    pub fn system(session_id: SessionId, content: impl Into<String>) -> Self {
        Self::base(session_id, Role::System, content.into())
    }

    /// A `tool` role message carrying the results of one loop iteration.
    /// The content is a rendered view; the structured results ride alongside.
    pub fn tool_results(
        session_id: SessionId,
        author: ParticipantId,
        results: Vec<InvocationResult>,
    ) -> Self {
        let content = results
            .iter()
            .map(|r| format!("[{}]: {}", r.invocation_id, r.content))
            .collect::<Vec<_>>()
            .join("\n\n");
        let mut msg = Self::base(session_id, Role::Tool, content);
        msg.author = Some(author);
        msg.tool_results = results;
        msg
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolInvocation>) -> Self {
        self.tool_calls = calls;
        self
    }

    pub fn with_usage(mut self, usage: Option<Usage>) -> Self {
        self.usage = usage;
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}
