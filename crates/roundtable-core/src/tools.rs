use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::ids::{ParticipantId, SessionId, ToolCallId};

/// A tool call requested by a model mid-generation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: ToolCallId,
    pub name: String,
    pub arguments: serde_json::Value,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: ToolCallId::new(),
            name: name.into(),
            arguments,
        }
    }
}

/// The outcome of one tool invocation. Success and failure share the shape;
/// `is_error` is the only discriminator so downstream handling stays uniform.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InvocationResult {
    pub invocation_id: ToolCallId,
    pub content: String,
    pub is_error: bool,
}

impl InvocationResult {
    pub fn ok(invocation_id: ToolCallId, content: impl Into<String>) -> Self {
        Self {
            invocation_id,
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(invocation_id: ToolCallId, content: impl Into<String>) -> Self {
        Self {
            invocation_id,
            content: content.into(),
            is_error: true,
        }
    }
}

/// How much ceremony a tool call needs before it may run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    /// Read-only, auto-approved.
    Safe,
    /// Asked once per session, grant cached per tool.
    Cautious,
    /// Asked on every call.
    Dangerous,
    /// Never executed.
    Blocked,
}

impl PermissionLevel {
    pub fn requires_confirmation(&self) -> bool {
        matches!(self, Self::Cautious | Self::Dangerous)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Cautious => "cautious",
            Self::Dangerous => "dangerous",
            Self::Blocked => "blocked",
        }
    }
}

impl std::fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "safe" => Ok(Self::Safe),
            "cautious" => Ok(Self::Cautious),
            "dangerous" => Ok(Self::Dangerous),
            "blocked" => Ok(Self::Blocked),
            other => Err(format!("unknown permission level: {other}")),
        }
    }
}

/// Tool description given to models and to the permission layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
    pub permission_level: PermissionLevel,
}

/// Context available to tools during execution.
pub struct ToolContext {
    pub session_id: SessionId,
    pub participant: ParticipantId,
    pub working_directory: PathBuf,
    pub abort_signal: CancellationToken,
}

/// Result returned by a tool handler.
#[derive(Clone, Debug)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }
}

/// Trait implemented by each tool in the registry.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;

    fn permission_level(&self) -> PermissionLevel {
        PermissionLevel::Safe
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError>;

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters_schema: self.parameters_schema(),
            permission_level: self.permission_level(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_level_serde() {
        let json = serde_json::to_string(&PermissionLevel::Cautious).unwrap();
        assert_eq!(json, r#""cautious""#);
        let parsed: PermissionLevel = serde_json::from_str(r#""blocked""#).unwrap();
        assert_eq!(parsed, PermissionLevel::Blocked);
    }

    #[test]
    fn permission_level_ordering() {
        assert!(PermissionLevel::Safe < PermissionLevel::Cautious);
        assert!(PermissionLevel::Cautious < PermissionLevel::Dangerous);
        assert!(PermissionLevel::Dangerous < PermissionLevel::Blocked);
    }

    #[test]
    fn confirmation_required_for_middle_levels() {
        assert!(!PermissionLevel::Safe.requires_confirmation());
        assert!(PermissionLevel::Cautious.requires_confirmation());
        assert!(PermissionLevel::Dangerous.requires_confirmation());
        assert!(!PermissionLevel::Blocked.requires_confirmation());
    }

    #[test]
    fn permission_level_from_str_roundtrip() {
        for level in [
            PermissionLevel::Safe,
            PermissionLevel::Cautious,
            PermissionLevel::Dangerous,
            PermissionLevel::Blocked,
        ] {
            let parsed: PermissionLevel = level.as_str().parse().unwrap();
            assert_eq!(parsed, level);
        }
        assert!("nope".parse::<PermissionLevel>().is_err());
    }

    #[test]
    fn invocation_result_constructors() {
        let id = ToolCallId::new();
        let ok = InvocationResult::ok(id.clone(), "done");
        assert!(!ok.is_error);
        let err = InvocationResult::error(id, "boom");
        assert!(err.is_error);
    }

    #[test]
    fn tool_error_display() {
        let err = ToolError::InvalidArguments("missing path".into());
        assert_eq!(err.to_string(), "invalid arguments: missing path");
        let err = ToolError::Timeout(Duration::from_secs(30));
        assert!(err.to_string().contains("30"));
    }
}
