//! Session-scoped permission management for tool execution.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use roundtable_core::ids::ParticipantId;
use roundtable_core::tools::{PermissionLevel, ToolInvocation};

/// What the manager decided about one tool call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermissionDecision {
    Approve,
    Deny,
    Ask,
}

/// A pending confirmation handed to the UI collaborator.
#[derive(Clone, Debug)]
pub struct PermissionRequest {
    pub participant: ParticipantId,
    pub invocation: ToolInvocation,
    pub level: PermissionLevel,
    pub description: String,
}

/// The UI collaborator's answer.
#[derive(Clone, Copy, Debug)]
pub struct PermissionReply {
    pub allow: bool,
    pub remember_for_session: bool,
}

/// Callback channel the UI implements to resolve permission requests.
#[async_trait]
pub trait PermissionPrompt: Send + Sync {
    async fn request(&self, request: PermissionRequest) -> PermissionReply;
}

/// Per-session permission state: level overrides and cached grants.
pub struct PermissionManager {
    overrides: HashMap<String, PermissionLevel>,
    grants: Mutex<HashSet<String>>,
    auto_approve: bool,
}

impl PermissionManager {
    pub fn new(overrides: HashMap<String, PermissionLevel>) -> Self {
        Self {
            overrides,
            grants: Mutex::new(HashSet::new()),
            auto_approve: false,
        }
    }

    /// Approve everything except blocked tools. For tests and trusted runs.
    pub fn auto_approving(mut self) -> Self {
        self.auto_approve = true;
        self
    }

    /// The level that governs a tool: a configured override beats the
    /// descriptor's default.
    pub fn effective_level(&self, tool_name: &str, default: PermissionLevel) -> PermissionLevel {
        self.overrides.get(tool_name).copied().unwrap_or(default)
    }

    pub fn check(&self, tool_name: &str, level: PermissionLevel) -> PermissionDecision {
        match level {
            PermissionLevel::Blocked => PermissionDecision::Deny,
            _ if self.auto_approve => PermissionDecision::Approve,
            PermissionLevel::Safe => PermissionDecision::Approve,
            PermissionLevel::Cautious => {
                if self.has_grant(tool_name) {
                    PermissionDecision::Approve
                } else {
                    PermissionDecision::Ask
                }
            }
            // Dangerous tools are confirmed on every call; grants don't apply.
            PermissionLevel::Dangerous => PermissionDecision::Ask,
        }
    }

    pub fn record_grant(&self, tool_name: &str) {
        debug!(tool = tool_name, "session permission granted");
        self.grants.lock().insert(tool_name.to_string());
    }

    pub fn has_grant(&self, tool_name: &str) -> bool {
        self.grants.lock().contains(tool_name)
    }

    pub fn clear_grants(&self) {
        self.grants.lock().clear();
    }
}

impl Default for PermissionManager {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}
