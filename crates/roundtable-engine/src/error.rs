use roundtable_core::errors::GatewayError;
use roundtable_core::tools::ToolError;
use roundtable_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("unknown participant: {0}")]
    UnknownParticipant(String),

    #[error("turn aborted")]
    Aborted,

    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    /// True when the failure is scoped to one speaker and the turn goes on.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Gateway(_) | Self::Tool(_) | Self::UnknownParticipant(_) => true,
            Self::Store(_) | Self::Aborted | Self::Internal(_) => false,
        }
    }

    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Gateway(e) => e.error_kind(),
            Self::Store(_) => "store",
            Self::Tool(_) => "tool",
            Self::UnknownParticipant(_) => "unknown_participant",
            Self::Aborted => "aborted",
            Self::Internal(_) => "internal",
        }
    }
}
