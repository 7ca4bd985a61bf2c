use serde::{Deserialize, Serialize};

use crate::ids::ParticipantId;

/// A configured group-chat member backed by a model client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub color: String,
    pub enabled: bool,
    /// Context-window budget for this participant, in its own tokens.
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Participant {
    pub fn new(id: impl AsRef<str>, display_name: impl Into<String>) -> Self {
        Self {
            id: ParticipantId::new(id),
            display_name: display_name.into(),
            color: "white".into(),
            enabled: true,
            max_tokens: 100_000,
            temperature: 0.7,
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}
