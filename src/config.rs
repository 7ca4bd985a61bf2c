//! Configuration shape the orchestration core consumes. Loading (files, env,
//! CLI) is the embedding application's concern; this module only defines the
//! serde-deserializable structure and its defaults.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use roundtable_core::participant::Participant;
use roundtable_core::tools::PermissionLevel;
use roundtable_engine::turns::TurnStrategy;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundtableConfig {
    pub participants: Vec<ParticipantConfig>,
    pub conversation: ConversationConfig,
    pub summarization: SummarizationConfig,
    /// Per-tool permission level overrides.
    pub tool_permissions: HashMap<String, PermissionLevel>,
}

impl Default for RoundtableConfig {
    fn default() -> Self {
        Self {
            participants: default_participants(),
            conversation: ConversationConfig::default(),
            summarization: SummarizationConfig::default(),
            tool_permissions: HashMap::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantConfig {
    pub id: String,
    pub display_name: String,
    pub color: String,
    pub enabled: bool,
    /// Provider-side model identifier, passed through to the model client.
    pub model_id: Option<String>,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            display_name: String::new(),
            color: "white".into(),
            enabled: true,
            model_id: None,
            max_tokens: 100_000,
            temperature: 0.7,
        }
    }
}

impl ParticipantConfig {
    pub fn to_participant(&self) -> Participant {
        let mut p = Participant::new(&self.id, self.display_name.clone())
            .with_color(self.color.clone())
            .with_max_tokens(self.max_tokens);
        p.temperature = self.temperature;
        p.enabled = self.enabled;
        p
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub first_responder: TurnStrategy,
    /// Base order for `rotate` and `fixed` strategies.
    pub fixed_order: Vec<String>,
    pub silence_threshold: f64,
    pub max_context_tokens: u32,
    pub evaluation_deadline_secs: u64,
    pub tool_deadline_secs: u64,
    pub max_tool_iterations: u32,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            first_responder: TurnStrategy::Rotate,
            fixed_order: Vec::new(),
            silence_threshold: 0.3,
            max_context_tokens: 100_000,
            evaluation_deadline_secs: 5,
            tool_deadline_secs: 30,
            max_tool_iterations: 10,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizationConfig {
    pub enabled: bool,
    pub token_threshold: u32,
    pub summary_target_tokens: u32,
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token_threshold: 50_000,
            summary_target_tokens: 1_000,
        }
    }
}

fn default_participants() -> Vec<ParticipantConfig> {
    [
        ("claude", "Claude", "orange"),
        ("gpt", "GPT", "green"),
        ("gemini", "Gemini", "blue"),
        ("grok", "Grok", "magenta"),
    ]
    .into_iter()
    .map(|(id, name, color)| ParticipantConfig {
        id: id.into(),
        display_name: name.into(),
        color: color.into(),
        ..Default::default()
    })
    .collect()
}
