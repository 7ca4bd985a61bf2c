//! Per-participant context assembly.
//!
//! Builds a token-bounded, priority-ordered message window: system prompt,
//! then the active summary, then pinned messages, then recent history filled
//! newest-backwards. Messages are atomic; the same inputs always produce the
//! same window.

use std::collections::HashSet;

use tracing::{debug, warn};

use roundtable_core::client::ModelClient;
use roundtable_core::ids::{MessageId, SessionId};
use roundtable_core::messages::Message;
use roundtable_core::participant::Participant;

use crate::prompts;

const DEFAULT_RESPONSE_RESERVE: u32 = 4096;

#[derive(Clone, Debug, PartialEq)]
pub enum ContextWarning {
    /// A pinned message no longer fit the remaining budget.
    BudgetExceeded { message_id: MessageId },
}

#[derive(Debug)]
pub struct AssembledContext {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub warnings: Vec<ContextWarning>,
    /// Tokens consumed, by the participant's own counter.
    pub token_total: usize,
}

pub struct ContextAssembler {
    response_reserve: u32,
}

impl ContextAssembler {
    pub fn new() -> Self {
        Self {
            response_reserve: DEFAULT_RESPONSE_RESERVE,
        }
    }

    pub fn with_response_reserve(mut self, reserve: u32) -> Self {
        self.response_reserve = reserve;
        self
    }

    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        &self,
        session_id: &SessionId,
        participant: &Participant,
        client: &dyn ModelClient,
        history: &[Message],
        extra_pinned: &HashSet<MessageId>,
        summary: Option<&str>,
        other_names: &[String],
        additional_context: Option<&str>,
    ) -> AssembledContext {
        let budget = participant.max_tokens.saturating_sub(self.response_reserve) as usize;
        let mut warnings = Vec::new();

        // 1. System prompt always occupies slot zero.
        let system_prompt =
            prompts::system_prompt(&participant.display_name, other_names, additional_context);
        let mut used = client.count_tokens(&system_prompt);

        // 2. Active summary rides as a synthetic system-role message.
        let mut messages = Vec::new();
        if let Some(text) = summary {
            let summary_msg = Message::system(
                session_id.clone(),
                format!("[Conversation summary]\n{text}"),
            );
            used += estimate_message_tokens(client, &summary_msg);
            messages.push(summary_msg);
        }

        let is_pinned =
            |msg: &Message| msg.pinned || extra_pinned.contains(&msg.id);

        // 3. Pins in chronological order. The first pin that no longer fits
        //    aborts inclusion of the later ones (older intent wins).
        let mut included: Vec<usize> = Vec::new();
        for (idx, msg) in history.iter().enumerate() {
            if !is_pinned(msg) {
                continue;
            }
            let cost = estimate_message_tokens(client, msg);
            if used + cost <= budget {
                included.push(idx);
                used += cost;
            } else {
                warn!(message_id = %msg.id, "pinned message exceeds context budget");
                warnings.push(ContextWarning::BudgetExceeded {
                    message_id: msg.id.clone(),
                });
                break;
            }
        }

        // 4. Fill from the most recent unpinned message backwards.
        for (idx, msg) in history.iter().enumerate().rev() {
            if is_pinned(msg) {
                continue;
            }
            let cost = estimate_message_tokens(client, msg);
            if used + cost <= budget {
                included.push(idx);
                used += cost;
            } else {
                break;
            }
        }

        // 5. Emit in chronological order regardless of inclusion order.
        included.sort_unstable();
        messages.extend(included.into_iter().map(|idx| history[idx].clone()));

        debug!(
            participant = %participant.id,
            messages = messages.len(),
            tokens = used,
            budget,
            "context assembled"
        );

        AssembledContext {
            system_prompt,
            messages,
            warnings,
            token_total: used,
        }
    }
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Message cost by the participant's counter, with role/author overhead and
/// tool-call payloads included.
pub fn estimate_message_tokens(client: &dyn ModelClient, msg: &Message) -> usize {
    let mut tokens = client.count_tokens(&msg.content) + 4;
    if let Some(author) = &msg.author {
        tokens += client.count_tokens(author.as_str()) + 2;
    }
    for call in &msg.tool_calls {
        tokens += client.count_tokens(&call.name) + 10;
        tokens += client.count_tokens(&call.arguments.to_string());
    }
    for result in &msg.tool_results {
        tokens += client.count_tokens(&result.content) + 10;
    }
    tokens
}
