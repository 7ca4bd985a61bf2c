//! Parallel speaker election.
//!
//! Each enabled participant is asked, concurrently and under a hard deadline,
//! whether it wants to contribute. Failures never fail the turn: they become
//! silent decisions, and an empty speaking set is a valid outcome.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{instrument, warn};

use roundtable_core::client::{GenerateRequest, ModelClient};
use roundtable_core::decision::SpeakerDecision;
use roundtable_core::ids::{ParticipantId, SessionId};
use roundtable_core::messages::Message;

use crate::prompts;

const EVALUATION_MAX_TOKENS: u32 = 150;
const EVALUATION_TEMPERATURE: f64 = 0.3;

#[derive(Clone, Debug)]
pub struct EvaluatorConfig {
    /// Non-forced decisions below this confidence are coerced to silence.
    pub silence_threshold: f64,
    /// Hard deadline per evaluation task.
    pub deadline: Duration,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            silence_threshold: 0.3,
            deadline: Duration::from_secs(5),
        }
    }
}

/// A per-participant evaluation failure, surfaced to the UI as an error event.
#[derive(Clone, Debug)]
pub struct EvaluationFailure {
    pub participant: ParticipantId,
    pub kind: String,
    pub message: String,
}

/// The election outcome: exactly one decision per enabled participant, plus
/// the failures behind any errored decisions.
#[derive(Clone, Debug, Default)]
pub struct Election {
    pub decisions: Vec<SpeakerDecision>,
    pub failures: Vec<EvaluationFailure>,
}

pub struct SpeakerEvaluator {
    clients: HashMap<ParticipantId, Arc<dyn ModelClient>>,
    config: EvaluatorConfig,
}

impl SpeakerEvaluator {
    pub fn new(
        clients: HashMap<ParticipantId, Arc<dyn ModelClient>>,
        config: EvaluatorConfig,
    ) -> Self {
        Self { clients, config }
    }

    /// Participants that will receive an evaluation task this turn (enabled,
    /// available, and not already forced by mention).
    pub fn evaluation_targets(&self, forced: &HashSet<ParticipantId>) -> Vec<ParticipantId> {
        let mut targets: Vec<ParticipantId> = self
            .clients
            .iter()
            .filter(|(id, client)| !forced.contains(*id) && client.is_available())
            .map(|(id, _)| id.clone())
            .collect();
        targets.sort();
        targets
    }

    /// Fan out one evaluation task per participant and gather the decisions.
    #[instrument(skip_all, fields(session_id = %session_id, participants = self.clients.len()))]
    pub async fn evaluate_all(
        &self,
        session_id: &SessionId,
        history: &[Message],
        user_message: &str,
        prior_responses: &[(ParticipantId, String)],
        forced: &HashSet<ParticipantId>,
    ) -> Election {
        let mut election = Election::default();
        let mut tasks = Vec::new();

        let rendered_history = prompts::render_history(history);
        let prior_named: Vec<(String, String)> = prior_responses
            .iter()
            .map(|(id, text)| (self.display_name(id), text.clone()))
            .collect();

        for (id, client) in &self.clients {
            if forced.contains(id) {
                election.decisions.push(SpeakerDecision::forced(id.clone()));
                continue;
            }
            if !client.is_available() {
                election
                    .decisions
                    .push(SpeakerDecision::errored(id.clone(), "unavailable"));
                continue;
            }

            let other_names: Vec<String> = self
                .clients
                .keys()
                .filter(|other| *other != id)
                .map(|other| self.display_name(other))
                .collect();
            let prompt = prompts::should_speak_prompt(
                client.display_name(),
                &other_names,
                &rendered_history,
                user_message,
                &prior_named,
            );
            let request = GenerateRequest::new(vec![Message::user(session_id.clone(), prompt)])
                .with_max_tokens(EVALUATION_MAX_TOKENS)
                .with_temperature(EVALUATION_TEMPERATURE);

            let id = id.clone();
            let client = Arc::clone(client);
            let deadline = self.config.deadline;
            tasks.push(tokio::spawn(async move {
                match tokio::time::timeout(deadline, client.generate(request)).await {
                    Ok(Ok(response)) => (id, Ok(response.content)),
                    Ok(Err(err)) => (id, Err(("error", err.to_string()))),
                    Err(_) => (id, Err(("timeout", format!("no decision within {deadline:?}")))),
                }
            }));
        }

        for joined in join_all(tasks).await {
            let (id, outcome) = match joined {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(error = %err, "evaluation task failed to join");
                    continue;
                }
            };
            match outcome {
                Ok(content) => {
                    let decision = self.apply_threshold(parse_decision(id, &content));
                    election.decisions.push(decision);
                }
                Err((kind, message)) => {
                    warn!(participant = %id, kind, message = %message, "evaluation failed");
                    election.failures.push(EvaluationFailure {
                        participant: id.clone(),
                        kind: kind.to_string(),
                        message,
                    });
                    election.decisions.push(SpeakerDecision::errored(id, kind));
                }
            }
        }

        sort_decisions(&mut election.decisions);
        election
    }

    fn apply_threshold(&self, decision: SpeakerDecision) -> SpeakerDecision {
        if !decision.forced
            && decision.should_speak
            && decision.confidence < self.config.silence_threshold
        {
            let reason = format!(
                "below threshold ({:.2} < {})",
                decision.confidence, self.config.silence_threshold
            );
            return SpeakerDecision::silent(decision.participant, decision.confidence, reason);
        }
        decision
    }

    fn display_name(&self, id: &ParticipantId) -> String {
        self.clients
            .get(id)
            .map(|c| c.display_name().to_string())
            .unwrap_or_else(|| id.to_string())
    }
}

/// Forced first, then confidence descending, ties broken by participant id.
pub fn sort_decisions(decisions: &mut [SpeakerDecision]) {
    decisions.sort_by(|a, b| {
        b.forced
            .cmp(&a.forced)
            .then(
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then_with(|| a.participant.cmp(&b.participant))
    });
}

/// Parse a should-speak payload leniently. Unrecoverable payloads default to
/// speaking at 0.5 — silence on a parse failure would lose information.
fn parse_decision(participant: ParticipantId, content: &str) -> SpeakerDecision {
    let Some(value) = extract_json(content) else {
        warn!(participant = %participant, "unparseable decision payload, defaulting to speak");
        return SpeakerDecision::speak(participant, 0.5, "parse-fallback");
    };

    let should_speak = value
        .get("should_speak")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(true);
    let confidence = value
        .get("confidence")
        .and_then(serde_json::Value::as_f64)
        .unwrap_or(0.5);
    let reason = value
        .get("reason")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("no reason provided")
        .to_string();

    if should_speak {
        SpeakerDecision::speak(participant, confidence, reason)
    } else {
        SpeakerDecision::silent(participant, confidence, reason)
    }
}

/// Extract a JSON object from model output that may wrap it in markdown
/// fences, prose, or sloppy quoting.
fn extract_json(content: &str) -> Option<serde_json::Value> {
    let trimmed = content.trim();

    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    // Markdown code fence
    if let Some(start) = trimmed.find("```") {
        let inner = &trimmed[start + 3..];
        let inner = inner.strip_prefix("json").unwrap_or(inner);
        if let Some(end) = inner.find("```") {
            if let Ok(value) = serde_json::from_str(inner[..end].trim()) {
                return Some(value);
            }
        }
    }

    // First balanced object mentioning should_speak
    if let Some(value) = balanced_object(trimmed) {
        return Some(value);
    }

    // Common repairs: single quotes, Python booleans
    let repaired = trimmed
        .replace('\'', "\"")
        .replace("True", "true")
        .replace("False", "false");
    if let Some(value) = balanced_object(&repaired) {
        return Some(value);
    }
    serde_json::from_str(&repaired).ok()
}

fn balanced_object(text: &str) -> Option<serde_json::Value> {
    let bytes = text.as_bytes();
    for (start, &b) in bytes.iter().enumerate() {
        if b != b'{' {
            continue;
        }
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        for (offset, &c) in bytes[start..].iter().enumerate() {
            if escaped {
                escaped = false;
                continue;
            }
            match c {
                b'\\' if in_string => escaped = true,
                b'"' => in_string = !in_string,
                b'{' if !in_string => depth += 1,
                b'}' if !in_string => {
                    depth -= 1;
                    if depth == 0 {
                        let candidate = &text[start..=start + offset];
                        if candidate.contains("should_speak") {
                            if let Ok(value) = serde_json::from_str(candidate) {
                                return Some(value);
                            }
                        }
                        break;
                    }
                }
                _ => {}
            }
        }
    }
    None
}
