//! The outer state machine of a turn.
//!
//! One executor drives one session. A turn flows: parse mentions → persist
//! the user message → elect speakers (parallel) → announce decisions → run
//! speakers serially (each with its own tool loop) → complete → summarize.
//! The event stream is a single totally-ordered bounded queue drained by the
//! UI collaborator.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use roundtable_core::client::ModelClient;
use roundtable_core::decision::SpeakerDecision;
use roundtable_core::events::TurnEvent;
use roundtable_core::ids::{ParticipantId, SessionId};
use roundtable_core::messages::Message;
use roundtable_core::participant::Participant;
use roundtable_core::tools::PermissionLevel;
use roundtable_store::messages::MessageRepo;
use roundtable_store::summaries::SummaryRepo;
use roundtable_store::{Database, StoreError};

use crate::context::ContextAssembler;
use crate::error::EngineError;
use crate::mentions;
use crate::permissions::{PermissionManager, PermissionPrompt};
use crate::registry::ToolRegistry;
use crate::speaking::{EvaluatorConfig, SpeakerEvaluator};
use crate::summarizer::{Summarizer, SummarizerConfig};
use crate::turns::{TurnManager, TurnStrategy};

#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    pub strategy: TurnStrategy,
    /// Base order for `rotate` and `fixed`; defaults to roster order.
    pub fixed_order: Vec<ParticipantId>,
    pub evaluator: EvaluatorConfig,
    /// Per-call deadline for tool execution.
    pub tool_deadline: Duration,
    /// Model-call ceiling per speaker per turn.
    pub max_tool_iterations: u32,
    /// Generation cap for speaker responses.
    pub response_max_tokens: u32,
    pub working_directory: PathBuf,
    pub tool_permission_overrides: HashMap<String, PermissionLevel>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            strategy: TurnStrategy::Rotate,
            fixed_order: Vec::new(),
            evaluator: EvaluatorConfig::default(),
            tool_deadline: Duration::from_secs(30),
            max_tool_iterations: 10,
            response_max_tokens: 4096,
            working_directory: PathBuf::from("."),
            tool_permission_overrides: HashMap::new(),
        }
    }
}

pub struct TurnExecutor {
    pub(crate) session_id: SessionId,
    pub(crate) roster: Vec<Participant>,
    pub(crate) clients: HashMap<ParticipantId, Arc<dyn ModelClient>>,
    pub(crate) assembler: ContextAssembler,
    pub(crate) registry: Arc<ToolRegistry>,
    pub(crate) permissions: PermissionManager,
    pub(crate) permission_prompt: Option<Arc<dyn PermissionPrompt>>,
    pub(crate) messages: MessageRepo,
    pub(crate) summaries: SummaryRepo,
    pub(crate) config: ExecutorConfig,
    summarizer: Option<Summarizer>,
    turn_manager: Mutex<TurnManager>,
    events: mpsc::Sender<TurnEvent>,
    turn_lock: tokio::sync::Mutex<()>,
    /// Participants disabled for the rest of the process (failed auth).
    disabled: Mutex<HashSet<ParticipantId>>,
}

impl TurnExecutor {
    pub fn new(
        session_id: SessionId,
        db: Database,
        roster: Vec<Participant>,
        clients: HashMap<ParticipantId, Arc<dyn ModelClient>>,
        registry: Arc<ToolRegistry>,
        config: ExecutorConfig,
        events: mpsc::Sender<TurnEvent>,
    ) -> Self {
        let roster: Vec<Participant> = roster.into_iter().filter(|p| p.enabled).collect();
        let clients: HashMap<ParticipantId, Arc<dyn ModelClient>> = clients
            .into_iter()
            .filter(|(id, _)| roster.iter().any(|p| &p.id == id))
            .collect();

        let fixed_order = if config.fixed_order.is_empty() {
            roster.iter().map(|p| p.id.clone()).collect()
        } else {
            config.fixed_order.clone()
        };
        let turn_manager = Mutex::new(TurnManager::new(config.strategy, fixed_order));
        let permissions = PermissionManager::new(config.tool_permission_overrides.clone());

        Self {
            session_id,
            roster,
            clients,
            assembler: ContextAssembler::new(),
            registry,
            permissions,
            permission_prompt: None,
            messages: MessageRepo::new(db.clone()),
            summaries: SummaryRepo::new(db),
            config,
            summarizer: None,
            turn_manager,
            events,
            turn_lock: tokio::sync::Mutex::new(()),
            disabled: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_permission_prompt(mut self, prompt: Arc<dyn PermissionPrompt>) -> Self {
        self.permission_prompt = Some(prompt);
        self
    }

    pub fn with_summarizer(
        mut self,
        client: Arc<dyn ModelClient>,
        db: Database,
        config: SummarizerConfig,
    ) -> Self {
        self.summarizer = Some(Summarizer::new(
            client,
            MessageRepo::new(db.clone()),
            SummaryRepo::new(db),
            config,
        ));
        self
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Process one user utterance. The entry point is serialized per session:
    /// at most one turn runs at a time.
    #[instrument(skip(self, user_text, cancel), fields(session_id = %self.session_id))]
    pub async fn process_turn(
        &self,
        user_text: &str,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let _turn = self.turn_lock.lock().await;

        let known: Vec<ParticipantId> = self.roster.iter().map(|p| p.id.clone()).collect();
        let parsed = mentions::parse_mentions(user_text, &known);
        let active = self.active_ids();
        let forced: HashSet<ParticipantId> = mentions::forced_speakers(&parsed, &active)
            .into_iter()
            .collect();

        let user_msg = Message::user(self.session_id.clone(), parsed.clean_text.clone());
        self.fatal(self.messages.append(&user_msg)).await?;

        self.send(TurnEvent::Thinking).await;

        let evaluator = self.election_evaluator();
        for participant in evaluator.evaluation_targets(&forced) {
            self.send(TurnEvent::Evaluating { participant }).await;
        }

        let history = self.fatal(self.messages.load_active(&self.session_id)).await?;
        let election = evaluator
            .evaluate_all(&self.session_id, &history, &parsed.clean_text, &[], &forced)
            .await;

        for failure in &election.failures {
            self.send(TurnEvent::Error {
                participant: Some(failure.participant.clone()),
                kind: failure.kind.clone(),
                message: failure.message.clone(),
                recoverable: true,
            })
            .await;
        }
        for decision in &election.decisions {
            self.announce(decision).await;
        }

        let order = self.turn_manager.lock().determine_order(&election.decisions);
        if order.is_empty() {
            info!("all participants stayed silent");
        }

        let mut prior: Vec<(ParticipantId, String)> = Vec::new();
        for speaker in order {
            if cancel.is_cancelled() {
                return Err(EngineError::Aborted);
            }
            match self.run_speaker(&speaker, &prior, cancel).await {
                Ok(response) => {
                    prior.push((speaker, response.content));
                }
                Err(err) if err.is_recoverable() => {
                    self.speaker_failed(&speaker, &err).await;
                }
                Err(err) => {
                    self.send(TurnEvent::Error {
                        participant: Some(speaker),
                        kind: err.error_kind().to_string(),
                        message: err.to_string(),
                        recoverable: false,
                    })
                    .await;
                    return Err(err);
                }
            }
        }

        self.send(TurnEvent::TurnComplete).await;

        if let Some(summarizer) = &self.summarizer {
            summarizer.check_and_summarize(&self.session_id).await;
        }
        Ok(())
    }

    /// Re-run a single speaker at the tail of the session, as if it had been
    /// in the prior turn's speaking set. Used after a recoverable failure.
    #[instrument(skip(self, cancel), fields(session_id = %self.session_id, participant = %participant))]
    pub async fn retry_speaker(
        &self,
        participant: &ParticipantId,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let _turn = self.turn_lock.lock().await;

        if !self.clients.contains_key(participant) {
            return Err(EngineError::UnknownParticipant(participant.to_string()));
        }
        let decision = SpeakerDecision::forced(participant.clone());
        self.announce(&decision).await;

        match self.run_speaker(participant, &[], cancel).await {
            Ok(_) => {}
            Err(err) if err.is_recoverable() => {
                self.speaker_failed(participant, &err).await;
            }
            Err(err) => return Err(err),
        }
        self.send(TurnEvent::TurnComplete).await;
        Ok(())
    }

    async fn announce(&self, decision: &SpeakerDecision) {
        let event = if decision.should_speak {
            TurnEvent::WillSpeak {
                participant: decision.participant.clone(),
                confidence: decision.confidence,
                reason: decision.reason.clone(),
            }
        } else {
            TurnEvent::WillStaySilent {
                participant: decision.participant.clone(),
                reason: decision.reason.clone(),
            }
        };
        self.send(event).await;
    }

    /// Surface a recoverable speaker failure and keep going. Authentication
    /// failures disable the participant for the rest of the process.
    async fn speaker_failed(&self, speaker: &ParticipantId, err: &EngineError) {
        warn!(participant = %speaker, error = %err, "speaker failed, continuing turn");
        self.send(TurnEvent::Error {
            participant: Some(speaker.clone()),
            kind: err.error_kind().to_string(),
            message: err.to_string(),
            recoverable: true,
        })
        .await;

        if let EngineError::Gateway(gateway) = err {
            if matches!(
                gateway,
                roundtable_core::errors::GatewayError::AuthenticationFailed(_)
            ) {
                warn!(participant = %speaker, "authentication failed, disabling participant");
                self.disabled.lock().insert(speaker.clone());
            }
        }
    }

    /// Participants currently eligible to speak.
    fn active_ids(&self) -> Vec<ParticipantId> {
        let disabled = self.disabled.lock();
        self.roster
            .iter()
            .filter(|p| !disabled.contains(&p.id))
            .map(|p| p.id.clone())
            .collect()
    }

    fn election_evaluator(&self) -> SpeakerEvaluator {
        let disabled = self.disabled.lock();
        let clients: HashMap<ParticipantId, Arc<dyn ModelClient>> = self
            .clients
            .iter()
            .filter(|(id, _)| !disabled.contains(*id))
            .map(|(id, client)| (id.clone(), Arc::clone(client)))
            .collect();
        SpeakerEvaluator::new(clients, self.config.evaluator.clone())
    }

    pub(crate) fn participant(&self, id: &ParticipantId) -> Option<&Participant> {
        self.roster.iter().find(|p| &p.id == id)
    }

    pub(crate) fn other_display_names(&self, speaker: &ParticipantId) -> Vec<String> {
        self.roster
            .iter()
            .filter(|p| &p.id != speaker)
            .map(|p| p.display_name.clone())
            .collect()
    }

    pub(crate) async fn send(&self, event: TurnEvent) {
        if self.events.send(event).await.is_err() {
            warn!("no event receivers — event dropped");
        }
    }

    /// Persistence failures are fatal: surface one non-recoverable error
    /// event and abort the turn with the last successful append as the tail.
    pub(crate) async fn fatal<T>(&self, result: Result<T, StoreError>) -> Result<T, EngineError> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                self.send(TurnEvent::Error {
                    participant: None,
                    kind: "store".into(),
                    message: err.to_string(),
                    recoverable: false,
                })
                .await;
                Err(err.into())
            }
        }
    }
}

/// Rendered note about earlier speakers this turn, attached to the system
/// prompt of later speakers.
pub(crate) fn prior_context(prior: &[(ParticipantId, String)]) -> Option<String> {
    if prior.is_empty() {
        return None;
    }
    let lines = prior
        .iter()
        .map(|(id, text)| {
            let clipped = if text.chars().count() > 200 {
                text.chars().take(200).collect::<String>() + "..."
            } else {
                text.clone()
            };
            format!("- {id}: {clipped}")
        })
        .collect::<Vec<_>>()
        .join("\n");
    Some(format!(
        "Other participants have already responded this turn:\n{lines}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prior_context_empty() {
        assert!(prior_context(&[]).is_none());
    }

    #[test]
    fn prior_context_clips_long_responses() {
        let long = "y".repeat(400);
        let rendered =
            prior_context(&[(ParticipantId::new("claude"), long)]).unwrap();
        assert!(rendered.contains("claude"));
        assert!(rendered.contains("..."));
        assert!(rendered.len() < 300);
    }

    #[test]
    fn config_defaults_match_contract() {
        let config = ExecutorConfig::default();
        assert_eq!(config.max_tool_iterations, 10);
        assert_eq!(config.tool_deadline, Duration::from_secs(30));
        assert_eq!(config.evaluator.deadline, Duration::from_secs(5));
        assert_eq!(config.evaluator.silence_threshold, 0.3);
        assert_eq!(config.strategy, TurnStrategy::Rotate);
    }
}
