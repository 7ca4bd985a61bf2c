//! History compression. Keeps the active token footprint of a session
//! bounded by folding the oldest half of unsummarized messages into an
//! incremental summary. Never fails the turn: every failure path logs a
//! warning and returns `None`.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use roundtable_core::client::{GenerateRequest, ModelClient};
use roundtable_core::ids::SessionId;
use roundtable_core::messages::Message;
use roundtable_store::messages::MessageRepo;
use roundtable_store::summaries::{Summary, SummaryKind, SummaryRepo};

use crate::prompts;

const SUMMARY_TEMPERATURE: f64 = 0.3;
/// Below this many candidate messages, compression is not worth a model call.
const MIN_MESSAGES_TO_SUMMARIZE: usize = 4;

#[derive(Clone, Debug)]
pub struct SummarizerConfig {
    /// Unsummarized-history token count that triggers compression.
    pub token_threshold: u32,
    /// Target length of the produced summary.
    pub target_tokens: u32,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            token_threshold: 50_000,
            target_tokens: 1_000,
        }
    }
}

pub struct Summarizer {
    client: Arc<dyn ModelClient>,
    messages: MessageRepo,
    summaries: SummaryRepo,
    config: SummarizerConfig,
}

impl Summarizer {
    pub fn new(
        client: Arc<dyn ModelClient>,
        messages: MessageRepo,
        summaries: SummaryRepo,
        config: SummarizerConfig,
    ) -> Self {
        Self {
            client,
            messages,
            summaries,
            config,
        }
    }

    /// End-of-turn check: when the unsummarized history exceeds the threshold,
    /// compress its oldest half. Pinned messages are never superseded.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn check_and_summarize(&self, session_id: &SessionId) -> Option<Summary> {
        let active = match self.messages.load_active(session_id) {
            Ok(msgs) => msgs,
            Err(err) => {
                warn!(error = %err, "summarizer could not load history");
                return None;
            }
        };

        let total: u32 = active.iter().map(|m| self.message_tokens(m)).sum();
        if total < self.config.token_threshold {
            return None;
        }

        let unpinned: Vec<&Message> = active.iter().filter(|m| !m.pinned).collect();
        let half = unpinned.len() / 2;
        if half < MIN_MESSAGES_TO_SUMMARIZE {
            return None;
        }
        let candidates = &unpinned[..half];

        info!(
            total_tokens = total,
            threshold = self.config.token_threshold,
            candidates = candidates.len(),
            "compressing oldest history"
        );

        let owned: Vec<Message> = candidates.iter().map(|m| (*m).clone()).collect();
        let prompt = prompts::compression_prompt(&prompts::render_full(&owned));
        let request = GenerateRequest::new(vec![Message::user(session_id.clone(), prompt)])
            .with_max_tokens(self.config.target_tokens)
            .with_temperature(SUMMARY_TEMPERATURE);

        let response = match self.client.generate(request).await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "summarization call failed");
                return None;
            }
        };

        let first = candidates[0].id.clone();
        let last = candidates[candidates.len() - 1].id.clone();
        let summary = Summary::new(
            session_id.clone(),
            SummaryKind::Incremental,
            response.content.clone(),
            first.clone(),
            last.clone(),
            self.client.count_tokens(&response.content) as u32,
        );

        if let Err(err) = self.summaries.add(&summary) {
            warn!(error = %err, "failed to persist summary");
            return None;
        }
        if let Err(err) = self.messages.mark_superseded(session_id, &first, &last) {
            warn!(error = %err, "failed to mark summarized range");
        }

        Some(summary)
    }

    /// Compress the whole conversation (archival). Retires incremental
    /// summaries the new one covers; nothing is marked superseded.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn summarize_full(&self, session_id: &SessionId) -> Option<Summary> {
        let all = match self.messages.load(session_id, None, None) {
            Ok(msgs) => msgs,
            Err(err) => {
                warn!(error = %err, "summarizer could not load history");
                return None;
            }
        };
        if all.len() < 2 {
            return None;
        }

        let prompt = prompts::compression_prompt(&prompts::render_full(&all));
        let request = GenerateRequest::new(vec![Message::user(session_id.clone(), prompt)])
            .with_max_tokens(self.config.target_tokens * 2)
            .with_temperature(SUMMARY_TEMPERATURE);

        let response = match self.client.generate(request).await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "full summarization call failed");
                return None;
            }
        };

        let summary = Summary::new(
            session_id.clone(),
            SummaryKind::Full,
            response.content.clone(),
            all[0].id.clone(),
            all[all.len() - 1].id.clone(),
            self.client.count_tokens(&response.content) as u32,
        );
        if let Err(err) = self.summaries.add(&summary) {
            warn!(error = %err, "failed to persist full summary");
            return None;
        }
        Some(summary)
    }

    fn message_tokens(&self, msg: &Message) -> u32 {
        self.client.count_tokens(&msg.content) as u32 + 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roundtable_core::errors::GatewayError;
    use roundtable_core::mock::{MockClient, MockReply};
    use roundtable_store::sessions::SessionRepo;
    use roundtable_store::Database;

    fn setup(
        replies: Vec<MockReply>,
        threshold: u32,
    ) -> (Summarizer, MessageRepo, SummaryRepo, SessionId) {
        let db = Database::in_memory().unwrap();
        let session = SessionRepo::new(db.clone()).create(None, None).unwrap();
        let messages = MessageRepo::new(db.clone());
        let summaries = SummaryRepo::new(db.clone());
        let client = Arc::new(MockClient::new("claude").with_replies(replies));
        let summarizer = Summarizer::new(
            client,
            MessageRepo::new(db.clone()),
            SummaryRepo::new(db),
            SummarizerConfig {
                token_threshold: threshold,
                target_tokens: 100,
            },
        );
        (summarizer, messages, summaries, session.id)
    }

    fn seed(messages: &MessageRepo, session: &SessionId, count: usize, size: usize) -> Vec<Message> {
        let msgs: Vec<Message> = (0..count)
            .map(|i| Message::user(session.clone(), format!("{i:02}{}", "x".repeat(size))))
            .collect();
        for m in &msgs {
            messages.append(m).unwrap();
        }
        msgs
    }

    #[tokio::test]
    async fn below_threshold_does_nothing() {
        let (summarizer, messages, _, session) =
            setup(vec![MockReply::text("summary")], 1_000_000);
        seed(&messages, &session, 10, 50);
        assert!(summarizer.check_and_summarize(&session).await.is_none());
        assert_eq!(messages.load_active(&session).unwrap().len(), 10);
    }

    #[tokio::test]
    async fn compresses_oldest_half() {
        let (summarizer, messages, summaries, session) =
            setup(vec![MockReply::text("compressed early history")], 10);
        let msgs = seed(&messages, &session, 10, 100);

        let summary = summarizer.check_and_summarize(&session).await.unwrap();
        assert_eq!(summary.kind, SummaryKind::Incremental);
        assert_eq!(summary.content, "compressed early history");
        assert_eq!(summary.first_message_id, msgs[0].id);
        assert_eq!(summary.last_message_id, msgs[4].id);

        // oldest five superseded, newest five still active
        let active = messages.load_active(&session).unwrap();
        assert_eq!(active.len(), 5);
        assert!(active[0].content.starts_with("05"));

        let stored = summaries.latest(&session).unwrap().unwrap();
        assert_eq!(stored.id, summary.id);
    }

    #[tokio::test]
    async fn pinned_messages_never_superseded() {
        let (summarizer, messages, _, session) =
            setup(vec![MockReply::text("summary")], 10);
        let msgs = seed(&messages, &session, 10, 100);
        messages.set_pin(&msgs[1].id, true).unwrap();

        summarizer.check_and_summarize(&session).await.unwrap();

        let active = messages.load_active(&session).unwrap();
        assert!(active.iter().any(|m| m.id == msgs[1].id));
    }

    #[tokio::test]
    async fn generation_failure_is_warning_only() {
        let (summarizer, messages, summaries, session) = setup(
            vec![MockReply::Error(GatewayError::NetworkError("down".into()))],
            10,
        );
        seed(&messages, &session, 10, 100);

        assert!(summarizer.check_and_summarize(&session).await.is_none());
        // nothing superseded, nothing stored
        assert_eq!(messages.load_active(&session).unwrap().len(), 10);
        assert!(summaries.latest(&session).unwrap().is_none());
    }

    #[tokio::test]
    async fn too_few_messages_skips() {
        let (summarizer, messages, _, session) =
            setup(vec![MockReply::text("summary")], 10);
        seed(&messages, &session, 4, 100); // half = 2 < minimum

        assert!(summarizer.check_and_summarize(&session).await.is_none());
    }

    #[tokio::test]
    async fn full_summary_covers_everything() {
        let (summarizer, messages, summaries, session) =
            setup(vec![MockReply::text("the whole story")], 10);
        let msgs = seed(&messages, &session, 6, 50);

        let summary = summarizer.summarize_full(&session).await.unwrap();
        assert_eq!(summary.kind, SummaryKind::Full);
        assert_eq!(summary.first_message_id, msgs[0].id);
        assert_eq!(summary.last_message_id, msgs[5].id);
        // nothing superseded by a full (archival) summary
        assert_eq!(messages.load_active(&session).unwrap().len(), 6);
        assert!(summaries.latest(&session).unwrap().is_some());
    }
}
