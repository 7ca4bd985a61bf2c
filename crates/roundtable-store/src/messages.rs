use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::instrument;

use roundtable_core::ids::{MessageId, ParticipantId, SessionId};
use roundtable_core::messages::{Message, Role};
use roundtable_core::tools::{InvocationResult, ToolInvocation};
use roundtable_core::usage::Usage;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

const MESSAGE_COLUMNS: &str = "id, session_id, seq, role, author, content, tool_calls, \
     tool_results, prompt_tokens, completion_tokens, cost_estimate, pinned, superseded, created_at";

/// Append-only message log. Appends are idempotent keyed by message id, and
/// a per-session lock linearizes sequence assignment.
pub struct MessageRepo {
    db: Database,
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    fn session_lock(&self, session_id: &SessionId) -> Arc<Mutex<()>> {
        self.session_locks
            .lock()
            .entry(session_id.as_str().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Append a single message. A second append of the same message id is a
    /// no-op.
    #[instrument(skip(self, msg), fields(session_id = %msg.session_id, role = %msg.role))]
    pub fn append(&self, msg: &Message) -> Result<(), StoreError> {
        let lock = self.session_lock(&msg.session_id);
        let _guard = lock.lock();

        self.db.with_conn(|conn| {
            let seq = next_seq(conn, &msg.session_id)?;
            insert_message(conn, msg, seq)?;
            touch_session(conn, &msg.session_id)?;
            Ok(())
        })
    }

    /// Append a batch atomically: either every message lands or none does.
    #[instrument(skip(self, msgs), fields(session_id = %session_id, count = msgs.len()))]
    pub fn append_batch(
        &self,
        session_id: &SessionId,
        msgs: &[Message],
    ) -> Result<(), StoreError> {
        if msgs.is_empty() {
            return Ok(());
        }
        let lock = self.session_lock(session_id);
        let _guard = lock.lock();

        self.db.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut seq = next_seq(&tx, session_id)?;
            for msg in msgs {
                if &msg.session_id != session_id {
                    return Err(StoreError::NotFound(format!(
                        "message {} belongs to session {}, not {}",
                        msg.id, msg.session_id, session_id
                    )));
                }
                if insert_message(&tx, msg, seq)? {
                    seq += 1;
                }
            }
            touch_session(&tx, session_id)?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Flip the pinned flag. The store is the single mutation path for pins.
    #[instrument(skip(self), fields(message_id = %id))]
    pub fn set_pin(&self, id: &MessageId, pinned: bool) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET pinned = ?1 WHERE id = ?2",
                rusqlite::params![pinned as i64, id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("message {id}")));
            }
            Ok(())
        })
    }

    pub fn pinned_ids(&self, session_id: &SessionId) -> Result<Vec<MessageId>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM messages WHERE session_id = ?1 AND pinned = 1 ORDER BY seq",
            )?;
            let ids = stmt
                .query_map([session_id.as_str()], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .map(MessageId::from_raw)
                .collect();
            Ok(ids)
        })
    }

    pub fn get(&self, id: &MessageId) -> Result<Message, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"
            ))?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_message(row),
                None => Err(StoreError::NotFound(format!("message {id}"))),
            }
        })
    }

    /// Load messages in creation order, optionally after a sequence number
    /// and capped at a limit.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn load(
        &self,
        session_id: &SessionId,
        since_seq: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<Message>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE session_id = ?1 AND seq > ?2
                 ORDER BY seq ASC LIMIT ?3"
            ))?;
            let since = since_seq.unwrap_or(-1);
            let limit = limit.map(i64::from).unwrap_or(i64::MAX);
            let mut rows = stmt.query(rusqlite::params![session_id.as_str(), since, limit])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_message(row)?);
            }
            Ok(results)
        })
    }

    /// Load the messages that still participate in context assembly: those
    /// not compressed away by a summary. Pinned messages are never superseded,
    /// so they always appear here.
    pub fn load_active(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE session_id = ?1 AND superseded = 0
                 ORDER BY seq ASC"
            ))?;
            let mut rows = stmt.query([session_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_message(row)?);
            }
            Ok(results)
        })
    }

    /// Case-insensitive substring search over message content, optionally
    /// scoped to one session.
    #[instrument(skip(self))]
    pub fn search(
        &self,
        session_id: Option<&SessionId>,
        query: &str,
    ) -> Result<Vec<Message>, StoreError> {
        let pattern = format!("%{}%", row_helpers::escape_like(query));
        self.db.with_conn(|conn| {
            let mut results = Vec::new();
            match session_id {
                Some(sid) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages
                         WHERE session_id = ?1 AND content LIKE ?2 ESCAPE '\\'
                         ORDER BY seq ASC"
                    ))?;
                    let mut rows = stmt.query(rusqlite::params![sid.as_str(), pattern])?;
                    while let Some(row) = rows.next()? {
                        results.push(row_to_message(row)?);
                    }
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages
                         WHERE content LIKE ?1 ESCAPE '\\'
                         ORDER BY session_id, seq ASC"
                    ))?;
                    let mut rows = stmt.query(rusqlite::params![pattern])?;
                    while let Some(row) = rows.next()? {
                        results.push(row_to_message(row)?);
                    }
                }
            }
            Ok(results)
        })
    }

    /// Messages a given participant authored within a session.
    pub fn by_author(
        &self,
        session_id: &SessionId,
        author: &ParticipantId,
    ) -> Result<Vec<Message>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE session_id = ?1 AND author = ?2
                 ORDER BY seq ASC"
            ))?;
            let mut rows = stmt.query(rusqlite::params![session_id.as_str(), author.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_message(row)?);
            }
            Ok(results)
        })
    }

    /// Mark the inclusive range `[first, last]` as superseded by a summary.
    /// Pinned messages are exempt and remain active.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn mark_superseded(
        &self,
        session_id: &SessionId,
        first: &MessageId,
        last: &MessageId,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let first_seq = seq_of(conn, first)?;
            let last_seq = seq_of(conn, last)?;
            conn.execute(
                "UPDATE messages SET superseded = 1
                 WHERE session_id = ?1 AND seq >= ?2 AND seq <= ?3 AND pinned = 0",
                rusqlite::params![session_id.as_str(), first_seq, last_seq],
            )?;
            Ok(())
        })
    }

    pub fn count(&self, session_id: &SessionId) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
                [session_id.as_str()],
                |row| row.get(0),
            )
            .map_err(StoreError::from)
        })
    }
}

fn next_seq(conn: &rusqlite::Connection, session_id: &SessionId) -> Result<i64, StoreError> {
    let max: i64 = conn.query_row(
        "SELECT COALESCE(MAX(seq), -1) FROM messages WHERE session_id = ?1",
        [session_id.as_str()],
        |row| row.get(0),
    )?;
    Ok(max + 1)
}

fn seq_of(conn: &rusqlite::Connection, id: &MessageId) -> Result<i64, StoreError> {
    conn.query_row(
        "SELECT seq FROM messages WHERE id = ?1",
        [id.as_str()],
        |row| row.get(0),
    )
    .map_err(|_| StoreError::NotFound(format!("message {id}")))
}

/// Returns true when a row was actually inserted (false for idempotent replay).
fn insert_message(
    conn: &rusqlite::Connection,
    msg: &Message,
    seq: i64,
) -> Result<bool, StoreError> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO messages
         (id, session_id, seq, role, author, content, tool_calls, tool_results,
          prompt_tokens, completion_tokens, cost_estimate, pinned, superseded, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0, ?13)",
        rusqlite::params![
            msg.id.as_str(),
            msg.session_id.as_str(),
            seq,
            msg.role.as_str(),
            msg.author.as_ref().map(|a| a.as_str()),
            msg.content,
            serde_json::to_string(&msg.tool_calls)?,
            serde_json::to_string(&msg.tool_results)?,
            msg.usage.as_ref().map(|u| u.prompt_tokens as i64),
            msg.usage.as_ref().map(|u| u.completion_tokens as i64),
            msg.usage.as_ref().and_then(|u| u.cost_estimate),
            msg.pinned as i64,
            msg.created_at,
        ],
    )?;
    Ok(changed > 0)
}

fn touch_session(conn: &rusqlite::Connection, session_id: &SessionId) -> Result<(), StoreError> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
        rusqlite::params![now, session_id.as_str()],
    )?;
    Ok(())
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<Message, StoreError> {
    let role_str: String = row_helpers::get(row, 3, "messages", "role")?;
    let tool_calls_str: String = row_helpers::get(row, 6, "messages", "tool_calls")?;
    let tool_results_str: String = row_helpers::get(row, 7, "messages", "tool_results")?;
    let prompt_tokens: Option<i64> = row_helpers::get_opt(row, 8, "messages", "prompt_tokens")?;
    let completion_tokens: Option<i64> =
        row_helpers::get_opt(row, 9, "messages", "completion_tokens")?;
    let cost_estimate: Option<f64> = row_helpers::get_opt(row, 10, "messages", "cost_estimate")?;

    let usage = match (prompt_tokens, completion_tokens) {
        (None, None) => None,
        (p, c) => Some(Usage {
            prompt_tokens: p.unwrap_or(0) as u32,
            completion_tokens: c.unwrap_or(0) as u32,
            cost_estimate,
        }),
    };

    let role: Role = row_helpers::parse_enum(&role_str, "messages", "role")?;
    let tool_calls: Vec<ToolInvocation> =
        row_helpers::parse_json(&tool_calls_str, "messages", "tool_calls")?;
    let tool_results: Vec<InvocationResult> =
        row_helpers::parse_json(&tool_results_str, "messages", "tool_results")?;

    Ok(Message {
        id: MessageId::from_raw(row_helpers::get::<String>(row, 0, "messages", "id")?),
        session_id: SessionId::from_raw(row_helpers::get::<String>(
            row,
            1,
            "messages",
            "session_id",
        )?),
        role,
        author: row_helpers::get_opt::<String>(row, 4, "messages", "author")?
            .map(ParticipantId::new),
        content: row_helpers::get(row, 5, "messages", "content")?,
        tool_calls,
        tool_results,
        usage,
        pinned: row_helpers::get::<i64>(row, 11, "messages", "pinned")? != 0,
        created_at: row_helpers::get(row, 13, "messages", "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::SessionRepo;

    fn setup() -> (MessageRepo, SessionId) {
        let db = Database::in_memory().unwrap();
        let session = SessionRepo::new(db.clone()).create(None, None).unwrap();
        (MessageRepo::new(db), session.id)
    }

    #[test]
    fn append_and_load_ordered() {
        let (repo, sess) = setup();
        for i in 0..5 {
            repo.append(&Message::user(sess.clone(), format!("message {i}")))
                .unwrap();
        }
        let all = repo.load(&sess, None, None).unwrap();
        assert_eq!(all.len(), 5);
        for (i, msg) in all.iter().enumerate() {
            assert_eq!(msg.content, format!("message {i}"));
        }
    }

    #[test]
    fn append_is_idempotent() {
        let (repo, sess) = setup();
        let msg = Message::user(sess.clone(), "once");
        repo.append(&msg).unwrap();
        repo.append(&msg).unwrap();
        assert_eq!(repo.count(&sess).unwrap(), 1);
    }

    #[test]
    fn append_batch_all_land() {
        let (repo, sess) = setup();
        let msgs: Vec<Message> = (0..3)
            .map(|i| Message::user(sess.clone(), format!("m{i}")))
            .collect();
        repo.append_batch(&sess, &msgs).unwrap();
        assert_eq!(repo.count(&sess).unwrap(), 3);
        let loaded = repo.load(&sess, None, None).unwrap();
        assert_eq!(loaded[2].content, "m2");
    }

    #[test]
    fn append_batch_is_atomic() {
        let (repo, sess) = setup();
        let other = SessionId::new();
        let msgs = vec![
            Message::user(sess.clone(), "good"),
            Message::user(sess.clone(), "also good"),
            Message::user(other, "wrong session"),
        ];
        let result = repo.append_batch(&sess, &msgs);
        assert!(result.is_err());
        // None of the batch landed
        assert_eq!(repo.count(&sess).unwrap(), 0);
    }

    #[test]
    fn append_batch_idempotent_replay() {
        let (repo, sess) = setup();
        let msgs: Vec<Message> = (0..3)
            .map(|i| Message::user(sess.clone(), format!("m{i}")))
            .collect();
        repo.append_batch(&sess, &msgs).unwrap();
        repo.append_batch(&sess, &msgs).unwrap();
        assert_eq!(repo.count(&sess).unwrap(), 3);
    }

    #[test]
    fn pin_roundtrip() {
        let (repo, sess) = setup();
        let msg = Message::user(sess.clone(), "important");
        repo.append(&msg).unwrap();

        repo.set_pin(&msg.id, true).unwrap();
        assert_eq!(repo.pinned_ids(&sess).unwrap(), vec![msg.id.clone()]);
        assert!(repo.get(&msg.id).unwrap().pinned);

        repo.set_pin(&msg.id, false).unwrap();
        assert!(repo.pinned_ids(&sess).unwrap().is_empty());
        assert!(!repo.get(&msg.id).unwrap().pinned);
    }

    #[test]
    fn pin_unknown_message_fails() {
        let (repo, _) = setup();
        let result = repo.set_pin(&MessageId::from_raw("msg_missing"), true);
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn search_case_insensitive() {
        let (repo, sess) = setup();
        repo.append(&Message::user(sess.clone(), "Fix the Parser bug"))
            .unwrap();
        repo.append(&Message::user(sess.clone(), "unrelated")).unwrap();

        let hits = repo.search(Some(&sess), "parser").unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("Parser"));
    }

    #[test]
    fn search_escapes_like_wildcards() {
        let (repo, sess) = setup();
        repo.append(&Message::user(sess.clone(), "literal %percent%"))
            .unwrap();
        repo.append(&Message::user(sess.clone(), "anything else"))
            .unwrap();

        let hits = repo.search(Some(&sess), "%percent%").unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn by_author_filters() {
        let (repo, sess) = setup();
        repo.append(&Message::assistant(
            sess.clone(),
            ParticipantId::new("claude"),
            "from claude",
        ))
        .unwrap();
        repo.append(&Message::assistant(
            sess.clone(),
            ParticipantId::new("gpt"),
            "from gpt",
        ))
        .unwrap();

        let claude = repo.by_author(&sess, &ParticipantId::new("claude")).unwrap();
        assert_eq!(claude.len(), 1);
        assert_eq!(claude[0].content, "from claude");
    }

    #[test]
    fn mark_superseded_skips_pins() {
        let (repo, sess) = setup();
        let msgs: Vec<Message> = (0..4)
            .map(|i| Message::user(sess.clone(), format!("m{i}")))
            .collect();
        for m in &msgs {
            repo.append(m).unwrap();
        }
        repo.set_pin(&msgs[1].id, true).unwrap();

        repo.mark_superseded(&sess, &msgs[0].id, &msgs[2].id).unwrap();

        let active = repo.load_active(&sess).unwrap();
        let contents: Vec<&str> = active.iter().map(|m| m.content.as_str()).collect();
        // m0 and m2 superseded; pinned m1 and untouched m3 remain
        assert_eq!(contents, vec!["m1", "m3"]);
    }

    #[test]
    fn usage_persisted() {
        let (repo, sess) = setup();
        let msg = Message::assistant(sess.clone(), ParticipantId::new("claude"), "hi")
            .with_usage(Some(Usage {
                prompt_tokens: 100,
                completion_tokens: 20,
                cost_estimate: Some(0.002),
            }));
        repo.append(&msg).unwrap();
        let fetched = repo.get(&msg.id).unwrap();
        let usage = fetched.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 100);
        assert_eq!(usage.completion_tokens, 20);
        assert_eq!(usage.cost_estimate, Some(0.002));
    }

    #[test]
    fn tool_calls_and_results_persisted() {
        let (repo, sess) = setup();
        let inv = ToolInvocation::new("read_file", serde_json::json!({"path": "x"}));
        let msg = Message::assistant(sess.clone(), ParticipantId::new("claude"), "")
            .with_tool_calls(vec![inv.clone()]);
        repo.append(&msg).unwrap();

        let tool_msg = Message::tool_results(
            sess.clone(),
            ParticipantId::new("claude"),
            vec![InvocationResult::ok(inv.id.clone(), "contents")],
        );
        repo.append(&tool_msg).unwrap();

        let loaded = repo.load(&sess, None, None).unwrap();
        assert_eq!(loaded[0].tool_calls[0].id, inv.id);
        assert_eq!(loaded[1].tool_results[0].invocation_id, inv.id);
    }

    #[test]
    fn load_since_and_limit() {
        let (repo, sess) = setup();
        for i in 0..5 {
            repo.append(&Message::user(sess.clone(), format!("m{i}"))).unwrap();
        }
        let tail = repo.load(&sess, Some(2), None).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].content, "m3");

        let capped = repo.load(&sess, None, Some(2)).unwrap();
        assert_eq!(capped.len(), 2);
        assert_eq!(capped[1].content, "m1");
    }

    #[test]
    fn concurrent_appends_linearized() {
        let (repo, sess) = setup();
        let repo = Arc::new(repo);
        let mut handles = vec![];
        for i in 0..10 {
            let repo = repo.clone();
            let sess = sess.clone();
            handles.push(std::thread::spawn(move || {
                repo.append(&Message::user(sess, format!("t{i}"))).unwrap();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let all = repo.load(&sess, None, None).unwrap();
        assert_eq!(all.len(), 10);
    }
}
