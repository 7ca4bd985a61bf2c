use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use roundtable_core::ids::{MessageId, SessionId, SummaryId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryKind {
    Incremental,
    Full,
}

impl std::fmt::Display for SummaryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Incremental => write!(f, "incremental"),
            Self::Full => write!(f, "full"),
        }
    }
}

impl std::str::FromStr for SummaryKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incremental" => Ok(Self::Incremental),
            "full" => Ok(Self::Full),
            other => Err(format!("unknown summary kind: {other}")),
        }
    }
}

/// A compressed stand-in for a contiguous message range.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Summary {
    pub id: SummaryId,
    pub session_id: SessionId,
    pub kind: SummaryKind,
    pub content: String,
    pub first_message_id: MessageId,
    pub last_message_id: MessageId,
    pub token_count: u32,
    #[serde(default)]
    pub retired: bool,
    pub created_at: String,
}

impl Summary {
    pub fn new(
        session_id: SessionId,
        kind: SummaryKind,
        content: impl Into<String>,
        first_message_id: MessageId,
        last_message_id: MessageId,
        token_count: u32,
    ) -> Self {
        Self {
            id: SummaryId::new(),
            session_id,
            kind,
            content: content.into(),
            first_message_id,
            last_message_id,
            token_count,
            retired: false,
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

pub struct SummaryRepo {
    db: Database,
}

impl SummaryRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store a summary. Adding a `full` summary retires the incremental
    /// summaries whose ranges it covers.
    #[instrument(skip(self, summary), fields(session_id = %summary.session_id, kind = %summary.kind))]
    pub fn add(&self, summary: &Summary) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO summaries
                 (id, session_id, kind, content, first_message_id, last_message_id,
                  token_count, retired, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    summary.id.as_str(),
                    summary.session_id.as_str(),
                    summary.kind.to_string(),
                    summary.content,
                    summary.first_message_id.as_str(),
                    summary.last_message_id.as_str(),
                    summary.token_count as i64,
                    summary.retired as i64,
                    summary.created_at,
                ],
            )?;

            if summary.kind == SummaryKind::Full {
                conn.execute(
                    "UPDATE summaries SET retired = 1
                     WHERE session_id = ?1 AND kind = 'incremental' AND retired = 0 AND id != ?2
                       AND (SELECT seq FROM messages WHERE id = summaries.first_message_id)
                           >= (SELECT seq FROM messages WHERE id = ?3)
                       AND (SELECT seq FROM messages WHERE id = summaries.last_message_id)
                           <= (SELECT seq FROM messages WHERE id = ?4)",
                    rusqlite::params![
                        summary.session_id.as_str(),
                        summary.id.as_str(),
                        summary.first_message_id.as_str(),
                        summary.last_message_id.as_str(),
                    ],
                )?;
            }
            Ok(())
        })
    }

    /// Latest non-retired summary for a session, if any.
    pub fn latest(&self, session_id: &SessionId) -> Result<Option<Summary>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, kind, content, first_message_id, last_message_id,
                        token_count, retired, created_at
                 FROM summaries WHERE session_id = ?1 AND retired = 0
                 ORDER BY created_at DESC, id DESC LIMIT 1",
            )?;
            let mut rows = stmt.query([session_id.as_str()])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_summary(row)?)),
                None => Ok(None),
            }
        })
    }

    pub fn list(&self, session_id: &SessionId) -> Result<Vec<Summary>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, kind, content, first_message_id, last_message_id,
                        token_count, retired, created_at
                 FROM summaries WHERE session_id = ?1 ORDER BY created_at ASC, id ASC",
            )?;
            let mut rows = stmt.query([session_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_summary(row)?);
            }
            Ok(results)
        })
    }
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> Result<Summary, StoreError> {
    let kind_str: String = row_helpers::get(row, 2, "summaries", "kind")?;
    Ok(Summary {
        id: SummaryId::from_raw(row_helpers::get::<String>(row, 0, "summaries", "id")?),
        session_id: SessionId::from_raw(row_helpers::get::<String>(
            row,
            1,
            "summaries",
            "session_id",
        )?),
        kind: row_helpers::parse_enum(&kind_str, "summaries", "kind")?,
        content: row_helpers::get(row, 3, "summaries", "content")?,
        first_message_id: MessageId::from_raw(row_helpers::get::<String>(
            row,
            4,
            "summaries",
            "first_message_id",
        )?),
        last_message_id: MessageId::from_raw(row_helpers::get::<String>(
            row,
            5,
            "summaries",
            "last_message_id",
        )?),
        token_count: row_helpers::get::<i64>(row, 6, "summaries", "token_count")? as u32,
        retired: row_helpers::get::<i64>(row, 7, "summaries", "retired")? != 0,
        created_at: row_helpers::get(row, 8, "summaries", "created_at")?,
    })
}
