use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use roundtable_core::ids::SessionId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Archived,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "archived" => Ok(Self::Archived),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: SessionId,
    pub name: Option<String>,
    pub project_root: Option<String>,
    pub status: SessionStatus,
    pub metadata: serde_json::Value,
    pub created_at: String,
    pub updated_at: String,
}

pub struct SessionRepo {
    db: Database,
}

impl SessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new session.
    #[instrument(skip(self))]
    pub fn create(
        &self,
        name: Option<&str>,
        project_root: Option<&str>,
    ) -> Result<SessionRow, StoreError> {
        let id = SessionId::new();
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, name, project_root, status, metadata, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'active', '{}', ?4, ?5)",
                rusqlite::params![id.as_str(), name, project_root, now, now],
            )?;
            Ok(SessionRow {
                id,
                name: name.map(String::from),
                project_root: project_root.map(String::from),
                status: SessionStatus::Active,
                metadata: serde_json::json!({}),
                created_at: now.clone(),
                updated_at: now,
            })
        })
    }

    #[instrument(skip(self), fields(session_id = %id))]
    pub fn get(&self, id: &SessionId) -> Result<SessionRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, project_root, status, metadata, created_at, updated_at
                 FROM sessions WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_session(row),
                None => Err(StoreError::NotFound(format!("session {id}"))),
            }
        })
    }

    /// List sessions, newest first.
    #[instrument(skip(self))]
    pub fn list(
        &self,
        status: Option<&SessionStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<SessionRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut results = Vec::new();
            match status {
                Some(s) => {
                    let mut stmt = conn.prepare(
                        "SELECT id, name, project_root, status, metadata, created_at, updated_at
                         FROM sessions WHERE status = ?1
                         ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
                    )?;
                    let mut rows =
                        stmt.query(rusqlite::params![s.to_string(), limit, offset])?;
                    while let Some(row) = rows.next()? {
                        results.push(row_to_session(row)?);
                    }
                }
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT id, name, project_root, status, metadata, created_at, updated_at
                         FROM sessions ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
                    )?;
                    let mut rows = stmt.query(rusqlite::params![limit, offset])?;
                    while let Some(row) = rows.next()? {
                        results.push(row_to_session(row)?);
                    }
                }
            }
            Ok(results)
        })
    }

    /// Archive a session (soft delete — sessions are never destroyed).
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn archive(&self, id: &SessionId) -> Result<(), StoreError> {
        self.set_status(id, SessionStatus::Archived)
    }

    pub fn set_status(&self, id: &SessionId, status: SessionStatus) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            let changed = conn.execute(
                "UPDATE sessions SET status = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![status.to_string(), now, id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("session {id}")));
            }
            Ok(())
        })
    }

    /// Bump the last-modified timestamp.
    pub fn touch(&self, id: &SessionId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
                rusqlite::params![now, id.as_str()],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self, metadata), fields(session_id = %id))]
    pub fn set_metadata(
        &self,
        id: &SessionId,
        metadata: &serde_json::Value,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            let changed = conn.execute(
                "UPDATE sessions SET metadata = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![serde_json::to_string(metadata)?, now, id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("session {id}")));
            }
            Ok(())
        })
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<SessionRow, StoreError> {
    let status_str: String = row_helpers::get(row, 3, "sessions", "status")?;
    let metadata_str: String = row_helpers::get(row, 4, "sessions", "metadata")?;

    Ok(SessionRow {
        id: SessionId::from_raw(row_helpers::get::<String>(row, 0, "sessions", "id")?),
        name: row_helpers::get_opt(row, 1, "sessions", "name")?,
        project_root: row_helpers::get_opt(row, 2, "sessions", "project_root")?,
        status: row_helpers::parse_enum(&status_str, "sessions", "status")?,
        metadata: row_helpers::parse_json(&metadata_str, "sessions", "metadata")?,
        created_at: row_helpers::get(row, 5, "sessions", "created_at")?,
        updated_at: row_helpers::get(row, 6, "sessions", "updated_at")?,
    })
}
