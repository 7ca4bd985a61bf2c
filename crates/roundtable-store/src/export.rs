//! Whole-session export/import as one structured document.
//!
//! Importing mints fresh storage ids (session, message, and summary ids) while
//! preserving ordering, content, pins, usage, and summary ranges, so a
//! round-trip yields a session equal to the original up to ids.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use roundtable_core::ids::{MessageId, SessionId, SummaryId};
use roundtable_core::messages::Message;

use crate::database::Database;
use crate::error::StoreError;
use crate::messages::MessageRepo;
use crate::sessions::{SessionRepo, SessionRow};
use crate::summaries::{Summary, SummaryRepo};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionExport {
    pub session: SessionRow,
    pub messages: Vec<Message>,
    pub summaries: Vec<Summary>,
}

pub fn export_session(db: &Database, session_id: &SessionId) -> Result<SessionExport, StoreError> {
    let session = SessionRepo::new(db.clone()).get(session_id)?;
    let messages = MessageRepo::new(db.clone()).load(session_id, None, None)?;
    let summaries = SummaryRepo::new(db.clone()).list(session_id)?;
    Ok(SessionExport {
        session,
        messages,
        summaries,
    })
}

pub fn import_session(db: &Database, export: &SessionExport) -> Result<SessionId, StoreError> {
    let sessions = SessionRepo::new(db.clone());
    let messages = MessageRepo::new(db.clone());
    let summaries = SummaryRepo::new(db.clone());

    let session = sessions.create(
        export.session.name.as_deref(),
        export.session.project_root.as_deref(),
    )?;
    sessions.set_metadata(&session.id, &export.session.metadata)?;
    sessions.set_status(&session.id, export.session.status.clone())?;

    let mut id_map: HashMap<MessageId, MessageId> = HashMap::new();
    let mut imported = Vec::with_capacity(export.messages.len());
    for msg in &export.messages {
        let mut copy = msg.clone();
        copy.id = MessageId::new();
        copy.session_id = session.id.clone();
        id_map.insert(msg.id.clone(), copy.id.clone());
        imported.push(copy);
    }
    messages.append_batch(&session.id, &imported)?;

    for summary in &export.summaries {
        let first = id_map
            .get(&summary.first_message_id)
            .cloned()
            .ok_or_else(|| {
                StoreError::NotFound(format!(
                    "summary range start {} not in export",
                    summary.first_message_id
                ))
            })?;
        let last = id_map
            .get(&summary.last_message_id)
            .cloned()
            .ok_or_else(|| {
                StoreError::NotFound(format!(
                    "summary range end {} not in export",
                    summary.last_message_id
                ))
            })?;
        let mut copy = summary.clone();
        copy.id = SummaryId::new();
        copy.session_id = session.id.clone();
        copy.first_message_id = first;
        copy.last_message_id = last;
        summaries.add(&copy)?;
    }

    Ok(session.id)
}
