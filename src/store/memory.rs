//! In-memory [`SessionStore`].
//!
//! All data lives in process memory and is discarded when the process exits.
//! One mutex guards the whole map; every operation is a short critical
//! section with no awaits inside.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use uuid::Uuid;

use crate::error::AppError;

use super::{Query, SessionStore, StoredDocument};

#[derive(Debug, Default)]
struct Session {
    documents: Vec<StoredDocument>,
    queries: Vec<Query>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    /// session_id -> session
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Session>>, AppError> {
        self.sessions
            .lock()
            .map_err(|_| AppError::Store("memory store lock poisoned".into()))
    }
}

fn session_mut<'a>(
    sessions: &'a mut HashMap<String, Session>,
    id: &str,
) -> Result<&'a mut Session, AppError> {
    sessions
        .get_mut(id)
        .ok_or_else(|| AppError::NotFound(format!("session {id}")))
}

impl SessionStore for MemoryStore {
    fn create_session(&self) -> Result<String, AppError> {
        let id = Uuid::new_v4().to_string();
        self.lock()?.insert(id.clone(), Session::default());
        Ok(id)
    }

    fn add_document(
        &self,
        session_id: &str,
        filename: &str,
        content: &str,
    ) -> Result<StoredDocument, AppError> {
        let mut sessions = self.lock()?;
        let doc = StoredDocument::new(filename, content);
        session_mut(&mut sessions, session_id)?.documents.push(doc.clone());
        Ok(doc)
    }

    fn remove_document(&self, session_id: &str, doc_id: &str) -> Result<(), AppError> {
        let mut sessions = self.lock()?;
        let session = session_mut(&mut sessions, session_id)?;
        let before = session.documents.len();
        session.documents.retain(|d| d.id != doc_id);
        if session.documents.len() == before {
            return Err(AppError::NotFound(format!("document {doc_id}")));
        }
        Ok(())
    }

    fn documents(&self, session_id: &str) -> Result<Vec<StoredDocument>, AppError> {
        let mut sessions = self.lock()?;
        Ok(session_mut(&mut sessions, session_id)?.documents.clone())
    }

    fn record_query(&self, session_id: &str, query: &Query) -> Result<(), AppError> {
        let mut sessions = self.lock()?;
        session_mut(&mut sessions, session_id)?.queries.push(query.clone());
        Ok(())
    }

    fn update_query(&self, session_id: &str, query: &Query) -> Result<(), AppError> {
        let mut sessions = self.lock()?;
        let session = session_mut(&mut sessions, session_id)?;
        let slot = session
            .queries
            .iter_mut()
            .find(|q| q.id == query.id)
            .ok_or_else(|| AppError::NotFound(format!("query {}", query.id)))?;
        if slot.status.is_terminal() {
            return Err(AppError::Store(format!("query {} is already final", query.id)));
        }
        *slot = query.clone();
        Ok(())
    }

    fn queries(&self, session_id: &str) -> Result<Vec<Query>, AppError> {
        let mut sessions = self.lock()?;
        Ok(session_mut(&mut sessions, session_id)?.queries.clone())
    }

    fn clear(&self, session_id: &str) -> Result<(), AppError> {
        let mut sessions = self.lock()?;
        let session = session_mut(&mut sessions, session_id)?;
        session.documents.clear();
        session.queries.clear();
        Ok(())
    }
}
