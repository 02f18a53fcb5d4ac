//! Session, document and query bookkeeping.
//!
//! [`SessionStore`] is the seam between the HTTP layer and whatever holds
//! session state. The only implementation is [`MemoryStore`]; nothing
//! survives a restart.

mod memory;

pub use memory::MemoryStore;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::pipeline::DocumentContext;

// ── Query ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, QueryStatus::Completed | QueryStatus::Failed)
    }
}

/// One question asked against a session's documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub id: String,
    pub text: String,
    pub status: QueryStatus,
    /// RFC 3339 creation time.
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
}

impl Query {
    /// A new `pending` query with a fresh UUID.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            status: QueryStatus::Pending,
            created_at: chrono::Utc::now().to_rfc3339(),
            result: None,
            confidence: None,
            attempts: None,
        }
    }
}

// ── Documents ─────────────────────────────────────────────────────────────────

/// Extracted document text held by a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredDocument {
    pub id: String,
    pub filename: String,
    pub content: String,
    pub added_at: String,
}

/// Listing view of a [`StoredDocument`] without its content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentSummary {
    pub id: String,
    pub filename: String,
    pub chars: usize,
    pub added_at: String,
}

impl StoredDocument {
    pub fn new(filename: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            filename: filename.into(),
            content: content.into(),
            added_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn summary(&self) -> DocumentSummary {
        DocumentSummary {
            id: self.id.clone(),
            filename: self.filename.clone(),
            chars: self.content.chars().count(),
            added_at: self.added_at.clone(),
        }
    }

    pub fn to_context(&self) -> DocumentContext {
        DocumentContext::new(self.filename.clone(), self.content.clone())
    }
}

// ── Store trait ───────────────────────────────────────────────────────────────

/// Session state shared by all requests.
///
/// Unknown session or document ids yield [`AppError::NotFound`].
pub trait SessionStore: Send + Sync {
    /// Create an empty session and return its id.
    fn create_session(&self) -> Result<String, AppError>;

    fn add_document(
        &self,
        session_id: &str,
        filename: &str,
        content: &str,
    ) -> Result<StoredDocument, AppError>;

    fn remove_document(&self, session_id: &str, doc_id: &str) -> Result<(), AppError>;

    /// Documents in upload order.
    fn documents(&self, session_id: &str) -> Result<Vec<StoredDocument>, AppError>;

    /// Snapshot of the session's documents for one pipeline run.
    fn session_documents(&self, session_id: &str) -> Result<Vec<DocumentContext>, AppError> {
        Ok(self.documents(session_id)?.iter().map(StoredDocument::to_context).collect())
    }

    fn record_query(&self, session_id: &str, query: &Query) -> Result<(), AppError>;

    /// Replace a recorded query. A query that already reached a terminal
    /// status is never overwritten.
    fn update_query(&self, session_id: &str, query: &Query) -> Result<(), AppError>;

    /// Queries in the order they were recorded.
    fn queries(&self, session_id: &str) -> Result<Vec<Query>, AppError>;

    /// Drop all documents and queries, keeping the session.
    fn clear(&self, session_id: &str) -> Result<(), AppError>;
}
