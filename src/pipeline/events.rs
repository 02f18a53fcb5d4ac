//! Stream events and their wire encoding.
//!
//! The controller produces [`StreamEvent`] values; the transport turns each
//! one into a single-line JSON object via [`StreamEvent::encode_line`].
//! Only `Completed`, `Failed` and `Error` are terminal.

use serde::Serialize;
use tokio::sync::mpsc;

pub const TERMINAL_PROGRESS: u8 = 100;

/// Client-visible pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    AnalyzingDocuments,
    Generating,
    Verifying,
    Retrying,
    Completed,
    Failed,
}

/// `"i/max"` attempt label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptLabel {
    pub index: u32,
    pub max: u32,
}

impl std::fmt::Display for AttemptLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.index, self.max)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Stage change within an attempt.
    Progress { progress: u8, status: Status, message: String, attempt: AttemptLabel },
    /// One generated text delta.
    Fragment { text: String, progress: u8, attempt: AttemptLabel },
    /// Low confidence; another attempt follows.
    Retry { progress: u8, confidence: f64, attempt: AttemptLabel },
    Completed { final_text: String, confidence: f64, attempt: AttemptLabel },
    /// Terminal failure. `attempt` and `confidence` are absent when no
    /// attempt ran (empty document set).
    Failed {
        message: String,
        final_text: String,
        confidence: Option<f64>,
        attempt: Option<AttemptLabel>,
        retry_available: bool,
    },
    Error { error: String },
}

/// Flat wire shape; absent fields are omitted.
#[derive(Debug, Default, Serialize)]
pub struct WireMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_available: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::Completed { .. } | StreamEvent::Failed { .. } | StreamEvent::Error { .. }
        )
    }

    /// Progress carried by the event; `None` only for `Error`.
    pub fn progress(&self) -> Option<u8> {
        match self {
            StreamEvent::Progress { progress, .. }
            | StreamEvent::Fragment { progress, .. }
            | StreamEvent::Retry { progress, .. } => Some(*progress),
            StreamEvent::Completed { .. } | StreamEvent::Failed { .. } => Some(TERMINAL_PROGRESS),
            StreamEvent::Error { .. } => None,
        }
    }

    pub fn to_wire(&self) -> WireMessage {
        match self {
            StreamEvent::Progress { progress, status, message, attempt } => WireMessage {
                progress: Some(*progress),
                status: Some(*status),
                message: Some(message.clone()),
                attempt: Some(attempt.to_string()),
                ..Default::default()
            },
            StreamEvent::Fragment { text, progress, attempt } => WireMessage {
                progress: Some(*progress),
                text: Some(text.clone()),
                attempt: Some(attempt.to_string()),
                ..Default::default()
            },
            StreamEvent::Retry { progress, confidence, attempt } => WireMessage {
                progress: Some(*progress),
                status: Some(Status::Retrying),
                message: Some(format!(
                    "Low confidence ({:.0}%), retrying...",
                    confidence * 100.0
                )),
                attempt: Some(attempt.to_string()),
                confidence: Some(*confidence),
                ..Default::default()
            },
            StreamEvent::Completed { final_text, confidence, attempt } => WireMessage {
                progress: Some(TERMINAL_PROGRESS),
                status: Some(Status::Completed),
                done: Some(true),
                final_text: Some(final_text.clone()),
                confidence: Some(*confidence),
                is_verified: Some(true),
                attempts: Some(attempt.index),
                attempt: Some(attempt.to_string()),
                ..Default::default()
            },
            StreamEvent::Failed { message, final_text, confidence, attempt, retry_available } => {
                WireMessage {
                    progress: Some(TERMINAL_PROGRESS),
                    status: Some(Status::Failed),
                    message: Some(message.clone()),
                    done: Some(true),
                    final_text: Some(final_text.clone()),
                    confidence: *confidence,
                    is_verified: Some(false),
                    attempts: attempt.map(|a| a.index),
                    attempt: attempt.map(|a| a.to_string()),
                    retry_available: retry_available.then_some(true),
                    ..Default::default()
                }
            }
            StreamEvent::Error { error } => WireMessage {
                error: Some(error.clone()),
                done: Some(true),
                ..Default::default()
            },
        }
    }

    /// Serialize as one JSON object with no embedded newlines.
    pub fn encode_line(&self) -> String {
        // A struct of plain strings/numbers cannot fail to serialize.
        serde_json::to_string(&self.to_wire())
            .unwrap_or_else(|e| format!("{{\"error\":\"encoding failed: {e}\",\"done\":true}}"))
    }
}

// ── Sink ──────────────────────────────────────────────────────────────────────

/// The client went away; no further events can be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected;

/// Ordered, append-only outlet for one request's events.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
}

impl EventSink {
    /// A sink plus the receiving half the transport reads from.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }

    pub async fn emit(&self, event: StreamEvent) -> Result<(), Disconnected> {
        self.tx.send(event).await.map_err(|_| Disconnected)
    }

    /// Resolves once the receiving side has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}
