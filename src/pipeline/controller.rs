//! Retry controller — the generate → verify → decide state machine.
//!
//! One [`RetryController::run`] call drives one request:
//!
//! ```text
//! Analyzing ─► Generating(i) ─► Verifying(i) ─┬─► Completed
//!                   ▲                         ├─► Retrying(i) ─► Generating(i+1)
//!                   └─────────────────────────┘
//!                                             └─► Failed (i == MAX_ATTEMPTS)
//! ```
//!
//! The context is assembled once in `Analyzing` and shared by every attempt.
//! Stages emit progress and fragment events as they go; the single terminal
//! event is emitted by `run` alone, after the state machine has resolved.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{FutureExt, StreamExt};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::llm::Backend;
use crate::store::{Query, QueryStatus};

use super::confidence::{ConfidenceSource, RandomConfidence};
use super::context::{AssembledContext, DocumentContext, assemble};
use super::events::{AttemptLabel, Disconnected, EventSink, Status, StreamEvent};
use super::generation::{GenerationError, Generator};
use super::verification::Verifier;

/// Attempt budget per request. Not configurable.
pub const MAX_ATTEMPTS: u32 = 3;
/// Confidence must be strictly above this to accept.
pub const ACCEPT_THRESHOLD: f64 = 0.5;
/// Highest progress a non-terminal event may carry.
pub const MAX_STAGE_PROGRESS: u8 = 99;
/// How long the terminal event may wait for room in a stalled stream.
pub const TERMINAL_EMIT_GRACE: Duration = Duration::from_secs(5);

pub const NO_DOCUMENTS_MESSAGE: &str =
    "No documents available to analyze. Please upload documents first.";
pub const EXHAUSTED_MESSAGE: &str =
    "Could not find a reliable answer after 3 attempts. Please try rephrasing your query.";

/// One generate-then-verify cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub index: u32,
    pub generated_text: String,
    pub confidence: f64,
    pub verified_text: String,
    pub accepted: bool,
}

enum State {
    Analyzing,
    Generating { attempt: u32, context: Arc<AssembledContext> },
    Verifying { attempt: u32, context: Arc<AssembledContext>, generated: String },
    Retrying { last: Attempt, context: Arc<AssembledContext> },
    Completed(Attempt),
    Failed(Attempt),
}

/// Outcome of a verified attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Retry,
    GiveUp,
}

/// Transition rule after verifying attempt `attempt` (1-based).
pub fn decide(attempt: u32, confidence: f64) -> Decision {
    if confidence > ACCEPT_THRESHOLD {
        Decision::Accept
    } else if attempt < MAX_ATTEMPTS {
        Decision::Retry
    } else {
        Decision::GiveUp
    }
}

// ── Progress ──────────────────────────────────────────────────────────────────

/// Progress of the first stage event in attempt `attempt`.
pub const ANALYZING_PROGRESS: u32 = 10;

pub fn base_progress(attempt: u32) -> u32 {
    20 + attempt.saturating_sub(1) * 25
}

/// Raw progress of the `n`-th (1-based) fragment of attempt `attempt`.
pub fn fragment_progress(attempt: u32, n: u32) -> u32 {
    let base = base_progress(attempt);
    (base + 10 + n).min(base + 50)
}

/// Keeps one attempt's progress non-decreasing and below the terminal value.
#[derive(Debug, Default)]
struct ProgressMeter {
    last: u8,
}

impl ProgressMeter {
    fn reset(&mut self) {
        self.last = 0;
    }

    fn report(&mut self, raw: u32) -> u8 {
        let capped = raw.min(u32::from(MAX_STAGE_PROGRESS)) as u8;
        self.last = self.last.max(capped);
        self.last
    }
}

// ── Resolution ────────────────────────────────────────────────────────────────

/// How a request ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Completed(Attempt),
    /// Every attempt fell at or below the threshold.
    Exhausted(Attempt),
    NoDocuments,
    /// Generation failure, request ceiling, or panic.
    Errored(String),
    /// The client went away; nothing more was sent.
    Disconnected,
}

impl Resolution {
    /// The stream's closing event; `None` when nobody is listening.
    pub fn terminal_event(&self) -> Option<StreamEvent> {
        match self {
            Resolution::Completed(a) => Some(StreamEvent::Completed {
                final_text: a.verified_text.clone(),
                confidence: a.confidence,
                attempt: label(a.index),
            }),
            Resolution::Exhausted(a) => Some(StreamEvent::Failed {
                message: EXHAUSTED_MESSAGE.to_string(),
                final_text: EXHAUSTED_MESSAGE.to_string(),
                confidence: Some(a.confidence),
                attempt: Some(label(a.index)),
                retry_available: true,
            }),
            Resolution::NoDocuments => Some(StreamEvent::Failed {
                message: NO_DOCUMENTS_MESSAGE.to_string(),
                final_text: NO_DOCUMENTS_MESSAGE.to_string(),
                confidence: None,
                attempt: None,
                retry_available: false,
            }),
            Resolution::Errored(error) => Some(StreamEvent::Error { error: error.clone() }),
            Resolution::Disconnected => None,
        }
    }

    /// Write the terminal state into `query`.
    pub fn apply(&self, query: &mut Query) {
        match self {
            Resolution::Completed(a) => {
                query.status = QueryStatus::Completed;
                query.result = Some(a.verified_text.clone());
                query.confidence = Some(a.confidence);
                query.attempts = Some(a.index);
            }
            Resolution::Exhausted(a) => {
                query.status = QueryStatus::Failed;
                query.result = Some(EXHAUSTED_MESSAGE.to_string());
                query.confidence = Some(a.confidence);
                query.attempts = Some(a.index);
            }
            Resolution::NoDocuments => {
                query.status = QueryStatus::Failed;
                query.result = Some(NO_DOCUMENTS_MESSAGE.to_string());
            }
            Resolution::Errored(error) => {
                query.status = QueryStatus::Failed;
                query.result = Some(error.clone());
            }
            Resolution::Disconnected => {
                query.status = QueryStatus::Failed;
                query.result = Some("client disconnected".to_string());
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Resolution::Completed(_) => "completed",
            Resolution::Exhausted(_) => "exhausted",
            Resolution::NoDocuments => "no_documents",
            Resolution::Errored(_) => "error",
            Resolution::Disconnected => "disconnected",
        }
    }
}

fn label(index: u32) -> AttemptLabel {
    AttemptLabel { index, max: MAX_ATTEMPTS }
}

/// Why the state machine stopped before a terminal state.
enum Halt {
    Disconnected,
    Error(String),
}

impl From<Disconnected> for Halt {
    fn from(_: Disconnected) -> Self {
        Halt::Disconnected
    }
}

impl From<GenerationError> for Halt {
    fn from(e: GenerationError) -> Self {
        Halt::Error(e.to_string())
    }
}

/// Run `fut` unless the client disconnects first.
async fn cancellable<F: Future>(sink: &EventSink, fut: F) -> Result<F::Output, Halt> {
    tokio::select! {
        biased;
        _ = sink.closed() => Err(Halt::Disconnected),
        out = fut => Ok(out),
    }
}

// ── Controller ────────────────────────────────────────────────────────────────

pub struct RetryController {
    generator: Generator,
    verifier: Verifier,
    context_max_chars: usize,
    request_timeout: Duration,
}

impl RetryController {
    pub fn new(
        generator: Generator,
        verifier: Verifier,
        context_max_chars: usize,
        request_timeout: Duration,
    ) -> Self {
        Self { generator, verifier, context_max_chars, request_timeout }
    }

    /// Build both stages from config. Offline confidences come from a
    /// [`RandomConfidence`] seeded with `offline_seed`.
    pub fn from_config(backend: Backend, cfg: &PipelineConfig) -> Self {
        let source = Box::new(RandomConfidence::from_seed(cfg.offline_seed));
        Self::with_confidence_source(backend, cfg, source)
    }

    pub fn with_confidence_source(
        backend: Backend,
        cfg: &PipelineConfig,
        source: Box<dyn ConfidenceSource>,
    ) -> Self {
        let generator =
            Generator::new(backend.clone(), cfg.generation_max_tokens, cfg.call_timeout);
        let verifier = Verifier::new(
            backend,
            cfg.on_verification_failure,
            source,
            cfg.verify_context_chars,
            cfg.verification_max_tokens,
            cfg.call_timeout,
        );
        Self::new(generator, verifier, cfg.context_max_chars, cfg.request_timeout)
    }

    /// Answer `query` over `documents`, streaming events into `sink`.
    ///
    /// Moves `query` to `processing` on entry and to its terminal status on
    /// return. Exactly one terminal event is emitted unless the client has
    /// disconnected or stopped reading. The stages, including every
    /// non-terminal emit, share the `request_timeout` budget; the terminal
    /// emit gets [`TERMINAL_EMIT_GRACE`] on top.
    pub async fn run(
        &self,
        query: &mut Query,
        documents: Vec<DocumentContext>,
        sink: &EventSink,
    ) -> Resolution {
        query.status = QueryStatus::Processing;
        let started = Instant::now();
        debug!(query_id = %query.id, documents = documents.len(), "query processing");

        let driven = AssertUnwindSafe(tokio::time::timeout(
            self.request_timeout,
            self.drive(&query.text, documents, sink),
        ))
        .catch_unwind()
        .await;

        let resolution = match driven {
            Ok(Ok(resolution)) => resolution,
            Ok(Err(_)) => Resolution::Errored(format!(
                "request exceeded {}s time limit",
                self.request_timeout.as_secs()
            )),
            Err(panic) => Resolution::Errored(format!("internal error: {}", panic_message(&*panic))),
        };

        if let Some(event) = resolution.terminal_event() {
            match tokio::time::timeout(TERMINAL_EMIT_GRACE, sink.emit(event)).await {
                Ok(Ok(())) => {}
                Ok(Err(Disconnected)) => {
                    warn!(query_id = %query.id, "client gone before terminal event");
                }
                Err(_) => {
                    warn!(query_id = %query.id, "client stopped reading; terminal event dropped");
                }
            }
        }
        resolution.apply(query);

        info!(
            query_id = %query.id,
            outcome = resolution.kind(),
            attempts = ?query.attempts,
            confidence = ?query.confidence,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "query finished"
        );
        resolution
    }

    async fn drive(
        &self,
        query: &str,
        documents: Vec<DocumentContext>,
        sink: &EventSink,
    ) -> Resolution {
        match self.step_through(query, documents, sink).await {
            Ok(resolution) => resolution,
            Err(Halt::Disconnected) => {
                warn!("client disconnected; abandoning query");
                Resolution::Disconnected
            }
            Err(Halt::Error(e)) => Resolution::Errored(e),
        }
    }

    async fn step_through(
        &self,
        query: &str,
        documents: Vec<DocumentContext>,
        sink: &EventSink,
    ) -> Result<Resolution, Halt> {
        let mut meter = ProgressMeter::default();
        let mut state = State::Analyzing;

        loop {
            state = match state {
                State::Analyzing => {
                    if documents.is_empty() {
                        return Ok(Resolution::NoDocuments);
                    }
                    let context = Arc::new(assemble(&documents, self.context_max_chars));
                    debug!(
                        chars = context.char_len(),
                        sources = context.sources.len(),
                        "context assembled"
                    );
                    State::Generating { attempt: 1, context }
                }

                State::Generating { attempt, context } => {
                    meter.reset();
                    let generated = self.generate(query, attempt, &context, &mut meter, sink).await?;
                    State::Verifying { attempt, context, generated }
                }

                State::Verifying { attempt, context, generated } => {
                    sink.emit(StreamEvent::Progress {
                        progress: meter.report(base_progress(attempt) + 60),
                        status: Status::Verifying,
                        message: format!("Verifying accuracy {}", label(attempt)),
                        attempt: label(attempt),
                    })
                    .await?;

                    let verification =
                        cancellable(sink, self.verifier.verify(query, &generated, &context, attempt))
                            .await?;
                    let record = Attempt {
                        index: attempt,
                        generated_text: generated,
                        confidence: verification.confidence,
                        verified_text: verification.verified_text,
                        accepted: false,
                    };

                    let decision = decide(attempt, record.confidence);
                    debug!(attempt, confidence = record.confidence, ?decision, "attempt verified");
                    match decision {
                        Decision::Accept => State::Completed(Attempt { accepted: true, ..record }),
                        Decision::Retry => State::Retrying { last: record, context },
                        Decision::GiveUp => State::Failed(record),
                    }
                }

                State::Retrying { last, context } => {
                    sink.emit(StreamEvent::Retry {
                        progress: meter.report(base_progress(last.index) + 70),
                        confidence: last.confidence,
                        attempt: label(last.index),
                    })
                    .await?;
                    State::Generating { attempt: last.index + 1, context }
                }

                State::Completed(attempt) => return Ok(Resolution::Completed(attempt)),
                State::Failed(attempt) => return Ok(Resolution::Exhausted(attempt)),
            };
        }
    }

    /// Stream one candidate answer, forwarding each fragment.
    async fn generate(
        &self,
        query: &str,
        attempt: u32,
        context: &AssembledContext,
        meter: &mut ProgressMeter,
        sink: &EventSink,
    ) -> Result<String, Halt> {
        sink.emit(StreamEvent::Progress {
            progress: meter.report(ANALYZING_PROGRESS),
            status: Status::AnalyzingDocuments,
            message: format!("Analyzing documents (Attempt {})", label(attempt)),
            attempt: label(attempt),
        })
        .await?;
        sink.emit(StreamEvent::Progress {
            progress: meter.report(base_progress(attempt) + 10),
            status: Status::Generating,
            message: format!("Generating response {}", label(attempt)),
            attempt: label(attempt),
        })
        .await?;

        let mut fragments = cancellable(sink, self.generator.generate(query, context)).await??;
        let mut text = String::new();
        let mut count = 0u32;

        while let Some(next) = cancellable(sink, fragments.next()).await? {
            let fragment = next.map_err(GenerationError::from)?;
            if fragment.is_empty() {
                continue;
            }
            count += 1;
            text.push_str(&fragment);
            sink.emit(StreamEvent::Fragment {
                text: fragment,
                progress: meter.report(fragment_progress(attempt, count)),
                attempt: label(attempt),
            })
            .await?;
        }

        debug!(attempt, fragments = count, chars = text.chars().count(), "candidate generated");
        Ok(text)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
