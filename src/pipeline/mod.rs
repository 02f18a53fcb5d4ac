//! Streaming generate-then-verify pipeline.
//!
//! [`controller::RetryController`] is the entry point; the other modules are
//! its stages and the event vocabulary it speaks. [`suggestions`] holds the
//! question extraction and swap helpers that share the same backend.

pub mod confidence;
pub mod context;
pub mod controller;
pub mod events;
pub mod generation;
pub mod offline;
pub mod prompts;
pub mod suggestions;
pub mod verification;

pub use context::{AssembledContext, DocumentContext};
pub use controller::{Attempt, MAX_ATTEMPTS, Resolution, RetryController};
pub use events::{EventSink, Status, StreamEvent};
pub use suggestions::{ExtractedQuery, QuerySuggester};
pub use verification::{Verification, VerificationFailurePolicy};
