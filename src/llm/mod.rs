//! LLM provider abstraction.
//!
//! `LlmProvider` is an enum over concrete provider implementations.
//! Add a new variant + module in `providers/` for each additional backend.
//!
//! Provider instances are shared immutable capabilities; clone them freely.
//! [`Backend`] wraps the provider choice made once at startup: either a live
//! provider or the deterministic offline mode that never leaves the process.

pub mod providers;

use std::pin::Pin;

use futures_util::Stream;
use thiserror::Error;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("malformed provider stream: {0}")]
    Decode(String),
    #[error("provider call timed out after {0}s")]
    Timeout(u64),
}

// ── Request / stream types ────────────────────────────────────────────────────

/// One chat round-trip: a system instruction, a user message, and a cap on
/// generated tokens.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
}

/// Finite, non-restartable sequence of text deltas.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

// ── Provider enum ─────────────────────────────────────────────────────────────

/// All available provider backends.
///
/// Enum dispatch avoids `dyn` trait objects and the `async-trait` dependency.
/// Adding a backend = new module + new variant + new arms below.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    OpenAiCompatible(providers::openai_compatible::OpenAiCompatibleProvider),
    Scripted(providers::scripted::ScriptedProvider),
}

impl LlmProvider {
    /// Send `request` and return the full text reply.
    pub async fn complete(&self, request: &ChatRequest) -> Result<String, ProviderError> {
        match self {
            LlmProvider::OpenAiCompatible(p) => p.complete(request).await,
            LlmProvider::Scripted(p) => p.complete(request).await,
        }
    }

    /// Send `request` and return the reply as a stream of text deltas.
    pub async fn stream(&self, request: &ChatRequest) -> Result<FragmentStream, ProviderError> {
        match self {
            LlmProvider::OpenAiCompatible(p) => p.stream(request).await,
            LlmProvider::Scripted(p) => p.stream(request).await,
        }
    }
}

// ── Backend ───────────────────────────────────────────────────────────────────

/// Operating mode of the generation and verification stages.
///
/// Chosen once at startup by [`providers::build`] and injected into the
/// pipeline; never switched per call.
#[derive(Debug, Clone)]
pub enum Backend {
    /// Deterministic answers and locally sampled confidences; no network.
    Offline,
    /// Every stage calls the given provider.
    Live(LlmProvider),
}

impl Backend {
    pub fn mode_name(&self) -> &'static str {
        match self {
            Backend::Offline => "offline",
            Backend::Live(_) => "live",
        }
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, Backend::Offline)
    }
}
