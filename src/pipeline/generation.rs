//! Generation stage — candidate answers as a stream of text fragments.
//!
//! Offline mode streams a deterministic answer word by word; live mode
//! streams deltas from the provider. Every fragment wait is bounded by the
//! call timeout. Failures are reported, never retried here.

use std::time::Duration;

use futures_util::{StreamExt, stream};
use thiserror::Error;

use crate::llm::providers::scripted::split_fragments;
use crate::llm::{Backend, ChatRequest, FragmentStream, ProviderError};

use super::context::AssembledContext;
use super::{offline, prompts};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation failed: {0}")]
    Provider(#[from] ProviderError),
}

#[derive(Debug, Clone)]
pub struct Generator {
    backend: Backend,
    max_tokens: u32,
    call_timeout: Duration,
}

impl Generator {
    pub fn new(backend: Backend, max_tokens: u32, call_timeout: Duration) -> Self {
        Self { backend, max_tokens, call_timeout }
    }

    /// Start generating an answer to `query` over `context`.
    ///
    /// The returned stream is finite and cannot be restarted; a new attempt
    /// calls `generate` again.
    pub async fn generate(
        &self,
        query: &str,
        context: &AssembledContext,
    ) -> Result<FragmentStream, GenerationError> {
        match &self.backend {
            Backend::Offline => {
                let fragments: Vec<Result<String, ProviderError>> =
                    split_fragments(&offline::answer(query, context)).into_iter().map(Ok).collect();
                Ok(Box::pin(stream::iter(fragments)))
            }
            Backend::Live(provider) => {
                let request = ChatRequest {
                    system: prompts::ANSWER_SYSTEM.to_string(),
                    user: prompts::answer_prompt(query, &context.text),
                    max_tokens: self.max_tokens,
                };
                let secs = self.call_timeout.as_secs();
                let started = tokio::time::timeout(self.call_timeout, provider.stream(&request))
                    .await
                    .map_err(|_| ProviderError::Timeout(secs))??;
                Ok(with_idle_timeout(started, self.call_timeout))
            }
        }
    }
}

/// Bound every wait for the next fragment by `limit`. A stall yields one
/// `Timeout` error and ends the stream.
pub fn with_idle_timeout(inner: FragmentStream, limit: Duration) -> FragmentStream {
    let secs = limit.as_secs();
    Box::pin(stream::unfold(Some(inner), move |state| async move {
        let mut inner = state?;
        match tokio::time::timeout(limit, inner.next()).await {
            Ok(Some(Ok(fragment))) => Some((Ok(fragment), Some(inner))),
            Ok(Some(Err(e))) => Some((Err(e), None)),
            Ok(None) => None,
            Err(_) => Some((Err(ProviderError::Timeout(secs)), None)),
        }
    }))
}
