//! LLM provider implementations.
//!
//! `build(config, api_key)` is the factory, called once at startup.
//! Adding a new backend = new module + new match arm.

pub mod openai_compatible;
pub mod scripted;

use tracing::{info, warn};

use crate::config::LlmConfig;
use crate::llm::{Backend, LlmProvider, ProviderError};

/// Resolve the operating [`Backend`] from config and an optional API key.
///
/// `api_key` is sourced from the environment (never TOML). A live provider
/// that requires a key but has none degrades to offline mode so the service
/// still starts on machines without credentials.
pub fn build(config: &LlmConfig, api_key: Option<String>) -> Result<Backend, ProviderError> {
    match config.provider.as_str() {
        "offline" | "dummy" => {
            info!("llm backend: offline");
            Ok(Backend::Offline)
        }
        "openai" | "openai-compatible" => {
            let oai = &config.openai;
            if api_key.is_none() && oai.require_api_key {
                warn!("no LLM API key configured; falling back to offline mode");
                return Ok(Backend::Offline);
            }
            let p = openai_compatible::OpenAiCompatibleProvider::new(
                oai.api_base_url.clone(),
                oai.model.clone(),
                oai.temperature,
                oai.timeout_seconds,
                api_key,
            )?;
            info!(model = %oai.model, url = %oai.api_base_url, "llm backend: live");
            Ok(Backend::Live(LlmProvider::OpenAiCompatible(p)))
        }
        _ => Err(ProviderError::UnknownProvider(config.provider.clone())),
    }
}
