//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory,
//! then applies `DOCQUERY_BIND` and `DOCQUERY_LOG_LEVEL` env overrides.
//! The LLM API key is read from `LLM_API_KEY` (or `OPENAI_API_KEY`) and is
//! never sourced from TOML.

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::error::AppError;
use crate::pipeline::verification::VerificationFailurePolicy;

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address the HTTP listener binds to.
    pub bind: String,
}

/// OpenAI / OpenAI-compatible provider configuration.
/// Populated from `[llm.openai]` in the TOML.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Full chat completions endpoint URL.
    pub api_base_url: String,
    /// Model name passed in the request body.
    pub model: String,
    /// Sampling temperature (ignored for models that forbid it).
    pub temperature: f32,
    /// Per-request HTTP timeout in seconds.
    pub timeout_seconds: u64,
    /// When `true` a missing API key selects offline mode instead of
    /// calling the endpoint. Set to `false` for keyless local servers.
    pub require_api_key: bool,
}

/// LLM configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Which backend is active (`"openai"` or `"offline"`).
    /// Maps to `default` in `[llm]` TOML.
    pub provider: String,
    /// Config for the OpenAI / OpenAI-compatible provider (`[llm.openai]`).
    pub openai: OpenAiConfig,
}

/// Tunables for the generate-then-verify pipeline (`[pipeline]`).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Character budget of the assembled document context.
    pub context_max_chars: usize,
    /// Leading slice of the context handed to the verifier.
    pub verify_context_chars: usize,
    pub generation_max_tokens: u32,
    pub verification_max_tokens: u32,
    /// Bound on every outbound call and every streamed fragment wait.
    pub call_timeout: Duration,
    /// Wall-clock ceiling for one whole request.
    pub request_timeout: Duration,
    pub on_verification_failure: VerificationFailurePolicy,
    /// Fixed seed for offline confidences; `None` seeds from OS entropy.
    pub offline_seed: Option<u64>,
}

/// Fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub service_name: String,
    pub log_level: String,
    /// Optional log file (already expanded, no `~`). `None` logs to stderr.
    pub log_file: Option<PathBuf>,
    pub server: ServerConfig,
    pub llm: LlmConfig,
    /// API key from `LLM_API_KEY` / `OPENAI_API_KEY`. Never sourced from TOML.
    pub llm_api_key: Option<String>,
    pub pipeline: PipelineConfig,
}

/// Raw TOML shape, deserialized before resolution.
#[derive(Deserialize)]
struct RawConfig {
    server: RawServer,
    #[serde(default)]
    llm: RawLlm,
    #[serde(default)]
    pipeline: RawPipeline,
}

#[derive(Deserialize)]
struct RawServer {
    #[serde(default = "default_service_name")]
    name: String,
    #[serde(default = "default_bind")]
    bind: String,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    log_file: Option<String>,
}

#[derive(Deserialize)]
struct RawLlm {
    /// Maps to `default = "..."` in `[llm]`.
    #[serde(rename = "default", default = "default_llm_provider")]
    provider: String,
    #[serde(default)]
    openai: RawOpenAiConfig,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self { provider: default_llm_provider(), openai: RawOpenAiConfig::default() }
    }
}

#[derive(Deserialize)]
struct RawOpenAiConfig {
    #[serde(default = "default_openai_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_openai_model")]
    model: String,
    #[serde(default = "default_openai_temperature")]
    temperature: f32,
    #[serde(default = "default_openai_timeout_seconds")]
    timeout_seconds: u64,
    #[serde(default = "default_true")]
    require_api_key: bool,
}

impl Default for RawOpenAiConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_openai_api_base_url(),
            model: default_openai_model(),
            temperature: default_openai_temperature(),
            timeout_seconds: default_openai_timeout_seconds(),
            require_api_key: true,
        }
    }
}

#[derive(Deserialize)]
struct RawPipeline {
    #[serde(default = "default_context_max_chars")]
    context_max_chars: usize,
    #[serde(default = "default_verify_context_chars")]
    verify_context_chars: usize,
    #[serde(default = "default_generation_max_tokens")]
    generation_max_tokens: u32,
    #[serde(default = "default_verification_max_tokens")]
    verification_max_tokens: u32,
    #[serde(default = "default_call_timeout_seconds")]
    call_timeout_seconds: u64,
    #[serde(default = "default_request_timeout_seconds")]
    request_timeout_seconds: u64,
    #[serde(default = "default_failure_policy")]
    on_verification_failure: String,
    #[serde(default)]
    offline_seed: Option<u64>,
}

impl Default for RawPipeline {
    fn default() -> Self {
        Self {
            context_max_chars: default_context_max_chars(),
            verify_context_chars: default_verify_context_chars(),
            generation_max_tokens: default_generation_max_tokens(),
            verification_max_tokens: default_verification_max_tokens(),
            call_timeout_seconds: default_call_timeout_seconds(),
            request_timeout_seconds: default_request_timeout_seconds(),
            on_verification_failure: default_failure_policy(),
            offline_seed: None,
        }
    }
}

fn default_service_name() -> String { "docquery".to_string() }
fn default_bind() -> String { "127.0.0.1:5001".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_llm_provider() -> String { "openai".to_string() }
fn default_openai_api_base_url() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_openai_model() -> String { "gpt-4o-mini".to_string() }
fn default_openai_temperature() -> f32 { 0.2 }
fn default_openai_timeout_seconds() -> u64 { 60 }
fn default_context_max_chars() -> usize { 8000 }
fn default_verify_context_chars() -> usize { 3000 }
fn default_generation_max_tokens() -> u32 { 500 }
fn default_verification_max_tokens() -> u32 { 300 }
fn default_call_timeout_seconds() -> u64 { 60 }
fn default_request_timeout_seconds() -> u64 { 300 }
fn default_failure_policy() -> String { "fail_open".to_string() }

fn default_true() -> bool {
    true
}

/// Load config from `config/default.toml`, then apply env-var overrides.
pub fn load() -> Result<Config, AppError> {
    let bind_override = env::var("DOCQUERY_BIND").ok();
    let log_level_override = env::var("DOCQUERY_LOG_LEVEL").ok();
    let api_key = env::var("LLM_API_KEY")
        .or_else(|_| env::var("OPENAI_API_KEY"))
        .ok()
        .filter(|k| !k.trim().is_empty());
    load_from(
        Path::new("config/default.toml"),
        bind_override.as_deref(),
        log_level_override.as_deref(),
        api_key,
    )
}

/// Load from an explicit path with optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(
    path: &Path,
    bind_override: Option<&str>,
    log_level_override: Option<&str>,
    api_key: Option<String>,
) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    let s = parsed.server;
    let p = parsed.pipeline;

    let on_verification_failure = p.on_verification_failure.parse::<VerificationFailurePolicy>()
        .map_err(|e| AppError::Config(format!("pipeline.on_verification_failure: {e}")))?;

    if p.context_max_chars == 0 {
        return Err(AppError::Config("pipeline.context_max_chars must be positive".into()));
    }
    if p.call_timeout_seconds == 0 || p.request_timeout_seconds == 0 {
        return Err(AppError::Config("pipeline timeouts must be positive".into()));
    }

    Ok(Config {
        service_name: s.name,
        log_level: log_level_override.unwrap_or(&s.log_level).to_string(),
        log_file: s.log_file.as_deref().map(expand_home),
        server: ServerConfig {
            bind: bind_override.unwrap_or(&s.bind).to_string(),
        },
        llm: LlmConfig {
            provider: parsed.llm.provider,
            openai: OpenAiConfig {
                api_base_url: parsed.llm.openai.api_base_url,
                model: parsed.llm.openai.model,
                temperature: parsed.llm.openai.temperature,
                timeout_seconds: parsed.llm.openai.timeout_seconds,
                require_api_key: parsed.llm.openai.require_api_key,
            },
        },
        llm_api_key: api_key,
        pipeline: PipelineConfig {
            context_max_chars: p.context_max_chars,
            verify_context_chars: p.verify_context_chars,
            generation_max_tokens: p.generation_max_tokens,
            verification_max_tokens: p.verification_max_tokens,
            call_timeout: Duration::from_secs(p.call_timeout_seconds),
            request_timeout: Duration::from_secs(p.request_timeout_seconds),
            on_verification_failure,
            offline_seed: p.offline_seed,
        },
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

impl PipelineConfig {
    /// Pipeline settings for tests: short timeouts and a fixed offline seed.
    #[doc(hidden)]
    pub fn test_default() -> Self {
        Self {
            context_max_chars: default_context_max_chars(),
            verify_context_chars: default_verify_context_chars(),
            generation_max_tokens: default_generation_max_tokens(),
            verification_max_tokens: default_verification_max_tokens(),
            call_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            on_verification_failure: VerificationFailurePolicy::FailOpen,
            offline_seed: Some(7),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL_TOML: &str = r#"
[server]
name = "test-docquery"
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parse_minimal_config_fills_defaults() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), None, None, None).unwrap();
        assert_eq!(cfg.service_name, "test-docquery");
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.server.bind, "127.0.0.1:5001");
        assert_eq!(cfg.llm.provider, "openai");
        assert!(cfg.llm.openai.require_api_key);
        assert_eq!(cfg.pipeline.context_max_chars, 8000);
        assert_eq!(cfg.pipeline.verify_context_chars, 3000);
        assert_eq!(cfg.pipeline.call_timeout, Duration::from_secs(60));
        assert_eq!(cfg.pipeline.on_verification_failure, VerificationFailurePolicy::FailOpen);
        assert!(cfg.llm_api_key.is_none());
        assert!(cfg.log_file.is_none());
    }

    #[test]
    fn pipeline_section_overrides_defaults() {
        let f = write_toml(
            r#"
[server]
bind = "0.0.0.0:9000"

[pipeline]
context_max_chars = 1200
on_verification_failure = "fail_closed"
offline_seed = 42
request_timeout_seconds = 10
"#,
        );
        let cfg = load_from(f.path(), None, None, Some("sk-test".into())).unwrap();
        assert_eq!(cfg.server.bind, "0.0.0.0:9000");
        assert_eq!(cfg.pipeline.context_max_chars, 1200);
        assert_eq!(cfg.pipeline.on_verification_failure, VerificationFailurePolicy::FailClosed);
        assert_eq!(cfg.pipeline.offline_seed, Some(42));
        assert_eq!(cfg.pipeline.request_timeout, Duration::from_secs(10));
        assert_eq!(cfg.llm_api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn unknown_failure_policy_errors() {
        let f = write_toml(
            r#"
[server]
[pipeline]
on_verification_failure = "shrug"
"#,
        );
        let msg = load_from(f.path(), None, None, None).unwrap_err().to_string();
        assert!(msg.contains("on_verification_failure"));
    }

    #[test]
    fn zero_budget_rejected() {
        let f = write_toml("[server]\n[pipeline]\ncontext_max_chars = 0\n");
        assert!(load_from(f.path(), None, None, None).is_err());
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = dirs::home_dir().expect("home dir must exist in test env");
        let expanded = expand_home("~/.docquery/log.txt");
        assert!(expanded.starts_with(&home));
        assert!(expanded.ends_with("log.txt"));
    }

    #[test]
    fn absolute_path_unchanged() {
        let p = expand_home("/absolute/path");
        assert_eq!(p, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn missing_file_errors() {
        let result = load_from(Path::new("/nonexistent/config.toml"), None, None, None);
        assert!(result.is_err());
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("config error"));
    }

    #[test]
    fn env_bind_override() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), Some("127.0.0.1:7777"), None, None).unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:7777");
    }

    #[test]
    fn env_log_level_override() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), None, Some("debug"), None).unwrap();
        assert_eq!(cfg.log_level, "debug");
    }
}
