//! Verification stage — scores a candidate answer against its sources.
//!
//! Live mode asks the provider for a JSON verdict and tolerates sloppy
//! replies: the first well-formed JSON object anywhere in the text is used,
//! and missing fields take defaults. A call that fails outright, times out,
//! or yields no JSON object at all falls back to the configured
//! [`VerificationFailurePolicy`]. Verification never raises.

use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::llm::{Backend, ChatRequest, ProviderError};

use super::confidence::ConfidenceSource;
use super::context::AssembledContext;
use super::prompts;

/// Offline confidence for every attempt after the first.
pub const OFFLINE_RETRY_CONFIDENCE: f64 = 0.95;
/// Confidence used when the verdict omits it or it is not a number.
pub const DEFAULT_VERDICT_CONFIDENCE: f64 = 0.9;
/// Confidence reported by the fail-open fallback.
pub const FAIL_OPEN_CONFIDENCE: f64 = 0.8;

/// What a verification failure turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerificationFailurePolicy {
    /// Accept the candidate unchanged with [`FAIL_OPEN_CONFIDENCE`].
    #[default]
    FailOpen,
    /// Reject the candidate with zero confidence.
    FailClosed,
}

impl VerificationFailurePolicy {
    pub fn fallback(self, answer: &str) -> Verification {
        match self {
            VerificationFailurePolicy::FailOpen => Verification {
                accurate: true,
                verified_text: answer.to_string(),
                confidence: FAIL_OPEN_CONFIDENCE,
            },
            VerificationFailurePolicy::FailClosed => Verification {
                accurate: false,
                verified_text: answer.to_string(),
                confidence: 0.0,
            },
        }
    }
}

impl FromStr for VerificationFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "fail_open" => Ok(Self::FailOpen),
            "fail_closed" => Ok(Self::FailClosed),
            other => Err(format!("unknown policy {other:?} (expected fail_open or fail_closed)")),
        }
    }
}

/// Outcome of one verification call.
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub accurate: bool,
    /// Corrected answer when the verifier supplied one, else the candidate.
    pub verified_text: String,
    /// Always within [0, 1].
    pub confidence: f64,
}

pub struct Verifier {
    backend: Backend,
    policy: VerificationFailurePolicy,
    source: Mutex<Box<dyn ConfidenceSource>>,
    verify_context_chars: usize,
    max_tokens: u32,
    call_timeout: Duration,
}

impl Verifier {
    pub fn new(
        backend: Backend,
        policy: VerificationFailurePolicy,
        source: Box<dyn ConfidenceSource>,
        verify_context_chars: usize,
        max_tokens: u32,
        call_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            policy,
            source: Mutex::new(source),
            verify_context_chars,
            max_tokens,
            call_timeout,
        }
    }

    /// Score `answer` for `query` against `context`. `attempt` is 1-based.
    pub async fn verify(
        &self,
        query: &str,
        answer: &str,
        context: &AssembledContext,
        attempt: u32,
    ) -> Verification {
        let provider = match &self.backend {
            Backend::Offline => return self.verify_offline(answer, attempt),
            Backend::Live(provider) => provider,
        };

        let request = ChatRequest {
            system: prompts::VERIFY_SYSTEM.to_string(),
            user: prompts::verify_prompt(query, answer, context.excerpt(self.verify_context_chars)),
            max_tokens: self.max_tokens,
        };

        let reply = tokio::time::timeout(self.call_timeout, provider.complete(&request))
            .await
            .map_err(|_| ProviderError::Timeout(self.call_timeout.as_secs()))
            .and_then(|r| r);

        match reply {
            Ok(text) => match parse_verdict(&text, answer) {
                Some(v) => {
                    debug!(attempt, confidence = v.confidence, accurate = v.accurate, "verdict parsed");
                    v
                }
                None => {
                    warn!(attempt, policy = ?self.policy, "verification reply held no JSON object; applying fallback");
                    self.policy.fallback(answer)
                }
            },
            Err(e) => {
                warn!(attempt, policy = ?self.policy, "verification call failed: {e}; applying fallback");
                self.policy.fallback(answer)
            }
        }
    }

    fn verify_offline(&self, answer: &str, attempt: u32) -> Verification {
        let confidence = if attempt <= 1 {
            match self.source.lock() {
                Ok(mut src) => src.sample().clamp(0.0, 1.0),
                Err(_) => {
                    warn!("confidence source lock poisoned; applying fallback");
                    return self.policy.fallback(answer);
                }
            }
        } else {
            OFFLINE_RETRY_CONFIDENCE
        };
        debug!(attempt, confidence, "offline verdict");
        Verification { accurate: true, verified_text: answer.to_string(), confidence }
    }
}

/// Build a verdict from the first JSON object in `reply`.
/// Returns `None` when the reply holds no well-formed object.
pub fn parse_verdict(reply: &str, answer: &str) -> Option<Verification> {
    let obj = first_json_object(reply)?;

    let accurate = obj.get("is_accurate").and_then(Value::as_bool).unwrap_or(true);
    let confidence = obj
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(DEFAULT_VERDICT_CONFIDENCE)
        .clamp(0.0, 1.0);
    let verified_text = obj
        .get("corrected_answer")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(answer)
        .to_string();

    Some(Verification { accurate, verified_text, confidence })
}

/// The first well-formed JSON object in `text`, skipping stray braces.
pub(crate) fn first_json_object(text: &str) -> Option<Map<String, Value>> {
    text.match_indices('{').find_map(|(idx, _)| {
        let mut values = serde_json::Deserializer::from_str(&text[idx..]).into_iter::<Value>();
        match values.next() {
            Some(Ok(Value::Object(map))) => Some(map),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmProvider;
    use crate::llm::providers::scripted::{ScriptedProvider, ScriptedReply};
    use crate::pipeline::confidence::ScriptedConfidence;
    use crate::pipeline::context::{DocumentContext, assemble};

    fn ctx() -> AssembledContext {
        assemble(&[DocumentContext::new("a.pdf", &"clause ".repeat(1000))], 8000)
    }

    fn live(replies: Vec<ScriptedReply>, policy: VerificationFailurePolicy) -> (Verifier, ScriptedProvider) {
        let provider = ScriptedProvider::new(replies);
        let v = Verifier::new(
            Backend::Live(LlmProvider::Scripted(provider.clone())),
            policy,
            Box::new(ScriptedConfidence::new(Vec::<f64>::new())),
            3000,
            300,
            Duration::from_secs(1),
        );
        (v, provider)
    }

    #[test]
    fn parses_fenced_json() {
        let reply = "```json\n{\"is_accurate\": false, \"corrected_answer\": \"fixed\", \"confidence\": 0.42}\n```";
        let v = parse_verdict(reply, "orig").unwrap();
        assert!(!v.accurate);
        assert_eq!(v.verified_text, "fixed");
        assert_eq!(v.confidence, 0.42);
    }

    #[test]
    fn skips_braces_in_prose() {
        let reply = "Sure {not json} here you go: {\"confidence\": 0.7} thanks";
        let v = parse_verdict(reply, "orig").unwrap();
        assert_eq!(v.confidence, 0.7);
        assert_eq!(v.verified_text, "orig");
    }

    #[test]
    fn missing_fields_take_defaults() {
        let v = parse_verdict("{}", "orig").unwrap();
        assert!(v.accurate);
        assert_eq!(v.confidence, DEFAULT_VERDICT_CONFIDENCE);
        assert_eq!(v.verified_text, "orig");
    }

    #[test]
    fn non_numeric_confidence_and_blank_correction() {
        let v = parse_verdict(r#"{"confidence": "high", "corrected_answer": "  "}"#, "orig").unwrap();
        assert_eq!(v.confidence, DEFAULT_VERDICT_CONFIDENCE);
        assert_eq!(v.verified_text, "orig");
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(parse_verdict(r#"{"confidence": 7}"#, "a").unwrap().confidence, 1.0);
        assert_eq!(parse_verdict(r#"{"confidence": -1}"#, "a").unwrap().confidence, 0.0);
    }

    #[test]
    fn non_json_reply_is_none() {
        assert!(parse_verdict("I think it is accurate.", "a").is_none());
        assert!(parse_verdict("[1, 2, 3]", "a").is_none());
    }

    #[test]
    fn policy_parses_from_str() {
        assert_eq!(
            "fail_open".parse::<VerificationFailurePolicy>(),
            Ok(VerificationFailurePolicy::FailOpen)
        );
        assert_eq!(
            " fail_closed ".parse::<VerificationFailurePolicy>(),
            Ok(VerificationFailurePolicy::FailClosed)
        );
        assert!("maybe".parse::<VerificationFailurePolicy>().is_err());
    }

    #[tokio::test]
    async fn call_failure_fails_open() {
        let (v, _) = live(vec![ScriptedReply::Fail("boom".into())], VerificationFailurePolicy::FailOpen);
        let out = v.verify("q", "candidate", &ctx(), 1).await;
        assert_eq!(out, Verification { accurate: true, verified_text: "candidate".into(), confidence: 0.8 });
    }

    #[tokio::test]
    async fn garbage_reply_fails_closed_when_configured() {
        let (v, _) = live(vec![ScriptedReply::Text("no idea".into())], VerificationFailurePolicy::FailClosed);
        let out = v.verify("q", "candidate", &ctx(), 1).await;
        assert!(!out.accurate);
        assert_eq!(out.confidence, 0.0);
    }

    #[tokio::test]
    async fn live_prompt_uses_context_excerpt() {
        let (v, provider) =
            live(vec![ScriptedReply::Text(r#"{"confidence": 0.6}"#.into())], VerificationFailurePolicy::FailOpen);
        let context = ctx();
        let out = v.verify("the query", "the answer", &context, 2).await;
        assert_eq!(out.confidence, 0.6);

        let sent = &provider.requests()[0];
        assert_eq!(sent.max_tokens, 300);
        assert!(sent.user.contains("the answer"));
        assert!(sent.user.contains(context.excerpt(3000)));
        assert!(sent.user.chars().count() < context.char_len());
    }

    #[tokio::test]
    async fn offline_samples_first_then_fixed() {
        let v = Verifier::new(
            Backend::Offline,
            VerificationFailurePolicy::FailOpen,
            Box::new(ScriptedConfidence::new([0.3])),
            3000,
            300,
            Duration::from_secs(1),
        );
        let c = ctx();
        assert_eq!(v.verify("q", "a", &c, 1).await.confidence, 0.3);
        assert_eq!(v.verify("q", "a", &c, 2).await.confidence, OFFLINE_RETRY_CONFIDENCE);
        assert_eq!(v.verify("q", "a", &c, 3).await.confidence, OFFLINE_RETRY_CONFIDENCE);
    }
}
