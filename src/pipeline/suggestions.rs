//! Question helpers: extract questions from a free-text request and propose
//! a replacement for one of them.
//!
//! Both degrade to fixed offline lists when no model is configured or the
//! live call fails. Neither ever surfaces a provider error to the caller.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::llm::{Backend, ChatRequest, ProviderError};

use super::prompts;
use super::verification::first_json_object;

pub const EXTRACT_MAX_TOKENS: u32 = 500;
pub const SWAP_MAX_TOKENS: u32 = 100;
pub const DEFAULT_CATEGORY: &str = "General";

pub const SWAP_EXHAUSTED_FALLBACK: &str = "What are the key financial obligations in this agreement?";
pub const SWAP_FAILURE_FALLBACK: &str =
    "What other important provisions should be reviewed in this document?";

const OFFLINE_QUESTIONS: [(&str, &str); 4] = [
    ("What are the key facts surrounding the incident in question?", "Facts"),
    ("What evidence supports the defendant's claims in this case?", "Evidence"),
    ("Are there any procedural issues that could affect the outcome?", "Procedure"),
    ("What precedents are most relevant to this legal matter?", "Precedents"),
];

const OFFLINE_REPLACEMENTS: [&str; 6] = [
    "What are the specific remedies and damages available if either party breaches the contract?",
    "How are intellectual property rights allocated and protected under this agreement?",
    "What are the dispute resolution procedures and governing law provisions?",
    "Are there any warranties, representations, or indemnification clauses that affect liability?",
    "What are the payment terms, conditions, and any penalties for late payment?",
    "How can the contract be modified, amended, or assigned to third parties?",
];

/// One suggested question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedQuery {
    pub id: String,
    pub text: String,
    pub category: String,
    #[serde(rename = "questionNumber")]
    pub question_number: u64,
}

pub struct QuerySuggester {
    backend: Backend,
    call_timeout: Duration,
}

impl QuerySuggester {
    pub fn new(backend: Backend, call_timeout: Duration) -> Self {
        Self { backend, call_timeout }
    }

    /// Split `input` into focused questions.
    pub async fn extract(&self, input: &str) -> Vec<ExtractedQuery> {
        let Backend::Live(provider) = &self.backend else {
            return offline_questions(input);
        };

        let request = ChatRequest {
            system: prompts::EXTRACT_SYSTEM.to_string(),
            user: prompts::extract_prompt(input),
            max_tokens: EXTRACT_MAX_TOKENS,
        };
        match self.call(provider.complete(&request)).await {
            Ok(reply) => match first_json_object(&reply) {
                Some(obj) => {
                    let queries = parse_queries(&obj);
                    debug!(count = queries.len(), "queries extracted");
                    queries
                }
                None => {
                    warn!("extraction reply held no JSON object; using offline questions");
                    offline_questions(input)
                }
            },
            Err(e) => {
                warn!("query extraction failed: {e}; using offline questions");
                offline_questions(input)
            }
        }
    }

    /// Propose one question that differs from `original` and every entry of
    /// `existing`. A blank `original` asks for a fresh question.
    pub async fn swap(&self, original: &str, user_context: &str, existing: &[String]) -> String {
        let Backend::Live(provider) = &self.backend else {
            return offline_replacement(original, existing);
        };

        let request = ChatRequest {
            system: prompts::SWAP_SYSTEM.to_string(),
            user: prompts::swap_prompt(original, user_context, existing),
            max_tokens: SWAP_MAX_TOKENS,
        };
        match self.call(provider.complete(&request)).await {
            Ok(reply) => {
                let candidate = reply.trim().trim_matches(|c| c == '"' || c == '\'').trim();
                if candidate.is_empty() || contains_ignore_case(existing, candidate) {
                    debug!("swap reply was empty or a duplicate");
                    format!(
                        "What specific provisions relate to {user_context} that haven't been addressed yet?"
                    )
                } else {
                    candidate.to_string()
                }
            }
            Err(e) => {
                warn!("query swap failed: {e}");
                SWAP_FAILURE_FALLBACK.to_string()
            }
        }
    }

    async fn call(
        &self,
        fut: impl Future<Output = Result<String, ProviderError>>,
    ) -> Result<String, ProviderError> {
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| ProviderError::Timeout(self.call_timeout.as_secs()))
            .and_then(|r| r)
    }
}

fn parse_queries(obj: &Map<String, Value>) -> Vec<ExtractedQuery> {
    let Some(items) = obj.get("queries").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_object)
        .enumerate()
        .filter_map(|(i, item)| {
            let text = item.get("text").and_then(Value::as_str)?.trim();
            if text.is_empty() {
                return None;
            }
            let position = i as u64 + 1;
            let (id, question_number) = match item.get("id") {
                Some(Value::Number(n)) => match n.as_u64() {
                    Some(n) => (n.to_string(), n),
                    None => (n.to_string(), position),
                },
                Some(Value::String(s)) if !s.trim().is_empty() => {
                    (s.clone(), s.trim().parse().unwrap_or(position))
                }
                _ => (position.to_string(), position),
            };
            let category = item
                .get("category")
                .and_then(Value::as_str)
                .filter(|c| !c.trim().is_empty())
                .unwrap_or(DEFAULT_CATEGORY)
                .to_string();
            Some(ExtractedQuery { id, text: text.to_string(), category, question_number })
        })
        .collect()
}

/// The first 2-4 offline questions; the count depends only on `input`.
fn offline_questions(input: &str) -> Vec<ExtractedQuery> {
    let count = 2 + input.chars().count() % 3;
    OFFLINE_QUESTIONS
        .iter()
        .take(count)
        .zip(1u64..)
        .map(|((text, category), n)| ExtractedQuery {
            id: n.to_string(),
            text: (*text).to_string(),
            category: (*category).to_string(),
            question_number: n,
        })
        .collect()
}

fn offline_replacement(original: &str, existing: &[String]) -> String {
    OFFLINE_REPLACEMENTS
        .iter()
        .find(|q| {
            q.to_lowercase() != original.trim().to_lowercase() && !contains_ignore_case(existing, q)
        })
        .map_or_else(|| SWAP_EXHAUSTED_FALLBACK.to_string(), |q| (*q).to_string())
}

fn contains_ignore_case(list: &[String], needle: &str) -> bool {
    list.iter().any(|q| q.trim().to_lowercase() == needle.to_lowercase())
}
