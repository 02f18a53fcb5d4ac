//! Scripted LLM provider — replays a fixed queue of replies.
//!
//! Each `complete` or `stream` call pops the next scripted reply, so a test
//! can lay out an exact generate/verify conversation (including failures)
//! without a network. Clones share the queue. Every request is recorded so
//! tests can assert on what the pipeline actually sent.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures_util::stream;

use crate::llm::{ChatRequest, FragmentStream, ProviderError};

/// One scripted provider reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Reply text; streamed as whitespace-preserving word fragments.
    Text(String),
    /// The call itself fails with this message.
    Fail(String),
    /// The stream yields the given fragments, then fails mid-way.
    BreakAfter(Vec<String>, String),
    /// The call never returns.
    Stall,
}

#[derive(Debug, Default)]
struct Script {
    replies: VecDeque<ScriptedReply>,
    requests: Vec<ChatRequest>,
}

#[derive(Debug, Clone)]
pub struct ScriptedProvider {
    script: Arc<Mutex<Script>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script { replies: replies.into(), requests: Vec::new() })),
        }
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.script.lock().map(|s| s.requests.clone()).unwrap_or_default()
    }

    /// Number of replies not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.replies.len()).unwrap_or(0)
    }

    fn next_reply(&self, request: &ChatRequest) -> Result<ScriptedReply, ProviderError> {
        let mut script = self
            .script
            .lock()
            .map_err(|_| ProviderError::Request("scripted provider lock poisoned".into()))?;
        script.requests.push(request.clone());
        script
            .replies
            .pop_front()
            .ok_or_else(|| ProviderError::Request("script exhausted".into()))
    }

    pub async fn complete(&self, request: &ChatRequest) -> Result<String, ProviderError> {
        match self.next_reply(request)? {
            ScriptedReply::Text(text) => Ok(text),
            ScriptedReply::Fail(msg) | ScriptedReply::BreakAfter(_, msg) => {
                Err(ProviderError::Request(msg))
            }
            ScriptedReply::Stall => std::future::pending().await,
        }
    }

    pub async fn stream(&self, request: &ChatRequest) -> Result<FragmentStream, ProviderError> {
        match self.next_reply(request)? {
            ScriptedReply::Text(text) => {
                let fragments: Vec<Result<String, ProviderError>> =
                    split_fragments(&text).into_iter().map(Ok).collect();
                Ok(Box::pin(stream::iter(fragments)))
            }
            ScriptedReply::Fail(msg) => Err(ProviderError::Request(msg)),
            ScriptedReply::BreakAfter(fragments, msg) => {
                let mut items: Vec<Result<String, ProviderError>> =
                    fragments.into_iter().map(Ok).collect();
                items.push(Err(ProviderError::Request(msg)));
                Ok(Box::pin(stream::iter(items)))
            }
            ScriptedReply::Stall => std::future::pending().await,
        }
    }
}

/// Split `text` into fragments that concatenate back to `text` exactly:
/// each fragment is a word plus the whitespace that follows it.
pub fn split_fragments(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_space = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            in_space = true;
        } else if in_space {
            out.push(std::mem::take(&mut current));
            in_space = false;
        }
        current.push(ch);
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}
