//! OpenAI-compatible chat completion provider (`/v1/chat/completions`).
//!
//! Offers a one-shot `complete` and a streaming `stream` over the same
//! endpoint. All OpenAI wire types are private to this module; callers only
//! see [`ChatRequest`] in and text (or text deltas) out. The provider never
//! retries; retry policy belongs to the pipeline controller.

use std::collections::VecDeque;
use std::pin::Pin;

use futures_util::{StreamExt, stream};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use crate::llm::{ChatRequest, FragmentStream, ProviderError};

// ── Public provider ───────────────────────────────────────────────────────────

/// Adapter for any HTTP endpoint implementing `/v1/chat/completions`.
///
/// Covers OpenAI, OpenAI-compatible local servers (Ollama, LM Studio…),
/// and hosted alternatives. Constructed once at startup, then cheaply cloned
/// because `reqwest::Client` is an `Arc` internally.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    client: Client,
    api_base_url: String,
    model: String,
    temperature: f32,
    api_key: Option<String>,
}

impl OpenAiCompatibleProvider {
    /// Build a provider from config values and an optional API key.
    ///
    /// `api_key` is `None` for keyless local models. When present it is sent
    /// as `Authorization: Bearer <key>` on every request.
    pub fn new(
        api_base_url: String,
        model: String,
        temperature: f32,
        timeout_seconds: u64,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        // Per-read rather than total, so a long stream is not cut off while
        // fragments keep arriving. Whole calls are bounded by the pipeline.
        let timeout = std::time::Duration::from_secs(timeout_seconds);
        let client = Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, api_base_url, model, temperature, api_key })
    }

    fn payload(&self, request: &ChatRequest, stream: bool) -> ChatCompletionRequest {
        // Some models (gpt-5 family) do not accept a temperature parameter.
        let temperature = if self.model.starts_with("gpt-5") {
            None
        } else {
            Some(self.temperature)
        };

        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                Message { role: "system".to_string(), content: request.system.clone() },
                Message { role: "user".to_string(), content: request.user.clone() },
            ],
            temperature,
            max_completion_tokens: request.max_tokens,
            stream,
        }
    }

    async fn send(&self, payload: &ChatCompletionRequest) -> Result<reqwest::Response, ProviderError> {
        debug!(
            model = %payload.model,
            stream = payload.stream,
            max_tokens = payload.max_completion_tokens,
            "sending LLM request"
        );
        if tracing::enabled!(tracing::Level::TRACE) {
            let json = serde_json::to_string_pretty(payload)
                .unwrap_or_else(|e| format!("<serialization failed: {e}>"));
            trace!(payload = %json, "full LLM request payload");
        }

        let mut req = self.client.post(&self.api_base_url).json(payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| {
            error!(url = %self.api_base_url, error = %e, "LLM HTTP request failed (transport)");
            if e.is_timeout() {
                ProviderError::Request(format!("timed out: {e}"))
            } else {
                ProviderError::Request(e.to_string())
            }
        })?;

        check_status(response).await
    }

    /// One round-trip; returns the trimmed text of the first choice.
    pub async fn complete(&self, request: &ChatRequest) -> Result<String, ProviderError> {
        let payload = self.payload(request, false);
        let response = self.send(&payload).await?;

        let parsed = response.json::<ChatCompletionResponse>().await.map_err(|e| {
            error!(error = %e, "failed to deserialize LLM response");
            ProviderError::Request(format!("failed to parse response body: {e}"))
        })?;

        debug!(choices = parsed.choices.len(), "received LLM response");

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ProviderError::Request("empty or missing content in response".into()))
    }

    /// Streaming round-trip (`stream: true`).
    ///
    /// The returned stream yields each non-empty `choices[0].delta.content`
    /// in arrival order and ends at `data: [DONE]` or end of body. A transport
    /// or decode failure is yielded once as `Err` and ends the stream.
    pub async fn stream(&self, request: &ChatRequest) -> Result<FragmentStream, ProviderError> {
        let payload = self.payload(request, true);
        let response = self.send(&payload).await?;

        let state = DeltaState {
            body: Box::pin(response.bytes_stream()),
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            finished: false,
        };

        let deltas = stream::unfold(state, |mut st| async move {
            loop {
                if let Some(item) = st.pending.pop_front() {
                    return Some((item, st));
                }
                if st.finished {
                    return None;
                }
                match st.body.next().await {
                    Some(Ok(chunk)) => {
                        for data in st.decoder.push(&chunk) {
                            match parse_stream_data(&data) {
                                Ok(StreamData::Delta(text)) => st.pending.push_back(Ok(text)),
                                Ok(StreamData::Skip) => {}
                                Ok(StreamData::Done) => {
                                    st.finished = true;
                                    break;
                                }
                                Err(e) => {
                                    st.pending.push_back(Err(e));
                                    st.finished = true;
                                    break;
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "LLM stream interrupted");
                        st.finished = true;
                        st.pending.push_back(Err(ProviderError::Request(format!(
                            "stream interrupted: {e}"
                        ))));
                    }
                    None => st.finished = true,
                }
            }
        });

        Ok(Box::pin(deltas))
    }
}

struct DeltaState<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<String, ProviderError>>,
    finished: bool,
}

// ── SSE framing ───────────────────────────────────────────────────────────────

/// Incremental `data:` line extractor for a server-sent-event body.
///
/// Network chunks may split a line anywhere (including inside a multi-byte
/// character); bytes are buffered until a full `\n`-terminated line arrives.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    /// Feed one chunk; return the payload of every complete `data:` line.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(data) = line.strip_prefix("data:") {
                out.push(data.trim_start().to_string());
            }
        }
        out
    }
}

#[derive(Debug, PartialEq)]
enum StreamData {
    Delta(String),
    Skip,
    Done,
}

fn parse_stream_data(data: &str) -> Result<StreamData, ProviderError> {
    if data == "[DONE]" {
        return Ok(StreamData::Done);
    }
    if data.is_empty() {
        return Ok(StreamData::Skip);
    }
    let chunk: ChatCompletionChunk = serde_json::from_str(data)
        .map_err(|e| ProviderError::Decode(format!("bad stream chunk: {e}")))?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|s| !s.is_empty())
        .map(StreamData::Delta)
        .unwrap_or(StreamData::Skip))
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    max_completion_tokens: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

// Error envelope used by OpenAI and compatible APIs.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// Consume the response and return it if successful, or a structured error.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());

    let message = if let Ok(env) = serde_json::from_str::<ErrorEnvelope>(&body) {
        let code = env.error.code.map(|v| match v {
            serde_json::Value::String(s) => format!(" [code={s}]"),
            other => format!(" [code={other}]"),
        }).unwrap_or_default();
        format!("HTTP {status}{code}: {}", env.error.message)
    } else {
        format!("HTTP {status}: {body}")
    };

    error!(%status, %message, "LLM request returned HTTP error");
    Err(ProviderError::Request(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructs_provider() {
        let provider = OpenAiCompatibleProvider::new(
            "http://127.0.0.1:8081/v1/chat/completions".to_string(),
            "qwen2.5-instruct".to_string(),
            0.2,
            5,
            None,
        );
        assert!(provider.is_ok());
    }

    #[test]
    fn gpt5_payload_omits_temperature() {
        let p = OpenAiCompatibleProvider::new("http://x".into(), "gpt-5-chat-latest".into(), 0.4, 5, None)
            .unwrap();
        let req = ChatRequest { system: "s".into(), user: "u".into(), max_tokens: 300 };
        let json = serde_json::to_value(p.payload(&req, true)).unwrap();
        assert!(json.get("temperature").is_none());
        assert_eq!(json["stream"], true);
        assert_eq!(json["max_completion_tokens"], 300);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "u");
    }

    #[test]
    fn non_streaming_payload_omits_stream_flag() {
        let p = OpenAiCompatibleProvider::new("http://x".into(), "gpt-4o-mini".into(), 0.4, 5, None)
            .unwrap();
        let req = ChatRequest { system: "s".into(), user: "u".into(), max_tokens: 10 };
        let json = serde_json::to_value(p.payload(&req, false)).unwrap();
        assert!(json.get("stream").is_none());
        assert!(json.get("temperature").is_some());
    }

    #[test]
    fn decoder_joins_lines_split_across_chunks() {
        let mut d = SseDecoder::default();
        assert!(d.push(b"data: {\"a\"").is_empty());
        assert_eq!(d.push(b":1}\r\n\r\ndata: [DONE]\n"), vec!["{\"a\":1}", "[DONE]"]);
    }

    #[test]
    fn decoder_ignores_comments_and_other_fields() {
        let mut d = SseDecoder::default();
        let out = d.push(b": keep-alive\nevent: message\nid: 3\ndata: x\n");
        assert_eq!(out, vec!["x"]);
    }

    #[test]
    fn decoder_keeps_multibyte_char_split_between_chunks() {
        let mut d = SseDecoder::default();
        let line = "data: caf\u{e9}\n".as_bytes();
        let (a, b) = line.split_at(line.len() - 2);
        assert!(d.push(a).is_empty());
        assert_eq!(d.push(b), vec!["caf\u{e9}"]);
    }

    #[test]
    fn stream_data_variants() {
        assert_eq!(parse_stream_data("[DONE]").unwrap(), StreamData::Done);
        assert_eq!(
            parse_stream_data(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#).unwrap(),
            StreamData::Delta("Hel".into())
        );
        assert_eq!(
            parse_stream_data(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            StreamData::Skip
        );
        assert_eq!(parse_stream_data(r#"{"choices":[]}"#).unwrap(), StreamData::Skip);
        assert!(matches!(parse_stream_data("{not json"), Err(ProviderError::Decode(_))));
    }

    /// Serves three deltas and `[DONE]`, each after a 400 ms pause.
    async fn slow_completion() -> axum::response::Response {
        use axum::response::IntoResponse;

        let chunks = stream::iter(0..4u8).then(|i| async move {
            tokio::time::sleep(std::time::Duration::from_millis(400)).await;
            let line = if i < 3 {
                format!("data: {{\"choices\":[{{\"delta\":{{\"content\":\"w{i} \"}}}}]}}\n\n")
            } else {
                "data: [DONE]\n\n".to_string()
            };
            Ok::<_, std::convert::Infallible>(line)
        });
        axum::body::Body::from_stream(chunks).into_response()
    }

    #[tokio::test]
    async fn slow_stream_outlives_the_read_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let upstream =
            axum::Router::new().route("/v1/chat/completions", axum::routing::post(slow_completion));
        tokio::spawn(async move { axum::serve(listener, upstream).await });

        // 1s per read, ~1.6s for the whole body.
        let p = OpenAiCompatibleProvider::new(
            format!("http://{addr}/v1/chat/completions"),
            "local".into(),
            0.2,
            1,
            None,
        )
        .unwrap();
        let req = ChatRequest { system: "s".into(), user: "u".into(), max_tokens: 10 };
        let items: Vec<_> = p.stream(&req).await.unwrap().collect().await;
        let text: String = items.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(text, "w0 w1 w2 ");
    }
}
