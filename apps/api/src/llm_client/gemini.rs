//! Gemini `streamGenerateContent` transport.
//!
//! Wire types for the request body and the per-event response chunks, plus the
//! reqwest-backed [`GeminiTransport`]. The response body is consumed as SSE
//! (`alt=sse`); each event carries one JSON chunk.

use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::sse::SseDecoder;
use super::{CompletionTransport, LlmError, RawFragmentStream, MODEL};

// ────────────────────────────────────────────────────────────────────────────
// Request
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Part {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub thinking_config: ThinkingConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingConfig {
    pub thinking_budget: u32,
}

impl GenerateContentRequest {
    /// A single-turn user prompt.
    pub fn user_prompt(prompt: String, temperature: f32, thinking_budget: u32) -> Self {
        Self {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature,
                thinking_config: ThinkingConfig { thinking_budget },
            },
        }
    }

    pub fn prompt(&self) -> &str {
        self.contents
            .first()
            .and_then(|c| c.parts.first())
            .map(|p| p.text.as_str())
            .unwrap_or_default()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Response
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: Option<u16>,
    message: Option<String>,
}

impl StreamChunk {
    /// Text of the first candidate; thought summaries are skipped.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter(|p| !p.thought)
                    .filter_map(|p| p.text.as_deref())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Parses one SSE payload into the text fragment it carries.
pub(crate) fn parse_chunk(payload: &str) -> Result<String, LlmError> {
    let chunk: StreamChunk = serde_json::from_str(payload)?;
    if let Some(err) = chunk.error {
        return Err(LlmError::Api {
            status: err.code.unwrap_or_default(),
            message: err.message.unwrap_or_default(),
        });
    }
    Ok(chunk.text())
}

/// Pulls `error.message` out of a non-2xx body. Gemini sometimes wraps the
/// envelope in a one-element array.
///
/// The array form is tried first: a derived struct `Deserialize` also accepts a
/// sequence, so `[{"error":…}]` would otherwise parse as an envelope whose
/// fields are all missing.
pub(crate) fn extract_error_message(body: &str) -> Option<String> {
    serde_json::from_str::<Vec<ApiErrorEnvelope>>(body)
        .ok()
        .and_then(|envelopes| envelopes.into_iter().next())
        .or_else(|| serde_json::from_str::<ApiErrorEnvelope>(body).ok())
        .and_then(|e| e.error.message)
        .filter(|m| !m.trim().is_empty())
}

// ────────────────────────────────────────────────────────────────────────────
// Body decoding
// ────────────────────────────────────────────────────────────────────────────

struct DecodeState<E> {
    bytes: BoxStream<'static, Result<Bytes, E>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    finished: bool,
}

/// Turns an SSE byte stream into text fragments, one per decoded event.
/// A transport error ends the stream after it is yielded.
pub(crate) fn decode_event_stream<S, E>(bytes: S) -> RawFragmentStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<LlmError> + Send + 'static,
{
    let state = DecodeState {
        bytes: bytes.boxed(),
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(payload) = state.pending.pop_front() {
                return Some((parse_chunk(&payload), state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => state.pending.extend(state.decoder.push(&chunk)),
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(e.into()), state));
                }
                None => {
                    state.finished = true;
                    state.pending.extend(state.decoder.finish());
                }
            }
        }
    })
    .boxed()
}

// ────────────────────────────────────────────────────────────────────────────
// Transport
// ────────────────────────────────────────────────────────────────────────────

/// reqwest-backed transport. No request timeout is set: a stalled upstream
/// blocks only the transform that owns the stream, and dropping the stream
/// aborts the request.
#[derive(Clone)]
pub struct GeminiTransport {
    client: Client,
    api_base: String,
}

impl GeminiTransport {
    pub fn new(api_base: impl Into<String>) -> Self {
        let api_base: String = api_base.into();
        Self {
            client: Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.api_base, MODEL
        )
    }
}

#[async_trait]
impl CompletionTransport for GeminiTransport {
    async fn stream_generate(
        &self,
        api_key: &str,
        request: &GenerateContentRequest,
    ) -> Result<RawFragmentStream, LlmError> {
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = extract_error_message(&body).unwrap_or(body);
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        debug!("Gemini stream opened (status {status})");
        Ok(decode_event_stream(response.bytes_stream()))
    }
}
