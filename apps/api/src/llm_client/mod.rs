/// LLM Client — the single point of entry for all Gemini calls in the report API.
///
/// No other module talks to the completion service directly. The client is
/// stateless between calls: the credential is re-read from the environment on
/// every `transform`, so a rotated key is picked up without a restart.
///
/// Model: gemini-3-flash-preview (hardcoded — extraction output is tuned to it)
use std::sync::Arc;

use async_trait::async_trait;
use futures::future;
use futures::stream::{BoxStream, StreamExt};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod gemini;
pub mod prompts;
pub mod sse;

pub use gemini::{GeminiTransport, GenerateContentRequest};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";
/// The model used for every transform.
pub const MODEL: &str = "gemini-3-flash-preview";
/// Extraction, not generation: keep decoding close to deterministic.
const TEMPERATURE: f32 = 0.1;
const THINKING_BUDGET: u32 = 0;

/// Checked in order; the first usable value wins.
pub const CREDENTIAL_VARS: &[&str] = &["GEMINI_API_KEY", "API_KEY"];
/// Value shipped in template `.env` files; treated as "not configured".
pub const PLACEHOLDER_CREDENTIAL: &str = "PLACEHOLDER_API_KEY";

const GENERIC_FAILURE_MESSAGE: &str = "转换失败，请检查 API Key 配置。";

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Domain-level failures surfaced by [`LlmClient::transform`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("未配置 API Key，请设置 GEMINI_API_KEY。")]
    CredentialMissing,

    #[error("{0}")]
    Failed(String),
}

impl From<LlmError> for TransformError {
    fn from(err: LlmError) -> Self {
        let message = match err {
            LlmError::Api { message, .. } if !message.trim().is_empty() => message,
            LlmError::Http(e) => e.to_string(),
            _ => GENERIC_FAILURE_MESSAGE.to_string(),
        };
        TransformError::Failed(message)
    }
}

pub type RawFragmentStream = BoxStream<'static, Result<String, LlmError>>;
pub type FragmentStream = BoxStream<'static, Result<String, TransformError>>;

/// Source of process-wide configuration values.
pub trait Environment: Send + Sync {
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads the real process environment.
pub struct ProcessEnv;

impl Environment for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Returns the first configured credential, ignoring blank and placeholder values.
pub fn resolve_credential(env: &dyn Environment) -> Option<String> {
    CREDENTIAL_VARS
        .iter()
        .filter_map(|key| env.var(key))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty() && value != PLACEHOLDER_CREDENTIAL)
}

/// Opens one streaming generation call. Implemented by [`GeminiTransport`];
/// swapped for a mock in tests.
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    async fn stream_generate(
        &self,
        api_key: &str,
        request: &GenerateContentRequest,
    ) -> Result<RawFragmentStream, LlmError>;
}

#[derive(Clone)]
pub struct LlmClient {
    transport: Arc<dyn CompletionTransport>,
    env: Arc<dyn Environment>,
}

impl LlmClient {
    pub fn new(transport: Arc<dyn CompletionTransport>, env: Arc<dyn Environment>) -> Self {
        Self { transport, env }
    }

    /// Client backed by the Gemini API and the process environment.
    pub fn gemini(api_base: &str) -> Self {
        Self::new(Arc::new(GeminiTransport::new(api_base)), Arc::new(ProcessEnv))
    }

    /// Streams the TSV extraction of `raw_text` for the given columns and hint.
    ///
    /// Fails before any network I/O when no credential is configured. Empty
    /// fragments are dropped; everything else is yielded as soon as it is decoded.
    pub async fn transform(
        &self,
        raw_text: &str,
        columns: &[String],
        hint: &str,
    ) -> Result<FragmentStream, TransformError> {
        let api_key =
            resolve_credential(self.env.as_ref()).ok_or(TransformError::CredentialMissing)?;

        let prompt = prompts::build_prompt(columns, hint, raw_text);
        let request = GenerateContentRequest::user_prompt(prompt, TEMPERATURE, THINKING_BUDGET);

        info!(
            "Opening {MODEL} stream: {} columns, {} input chars",
            columns.len(),
            raw_text.chars().count()
        );
        debug!("Prompt length: {} chars", request.prompt().chars().count());

        let upstream = self
            .transport
            .stream_generate(&api_key, &request)
            .await
            .map_err(|e| {
                warn!("Completion request failed: {e}");
                TransformError::from(e)
            })?;

        Ok(upstream
            .filter_map(|item| {
                future::ready(match item {
                    Ok(text) if text.is_empty() => None,
                    Ok(text) => Some(Ok(text)),
                    Err(e) => {
                        warn!("Completion stream failed: {e}");
                        Some(Err(TransformError::from(e)))
                    }
                })
            })
            .boxed())
    }
}
