//! Transform Service — template selection → streamed extraction → cleanup → history.
//!
//! Flow: resolve template → llm_client::transform → accumulate fragments →
//!       strip_code_fences → record HistoryItem → return final TSV.
//!
//! Empty raw text is a no-op (`Ok(None)`), not an error.

use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::AppError;
use crate::history::{HistoryItem, HistoryStore};
use crate::llm_client::{FragmentStream, LlmClient, TransformError};
use crate::templates;

pub mod handlers;

// ────────────────────────────────────────────────────────────────────────────
// Request / outcome types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct TransformRequest {
    pub raw_text: String,
    /// Template id: `public`, `private` or `custom`.
    pub template: String,
    /// Comma/newline separated column names; only read for `custom`.
    #[serde(default)]
    pub custom_columns: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransformOutcome {
    pub text: String,
    pub history_item: HistoryItem,
}

/// An open fragment stream plus the label it will be recorded under.
pub struct StartedTransform {
    pub template_label: String,
    pub fragments: FragmentStream,
}

// ────────────────────────────────────────────────────────────────────────────
// Cleanup
// ────────────────────────────────────────────────────────────────────────────

/// Concatenates fragments in arrival order. The first error aborts.
pub async fn collect_fragments(mut fragments: FragmentStream) -> Result<String, TransformError> {
    let mut full = String::new();
    let mut count = 0usize;
    while let Some(fragment) = fragments.next().await {
        full.push_str(&fragment?);
        count += 1;
    }
    debug!("Collected {count} fragment(s), {} bytes", full.len());
    Ok(full)
}

/// Removes Markdown fence lines (```` ``` ```` with an optional language tag)
/// and trims surrounding blank space. Tabs are cell separators, so a leading or
/// trailing tab is kept.
///
/// Once a fence line has been seen, a closing fence glued to the end of the
/// last data line is removed as well.
pub fn strip_code_fences(text: &str) -> String {
    if !text.lines().any(is_fence_line) {
        return trim_outer(text).to_string();
    }

    let kept: Vec<&str> = text.lines().filter(|line| !is_fence_line(line)).collect();
    let joined = kept.join("\n");
    let body = trim_outer(&joined);
    let body = body.strip_suffix("```").unwrap_or(body);
    trim_outer(body).to_string()
}

fn is_fence_line(line: &str) -> bool {
    line.trim()
        .strip_prefix("```")
        .map(str::trim_start)
        .is_some_and(|tag| {
            tag.chars()
                .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '+' | '.'))
        })
}

fn trim_outer(text: &str) -> &str {
    text.trim_matches(|c: char| c.is_whitespace() && c != '\t')
}

// ────────────────────────────────────────────────────────────────────────────
// Service
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct TransformService {
    llm: LlmClient,
    history: Arc<HistoryStore>,
}

impl TransformService {
    pub fn new(llm: LlmClient, history: Arc<HistoryStore>) -> Self {
        Self { llm, history }
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Resolves the template and opens the fragment stream.
    ///
    /// Returns `Ok(None)` for blank input without touching the template or the
    /// completion service.
    pub async fn start(
        &self,
        request: &TransformRequest,
    ) -> Result<Option<StartedTransform>, AppError> {
        if request.raw_text.trim().is_empty() {
            debug!("Blank raw text; skipping transform");
            return Ok(None);
        }

        let template =
            templates::resolve(&request.template, request.custom_columns.as_deref())?;
        info!(
            "Transform started: template={} columns={} input_chars={}",
            request.template,
            template.columns.len(),
            request.raw_text.chars().count()
        );

        let fragments = self
            .llm
            .transform(&request.raw_text, &template.columns, &template.hint)
            .await?;

        Ok(Some(StartedTransform {
            template_label: template.label,
            fragments,
        }))
    }

    /// Cleans the accumulated output and records it in history.
    /// A failed history write is logged; the transform still succeeds.
    pub async fn finish(&self, template_label: String, accumulated: &str) -> TransformOutcome {
        let text = strip_code_fences(accumulated);
        let history_item = HistoryItem::now(text.clone(), template_label);

        if let Err(e) = self.history.record(history_item.clone()).await {
            warn!("Failed to persist history: {e}");
        }

        info!(
            "Transform finished: template={} output_rows={}",
            history_item.template,
            text.lines().count()
        );

        TransformOutcome { text, history_item }
    }

    /// Runs a transform to completion.
    pub async fn run(&self, request: &TransformRequest) -> Result<Option<TransformOutcome>, AppError> {
        let Some(started) = self.start(request).await? else {
            return Ok(None);
        };

        let full = collect_fragments(started.fragments).await?;
        Ok(Some(self.finish(started.template_label, &full).await))
    }
}
