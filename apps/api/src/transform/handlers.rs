//! Axum route handlers for the report API.

use std::convert::Infallible;

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};

use crate::errors::{AppError, AppJson};
use crate::history::HistoryItem;
use crate::llm_client::FragmentStream;
use crate::state::AppState;
use crate::templates;
use crate::transform::{StartedTransform, TransformRequest, TransformService};

// ────────────────────────────────────────────────────────────────────────────
// Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct TemplateSummary {
    pub id: &'static str,
    pub label: &'static str,
    pub hint: &'static str,
    pub columns: &'static [&'static str],
    /// True when the caller must supply `custom_columns`.
    pub dynamic: bool,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub limit: usize,
    pub items: Vec<HistoryItem>,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// GET /api/v1/templates
pub async fn handle_list_templates() -> Json<Vec<TemplateSummary>> {
    Json(
        templates::all()
            .iter()
            .map(|(id, config)| TemplateSummary {
                id: *id,
                label: config.label,
                hint: config.hint,
                columns: config.columns,
                dynamic: config.is_dynamic(),
            })
            .collect(),
    )
}

/// GET /api/v1/history
pub async fn handle_get_history(State(state): State<AppState>) -> Json<HistoryResponse> {
    let history = state.transform.history();
    Json(HistoryResponse {
        limit: history.limit(),
        items: history.list().await,
    })
}

/// POST /api/v1/transform
///
/// Runs the transform to completion and returns the cleaned TSV.
/// Blank `raw_text` is a no-op and returns 204.
pub async fn handle_transform(
    State(state): State<AppState>,
    AppJson(request): AppJson<TransformRequest>,
) -> Result<Response, AppError> {
    match state.transform.run(&request).await? {
        Some(outcome) => Ok(Json(outcome).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// POST /api/v1/transform/stream
///
/// Relays fragments as `chunk` events while they arrive, then a single `done`
/// event with the cleaned text (or an `error` event). Failures before the
/// upstream stream opens are returned as regular JSON errors.
pub async fn handle_transform_stream(
    State(state): State<AppState>,
    AppJson(request): AppJson<TransformRequest>,
) -> Result<Response, AppError> {
    let Some(started) = state.transform.start(&request).await? else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };

    let events = relay_events(state.transform.clone(), started);
    Ok(Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response())
}

// ────────────────────────────────────────────────────────────────────────────
// SSE relay
// ────────────────────────────────────────────────────────────────────────────

struct Relay {
    service: TransformService,
    template_label: String,
    fragments: FragmentStream,
    accumulated: String,
    finished: bool,
}

fn relay_events(
    service: TransformService,
    started: StartedTransform,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    let relay = Relay {
        service,
        template_label: started.template_label,
        fragments: started.fragments,
        accumulated: String::new(),
        finished: false,
    };

    stream::unfold(relay, |mut relay| async move {
        if relay.finished {
            return None;
        }

        let event = match relay.fragments.next().await {
            Some(Ok(text)) => {
                relay.accumulated.push_str(&text);
                json_event("chunk", json!({ "text": text }))
            }
            Some(Err(e)) => {
                relay.finished = true;
                json_event("error", json!({ "message": e.to_string() }))
            }
            None => {
                relay.finished = true;
                let outcome = relay
                    .service
                    .finish(relay.template_label.clone(), &relay.accumulated)
                    .await;
                json_event("done", json!(outcome))
            }
        };

        Some((Ok::<_, Infallible>(event), relay))
    })
    .boxed()
}

fn json_event(name: &str, payload: Value) -> Event {
    Event::default()
        .event(name)
        .json_data(payload)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}
