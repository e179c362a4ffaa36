mod config;
mod errors;
mod history;
mod llm_client;
mod routes;
mod state;
mod templates;
mod transform;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::history::HistoryStore;
use crate::llm_client::{LlmClient, ProcessEnv};
use crate::routes::build_router;
use crate::state::AppState;
use crate::transform::TransformService;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Report API v{}", env!("CARGO_PKG_VERSION"));

    // The key is re-read per transform; this only reports the startup state.
    if llm_client::resolve_credential(&ProcessEnv).is_none() {
        warn!("GEMINI_API_KEY is not configured; transforms will fail until it is set");
    }

    let llm = LlmClient::gemini(&config.gemini_api_base);
    info!("LLM client initialized (model: {})", llm_client::MODEL);

    let history = Arc::new(HistoryStore::load(&config.data_dir, config.history_limit).await);

    let state = AppState {
        transform: TransformService::new(llm, history),
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // browser front end is served from another origin

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
