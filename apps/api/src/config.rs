use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use crate::history::DEFAULT_HISTORY_LIMIT;
use crate::llm_client::DEFAULT_API_BASE;

/// Application configuration loaded from environment variables.
///
/// The Gemini credential is intentionally absent: it is resolved on every
/// transform call (see `llm_client::resolve_credential`) so a rotated key takes
/// effect without a restart.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub rust_log: String,
    pub history_limit: usize,
    pub data_dir: PathBuf,
    pub gemini_api_base: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let history_limit = match std::env::var("HISTORY_LIMIT") {
            Ok(raw) => raw
                .trim()
                .parse::<usize>()
                .context("HISTORY_LIMIT must be a positive integer")?,
            Err(_) => DEFAULT_HISTORY_LIMIT,
        };
        if history_limit == 0 {
            bail!("HISTORY_LIMIT must be at least 1");
        }

        Ok(Config {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            history_limit,
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
            gemini_api_base: std::env::var("GEMINI_API_BASE")
                .unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
        })
    }
}
