//! Bounded, most-recent-first list of completed transforms.
//!
//! The list is persisted as JSON under a fixed key (`report_history.json` in the
//! data directory). It is read once at startup and rewritten after every
//! successful transform.

use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const HISTORY_KEY: &str = "report_history";
pub const DEFAULT_HISTORY_LIMIT: usize = 5;
const DATE_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("History I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("History serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub date: String,
    pub text: String,
    /// Label of the template that produced `text`.
    pub template: String,
}

impl HistoryItem {
    /// Stamps a new item with the current local time.
    pub fn now(text: String, template: String) -> Self {
        Self {
            date: Local::now().format(DATE_FORMAT).to_string(),
            text,
            template,
        }
    }
}

pub struct HistoryStore {
    path: PathBuf,
    limit: usize,
    items: Mutex<Vec<HistoryItem>>,
}

impl HistoryStore {
    /// Loads the stored list from `data_dir`. A missing file starts empty; an
    /// unreadable or corrupt one is logged and also starts empty.
    pub async fn load(data_dir: &Path, limit: usize) -> Self {
        let limit = limit.max(1);
        let path = data_dir.join(format!("{HISTORY_KEY}.json"));

        let mut items = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str::<Vec<HistoryItem>>(&raw).unwrap_or_else(|e| {
                warn!("Ignoring corrupt history file {}: {e}", path.display());
                Vec::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!("Could not read history file {}: {e}", path.display());
                Vec::new()
            }
        };
        items.truncate(limit);

        info!(
            "History loaded: {} item(s), limit {limit}, file {}",
            items.len(),
            path.display()
        );

        Self {
            path,
            limit,
            items: Mutex::new(items),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub async fn list(&self) -> Vec<HistoryItem> {
        self.items.lock().await.clone()
    }

    /// Prepends `item`, drops the oldest entries past the limit, then persists.
    ///
    /// The in-memory list is updated even if the write fails.
    pub async fn record(&self, item: HistoryItem) -> Result<(), HistoryError> {
        let mut items = self.items.lock().await;
        items.insert(0, item);
        items.truncate(self.limit);
        let serialized = serde_json::to_string(&*items)?;

        // Written under the lock so concurrent transforms persist in order.
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write-then-rename: the real file is either the old list or the new one.
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, serialized).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }
}
