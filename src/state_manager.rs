// State Manager for Paper Trading
// JSON file persistence of the per-asset portfolio mapping
//
// Every save is a full-state overwrite done atomically: the document is
// written to `<file>.tmp` and renamed over the target, so a crash mid-write
// leaves the previous state intact.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::ledger::PortfolioBook;

// =============================================================================
// Constants
// =============================================================================

pub const DEFAULT_SAVE_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 200;

// =============================================================================
// JSON State Store
// =============================================================================

#[derive(Debug, Clone)]
pub struct JsonStateStore {
    path: PathBuf,
    max_attempts: u32,
    backoff: Duration,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_attempts: DEFAULT_SAVE_ATTEMPTS,
            backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
        }
    }

    /// Override the retry policy (backoff doubles after every failed attempt)
    pub fn with_retry(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.backoff = backoff;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted mapping.
    ///
    /// A missing file is a fresh start (empty mapping); an unreadable one is
    /// reported as `CorruptState` rather than silently discarded.
    pub fn load(&self) -> EngineResult<PortfolioBook> {
        if !self.path.exists() {
            debug!("No state file at {}, starting fresh", self.path.display());
            return Ok(PortfolioBook::new());
        }

        let contents = fs::read_to_string(&self.path)?;
        serde_json::from_str(&contents).map_err(|e| EngineError::CorruptState {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    /// Persist the full mapping, retrying with exponential backoff.
    ///
    /// Exhausting every attempt yields `Persistence`, which callers treat as fatal.
    pub async fn save(&self, book: &PortfolioBook) -> EngineResult<()> {
        let json = serde_json::to_string_pretty(book)?;

        let mut delay = self.backoff;
        let mut attempt = 1;
        loop {
            match self.write_atomic(&json) {
                Ok(()) => {
                    debug!("State saved to {}", self.path.display());
                    return Ok(());
                }
                Err(source) if attempt >= self.max_attempts => {
                    return Err(EngineError::Persistence {
                        path: self.path.clone(),
                        attempts: attempt,
                        source,
                    });
                }
                Err(e) => {
                    warn!(
                        "Failed to save state to {} (attempt {}/{}): {}",
                        self.path.display(),
                        attempt,
                        self.max_attempts,
                        e
                    );
                    sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
            }
        }
    }

    fn write_atomic(&self, json: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = tmp_path_for(&self.path);
        fs::write(&tmp_path, json)?;

        fs::rename(&tmp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            e
        })
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
