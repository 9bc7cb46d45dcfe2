// =============================================================================
// Central Application State — Signal Engine API
// =============================================================================
//
// Shared across all request handlers via `Arc<AppState>`. Analyses never
// share intermediates: each request clones the configuration and builds its
// own `MarketAnalyzer`.
//
// Thread safety:
//   - Atomic counters for lock-free version tracking.
//   - parking_lot::RwLock for the configuration and the error log.
// =============================================================================

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::warn;

use crate::error::{AnalysisError, AnalysisResult};
use crate::market_data::MarketDataSource;
use crate::runtime_config::AnalysisConfig;

/// A recorded error event.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    /// Symbol the failing request was for, if any.
    pub symbol: Option<String>,
    /// ISO 8601 timestamp.
    pub at: String,
}

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;

pub struct AppState {
    /// Incremented on every accepted configuration update.
    pub config_version: AtomicU64,
    /// Completed analyses since start-up.
    pub analyses_run: AtomicU64,

    pub config: Arc<RwLock<AnalysisConfig>>,
    /// Where accepted updates are persisted; `None` keeps them in memory.
    pub config_path: Option<PathBuf>,

    pub source: Arc<dyn MarketDataSource>,

    pub recent_errors: RwLock<Vec<ErrorRecord>>,
}

impl AppState {
    pub fn new(
        config: AnalysisConfig,
        source: Arc<dyn MarketDataSource>,
        config_path: Option<PathBuf>,
    ) -> Self {
        Self {
            config_version: AtomicU64::new(0),
            analyses_run: AtomicU64::new(0),
            config: Arc::new(RwLock::new(config)),
            config_path,
            source,
            recent_errors: RwLock::new(Vec::new()),
        }
    }

    pub fn current_config_version(&self) -> u64 {
        self.config_version.load(Ordering::SeqCst)
    }

    /// Clone of the configuration; the lock is released before returning.
    pub fn config_snapshot(&self) -> AnalysisConfig {
        self.config.read().clone()
    }

    /// Validate and install `update`, then persist it (best-effort).
    ///
    /// Fields read only at start-up (data source, bind address, log filter,
    /// CLI symbols) must match the running configuration.
    pub fn update_config(&self, update: AnalysisConfig) -> AnalysisResult<u64> {
        update.validate()?;

        let saved = update.clone();
        let version = {
            let mut current = self.config.write();
            if let Some(field) = update.startup_field_change(&current) {
                return Err(AnalysisError::invalid_config(format!(
                    "{field} is read at start-up and cannot change while running"
                )));
            }
            *current = update;
            self.config_version.fetch_add(1, Ordering::SeqCst) + 1
        };

        if let Some(path) = &self.config_path {
            if let Err(e) = saved.save(path) {
                warn!(error = %e, "failed to save analysis config to disk");
            }
        }
        Ok(version)
    }

    pub fn record_analysis(&self) -> u64 {
        self.analyses_run.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Record an error. The buffer is capped at [`MAX_RECENT_ERRORS`];
    /// oldest entries are evicted first.
    pub fn record_error(&self, message: impl Into<String>, symbol: Option<&str>) {
        let record = ErrorRecord {
            message: message.into(),
            symbol: symbol.map(str::to_string),
            at: Utc::now().to_rfc3339(),
        };
        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
    }

    pub fn recent_errors(&self) -> Vec<ErrorRecord> {
        self.recent_errors.read().clone()
    }
}
