// =============================================================================
// Runtime Configuration — engine settings with atomic save
// =============================================================================
//
// Everything tunable lives here: served symbols, bind address, data-source
// settings, indicator parameters with the adjustment table, and pipeline
// parameters (state count, seed, lookback window).
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry serde defaults so that adding new fields never
// breaks loading an older config file.
//
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::binance::rate_limit::Backoff;
use crate::error::{AnalysisError, AnalysisResult};
use crate::indicator_config::IndicatorConfig;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbols() -> Vec<String> {
    vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_base_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_interval() -> String {
    "1d".to_string()
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_secs() -> u64 {
    1
}

fn default_max_delay_secs() -> u64 {
    32
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_weight_warn_threshold() -> u32 {
    1000
}

fn default_n_states() -> usize {
    3
}

fn default_random_seed() -> u64 {
    42
}

fn default_lookback_window() -> usize {
    100
}

fn default_history_days() -> i64 {
    365
}

// =============================================================================
// DataSourceConfig
// =============================================================================

/// Settings for the Binance klines data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Kline interval, e.g. "1d", "4h".
    #[serde(default = "default_interval")]
    pub interval: String,

    /// Retries after the first attempt on 429/418, 5xx and transport errors.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,

    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Used request weight per minute above which a warning is logged.
    #[serde(default = "default_weight_warn_threshold")]
    pub weight_warn_threshold: u32,
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            interval: default_interval(),
            max_retries: default_max_retries(),
            base_delay_secs: default_base_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            timeout_secs: default_timeout_secs(),
            weight_warn_threshold: default_weight_warn_threshold(),
        }
    }
}

impl DataSourceConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_secs(self.base_delay_secs),
            Duration::from_secs(self.max_delay_secs),
            self.max_retries,
        )
    }
}

// =============================================================================
// AnalysisConfig
// =============================================================================

/// Top-level configuration for the signal engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    // --- Service ------------------------------------------------------------

    /// Symbols analysed by the `analyze` CLI mode.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    #[serde(default)]
    pub data_source: DataSourceConfig,

    // --- Indicators ---------------------------------------------------------

    #[serde(default)]
    pub indicators: IndicatorConfig,

    // --- Pipeline -----------------------------------------------------------

    /// Number of market states to identify.
    #[serde(default = "default_n_states")]
    pub n_states: usize,

    /// Seed for k-means++ initialisation.
    #[serde(default = "default_random_seed")]
    pub random_seed: u64,

    /// Trailing bars used for percentile and std thresholds (H).
    #[serde(default = "default_lookback_window")]
    pub lookback_window: usize,

    /// History fetched when a request gives no start time.
    #[serde(default = "default_history_days")]
    pub default_history_days: i64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            bind_addr: default_bind_addr(),
            log_filter: default_log_filter(),
            data_source: DataSourceConfig::default(),
            indicators: IndicatorConfig::default(),
            n_states: default_n_states(),
            random_seed: default_random_seed(),
            lookback_window: default_lookback_window(),
            default_history_days: default_history_days(),
        }
    }
}

impl AnalysisConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read analysis config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse analysis config from {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("invalid analysis config in {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            n_states = config.n_states,
            "analysis config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise analysis config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "analysis config saved (atomic)");
        Ok(())
    }

    /// Indicator and pipeline checks; run on load and on every update.
    pub fn validate(&self) -> AnalysisResult<()> {
        self.indicators.validate()?;
        if self.n_states == 0 {
            return Err(AnalysisError::invalid_config("n_states must be >= 1"));
        }
        if self.lookback_window < 2 {
            return Err(AnalysisError::invalid_config(format!(
                "lookback_window must be >= 2, got {}",
                self.lookback_window
            )));
        }
        if self.default_history_days <= 0 {
            return Err(AnalysisError::invalid_config(
                "default_history_days must be positive",
            ));
        }
        if self.data_source.base_delay_secs > self.data_source.max_delay_secs {
            return Err(AnalysisError::invalid_config(
                "data_source.base_delay_secs must not exceed max_delay_secs",
            ));
        }
        Ok(())
    }

    /// First field read only at start-up that differs from `running`.
    /// A live service cannot apply such a change without a restart.
    pub fn startup_field_change(&self, running: &Self) -> Option<&'static str> {
        if self.symbols != running.symbols {
            Some("symbols")
        } else if self.bind_addr != running.bind_addr {
            Some("bind_addr")
        } else if self.log_filter != running.log_filter {
            Some("log_filter")
        } else if self.data_source != running.data_source {
            Some("data_source")
        } else {
            None
        }
    }
}
