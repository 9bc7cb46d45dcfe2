// =============================================================================
// State Signal Engine — Main Entry Point
// =============================================================================
//
// Two modes:
//   state-signal-engine           serve the REST API on `bind_addr`
//   state-signal-engine analyze   run every configured symbol once and log
//                                 the state summary and latest signal
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod adaptive;
mod analyzer;
mod api;
mod app_state;
mod binance;
mod error;
mod features;
mod indicator_config;
mod indicators;
mod market_data;
mod regime;
mod runtime_config;
mod signals;
mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, Utc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::analyzer::MarketAnalyzer;
use crate::app_state::AppState;
use crate::binance::BinanceKlineSource;
use crate::market_data::MarketDataSource;
use crate::runtime_config::AnalysisConfig;

const DEFAULT_CONFIG_PATH: &str = "analysis_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    let config_path = PathBuf::from(
        std::env::var("SIGNAL_ENGINE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into()),
    );
    let loaded = AnalysisConfig::load(&config_path);

    let log_filter = loaded
        .as_ref()
        .map(|c| c.log_filter.clone())
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        State Signal Engine — Starting Up                 ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = loaded.unwrap_or_else(|e| {
        warn!(path = %config_path.display(), error = %e, "Failed to load config, using defaults");
        AnalysisConfig::default()
    });

    // Override symbols and bind address from env if available.
    if let Ok(syms) = std::env::var("SIGNAL_ENGINE_SYMBOLS") {
        config.symbols = syms
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Ok(addr) = std::env::var("SIGNAL_ENGINE_BIND_ADDR") {
        config.bind_addr = addr;
    }
    config
        .validate()
        .context("configuration rejected after env overrides")?;

    info!(
        symbols = ?config.symbols,
        n_states = config.n_states,
        lookback = config.lookback_window,
        interval = %config.data_source.interval,
        "Configuration ready"
    );

    // ── 2. Data source ───────────────────────────────────────────────────
    let source: Arc<dyn MarketDataSource> =
        Arc::new(BinanceKlineSource::new(&config.data_source)?);

    match std::env::args().nth(1).as_deref() {
        Some("analyze") => analyze_once(&config, source.as_ref()).await,
        Some(other) => anyhow::bail!("unknown command '{other}', expected 'analyze' or nothing"),
        None => serve(config, source, config_path).await,
    }
}

// =============================================================================
// One-shot analysis
// =============================================================================

async fn analyze_once(
    config: &AnalysisConfig,
    source: &dyn MarketDataSource,
) -> anyhow::Result<()> {
    let end = Utc::now();
    let start = end - Duration::days(config.default_history_days);
    let mut failures = 0usize;

    for symbol in &config.symbols {
        if let Err(e) = analyze_symbol(config, source, symbol, start, end).await {
            failures += 1;
            error!(symbol = %symbol, error = %e, "Analysis failed");
        }
    }

    info!(
        symbols = config.symbols.len(),
        failures,
        "Analysis pass complete"
    );
    if failures == config.symbols.len() && failures > 0 {
        anyhow::bail!("analysis failed for every configured symbol");
    }
    Ok(())
}

async fn analyze_symbol(
    config: &AnalysisConfig,
    source: &dyn MarketDataSource,
    symbol: &str,
    start: chrono::DateTime<Utc>,
    end: chrono::DateTime<Utc>,
) -> anyhow::Result<()> {
    let mut analyzer = MarketAnalyzer::from_config(symbol, config)?;
    analyzer
        .fetch_data(source, start, end)
        .await
        .with_context(|| format!("fetching {symbol}"))?;
    let signals = analyzer.run(Some(config.n_states))?;

    if let Some(states) = analyzer.states() {
        for (id, c) in &states.characteristics {
            info!(
                symbol,
                state = id,
                bars = c.bars,
                volatility = format!("{:.4}", c.volatility),
                trend = format!("{:.4}", c.trend_strength),
                volume_ratio = format!("{:.2}", c.volume_ratio),
                description = states.description(*id).unwrap_or_default(),
                current = *id == states.current_state,
                "Market state"
            );
        }
    }

    match signals.latest() {
        Some(p) => info!(
            symbol,
            signal = format!("{:.3}", p.signal),
            confidence = format!("{:.2}", p.confidence),
            signal_type = ?p.signal_type,
            "Latest signal"
        ),
        None => warn!(
            symbol,
            bars = signals.len(),
            lookback = signals.lookback,
            "Series shorter than lookback window, no latest signal"
        ),
    }
    Ok(())
}

// =============================================================================
// API server
// =============================================================================

async fn serve(
    config: AnalysisConfig,
    source: Arc<dyn MarketDataSource>,
    config_path: PathBuf,
) -> anyhow::Result<()> {
    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::new(config, source, Some(config_path)));
    let app = api::rest::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding API server to {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            warn!("Shutdown signal received, stopping gracefully");
        })
        .await
        .context("API server failed")?;

    info!("State Signal Engine shut down complete.");
    Ok(())
}
