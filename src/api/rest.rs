// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`:
//
//   GET  /api/v1/health
//   POST /api/v1/analysis   fetch -> indicators -> states -> signals
//   GET  /api/v1/config
//   PUT  /api/v1/config     validated before it replaces the live config
//
// Each analysis runs on its own `MarketAnalyzer` inside `spawn_blocking`.
// Errors are `{"error": "..."}` with 400 for data problems, 422 for invalid
// configuration and 500 otherwise.
//
// CORS is configured permissively for development.
// =============================================================================

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::analyzer::MarketAnalyzer;
use crate::app_state::{AppState, ErrorRecord};
use crate::binance::rate_limit::RateLimitSnapshot;
use crate::error::AnalysisError;
use crate::indicators::rsi::rsi_label;
use crate::indicators::LatestReadings;
use crate::regime::{FeatureLoading, StateCharacteristics};
use crate::runtime_config::AnalysisConfig;
use crate::signals::{SignalPoint, SignalSeries, ThresholdBands};
use crate::types::SignalType;

const MIN_STATES: usize = 2;
const MAX_STATES: usize = 5;

type ApiError = (StatusCode, Json<serde_json::Value>);

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/analysis", post(run_analysis))
        .route("/api/v1/config", get(get_config).put(put_config))
        .layer(cors)
        .with_state(state)
}

fn error_body(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(serde_json::json!({ "error": message.into() })))
}

/// Map an analysis failure to its HTTP status.
pub fn status_for(err: &AnalysisError) -> StatusCode {
    match err {
        AnalysisError::NoDataAvailable { .. }
        | AnalysisError::InvalidSeries { .. }
        | AnalysisError::InsufficientHistory { .. } => StatusCode::BAD_REQUEST,
        AnalysisError::InvalidConfiguration(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AnalysisError::NotReady { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn analysis_error(state: &AppState, symbol: &str, err: AnalysisError) -> ApiError {
    let status = status_for(&err);
    if status.is_server_error() {
        error!(symbol, error = %err, "analysis failed");
    } else {
        warn!(symbol, error = %err, "analysis rejected");
    }
    state.record_error(err.to_string(), Some(symbol));
    error_body(status, err.to_string())
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    data_source: &'static str,
    config_version: u64,
    analyses_run: u64,
    server_time: i64,
    /// `None` for sources without request-weight accounting.
    rate_limits: Option<RateLimitSnapshot>,
    recent_errors: Vec<ErrorRecord>,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let resp = HealthResponse {
        status: "ok",
        data_source: state.source.name(),
        config_version: state.current_config_version(),
        analyses_run: state.analyses_run.load(Ordering::Relaxed),
        server_time: Utc::now().timestamp_millis(),
        rate_limits: state.source.rate_limits(),
        recent_errors: state.recent_errors(),
    };
    Json(resp)
}

// =============================================================================
// Analysis
// =============================================================================

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct AnalysisRequest {
    symbol: String,
    #[serde(default)]
    start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    num_states: Option<usize>,
    #[serde(default = "default_true")]
    state_analysis: bool,
}

#[derive(Debug, Serialize)]
struct IndicatorReport {
    name: &'static str,
    value: Option<f64>,
    signal: &'static str,
    lower_threshold: Option<f64>,
    upper_threshold: Option<f64>,
}

#[derive(Debug, Serialize)]
struct MarketStateReport {
    state_id: usize,
    description: String,
    characteristics: StateCharacteristics,
    requested_states: usize,
    effective_states: usize,
    state_counts: Vec<(usize, usize)>,
    explained_variance_ratio: [f64; 2],
    feature_importance: Vec<FeatureLoading>,
    transitions: Vec<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct SignalReport {
    timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    signal_type: SignalType,
    strength: f64,
    confidence: f64,
}

#[derive(Debug, Serialize)]
struct AnalysisMetadata {
    bars: usize,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    data_source: &'static str,
    lookback_window: usize,
    state_adjusted: bool,
    elapsed_ms: u64,
    config_version: u64,
}

#[derive(Debug, Serialize)]
struct AnalysisResponse {
    run_id: Uuid,
    symbol: String,
    timestamp: DateTime<Utc>,
    current_price: f64,
    technical_indicators: Vec<IndicatorReport>,
    market_state: Option<MarketStateReport>,
    latest_signal: Option<SignalReport>,
    historical_signals: Vec<SignalReport>,
    metadata: AnalysisMetadata,
}

async fn run_analysis(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnalysisRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let started = Instant::now();
    let config = state.config_snapshot();
    let config_version = state.current_config_version();

    let symbol = req.symbol.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(error_body(StatusCode::BAD_REQUEST, "symbol must not be empty"));
    }

    let num_states = req.num_states.unwrap_or(config.n_states);
    if !(MIN_STATES..=MAX_STATES).contains(&num_states) {
        return Err(error_body(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("num_states must be between {MIN_STATES} and {MAX_STATES}, got {num_states}"),
        ));
    }

    let end = req.end_time.unwrap_or_else(Utc::now);
    let start = req
        .start_time
        .unwrap_or_else(|| end - Duration::days(config.default_history_days));
    if start >= end {
        return Err(error_body(
            StatusCode::BAD_REQUEST,
            format!("start_time {start} must be before end_time {end}"),
        ));
    }

    let mut analyzer = MarketAnalyzer::from_config(&symbol, &config)
        .map_err(|e| analysis_error(&state, &symbol, e))?;
    analyzer
        .fetch_data(state.source.as_ref(), start, end)
        .await
        .map_err(|e| analysis_error(&state, &symbol, e))?;

    let n_states = req.state_analysis.then_some(num_states);
    let joined = tokio::task::spawn_blocking(move || {
        let signals = analyzer.run(n_states)?;
        Ok::<_, AnalysisError>((analyzer, signals))
    })
    .await
    .map_err(|e| {
        error!(symbol = %symbol, error = %e, "analysis task panicked");
        state.record_error(format!("analysis task failed: {e}"), Some(&symbol));
        error_body(StatusCode::INTERNAL_SERVER_ERROR, "analysis task failed")
    })?;
    let (analyzer, signals) = joined.map_err(|e| analysis_error(&state, &symbol, e))?;

    let response = build_response(
        &analyzer,
        &signals,
        &config,
        start,
        end,
        started,
        config_version,
        state.source.name(),
    )
    .map_err(|e| analysis_error(&state, &symbol, e))?;

    let total = state.record_analysis();
    info!(
        symbol = %response.symbol,
        run_id = %response.run_id,
        bars = response.metadata.bars,
        historical_signals = response.historical_signals.len(),
        elapsed_ms = response.metadata.elapsed_ms,
        analyses_run = total,
        "analysis completed"
    );
    Ok(Json(response))
}

#[allow(clippy::too_many_arguments)]
fn build_response(
    analyzer: &MarketAnalyzer,
    signals: &SignalSeries,
    config: &AnalysisConfig,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    started: Instant,
    config_version: u64,
    data_source: &'static str,
) -> Result<AnalysisResponse, AnalysisError> {
    let series = analyzer.series().ok_or(AnalysisError::NotReady {
        operation: "build_response",
        prerequisite: "market data",
    })?;
    let indicators = analyzer.indicators().ok_or(AnalysisError::NotReady {
        operation: "build_response",
        prerequisite: "technical indicators",
    })?;
    let bands = analyzer.current_thresholds()?;
    let timestamps = series.timestamps();
    let last_bar = series
        .bars()
        .last()
        .ok_or_else(|| AnalysisError::no_data(series.symbol(), "series is empty"))?;

    let to_report = |p: SignalPoint| SignalReport {
        timestamp: timestamps[p.index],
        signal_type: p.signal_type,
        strength: p.signal,
        confidence: p.confidence,
    };

    let market_state = analyzer.states().map(|s| MarketStateReport {
        state_id: s.current_state,
        description: s.current_description().unwrap_or_default().to_string(),
        characteristics: s.current_characteristics,
        requested_states: s.requested_states,
        effective_states: s.effective_states,
        state_counts: s.characteristics.iter().map(|(id, c)| (*id, c.bars)).collect(),
        explained_variance_ratio: s.explained_variance_ratio,
        feature_importance: s.feature_importance.clone(),
        transitions: s.transitions.iter().map(|i| timestamps[*i]).collect(),
    });

    Ok(AnalysisResponse {
        run_id: Uuid::new_v4(),
        symbol: analyzer.symbol().to_string(),
        timestamp: last_bar.timestamp,
        current_price: last_bar.close,
        technical_indicators: indicator_reports(&indicators.latest(), &bands, last_bar.close),
        market_state,
        latest_signal: signals.latest().map(to_report),
        historical_signals: signals.actionable().into_iter().map(to_report).collect(),
        metadata: AnalysisMetadata {
            bars: series.len(),
            start,
            end,
            data_source,
            lookback_window: config.lookback_window,
            state_adjusted: analyzer.state_adjusted_config().is_adjusted(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            config_version,
        },
    })
}

fn band_label(value: Option<f64>, lower: Option<f64>, upper: Option<f64>) -> &'static str {
    match (value, lower, upper) {
        (Some(v), Some(lo), _) if v < lo => "OVERSOLD",
        (Some(v), _, Some(hi)) if v > hi => "OVERBOUGHT",
        _ => "NEUTRAL",
    }
}

fn indicator_reports(
    latest: &LatestReadings,
    bands: &ThresholdBands,
    close: f64,
) -> Vec<IndicatorReport> {
    let macd_signal = match (latest.macd_histogram, bands.macd_threshold) {
        (Some(h), Some(t)) if h > t => "BULLISH",
        (Some(h), Some(t)) if h < -t => "BEARISH",
        _ => "NEUTRAL",
    };

    let bollinger_signal = match (latest.bb_lower, latest.bb_upper) {
        (_, Some(hi)) if close > hi => "ABOVE_UPPER",
        (Some(lo), _) if close < lo => "BELOW_LOWER",
        _ => "INSIDE",
    };

    vec![
        IndicatorReport {
            name: "RSI",
            value: latest.rsi,
            signal: latest.rsi.map(rsi_label).unwrap_or("NEUTRAL"),
            lower_threshold: bands.rsi_oversold,
            upper_threshold: bands.rsi_overbought,
        },
        IndicatorReport {
            name: "MACD",
            value: latest.macd_histogram,
            signal: macd_signal,
            lower_threshold: bands.macd_threshold.map(|t| -t),
            upper_threshold: bands.macd_threshold,
        },
        IndicatorReport {
            name: "Stochastic",
            value: latest.stoch_k,
            signal: band_label(latest.stoch_k, bands.stoch_oversold, bands.stoch_overbought),
            lower_threshold: bands.stoch_oversold,
            upper_threshold: bands.stoch_overbought,
        },
        IndicatorReport {
            name: "Bollinger",
            value: latest.bb_middle,
            signal: bollinger_signal,
            lower_threshold: latest.bb_lower,
            upper_threshold: latest.bb_upper,
        },
    ]
}

// =============================================================================
// Configuration
// =============================================================================

#[derive(Serialize)]
struct ConfigResponse {
    version: u64,
    config: AnalysisConfig,
}

async fn get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(ConfigResponse {
        version: state.current_config_version(),
        config: state.config_snapshot(),
    })
}

async fn put_config(
    State(state): State<Arc<AppState>>,
    Json(update): Json<AnalysisConfig>,
) -> Result<impl IntoResponse, ApiError> {
    let version = state.update_config(update).map_err(|e| {
        warn!(error = %e, "config update rejected");
        error_body(status_for(&e), e.to_string())
    })?;
    info!(version, "analysis config updated");
    Ok(Json(ConfigResponse {
        version,
        config: state.config_snapshot(),
    }))
}
