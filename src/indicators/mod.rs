// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the technical indicators feeding
// the composite signal. Every series is bar-aligned with the input: element
// `i` belongs to bar `i`, and bars without enough history are `None`.

pub mod bollinger;
pub mod ema;
pub mod rolling;
pub mod rsi;
pub mod stochastic;

use serde::Serialize;
use tracing::debug;

use crate::error::{AnalysisError, AnalysisResult};
use crate::indicator_config::BaseConfig;
use crate::market_data::OhlcvSeries;
use crate::types::Series;

use self::bollinger::calculate_bollinger;
use self::ema::calculate_macd;
use self::rsi::calculate_rsi;
use self::stochastic::calculate_stochastic;

/// All indicator series for one analysis run.
#[derive(Debug, Clone, Serialize)]
pub struct TechnicalIndicators {
    pub rsi: Series,
    pub macd: Series,
    pub macd_signal: Series,
    pub stoch_k: Series,
    pub stoch_d: Series,
    pub bb_upper: Series,
    pub bb_middle: Series,
    pub bb_lower: Series,
}

impl TechnicalIndicators {
    /// Number of bars covered (identical for every series).
    pub fn len(&self) -> usize {
        self.rsi.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rsi.is_empty()
    }

    /// `macd - macd_signal` where both are defined.
    pub fn macd_histogram(&self) -> Series {
        self.macd
            .iter()
            .zip(&self.macd_signal)
            .map(|(m, s)| Some((*m)? - (*s)?))
            .collect()
    }

    /// Most recent defined value of every indicator.
    pub fn latest(&self) -> LatestReadings {
        let last = |s: &Series| s.iter().rev().find_map(|v| *v);
        LatestReadings {
            rsi: last(&self.rsi),
            macd: last(&self.macd),
            macd_signal: last(&self.macd_signal),
            macd_histogram: last(&self.macd_histogram()),
            stoch_k: last(&self.stoch_k),
            stoch_d: last(&self.stoch_d),
            bb_upper: last(&self.bb_upper),
            bb_middle: last(&self.bb_middle),
            bb_lower: last(&self.bb_lower),
        }
    }
}

/// Snapshot of the latest indicator values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatestReadings {
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub stoch_k: Option<f64>,
    pub stoch_d: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
}

/// Compute RSI, MACD, Stochastic and Bollinger Bands for `series`.
///
/// Fails with `InsufficientHistory` when the series is shorter than the
/// longest window in `config`; the error names that indicator.
pub fn calculate_technical_indicators(
    series: &OhlcvSeries,
    config: &BaseConfig,
) -> AnalysisResult<TechnicalIndicators> {
    let available = series.len();
    let requirements = [
        ("rsi", config.rsi.window + 1),
        ("macd", config.macd.slow_period),
        ("stochastic", config.stochastic.k_period),
        ("bollinger", config.bollinger.window),
    ];
    if let Some((indicator, required)) = requirements
        .into_iter()
        .filter(|(_, required)| *required > available)
        .max_by_key(|(_, required)| *required)
    {
        return Err(AnalysisError::InsufficientHistory {
            symbol: series.symbol().to_string(),
            indicator,
            required,
            available,
        });
    }

    let closes = series.closes();
    let highs = series.highs();
    let lows = series.lows();

    let rsi = calculate_rsi(&closes, config.rsi.window);
    let macd = calculate_macd(
        &closes,
        config.macd.fast_period,
        config.macd.slow_period,
        config.macd.signal_period,
    );
    let stoch = calculate_stochastic(
        &highs,
        &lows,
        &closes,
        config.stochastic.k_period,
        config.stochastic.d_period,
    );
    let bb = calculate_bollinger(&closes, config.bollinger.window, config.bollinger.num_std);

    debug!(
        symbol = series.symbol(),
        bars = available,
        rsi_defined = rsi.iter().flatten().count(),
        macd_signal_defined = macd.signal.iter().flatten().count(),
        "technical indicators calculated"
    );

    Ok(TechnicalIndicators {
        rsi,
        macd: macd.line,
        macd_signal: macd.signal,
        stoch_k: stoch.k,
        stoch_d: stoch.d,
        bb_upper: bb.upper,
        bb_middle: bb.middle,
        bb_lower: bb.lower,
    })
}
