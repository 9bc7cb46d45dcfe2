// =============================================================================
// Composite Signal Generator
// =============================================================================
//
// For each bar i >= H (the lookback window):
//
//   RSI / Stochastic %K  percentile bands over the trailing H values
//                        (i-H..i, current bar excluded):
//                          v < p(100-q) -> +1,  v > p(q) -> -1
//                          strength = min(|v - 50| / 50, 1)
//   MACD                 diff = macd - signal; threshold = k · std(diff history)
//                          diff > threshold -> +1, diff < -threshold -> -1
//                          strength = min(|diff| / std, 1)
//
// A vote whose current value or history has any undefined entry is neutral;
// its weight still counts in the composite denominator.
//
//   confidence = min(volume_scale · min(max(|composite|, floor), 1), 1)
//
// where volume_scale is the product of the confidence rules evaluated at
// volume_i / mean(volume[i-20..i]). Bars before H carry 0 / 0.
// =============================================================================

use serde::Serialize;
use tracing::debug;

use crate::adaptive::EffectiveConfig;
use crate::indicators::rolling::{mean, percentile, std_dev};
use crate::indicators::TechnicalIndicators;
use crate::types::{Series, SignalType};

use super::weighted_score::{IndicatorVote, VoteSource, WeightedScorer};

pub const DEFAULT_LOOKBACK: usize = 100;
pub const VOLUME_WINDOW: usize = 20;
/// |composite| above this is reported as a BUY/SELL signal.
pub const SIGNAL_REPORT_THRESHOLD: f64 = 0.1;

/// A history std at or below this (relative to the current diff) is zero.
const MACD_STD_EPSILON: f64 = 1e-10;

/// Composite signal and confidence per bar.
#[derive(Debug, Clone, Serialize)]
pub struct SignalSeries {
    pub signal: Vec<f64>,
    pub confidence: Vec<f64>,
    pub lookback: usize,
}

/// One bar of a `SignalSeries`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SignalPoint {
    pub index: usize,
    pub signal: f64,
    pub confidence: f64,
    pub signal_type: SignalType,
}

impl SignalSeries {
    pub fn len(&self) -> usize {
        self.signal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signal.is_empty()
    }

    fn point(&self, index: usize) -> SignalPoint {
        let signal = self.signal[index];
        SignalPoint {
            index,
            signal,
            confidence: self.confidence[index],
            signal_type: SignalType::from_composite(signal, SIGNAL_REPORT_THRESHOLD),
        }
    }

    /// Signal at the last bar, if that bar is past the lookback window.
    pub fn latest(&self) -> Option<SignalPoint> {
        let last = self.len().checked_sub(1)?;
        (last >= self.lookback).then(|| self.point(last))
    }

    /// Bars with |signal| > `SIGNAL_REPORT_THRESHOLD`, in bar order.
    pub fn actionable(&self) -> Vec<SignalPoint> {
        (0..self.len())
            .filter(|&i| self.signal[i].abs() > SIGNAL_REPORT_THRESHOLD)
            .map(|i| self.point(i))
            .collect()
    }

    pub fn positive_count(&self) -> usize {
        self.signal.iter().filter(|s| **s > 0.0).count()
    }

    pub fn negative_count(&self) -> usize {
        self.signal.iter().filter(|s| **s < 0.0).count()
    }
}

/// Threshold bands in force at one bar; `None` where history is undefined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ThresholdBands {
    pub rsi_oversold: Option<f64>,
    pub rsi_overbought: Option<f64>,
    pub stoch_oversold: Option<f64>,
    pub stoch_overbought: Option<f64>,
    pub macd_threshold: Option<f64>,
}

/// Generate the composite signal for every bar.
///
/// `volumes` must be bar-aligned with `indicators`.
pub fn generate_signals(
    indicators: &TechnicalIndicators,
    config: &EffectiveConfig,
    volumes: &[f64],
    lookback: usize,
) -> SignalSeries {
    let n = indicators.len();
    let mut signal = vec![0.0; n];
    let mut confidence = vec![0.0; n];
    let histogram = indicators.macd_histogram();

    for i in lookback..n {
        let votes = [
            percentile_vote(
                VoteSource::Rsi,
                &indicators.rsi,
                i,
                lookback,
                config.rsi.threshold_percentile,
                config.rsi.weight,
            ),
            macd_vote(&histogram, i, lookback, config.macd.threshold_std, config.macd.weight),
            percentile_vote(
                VoteSource::Stochastic,
                &indicators.stoch_k,
                i,
                lookback,
                config.stochastic.threshold_percentile,
                config.stochastic.weight,
            ),
        ];

        let composite = WeightedScorer::composite(&votes);
        let scale = config.confidence_scale(volume_ratio(volumes, i));
        let floored = composite.abs().max(config.min_signal_confidence).min(1.0);
        let conf = scale * floored;

        signal[i] = composite;
        confidence[i] = if conf.is_finite() { conf.clamp(0.0, 1.0) } else { 0.0 };
    }

    let series = SignalSeries {
        signal,
        confidence,
        lookback,
    };
    debug!(
        bars = n,
        lookback,
        positive = series.positive_count(),
        negative = series.negative_count(),
        "composite signals generated"
    );
    series
}

/// Percentile bands and MACD threshold at bar `i`.
pub fn threshold_bands(
    indicators: &TechnicalIndicators,
    config: &EffectiveConfig,
    i: usize,
    lookback: usize,
) -> ThresholdBands {
    let bands = |series: &Series, q: f64| -> (Option<f64>, Option<f64>) {
        match defined_history(series, i, lookback) {
            Some(hist) => (
                finite(percentile(&hist, 100.0 - q)),
                finite(percentile(&hist, q)),
            ),
            None => (None, None),
        }
    };
    let (rsi_oversold, rsi_overbought) = bands(&indicators.rsi, config.rsi.threshold_percentile);
    let (stoch_oversold, stoch_overbought) =
        bands(&indicators.stoch_k, config.stochastic.threshold_percentile);
    let macd_threshold = defined_history(&indicators.macd_histogram(), i, lookback)
        .and_then(|hist| finite(config.macd.threshold_std * std_dev(&hist, 1)));

    ThresholdBands {
        rsi_oversold,
        rsi_overbought,
        stoch_oversold,
        stoch_overbought,
        macd_threshold,
    }
}

/// The `lookback` values before bar `i`, if all are defined.
fn defined_history(series: &Series, i: usize, lookback: usize) -> Option<Vec<f64>> {
    if lookback == 0 || i < lookback || i > series.len() {
        return None;
    }
    series[i - lookback..i].iter().copied().collect()
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

fn percentile_vote(
    source: VoteSource,
    series: &Series,
    i: usize,
    lookback: usize,
    threshold_percentile: f64,
    weight: f64,
) -> IndicatorVote {
    let neutral = IndicatorVote::neutral(source, weight);
    let (Some(value), Some(history)) = (series[i], defined_history(series, i, lookback)) else {
        return neutral;
    };

    let oversold = percentile(&history, 100.0 - threshold_percentile);
    let overbought = percentile(&history, threshold_percentile);
    if !oversold.is_finite() || !overbought.is_finite() {
        return neutral;
    }

    let direction = if value < oversold {
        1.0
    } else if value > overbought {
        -1.0
    } else {
        0.0
    };
    let strength = ((value - 50.0).abs() / 50.0).min(1.0);
    IndicatorVote::new(source, direction, strength, weight)
}

fn macd_vote(
    histogram: &Series,
    i: usize,
    lookback: usize,
    threshold_std: f64,
    weight: f64,
) -> IndicatorVote {
    let neutral = IndicatorVote::neutral(VoteSource::Macd, weight);
    let (Some(diff), Some(history)) = (histogram[i], defined_history(histogram, i, lookback))
    else {
        return neutral;
    };

    let std = std_dev(&history, 1);
    if !std.is_finite() || std <= MACD_STD_EPSILON * (1.0 + diff.abs()) {
        return neutral;
    }

    let threshold = threshold_std * std;
    let direction = if diff > threshold {
        1.0
    } else if diff < -threshold {
        -1.0
    } else {
        0.0
    };
    let strength = (diff.abs() / std).min(1.0);
    IndicatorVote::new(VoteSource::Macd, direction, strength, weight)
}

/// volume_i over the mean of the preceding `VOLUME_WINDOW` volumes; 0 when
/// that mean is zero or there is no preceding bar.
fn volume_ratio(volumes: &[f64], i: usize) -> f64 {
    let Some(&current) = volumes.get(i) else {
        return 0.0;
    };
    let window = &volumes[i.saturating_sub(VOLUME_WINDOW)..i];
    let avg = mean(window);
    if avg.is_finite() && avg > 0.0 {
        current / avg
    } else {
        0.0
    }
}
