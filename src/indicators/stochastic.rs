// =============================================================================
// Stochastic Oscillator (%K / %D)
// =============================================================================
//
//   %K = 100 * (close - lowest_low(k)) / (highest_high(k) - lowest_low(k))
//   %D = SMA(%K, d)
//
// A window with zero high-low range has no position to report and yields the
// neutral 50.

use crate::indicators::rolling::{mean, rolling_defined};
use crate::types::Series;

#[derive(Debug, Clone)]
pub struct StochasticSeries {
    pub k: Series,
    pub d: Series,
}

/// Compute bar-aligned %K (defined from index `k_period - 1`) and %D
/// (defined from index `k_period + d_period - 2`).
pub fn calculate_stochastic(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    k_period: usize,
    d_period: usize,
) -> StochasticSeries {
    let n = closes.len().min(highs.len()).min(lows.len());
    let mut k = vec![None; n];

    if k_period > 0 && n >= k_period {
        for i in (k_period - 1)..n {
            let start = i + 1 - k_period;
            let hh = highs[start..=i].iter().copied().fold(f64::MIN, f64::max);
            let ll = lows[start..=i].iter().copied().fold(f64::MAX, f64::min);
            let range = hh - ll;

            let value = if range.abs() < f64::EPSILON {
                50.0
            } else {
                100.0 * (closes[i] - ll) / range
            };
            if value.is_finite() {
                k[i] = Some(value);
            }
        }
    }

    let d = rolling_defined(&k, d_period, mean);
    StochasticSeries { k, d }
}
