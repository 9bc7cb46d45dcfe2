// =============================================================================
// Feature Extraction — regime-descriptive features per bar
// =============================================================================
//
//   volatility        = rolling sample std of % returns       (20 returns)
//   trend_strength    = (close - SMA20)/close + (SMA20 - SMA50)/SMA20
//   volume_ratio      = volume / rolling mean volume           (50 bars)
//   return_dispersion = rolling IQR (p75 - p25) of % returns   (20 returns)
//
// All windows are trailing. Bars without enough history get 0 rather than
// being dropped, so the matrix stays row-aligned with the OHLCV series. This
// treats "no history yet" the same as "exactly zero", which biases state
// assignment of the warm-up bars; it is kept for compatibility with existing
// state definitions.
// =============================================================================

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::indicators::rolling::{mean, percentile, pct_change, rolling_defined, sma, std_dev};
use crate::market_data::OhlcvSeries;
use crate::types::StateFeature;

const RETURN_WINDOW: usize = 20;
const FAST_MA: usize = 20;
const SLOW_MA: usize = 50;
const VOLUME_WINDOW: usize = 50;

/// Regime features of a single bar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub volatility: f64,
    pub trend_strength: f64,
    pub volume_ratio: f64,
    pub return_dispersion: f64,
}

impl FeatureVector {
    pub fn get(&self, feature: StateFeature) -> f64 {
        match feature {
            StateFeature::Volatility => self.volatility,
            StateFeature::TrendStrength => self.trend_strength,
            StateFeature::VolumeRatio => self.volume_ratio,
            StateFeature::ReturnDispersion => self.return_dispersion,
        }
    }

    pub fn as_array(&self) -> [f64; 4] {
        [
            self.volatility,
            self.trend_strength,
            self.volume_ratio,
            self.return_dispersion,
        ]
    }
}

/// One feature row per bar, in bar order.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureMatrix {
    rows: Vec<FeatureVector>,
}

impl FeatureMatrix {
    pub fn from_rows(rows: Vec<FeatureVector>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[FeatureVector] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// `n_bars x 4` matrix in `StateFeature::ALL` column order.
    pub fn to_array(&self) -> Array2<f64> {
        let mut out = Array2::zeros((self.rows.len(), StateFeature::ALL.len()));
        for (i, row) in self.rows.iter().enumerate() {
            for (j, v) in row.as_array().into_iter().enumerate() {
                out[[i, j]] = v;
            }
        }
        out
    }
}

/// Extract the four regime features for every bar of `series`.
pub fn extract_features(series: &OhlcvSeries) -> FeatureMatrix {
    let closes = series.closes();
    let volumes = series.volumes();
    let n = closes.len();

    let returns = pct_change(&closes);
    let volatility = rolling_defined(&returns, RETURN_WINDOW, |w| std_dev(w, 1));
    let dispersion = rolling_defined(&returns, RETURN_WINDOW, |w| {
        percentile(w, 75.0) - percentile(w, 25.0)
    });

    let sma_fast = sma(&closes, FAST_MA);
    let sma_slow = sma(&closes, SLOW_MA);
    let volume_mean = sma(&volumes, VOLUME_WINDOW);

    let rows: Vec<FeatureVector> = (0..n)
        .map(|i| {
            let trend_strength = match (sma_fast[i], sma_slow[i]) {
                (Some(f), Some(s)) => {
                    let t = (closes[i] - f) / closes[i] + (f - s) / f;
                    finite_or_zero(t)
                }
                _ => 0.0,
            };
            let volume_ratio = match volume_mean[i] {
                Some(m) if m > 0.0 => finite_or_zero(volumes[i] / m),
                _ => 0.0,
            };

            FeatureVector {
                volatility: volatility[i].unwrap_or(0.0),
                trend_strength,
                volume_ratio,
                return_dispersion: dispersion[i].unwrap_or(0.0),
            }
        })
        .collect();

    let volatilities: Vec<f64> = rows.iter().map(|r| r.volatility).collect();
    debug!(
        symbol = series.symbol(),
        bars = n,
        mean_volatility = format!("{:.6}", mean(&volatilities)),
        "features extracted"
    );

    FeatureMatrix { rows }
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::series::fixtures;

    #[test]
    fn matrix_is_row_aligned() {
        let series = fixtures::wave(120);
        let features = extract_features(&series);
        assert_eq!(features.len(), 120);
        assert_eq!(features.to_array().dim(), (120, 4));
    }

    #[test]
    fn warm_up_rows_are_zero_filled() {
        let series = fixtures::wave(120);
        let rows = extract_features(&series).rows().to_vec();

        // 20 returns first complete at bar 20.
        assert_eq!(rows[19].volatility, 0.0);
        assert!(rows[20].volatility > 0.0);
        assert_eq!(rows[19].return_dispersion, 0.0);
        assert!(rows[20].return_dispersion > 0.0);

        // 50-bar windows first complete at bar 49.
        assert_eq!(rows[48].trend_strength, 0.0);
        assert_eq!(rows[48].volume_ratio, 0.0);
        assert!(rows[49].volume_ratio > 0.0);
    }

    #[test]
    fn flat_series_has_zero_features_except_volume() {
        let rows = extract_features(&fixtures::flat(100)).rows().to_vec();
        for (i, r) in rows.iter().enumerate() {
            assert_eq!(r.volatility, 0.0);
            assert_eq!(r.trend_strength, 0.0);
            assert_eq!(r.return_dispersion, 0.0);
            let expected = if i >= 49 { 1.0 } else { 0.0 };
            assert!((r.volume_ratio - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn uptrend_has_positive_trend_strength() {
        let rows = extract_features(&fixtures::uptrend(120)).rows().to_vec();
        assert!(rows[49..].iter().all(|r| r.trend_strength > 0.0));
    }

    #[test]
    fn trend_strength_known_value() {
        // Linear closes 1..=50: SMA20 = 40.5, SMA50 = 25.5 at the last bar.
        let closes: Vec<f64> = (1..=50).map(|x| x as f64).collect();
        let series = fixtures::series_from(&closes, &closes, &closes, &vec![1.0; 50]);
        let rows = extract_features(&series).rows().to_vec();
        let expected = (50.0 - 40.5) / 50.0 + (40.5 - 25.5) / 40.5;
        assert!((rows[49].trend_strength - expected).abs() < 1e-12);
    }

    #[test]
    fn zero_volume_gives_zero_ratio() {
        let c = vec![100.0; 60];
        let series = fixtures::series_from(&c, &c, &c, &vec![0.0; 60]);
        let rows = extract_features(&series).rows().to_vec();
        assert!(rows.iter().all(|r| r.volume_ratio == 0.0));
    }
}
