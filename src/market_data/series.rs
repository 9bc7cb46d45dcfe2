use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, AnalysisResult};

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

// ---------------------------------------------------------------------------
// OhlcvSeries -- validated, immutable bar sequence for one symbol
// ---------------------------------------------------------------------------

/// Time-ascending OHLCV bars for a single symbol.
///
/// Construction validates the invariants every downstream computation relies
/// on: at least one bar, strictly increasing timestamps, finite positive
/// prices and finite non-negative volume. The bars cannot be mutated after
/// construction; a new analysis cycle needs a new series.
#[derive(Debug, Clone, Serialize)]
pub struct OhlcvSeries {
    symbol: String,
    bars: Vec<Bar>,
}

impl OhlcvSeries {
    pub fn new(symbol: impl Into<String>, bars: Vec<Bar>) -> AnalysisResult<Self> {
        let symbol = symbol.into();

        if bars.is_empty() {
            return Err(AnalysisError::no_data(symbol, "series is empty"));
        }

        for (i, bar) in bars.iter().enumerate() {
            let prices = [bar.open, bar.high, bar.low, bar.close];
            if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
                return Err(AnalysisError::InvalidSeries {
                    symbol,
                    reason: format!("bar {i} has a non-positive or non-finite price"),
                });
            }
            if !bar.volume.is_finite() || bar.volume < 0.0 {
                return Err(AnalysisError::InvalidSeries {
                    symbol,
                    reason: format!("bar {i} has a negative or non-finite volume"),
                });
            }
            if i > 0 && bar.timestamp <= bars[i - 1].timestamp {
                return Err(AnalysisError::InvalidSeries {
                    symbol,
                    reason: format!(
                        "timestamps must be strictly increasing (bar {i} at {})",
                        bar.timestamp
                    ),
                });
            }
        }

        Ok(Self { symbol, bars })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn highs(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.high).collect()
    }

    pub fn lows(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.low).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.volume).collect()
    }

    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.bars.iter().map(|b| b.timestamp).collect()
    }

    /// Close of the most recent bar.
    pub fn last_close(&self) -> Option<f64> {
        self.bars.last().map(|b| b.close)
    }
}

// =============================================================================
// Test fixtures shared by the analysis modules
// =============================================================================
#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::{Duration, TimeZone};

    /// Daily bars starting 2024-01-01 built from close/high/low/volume columns.
    pub fn series_from(
        closes: &[f64],
        highs: &[f64],
        lows: &[f64],
        volumes: &[f64],
    ) -> OhlcvSeries {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                Bar::new(
                    start + Duration::days(i as i64),
                    c,
                    highs[i],
                    lows[i],
                    c,
                    volumes[i],
                )
            })
            .collect();
        OhlcvSeries::new("TEST", bars).unwrap()
    }

    /// Perfectly flat series: constant price, zero range, constant volume.
    pub fn flat(n: usize) -> OhlcvSeries {
        let c = vec![100.0; n];
        series_from(&c, &c, &c, &vec![1_000.0; n])
    }

    /// Deterministic pseudo-random values in [0, 1).
    pub fn lcg(n: usize, seed: u64) -> Vec<f64> {
        let mut state = seed;
        (0..n)
            .map(|_| {
                state = state
                    .wrapping_mul(6_364_136_223_846_793_005)
                    .wrapping_add(1_442_695_040_888_963_407);
                (state >> 11) as f64 / (1u64 << 53) as f64
            })
            .collect()
    }

    /// Linear uptrend whose close never falls; noise only on the wicks and
    /// volume. RSI is pinned at 100 after warm-up.
    pub fn uptrend(n: usize) -> OhlcvSeries {
        let noise = lcg(2 * n, 7);
        let closes: Vec<f64> = (0..n).map(|i| 100.0 + 0.5 * i as f64).collect();
        let highs: Vec<f64> = closes
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let u = noise[i];
                // Roughly a third of the bars close on their high.
                if u < 0.35 {
                    *c
                } else {
                    c + 0.2 * u
                }
            })
            .collect();
        let lows: Vec<f64> = closes
            .iter()
            .enumerate()
            .map(|(i, c)| c - 0.05 - 0.15 * noise[n + i])
            .collect();
        let volumes: Vec<f64> = noise.iter().take(n).map(|u| 900.0 + 200.0 * u).collect();
        series_from(&closes, &highs, &lows, &volumes)
    }

    /// Linear uptrend (0.5 per bar) with uniform noise of width `amplitude`
    /// on the close, so the close falls on some bars.
    pub fn noisy_uptrend(n: usize, amplitude: f64, seed: u64) -> OhlcvSeries {
        let noise = lcg(3 * n, seed);
        let closes: Vec<f64> = (0..n)
            .map(|i| 100.0 + 0.5 * i as f64 + amplitude * (noise[i] - 0.5))
            .collect();
        let highs: Vec<f64> = closes
            .iter()
            .enumerate()
            .map(|(i, c)| c + 0.1 + 0.2 * noise[n + i])
            .collect();
        let lows: Vec<f64> = closes
            .iter()
            .enumerate()
            .map(|(i, c)| c - 0.1 - 0.2 * noise[2 * n + i])
            .collect();
        let volumes: Vec<f64> = noise[n..2 * n].iter().map(|u| 900.0 + 200.0 * u).collect();
        series_from(&closes, &highs, &lows, &volumes)
    }

    /// Oscillating series with varying volume, useful for generic checks.
    pub fn wave(n: usize) -> OhlcvSeries {
        let noise = lcg(n, 11);
        let closes: Vec<f64> = (0..n)
            .map(|i| {
                let t = i as f64;
                100.0 + 8.0 * (t / 9.0).sin() + 3.0 * (t / 23.0).cos() + 2.0 * noise[i]
            })
            .collect();
        let highs: Vec<f64> = closes.iter().map(|c| c + 0.8).collect();
        let lows: Vec<f64> = closes.iter().map(|c| c - 0.8).collect();
        let volumes: Vec<f64> = (0..n)
            .map(|i| 1_000.0 + 400.0 * ((i as f64) / 5.0).sin().abs() + 100.0 * noise[i])
            .collect();
        series_from(&closes, &highs, &lows, &volumes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(day: u32, close: f64, volume: f64) -> Bar {
        let ts = Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap();
        Bar::new(ts, close, close + 1.0, close - 1.0, close, volume)
    }

    #[test]
    fn empty_series_is_no_data() {
        let err = OhlcvSeries::new("AAPL", Vec::new()).unwrap_err();
        assert!(matches!(err, AnalysisError::NoDataAvailable { .. }));
    }

    #[test]
    fn duplicate_timestamps_rejected() {
        let err = OhlcvSeries::new("AAPL", vec![bar(1, 10.0, 5.0), bar(1, 11.0, 5.0)]).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidSeries { .. }));
    }

    #[test]
    fn descending_timestamps_rejected() {
        let err = OhlcvSeries::new("AAPL", vec![bar(2, 10.0, 5.0), bar(1, 11.0, 5.0)]).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidSeries { .. }));
    }

    #[test]
    fn negative_volume_rejected() {
        let err = OhlcvSeries::new("AAPL", vec![bar(1, 10.0, -1.0)]).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidSeries { .. }));
    }

    #[test]
    fn zero_price_rejected() {
        let mut b = bar(1, 10.0, 1.0);
        b.low = 0.0;
        assert!(OhlcvSeries::new("AAPL", vec![b]).is_err());
    }

    #[test]
    fn accessors_follow_bar_order() {
        let s = OhlcvSeries::new("AAPL", vec![bar(1, 10.0, 5.0), bar(2, 11.0, 0.0)]).unwrap();
        assert_eq!(s.len(), 2);
        assert_eq!(s.symbol(), "AAPL");
        assert_eq!(s.closes(), vec![10.0, 11.0]);
        assert_eq!(s.volumes(), vec![5.0, 0.0]);
        assert_eq!(s.last_close(), Some(11.0));
    }
}
