// =============================================================================
// Exponential Moving Average (EMA) and MACD
// =============================================================================
//
// EMA gives more weight to recent prices, making it more responsive to new
// information than the Simple Moving Average (SMA).
//
// Formula:
//   multiplier = 2 / (period + 1)
//   EMA_t      = value_t * multiplier + EMA_{t-1} * (1 - multiplier)
//
// The very first EMA value is seeded with the SMA of the first `period`
// defined values, so the output is defined from index `first + period - 1`.
//
// MACD:
//   line   = EMA(fast) - EMA(slow)
//   signal = EMA(signal_period) of the MACD line
// =============================================================================

use crate::types::Series;

/// Compute a bar-aligned EMA over `values`, skipping the undefined prefix.
///
/// # Edge cases
/// - `period == 0` => all `None`
/// - fewer than `period` defined values after the prefix => all `None`
/// - an undefined or non-finite value after seeding ends the series; later
///   bars stay `None` because downstream consumers should not trust a broken
///   series.
pub fn calculate_ema(values: &[Option<f64>], period: usize) -> Series {
    let mut out = vec![None; values.len()];
    if period == 0 {
        return out;
    }

    let Some(first) = values.iter().position(|v| v.is_some()) else {
        return out;
    };
    if values.len() < first + period {
        return out;
    }

    // Seed: SMA of the first `period` defined values.
    let seed_window = &values[first..first + period];
    if seed_window.iter().any(|v| v.is_none()) {
        return out;
    }
    let sma = seed_window.iter().flatten().sum::<f64>() / period as f64;
    if !sma.is_finite() {
        return out;
    }

    let multiplier = 2.0 / (period + 1) as f64;
    let seed_idx = first + period - 1;
    out[seed_idx] = Some(sma);

    let mut prev = sma;
    for (i, value) in values.iter().enumerate().skip(seed_idx + 1) {
        let Some(v) = value else { break };
        let ema = v * multiplier + prev * (1.0 - multiplier);
        if !ema.is_finite() {
            break;
        }
        out[i] = Some(ema);
        prev = ema;
    }

    out
}

/// MACD line and signal line, both bar-aligned with `closes`.
#[derive(Debug, Clone)]
pub struct MacdSeries {
    pub line: Series,
    pub signal: Series,
}

/// Compute MACD(fast, slow, signal) over `closes`.
pub fn calculate_macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> MacdSeries {
    let input: Series = closes.iter().copied().map(Some).collect();
    let fast_ema = calculate_ema(&input, fast);
    let slow_ema = calculate_ema(&input, slow);

    let line: Series = fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| Some((*f)? - (*s)?))
        .collect();
    let signal = calculate_ema(&line, signal);

    MacdSeries { line, signal }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn defined(values: &[f64]) -> Series {
        values.iter().copied().map(Some).collect()
    }

    #[test]
    fn ema_period_zero() {
        assert!(calculate_ema(&defined(&[1.0, 2.0, 3.0]), 0).iter().all(|v| v.is_none()));
    }

    #[test]
    fn ema_insufficient_data() {
        assert_eq!(calculate_ema(&defined(&[1.0, 2.0]), 5), vec![None, None]);
    }

    #[test]
    fn ema_period_equals_length() {
        let ema = calculate_ema(&defined(&[2.0, 4.0, 6.0]), 3);
        assert_eq!(ema[..2], [None, None]);
        // Should be the SMA = (2+4+6)/3 = 4.0
        assert!((ema[2].unwrap() - 4.0).abs() < 1e-10);
    }

    #[test]
    fn ema_known_values() {
        // 5-period EMA of [1..=10]: SMA seed 3.0 at index 4, multiplier 1/3.
        let closes: Vec<f64> = (1..=10).map(|x| x as f64).collect();
        let ema = calculate_ema(&defined(&closes), 5);
        assert_eq!(ema.len(), 10);
        assert!(ema[..4].iter().all(|v| v.is_none()));

        let mult = 2.0 / 6.0;
        let mut expected = 3.0;
        assert!((ema[4].unwrap() - expected).abs() < 1e-10);
        for (i, &c) in closes.iter().enumerate().skip(5) {
            expected = c * mult + expected * (1.0 - mult);
            assert!((ema[i].unwrap() - expected).abs() < 1e-10);
        }
    }

    #[test]
    fn ema_skips_undefined_prefix() {
        let values = vec![None, None, Some(1.0), Some(2.0), Some(3.0), Some(4.0)];
        let ema = calculate_ema(&values, 3);
        assert_eq!(ema[..4], [None, None, None, None]);
        assert!((ema[4].unwrap() - 2.0).abs() < 1e-10);
        assert!((ema[5].unwrap() - 3.0).abs() < 1e-10);
    }

    #[test]
    fn ema_stops_on_nan() {
        let ema = calculate_ema(&defined(&[1.0, 2.0, 3.0, f64::NAN, 5.0]), 3);
        // Seed at index 2, NaN at index 3 ends the series.
        assert!(ema[2].is_some());
        assert!(ema[3].is_none());
        assert!(ema[4].is_none());
    }

    #[test]
    fn macd_alignment() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 / 3.0).sin()).collect();
        let macd = calculate_macd(&closes, 12, 26, 9);
        assert_eq!(macd.line.len(), 60);
        assert_eq!(macd.signal.len(), 60);
        assert!(macd.line[24].is_none());
        assert!(macd.line[25].is_some());
        assert!(macd.signal[32].is_none());
        assert!(macd.signal[33].is_some());
    }

    #[test]
    fn macd_linear_trend_is_steady() {
        // SMA-seeded EMAs start at their steady-state lag on a linear series,
        // so the line is constant at (slow - fast) / 2 * slope.
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + 0.5 * i as f64).collect();
        let macd = calculate_macd(&closes, 12, 26, 9);
        for v in macd.line.iter().flatten() {
            assert!((v - 3.5).abs() < 1e-9, "got {v}");
        }
        for (l, s) in macd.line.iter().zip(&macd.signal) {
            if let (Some(l), Some(s)) = (l, s) {
                assert!((l - s).abs() < 1e-9);
            }
        }
    }
}
