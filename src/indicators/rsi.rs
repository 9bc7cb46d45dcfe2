// =============================================================================
// Relative Strength Index (RSI) — Wilder's Smoothing
// =============================================================================
//
// RSI measures the speed and magnitude of recent price changes to evaluate
// whether an asset is overbought or oversold.
//
// Step 1: Compute price changes (deltas) from consecutive closes.
// Step 2: Seed average gain / average loss with the SMA of the first `period`
//          gains / losses.
// Step 3: Apply Wilder's exponential smoothing:
//            avg_gain = (prev_avg_gain * (period - 1) + current_gain) / period
//            avg_loss = (prev_avg_loss * (period - 1) + current_loss) / period
// Step 4: RS  = avg_gain / avg_loss
//          RSI = 100 - 100 / (1 + RS)
//
// Labels:  RSI >= 70 => OVERBOUGHT,  RSI <= 30 => OVERSOLD.
// =============================================================================

use crate::types::Series;

/// Compute the bar-aligned RSI series for `closes` and `period`.
///
/// The first `period` bars are `None` (they are consumed to seed the
/// averages); every later bar carries a value in [0, 100].
///
/// # Edge cases
/// - `period == 0` or `closes.len() < period + 1` => all `None`
/// - If both averages are zero (no movement), RSI is 50.0.
/// - If average loss is zero (no down moves), RSI is 100.0.
/// - A non-finite result ends the series; later bars stay `None`.
pub fn calculate_rsi(closes: &[f64], period: usize) -> Series {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() < period + 1 {
        return out;
    }

    // --- Compute price deltas ------------------------------------------------
    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    // --- Seed averages with SMA of first `period` deltas ---------------------
    let (sum_gain, sum_loss) = deltas[..period].iter().fold((0.0_f64, 0.0_f64), |(g, l), &d| {
        if d > 0.0 {
            (g + d, l)
        } else {
            (g, l + d.abs())
        }
    });

    let period_f = period as f64;
    let mut avg_gain = sum_gain / period_f;
    let mut avg_loss = sum_loss / period_f;

    let Some(first_rsi) = rsi_from_averages(avg_gain, avg_loss) else {
        return out;
    };
    out[period] = Some(first_rsi);

    // --- Wilder's smoothing for subsequent values ----------------------------
    // Delta `j` ends at close `j + 1`.
    for (j, &delta) in deltas.iter().enumerate().skip(period) {
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);

        avg_gain = (avg_gain * (period_f - 1.0) + gain) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + loss) / period_f;

        match rsi_from_averages(avg_gain, avg_loss) {
            Some(rsi) => out[j + 1] = Some(rsi),
            None => break,
        }
    }

    out
}

/// Human-readable label for an RSI reading.
pub fn rsi_label(value: f64) -> &'static str {
    if value >= 70.0 {
        "OVERBOUGHT"
    } else if value <= 30.0 {
        "OVERSOLD"
    } else {
        "NEUTRAL"
    }
}

// =============================================================================
// Internal helpers
// =============================================================================

/// Convert average gain / average loss into an RSI value in [0, 100].
fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    let rsi = if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0 // No movement at all, neutral.
    } else if avg_loss == 0.0 {
        100.0 // All gains, no losses.
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    };

    rsi.is_finite().then_some(rsi)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsi_empty_input() {
        assert!(calculate_rsi(&[], 14).is_empty());
    }

    #[test]
    fn rsi_period_zero() {
        assert!(calculate_rsi(&[1.0, 2.0, 3.0], 0).iter().all(|v| v.is_none()));
    }

    #[test]
    fn rsi_insufficient_data() {
        // Need period+1 closes (period deltas). 14 closes => 13 deltas < 14.
        let closes: Vec<f64> = (1..=14).map(|x| x as f64).collect();
        assert!(calculate_rsi(&closes, 14).iter().all(|v| v.is_none()));
    }

    #[test]
    fn rsi_leading_values_undefined() {
        let closes: Vec<f64> = (1..=30).map(|x| (x as f64).sin() + 10.0).collect();
        let series = calculate_rsi(&closes, 14);
        assert_eq!(series.len(), 30);
        assert!(series[..14].iter().all(|v| v.is_none()));
        assert!(series[14..].iter().all(|v| v.is_some()));
    }

    #[test]
    fn rsi_all_gains() {
        let closes: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        for v in calculate_rsi(&closes, 14).iter().flatten() {
            assert!((v - 100.0).abs() < 1e-10, "expected 100.0, got {v}");
        }
    }

    #[test]
    fn rsi_all_losses() {
        let closes: Vec<f64> = (1..=30).rev().map(|x| x as f64).collect();
        for v in calculate_rsi(&closes, 14).iter().flatten() {
            assert!(v.abs() < 1e-10, "expected 0.0, got {v}");
        }
    }

    #[test]
    fn rsi_flat_market() {
        let series = calculate_rsi(&[100.0; 30], 14);
        assert_eq!(series.iter().flatten().count(), 16);
        for v in series.iter().flatten() {
            assert!((v - 50.0).abs() < 1e-10, "expected 50.0, got {v}");
        }
    }

    #[test]
    fn rsi_range_check() {
        let closes = vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08,
            45.89, 46.03, 44.18, 44.22, 44.57, 43.42, 42.66, 43.13,
        ];
        for v in calculate_rsi(&closes, 14).iter().flatten() {
            assert!((0.0..=100.0).contains(v), "RSI {v} out of range");
        }
    }

    #[test]
    fn labels() {
        assert_eq!(rsi_label(85.0), "OVERBOUGHT");
        assert_eq!(rsi_label(12.0), "OVERSOLD");
        assert_eq!(rsi_label(50.0), "NEUTRAL");
    }
}
