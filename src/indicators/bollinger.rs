// =============================================================================
// Bollinger Bands
// =============================================================================
//
// Bollinger Bands consist of a middle band (SMA), an upper band (SMA + k*σ),
// and a lower band (SMA - k*σ), with σ the population standard deviation of
// the closes in the window.

use crate::indicators::rolling::{rolling_std, sma};
use crate::types::Series;

/// Bar-aligned bands; each is defined from index `window - 1`.
#[derive(Debug, Clone)]
pub struct BollingerSeries {
    pub upper: Series,
    pub middle: Series,
    pub lower: Series,
}

pub fn calculate_bollinger(closes: &[f64], window: usize, num_std: f64) -> BollingerSeries {
    let middle = sma(closes, window);
    let std = rolling_std(closes, window, 0);

    let band = |sign: f64| -> Series {
        middle
            .iter()
            .zip(&std)
            .map(|(m, s)| Some((*m)? + sign * num_std * (*s)?))
            .collect()
    };

    BollingerSeries {
        upper: band(1.0),
        lower: band(-1.0),
        middle,
    }
}
