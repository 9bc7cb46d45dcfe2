// =============================================================================
// Rolling-window statistics
// =============================================================================
//
// Trailing-window helpers shared by the indicators and the feature extractor.
// Every function returns a bar-aligned series: element `i` only looks at
// inputs `..=i`, and is `None` until the window is full (or while any input in
// the window is undefined).

use crate::types::Series;

/// Simple moving average over `window` trailing values.
pub fn sma(values: &[f64], window: usize) -> Series {
    rolling(values, window, mean)
}

/// Rolling standard deviation with `ddof` delta degrees of freedom
/// (0 = population, 1 = sample).
pub fn rolling_std(values: &[f64], window: usize, ddof: usize) -> Series {
    rolling(values, window, |w| std_dev(w, ddof))
}

/// Apply `f` to each full trailing window of defined values.
pub fn rolling_defined(values: &[Option<f64>], window: usize, f: impl Fn(&[f64]) -> f64) -> Series {
    let mut out = vec![None; values.len()];
    if window == 0 {
        return out;
    }
    let mut buf = Vec::with_capacity(window);
    for i in (window.saturating_sub(1))..values.len() {
        buf.clear();
        buf.extend(values[i + 1 - window..=i].iter().flatten());
        if buf.len() == window {
            let v = f(&buf);
            if v.is_finite() {
                out[i] = Some(v);
            }
        }
    }
    out
}

fn rolling(values: &[f64], window: usize, f: impl Fn(&[f64]) -> f64) -> Series {
    let mut out = vec![None; values.len()];
    if window == 0 || values.len() < window {
        return out;
    }
    for (offset, w) in values.windows(window).enumerate() {
        let v = f(w);
        if v.is_finite() {
            out[offset + window - 1] = Some(v);
        }
    }
    out
}

/// Arithmetic mean; NaN for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Standard deviation with `ddof` delta degrees of freedom; NaN when there
/// are not more than `ddof` values.
pub fn std_dev(values: &[f64], ddof: usize) -> f64 {
    if values.len() <= ddof {
        return f64::NAN;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|x| (x - m).powi(2)).sum();
    (ss / (values.len() - ddof) as f64).sqrt()
}

/// `q`-th percentile (0..=100) with linear interpolation between the closest
/// ranks. NaN for an empty slice.
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let rank = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] + (sorted[hi] - sorted[lo]) * frac
    }
}

/// Percentage change between consecutive values; the first element is `None`.
pub fn pct_change(values: &[f64]) -> Series {
    let mut out = Vec::with_capacity(values.len());
    if values.is_empty() {
        return out;
    }
    out.push(None);
    for w in values.windows(2) {
        let r = (w[1] - w[0]) / w[0];
        out.push(if r.is_finite() { Some(r) } else { None });
    }
    out
}
