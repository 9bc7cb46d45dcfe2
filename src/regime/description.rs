// =============================================================================
// Human-readable state descriptions
// =============================================================================

use crate::features::FeatureVector;

use super::identifier::StateCharacteristics;

/// |trend_strength| above this reads as a strong trend.
pub const STRONG_TREND: f64 = 0.05;
/// |trend_strength| below this reads as no trend at all.
pub const FLAT_TREND: f64 = 1e-9;

/// Describe a state relative to the whole analysed window, e.g.
/// "High volatility, strong upward trend, above-average volume".
///
/// Volatility is compared with the all-bar mean; volume ratio is already
/// relative to its trailing average, so it is compared with 1.
pub fn describe_state(state: &StateCharacteristics, overall: &FeatureVector) -> String {
    let volatility = if state.volatility > overall.volatility {
        "High volatility"
    } else {
        "Low volatility"
    };

    let trend = if state.trend_strength.abs() < FLAT_TREND {
        "no trend".to_string()
    } else {
        let strength = if state.trend_strength.abs() > STRONG_TREND {
            "strong"
        } else {
            "weak"
        };
        let direction = if state.trend_strength > 0.0 {
            "upward"
        } else {
            "downward"
        };
        format!("{strength} {direction} trend")
    };

    let volume = if state.volume_ratio > 1.0 {
        "above-average volume"
    } else {
        "below-average volume"
    };

    format!("{volatility}, {trend}, {volume}")
}
