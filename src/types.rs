// =============================================================================
// Shared types used across the signal engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// A bar-aligned numeric series. `None` marks bars where the value is
/// undefined (insufficient history), never a silent zero.
pub type Series = Vec<Option<f64>>;

/// The four regime-descriptive features, in feature-matrix column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateFeature {
    Volatility,
    TrendStrength,
    #[serde(alias = "volume")]
    VolumeRatio,
    ReturnDispersion,
}

impl StateFeature {
    pub const ALL: [StateFeature; 4] = [
        Self::Volatility,
        Self::TrendStrength,
        Self::VolumeRatio,
        Self::ReturnDispersion,
    ];

    /// Column index in the feature matrix.
    pub fn index(self) -> usize {
        match self {
            Self::Volatility => 0,
            Self::TrendStrength => 1,
            Self::VolumeRatio => 2,
            Self::ReturnDispersion => 3,
        }
    }
}

impl std::fmt::Display for StateFeature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Volatility => write!(f, "volatility"),
            Self::TrendStrength => write!(f, "trend_strength"),
            Self::VolumeRatio => write!(f, "volume_ratio"),
            Self::ReturnDispersion => write!(f, "return_dispersion"),
        }
    }
}

/// Direction of a trading signal as reported to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalType {
    Buy,
    Sell,
    Hold,
}

impl SignalType {
    /// Classify a composite signal value; anything within `dead_band` of zero
    /// is a hold.
    pub fn from_composite(value: f64, dead_band: f64) -> Self {
        if value > dead_band {
            Self::Buy
        } else if value < -dead_band {
            Self::Sell
        } else {
            Self::Hold
        }
    }
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Hold => write!(f, "HOLD"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_indices_match_column_order() {
        for (i, feature) in StateFeature::ALL.iter().enumerate() {
            assert_eq!(feature.index(), i);
        }
    }

    #[test]
    fn feature_accepts_legacy_volume_name() {
        let f: StateFeature = serde_json::from_str("\"volume\"").unwrap();
        assert_eq!(f, StateFeature::VolumeRatio);
        assert_eq!(
            serde_json::to_string(&StateFeature::TrendStrength).unwrap(),
            "\"trend_strength\""
        );
    }

    #[test]
    fn signal_type_dead_band() {
        assert_eq!(SignalType::from_composite(0.3, 0.1), SignalType::Buy);
        assert_eq!(SignalType::from_composite(-0.3, 0.1), SignalType::Sell);
        assert_eq!(SignalType::from_composite(0.05, 0.1), SignalType::Hold);
        assert_eq!(SignalType::Sell.to_string(), "SELL");
    }
}
