// =============================================================================
// Weighted Composite Scorer — per-bar indicator vote aggregation
// =============================================================================
//
//   composite = Σ(signal · strength · weight) / Σ(weight)
//
// With signal ∈ {-1, 0, +1}, strength ∈ [0, 1] and weights >= 0 the composite
// stays in [-1, 1]. A zero total weight yields 0.

use serde::{Deserialize, Serialize};

/// Indicator that cast a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteSource {
    Rsi,
    Macd,
    Stochastic,
}

/// A single indicator's vote at one bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorVote {
    pub source: VoteSource,
    /// +1.0 bullish, -1.0 bearish, 0.0 neutral.
    pub signal: f64,
    pub strength: f64,
    pub weight: f64,
}

impl IndicatorVote {
    pub fn new(source: VoteSource, signal: f64, strength: f64, weight: f64) -> Self {
        Self {
            source,
            signal,
            strength: strength.clamp(0.0, 1.0),
            weight,
        }
    }

    /// Neutral vote whose weight still counts in the denominator.
    pub fn neutral(source: VoteSource, weight: f64) -> Self {
        Self::new(source, 0.0, 0.0, weight)
    }

    pub fn contribution(&self) -> f64 {
        self.signal * self.strength * self.weight
    }
}

/// Weighted vote aggregator.
#[derive(Debug, Clone, Copy)]
pub struct WeightedScorer;

impl WeightedScorer {
    pub fn composite(votes: &[IndicatorVote]) -> f64 {
        let total_weight: f64 = votes.iter().map(|v| v.weight).sum();
        if total_weight <= 0.0 || !total_weight.is_finite() {
            return 0.0;
        }
        let weighted: f64 = votes.iter().map(IndicatorVote::contribution).sum();
        (weighted / total_weight).clamp(-1.0, 1.0)
    }
}
