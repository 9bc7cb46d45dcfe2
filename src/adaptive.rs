// =============================================================================
// Adaptive Configuration Engine
// =============================================================================
//
// Derives the effective indicator configuration for one signal-generation
// cycle from the base configuration and the current state's characteristics.
//
// Every rule in the adjustment table multiplies a base parameter by a scale
// evaluated at a state feature. Factors for the same target multiply
// together, and the product is applied to the *base* value exactly once, so
// repeated cycles never compound. The base configuration is only borrowed.
//
// Clamps after scaling:
//   threshold percentiles -> [50, 100]
//   weights, threshold_std -> >= 0
// =============================================================================

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::features::FeatureVector;
use crate::indicator_config::{
    AdjustmentRule, AdjustmentTarget, BollingerParams, IndicatorConfig, MacdParams, RsiParams,
    StochasticParams,
};
use crate::regime::StateCharacteristics;
use crate::types::StateFeature;

/// Indicator parameters in force for one signal-generation cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveConfig {
    pub rsi: RsiParams,
    pub macd: MacdParams,
    pub stochastic: StochasticParams,
    pub bollinger: BollingerParams,
    pub min_signal_confidence: f64,
    /// Rules scaling confidence per bar; evaluated by the signal generator.
    pub confidence_rules: Vec<AdjustmentRule>,
    /// State features the adjustments were derived from, if any.
    pub state_features: Option<FeatureVector>,
}

impl EffectiveConfig {
    /// The base configuration with no state adjustments.
    pub fn unadjusted(config: &IndicatorConfig) -> Self {
        Self {
            rsi: config.base.rsi.clone(),
            macd: config.base.macd.clone(),
            stochastic: config.base.stochastic.clone(),
            bollinger: config.base.bollinger.clone(),
            min_signal_confidence: config.min_signal_confidence,
            confidence_rules: config.confidence_rules(),
            state_features: None,
        }
    }

    pub fn is_adjusted(&self) -> bool {
        self.state_features.is_some()
    }

    /// Product of the confidence rules at a bar with the given volume ratio.
    ///
    /// Volume rules use the per-bar ratio; rules keyed on other features use
    /// the state's value and are skipped when there is no state.
    pub fn confidence_scale(&self, volume_ratio: f64) -> f64 {
        self.confidence_rules
            .iter()
            .filter_map(|rule| {
                let x = match rule.feature {
                    StateFeature::VolumeRatio => Some(volume_ratio),
                    other => self.state_features.map(|f| f.get(other)),
                };
                x.map(|x| rule.scale.apply(x))
            })
            .product()
    }
}

/// Apply the adjustment table to the base configuration.
///
/// With no state the base configuration is returned unmodified.
pub fn effective_config(
    config: &IndicatorConfig,
    state: Option<&StateCharacteristics>,
) -> EffectiveConfig {
    let mut effective = EffectiveConfig::unadjusted(config);
    let Some(state) = state else {
        return effective;
    };

    let factors = adjustment_factors(&config.adjustments, state);
    let factor = |target: AdjustmentTarget| factors.get(&target).copied().unwrap_or(1.0);

    let base = &config.base;
    effective.rsi.threshold_percentile =
        clamp_percentile(base.rsi.threshold_percentile * factor(AdjustmentTarget::RsiThreshold));
    effective.rsi.weight = non_negative(base.rsi.weight * factor(AdjustmentTarget::RsiWeight));
    effective.macd.threshold_std =
        non_negative(base.macd.threshold_std * factor(AdjustmentTarget::MacdThreshold));
    effective.macd.weight = non_negative(base.macd.weight * factor(AdjustmentTarget::MacdWeight));
    effective.stochastic.threshold_percentile = clamp_percentile(
        base.stochastic.threshold_percentile * factor(AdjustmentTarget::StochasticThreshold),
    );
    effective.stochastic.weight =
        non_negative(base.stochastic.weight * factor(AdjustmentTarget::StochasticWeight));
    effective.state_features = Some(state.features());

    debug!(
        rsi_threshold = format!("{:.2}", effective.rsi.threshold_percentile),
        rsi_weight = format!("{:.3}", effective.rsi.weight),
        macd_threshold_std = format!("{:.3}", effective.macd.threshold_std),
        macd_weight = format!("{:.3}", effective.macd.weight),
        stoch_threshold = format!("{:.2}", effective.stochastic.threshold_percentile),
        stoch_weight = format!("{:.3}", effective.stochastic.weight),
        "state-adjusted indicator config"
    );

    effective
}

/// Combined scale per target. Confidence rules are left to signal time.
fn adjustment_factors(
    rules: &[AdjustmentRule],
    state: &StateCharacteristics,
) -> HashMap<AdjustmentTarget, f64> {
    let mut factors = HashMap::new();
    for rule in rules {
        if rule.target == AdjustmentTarget::SignalConfidence {
            continue;
        }
        let scale = rule.scale.apply(state.feature(rule.feature));
        *factors.entry(rule.target).or_insert(1.0) *= scale;
    }
    factors
}

fn clamp_percentile(p: f64) -> f64 {
    if p.is_finite() {
        p.clamp(50.0, 100.0)
    } else {
        100.0
    }
}

fn non_negative(v: f64) -> f64 {
    if v.is_finite() {
        v.max(0.0)
    } else {
        0.0
    }
}
