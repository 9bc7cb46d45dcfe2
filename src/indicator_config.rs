// =============================================================================
// Indicator Configuration — base parameters + state adjustment table
// =============================================================================
//
// The base configuration holds per-indicator windows, default weights and
// default threshold parameters. The adjustment table is plain data: each rule
// names a state feature, the parameter it scales, and a scale function kind.
// Both are serde types so the whole configuration round-trips through the
// engine's JSON config file.
//
// Validation is eager: `IndicatorConfig::validate` runs when an analyzer is
// built and whenever the API accepts a new configuration.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, AnalysisResult};
use crate::types::StateFeature;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_rsi_window() -> usize {
    14
}

fn default_threshold_percentile() -> f64 {
    90.0
}

fn default_weight() -> f64 {
    1.0
}

fn default_fast_period() -> usize {
    12
}

fn default_slow_period() -> usize {
    26
}

fn default_signal_period() -> usize {
    9
}

fn default_threshold_std() -> f64 {
    1.0
}

fn default_k_period() -> usize {
    14
}

fn default_d_period() -> usize {
    3
}

fn default_bollinger_window() -> usize {
    20
}

fn default_num_std() -> f64 {
    2.0
}

fn default_min_signal_confidence() -> f64 {
    0.6
}

fn default_adjustments() -> Vec<AdjustmentRule> {
    AdjustmentRule::default_table()
}

// =============================================================================
// Base configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RsiParams {
    #[serde(default = "default_rsi_window")]
    pub window: usize,
    /// Upper percentile of the trailing RSI history used as the overbought
    /// line; the oversold line uses `100 - threshold_percentile`.
    #[serde(default = "default_threshold_percentile")]
    pub threshold_percentile: f64,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl Default for RsiParams {
    fn default() -> Self {
        Self {
            window: default_rsi_window(),
            threshold_percentile: default_threshold_percentile(),
            weight: default_weight(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacdParams {
    #[serde(default = "default_fast_period")]
    pub fast_period: usize,
    #[serde(default = "default_slow_period")]
    pub slow_period: usize,
    #[serde(default = "default_signal_period")]
    pub signal_period: usize,
    /// Number of standard deviations of the MACD histogram history that
    /// the current histogram must exceed to vote.
    #[serde(default = "default_threshold_std")]
    pub threshold_std: f64,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl Default for MacdParams {
    fn default() -> Self {
        Self {
            fast_period: default_fast_period(),
            slow_period: default_slow_period(),
            signal_period: default_signal_period(),
            threshold_std: default_threshold_std(),
            weight: default_weight(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StochasticParams {
    #[serde(default = "default_k_period")]
    pub k_period: usize,
    #[serde(default = "default_d_period")]
    pub d_period: usize,
    #[serde(default = "default_threshold_percentile")]
    pub threshold_percentile: f64,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl Default for StochasticParams {
    fn default() -> Self {
        Self {
            k_period: default_k_period(),
            d_period: default_d_period(),
            threshold_percentile: default_threshold_percentile(),
            weight: default_weight(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BollingerParams {
    #[serde(default = "default_bollinger_window")]
    pub window: usize,
    #[serde(default = "default_num_std")]
    pub num_std: f64,
}

impl Default for BollingerParams {
    fn default() -> Self {
        Self {
            window: default_bollinger_window(),
            num_std: default_num_std(),
        }
    }
}

/// Per-indicator parameters before any state adjustment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaseConfig {
    #[serde(default)]
    pub rsi: RsiParams,
    #[serde(default)]
    pub macd: MacdParams,
    #[serde(default)]
    pub stochastic: StochasticParams,
    #[serde(default)]
    pub bollinger: BollingerParams,
}

impl BaseConfig {
    /// Check weights, thresholds and periods. Errors name the offending field.
    pub fn validate(&self) -> AnalysisResult<()> {
        let periods = [
            ("rsi.window", self.rsi.window),
            ("macd.fast_period", self.macd.fast_period),
            ("macd.slow_period", self.macd.slow_period),
            ("macd.signal_period", self.macd.signal_period),
            ("stochastic.k_period", self.stochastic.k_period),
            ("stochastic.d_period", self.stochastic.d_period),
            ("bollinger.window", self.bollinger.window),
        ];
        for (name, value) in periods {
            if value == 0 {
                return Err(AnalysisError::invalid_config(format!("{name} must be >= 1")));
            }
        }
        if self.macd.fast_period >= self.macd.slow_period {
            return Err(AnalysisError::invalid_config(format!(
                "macd.fast_period ({}) must be shorter than macd.slow_period ({})",
                self.macd.fast_period, self.macd.slow_period
            )));
        }

        let weights = [
            ("rsi.weight", self.rsi.weight),
            ("macd.weight", self.macd.weight),
            ("stochastic.weight", self.stochastic.weight),
        ];
        for (name, w) in weights {
            if !w.is_finite() || w < 0.0 {
                return Err(AnalysisError::invalid_config(format!(
                    "{name} must be a non-negative number, got {w}"
                )));
            }
        }

        let percentiles = [
            ("rsi.threshold_percentile", self.rsi.threshold_percentile),
            ("stochastic.threshold_percentile", self.stochastic.threshold_percentile),
        ];
        for (name, p) in percentiles {
            if !(50.0..=100.0).contains(&p) {
                return Err(AnalysisError::invalid_config(format!(
                    "{name} must lie in [50, 100], got {p}"
                )));
            }
        }

        if !self.macd.threshold_std.is_finite() || self.macd.threshold_std < 0.0 {
            return Err(AnalysisError::invalid_config(format!(
                "macd.threshold_std must be non-negative, got {}",
                self.macd.threshold_std
            )));
        }
        if !self.bollinger.num_std.is_finite() || self.bollinger.num_std < 0.0 {
            return Err(AnalysisError::invalid_config(format!(
                "bollinger.num_std must be non-negative, got {}",
                self.bollinger.num_std
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Adjustment table
// =============================================================================

/// Parameter a rule scales.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentTarget {
    RsiThreshold,
    RsiWeight,
    MacdThreshold,
    MacdWeight,
    StochasticThreshold,
    StochasticWeight,
    /// Applied per bar at signal time with the bar's volume ratio.
    SignalConfidence,
}

/// Monotonic scale function applied to a feature value `x`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScaleFn {
    /// `offset + slope * x`
    Linear { offset: f64, slope: f64 },
    /// `offset + slope * |x|`
    LinearAbs { offset: f64, slope: f64 },
    /// `1 / (1 + slope * x)`
    Reciprocal { slope: f64 },
    /// `1 / (1 + slope * |x|)`
    ReciprocalAbs { slope: f64 },
}

impl ScaleFn {
    /// Evaluate the scale at `x`. A non-finite result (e.g. a reciprocal
    /// pole) evaluates to the identity scale 1.0.
    pub fn apply(self, x: f64) -> f64 {
        let scale = match self {
            Self::Linear { offset, slope } => offset + slope * x,
            Self::LinearAbs { offset, slope } => offset + slope * x.abs(),
            Self::Reciprocal { slope } => 1.0 / (1.0 + slope * x),
            Self::ReciprocalAbs { slope } => 1.0 / (1.0 + slope * x.abs()),
        };
        if scale.is_finite() {
            scale
        } else {
            1.0
        }
    }
}

/// One row of the adjustment table: `target *= scale(feature)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentRule {
    pub feature: StateFeature,
    pub target: AdjustmentTarget,
    pub scale: ScaleFn,
}

impl AdjustmentRule {
    pub const fn new(feature: StateFeature, target: AdjustmentTarget, scale: ScaleFn) -> Self {
        Self {
            feature,
            target,
            scale,
        }
    }

    /// The stock table: volatility widens thresholds and damps RSI, trend
    /// favours MACD over RSI, volume lifts confidence.
    pub fn default_table() -> Vec<AdjustmentRule> {
        use AdjustmentTarget::*;
        use StateFeature::*;

        vec![
            Self::new(Volatility, RsiThreshold, ScaleFn::Linear { offset: 1.0, slope: 0.5 }),
            Self::new(Volatility, RsiWeight, ScaleFn::Reciprocal { slope: 1.0 }),
            Self::new(Volatility, MacdThreshold, ScaleFn::Linear { offset: 1.0, slope: 1.0 }),
            Self::new(Volatility, StochasticThreshold, ScaleFn::Linear { offset: 1.0, slope: 0.5 }),
            Self::new(TrendStrength, RsiWeight, ScaleFn::ReciprocalAbs { slope: 1.0 }),
            Self::new(TrendStrength, MacdWeight, ScaleFn::LinearAbs { offset: 1.0, slope: 1.0 }),
            Self::new(
                TrendStrength,
                MacdThreshold,
                ScaleFn::LinearAbs { offset: 1.0, slope: -0.3 },
            ),
            Self::new(VolumeRatio, SignalConfidence, ScaleFn::Linear { offset: 1.0, slope: 0.2 }),
        ]
    }
}

// =============================================================================
// IndicatorConfig
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorConfig {
    #[serde(default)]
    pub base: BaseConfig,

    #[serde(default = "default_adjustments")]
    pub adjustments: Vec<AdjustmentRule>,

    /// Floor applied to |composite| before volume scaling of confidence.
    #[serde(default = "default_min_signal_confidence")]
    pub min_signal_confidence: f64,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            base: BaseConfig::default(),
            adjustments: default_adjustments(),
            min_signal_confidence: default_min_signal_confidence(),
        }
    }
}

impl IndicatorConfig {
    pub fn validate(&self) -> AnalysisResult<()> {
        self.base.validate()?;
        if !(0.0..=1.0).contains(&self.min_signal_confidence) {
            return Err(AnalysisError::invalid_config(format!(
                "min_signal_confidence must lie in [0, 1], got {}",
                self.min_signal_confidence
            )));
        }
        Ok(())
    }

    /// Rules that scale signal confidence, in table order.
    pub fn confidence_rules(&self) -> Vec<AdjustmentRule> {
        self.adjustments
            .iter()
            .filter(|r| r.target == AdjustmentTarget::SignalConfidence)
            .copied()
            .collect()
    }
}
