// =============================================================================
// Market Analyzer — per-symbol analysis pipeline
// =============================================================================
//
// One `MarketAnalyzer` per symbol. It owns the series and every intermediate
// result derived from it:
//
//   load_series / fetch_data
//     -> calculate_technical_indicators
//     -> identify_market_states          (optional)
//     -> generate_trading_signals
//
// Operations never compute their prerequisites implicitly; calling out of
// order returns `NotReady`. `run` is the convenience that executes the
// stages in order. Loading a new series clears all derived state.
// =============================================================================

use chrono::{DateTime, Utc};
use tracing::info;

use crate::adaptive::{effective_config, EffectiveConfig};
use crate::error::{AnalysisError, AnalysisResult};
use crate::features::{extract_features, FeatureMatrix};
use crate::indicator_config::IndicatorConfig;
use crate::indicators::{self, TechnicalIndicators};
use crate::market_data::{MarketDataSource, OhlcvSeries};
use crate::regime::{self, StateAnalysis};
use crate::runtime_config::AnalysisConfig;
use crate::signals::{
    generate_signals, threshold_bands, SignalSeries, ThresholdBands, DEFAULT_LOOKBACK,
};

const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Clone)]
pub struct MarketAnalyzer {
    symbol: String,
    config: IndicatorConfig,
    seed: u64,
    lookback: usize,

    series: Option<OhlcvSeries>,
    indicators: Option<TechnicalIndicators>,
    features: Option<FeatureMatrix>,
    states: Option<StateAnalysis>,
}

impl MarketAnalyzer {
    /// Build an analyzer; the configuration is validated up front.
    pub fn new(symbol: impl Into<String>, config: IndicatorConfig) -> AnalysisResult<Self> {
        config.validate()?;
        Ok(Self {
            symbol: symbol.into(),
            config,
            seed: DEFAULT_SEED,
            lookback: DEFAULT_LOOKBACK,
            series: None,
            indicators: None,
            features: None,
            states: None,
        })
    }

    /// Build from the engine configuration (indicators, seed, lookback).
    pub fn from_config(symbol: impl Into<String>, config: &AnalysisConfig) -> AnalysisResult<Self> {
        config.validate()?;
        Ok(Self::new(symbol, config.indicators.clone())?
            .with_seed(config.random_seed)
            .with_lookback(config.lookback_window))
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_lookback(mut self, lookback: usize) -> Self {
        self.lookback = lookback;
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn config(&self) -> &IndicatorConfig {
        &self.config
    }

    pub fn lookback(&self) -> usize {
        self.lookback
    }

    pub fn series(&self) -> Option<&OhlcvSeries> {
        self.series.as_ref()
    }

    pub fn indicators(&self) -> Option<&TechnicalIndicators> {
        self.indicators.as_ref()
    }

    pub fn features(&self) -> Option<&FeatureMatrix> {
        self.features.as_ref()
    }

    pub fn states(&self) -> Option<&StateAnalysis> {
        self.states.as_ref()
    }

    // -------------------------------------------------------------------------
    // Data
    // -------------------------------------------------------------------------

    /// Replace the analysed series. Indicators, features and states computed
    /// for the previous series are dropped.
    pub fn load_series(&mut self, series: OhlcvSeries) {
        info!(symbol = %self.symbol, bars = series.len(), "series loaded");
        self.series = Some(series);
        self.indicators = None;
        self.features = None;
        self.states = None;
    }

    /// Fetch `[start, end]` from `source` and load it.
    pub async fn fetch_data(
        &mut self,
        source: &dyn MarketDataSource,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AnalysisResult<()> {
        let series = source.fetch_ohlcv(&self.symbol, start, end).await?;
        self.load_series(series);
        Ok(())
    }

    fn require_series(&self, operation: &'static str) -> AnalysisResult<&OhlcvSeries> {
        self.series.as_ref().ok_or(AnalysisError::NotReady {
            operation,
            prerequisite: "market data",
        })
    }

    // -------------------------------------------------------------------------
    // Pipeline stages
    // -------------------------------------------------------------------------

    pub fn calculate_technical_indicators(&mut self) -> AnalysisResult<&TechnicalIndicators> {
        let series = self.require_series("calculate_technical_indicators")?;
        let computed = indicators::calculate_technical_indicators(series, &self.config.base)?;
        Ok(self.indicators.insert(computed))
    }

    /// Cluster the loaded series into at most `n_states` states.
    pub fn identify_market_states(&mut self, n_states: usize) -> AnalysisResult<&StateAnalysis> {
        let features = match self.features.take() {
            Some(f) => f,
            None => extract_features(self.require_series("identify_market_states")?),
        };
        let result = regime::identify_market_states(&self.symbol, &features, n_states, self.seed);
        self.features = Some(features);
        let analysis = result?;
        Ok(self.states.insert(analysis))
    }

    /// Base configuration adjusted by the current state, or the base itself
    /// when no states have been identified.
    pub fn state_adjusted_config(&self) -> EffectiveConfig {
        let current = self.states.as_ref().map(|s| &s.current_characteristics);
        effective_config(&self.config, current)
    }

    pub fn generate_trading_signals(&self) -> AnalysisResult<SignalSeries> {
        let series = self.require_series("generate_trading_signals")?;
        let indicators = self.indicators.as_ref().ok_or(AnalysisError::NotReady {
            operation: "generate_trading_signals",
            prerequisite: "technical indicators",
        })?;
        if self.lookback < 2 {
            return Err(AnalysisError::invalid_config(format!(
                "lookback window must be >= 2, got {}",
                self.lookback
            )));
        }

        let effective = self.state_adjusted_config();
        let signals = generate_signals(indicators, &effective, &series.volumes(), self.lookback);

        info!(
            symbol = %self.symbol,
            state_adjusted = effective.is_adjusted(),
            positive = signals.positive_count(),
            negative = signals.negative_count(),
            latest = signals.latest().map(|p| format!("{:.3}", p.signal)).unwrap_or_default(),
            "trading signals generated"
        );
        Ok(signals)
    }

    /// Threshold bands over the most recent `lookback` bars under the
    /// state-adjusted config, i.e. the bands the next bar would face.
    pub fn current_thresholds(&self) -> AnalysisResult<ThresholdBands> {
        let indicators = self.indicators.as_ref().ok_or(AnalysisError::NotReady {
            operation: "current_thresholds",
            prerequisite: "technical indicators",
        })?;
        let effective = self.state_adjusted_config();
        Ok(threshold_bands(indicators, &effective, indicators.len(), self.lookback))
    }

    /// Indicators, then states (when `n_states` is given), then signals.
    pub fn run(&mut self, n_states: Option<usize>) -> AnalysisResult<SignalSeries> {
        self.calculate_technical_indicators()?;
        if let Some(n) = n_states {
            self.identify_market_states(n)?;
        }
        self.generate_trading_signals()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::series::fixtures;
    use crate::app_state::testing::FixtureSource;

    fn analyzer() -> MarketAnalyzer {
        MarketAnalyzer::new("TEST", IndicatorConfig::default()).unwrap()
    }

    #[test]
    fn invalid_config_is_rejected_eagerly() {
        let mut cfg = IndicatorConfig::default();
        cfg.base.rsi.weight = -1.0;
        let err = MarketAnalyzer::new("TEST", cfg).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidConfiguration(_)));
    }

    #[test]
    fn stages_require_their_prerequisites() {
        let mut a = analyzer();
        assert!(matches!(
            a.calculate_technical_indicators(),
            Err(AnalysisError::NotReady { prerequisite: "market data", .. })
        ));
        assert!(matches!(
            a.identify_market_states(3),
            Err(AnalysisError::NotReady { .. })
        ));

        a.load_series(fixtures::wave(150));
        assert!(matches!(
            a.generate_trading_signals(),
            Err(AnalysisError::NotReady { prerequisite: "technical indicators", .. })
        ));
    }

    #[test]
    fn loading_a_series_clears_derived_state() {
        let mut a = analyzer();
        a.load_series(fixtures::wave(150));
        a.run(Some(3)).unwrap();
        assert!(a.indicators().is_some());
        assert!(a.states().is_some());

        a.load_series(fixtures::flat(150));
        assert!(a.indicators().is_none());
        assert!(a.features().is_none());
        assert!(a.states().is_none());
        assert!(!a.state_adjusted_config().is_adjusted());
    }

    #[test]
    fn signals_without_states_use_base_config() {
        let mut a = analyzer();
        a.load_series(fixtures::wave(200));
        let signals = a.run(None).unwrap();
        assert_eq!(signals.len(), 200);
        assert!(a.states().is_none());
        assert_eq!(a.state_adjusted_config().rsi, a.config().base.rsi);
    }

    #[test]
    fn state_identification_is_idempotent() {
        let mut a = analyzer();
        a.load_series(fixtures::wave(200));
        let first = a.identify_market_states(4).unwrap().assignments.clone();
        let second = a.identify_market_states(4).unwrap().assignments.clone();
        assert_eq!(first, second);
        assert!(first.iter().all(|s| *s < 4));
    }

    #[test]
    fn strictly_rising_close_reads_as_trending_and_bullish() {
        // RSI sits at 100 with no spread, so only MACD and Stochastic vote.
        let mut a = analyzer();
        a.load_series(fixtures::uptrend(200));
        let signals = a.run(Some(3)).unwrap();

        let states = a.states().unwrap();
        assert!(states.current_characteristics.trend_strength > 0.0);
        assert!(a.state_adjusted_config().is_adjusted());

        assert!(signals.positive_count() > signals.negative_count());
        for (s, c) in signals.signal.iter().zip(&signals.confidence) {
            assert!((-1.0..=1.0).contains(s));
            assert!((0.0..=1.0).contains(c));
        }
    }

    #[test]
    fn noisy_uptrend_keeps_current_state_trending() {
        // Close noise lets RSI and Stochastic swing inside their bands; the
        // contrarian votes then carry no guaranteed direction, so only the
        // state and the bounds are checked.
        for (amplitude, seed) in [(0.1, 1), (1.0, 1), (1.0, 5), (2.0, 9)] {
            let mut a = analyzer();
            a.load_series(fixtures::noisy_uptrend(200, amplitude, seed));
            let signals = a.run(Some(3)).unwrap();

            let states = a.states().unwrap();
            assert!(
                states.current_characteristics.trend_strength > 0.0,
                "amplitude {amplitude} seed {seed}"
            );
            assert!(a.state_adjusted_config().is_adjusted());
            assert_eq!(signals.len(), 200);
            for (s, c) in signals.signal.iter().zip(&signals.confidence) {
                assert!((-1.0..=1.0).contains(s));
                assert!((0.0..=1.0).contains(c));
            }
        }
    }

    #[test]
    fn flat_series_is_neutral_and_degenerate() {
        let mut a = analyzer();
        a.load_series(fixtures::flat(150));
        let signals = a.run(Some(4)).unwrap();

        let ind = a.indicators().unwrap();
        for v in ind.rsi.iter().flatten() {
            assert!((v - 50.0).abs() < 1e-9);
        }
        assert!(signals.signal.iter().all(|s| s.abs() < 1e-12));

        let states = a.states().unwrap();
        assert!(states.effective_states < 4);
        assert_eq!(states.characteristics.len(), states.effective_states);
    }

    #[test]
    fn single_bar_series_is_no_data() {
        let mut a = analyzer();
        a.load_series(fixtures::flat(1));
        assert!(matches!(
            a.identify_market_states(2),
            Err(AnalysisError::NoDataAvailable { .. })
        ));
        assert!(matches!(
            a.calculate_technical_indicators(),
            Err(AnalysisError::InsufficientHistory { .. })
        ));
    }

    #[test]
    fn current_thresholds_follow_lookback() {
        let mut a = analyzer();
        a.load_series(fixtures::wave(250));
        a.calculate_technical_indicators().unwrap();
        let bands = a.current_thresholds().unwrap();
        assert!(bands.rsi_oversold.unwrap() <= bands.rsi_overbought.unwrap());
        assert!(bands.stoch_oversold.is_some());
    }

    #[test]
    fn from_config_applies_pipeline_settings() {
        let cfg = AnalysisConfig {
            random_seed: 7,
            lookback_window: 50,
            ..Default::default()
        };
        let a = MarketAnalyzer::from_config("ETHUSDT", &cfg).unwrap();
        assert_eq!(a.symbol(), "ETHUSDT");
        assert_eq!(a.lookback(), 50);

        let bad = AnalysisConfig {
            lookback_window: 0,
            ..Default::default()
        };
        assert!(MarketAnalyzer::from_config("ETHUSDT", &bad).is_err());
    }

    #[tokio::test]
    async fn fetch_loads_series_from_source() {
        let mut a = analyzer();
        let end = Utc::now();
        a.fetch_data(&FixtureSource { bars: 120 }, end - chrono::Duration::days(120), end)
            .await
            .unwrap();
        assert_eq!(a.series().map(|s| s.len()), Some(120));

        let mut missing = MarketAnalyzer::new("MISSING", IndicatorConfig::default()).unwrap();
        let err = missing
            .fetch_data(&FixtureSource { bars: 120 }, end - chrono::Duration::days(1), end)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::NoDataAvailable { .. }));
    }
}
