// =============================================================================
// Signals Module
// =============================================================================
//
// Signal processing pipeline for the analysis engine:
// - Weighted composite scoring of indicator votes
// - Per-bar signal generation with percentile / std threshold bands

pub mod generator;
pub mod weighted_score;

pub use generator::{
    generate_signals, threshold_bands, SignalPoint, SignalSeries, ThresholdBands, DEFAULT_LOOKBACK,
};
