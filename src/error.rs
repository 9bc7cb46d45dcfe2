// =============================================================================
// Analysis Errors
// =============================================================================
//
// Every fallible operation in the analysis pipeline returns `AnalysisError`.
// Variants carry enough context (symbol, window, available length) to
// diagnose a failure without re-running the pipeline.
//
// Degenerate clustering is not an error: the state identifier shrinks the
// effective cluster count and logs a warning instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The data source returned nothing usable for the requested range.
    #[error("no data available for {symbol}: {reason}")]
    NoDataAvailable { symbol: String, reason: String },

    /// An operation was invoked before its prerequisite was computed.
    #[error("{operation} requires {prerequisite} to be computed first")]
    NotReady {
        operation: &'static str,
        prerequisite: &'static str,
    },

    /// Weights, thresholds or periods violate basic invariants.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The series is too short for one of the requested windows.
    #[error("{symbol}: {indicator} needs {required} bars, only {available} available")]
    InsufficientHistory {
        symbol: String,
        indicator: &'static str,
        required: usize,
        available: usize,
    },

    /// The supplied bars break the OHLCV series invariants.
    #[error("invalid series for {symbol}: {reason}")]
    InvalidSeries { symbol: String, reason: String },
}

impl AnalysisError {
    pub fn no_data(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NoDataAvailable {
            symbol: symbol.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_history_message_has_context() {
        let err = AnalysisError::InsufficientHistory {
            symbol: "BTCUSDT".into(),
            indicator: "macd",
            required: 26,
            available: 10,
        };
        let msg = err.to_string();
        assert!(msg.contains("BTCUSDT"));
        assert!(msg.contains("macd"));
        assert!(msg.contains("26"));
        assert!(msg.contains("10"));
    }

    #[test]
    fn not_ready_message() {
        let err = AnalysisError::NotReady {
            operation: "generate_trading_signals",
            prerequisite: "technical indicators",
        };
        assert_eq!(
            err.to_string(),
            "generate_trading_signals requires technical indicators to be computed first"
        );
    }
}
