// =============================================================================
// Market Data Module
// =============================================================================
//
// Validated OHLCV series plus the `MarketDataSource` seam the analyzer and
// the API fetch through. Sources report every failure as `NoDataAvailable`.

pub mod series;

pub use series::{Bar, OhlcvSeries};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::binance::rate_limit::RateLimitSnapshot;
use crate::error::AnalysisResult;

/// Anything that can produce an OHLCV series for a symbol and time range.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AnalysisResult<OhlcvSeries>;

    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Request-weight usage, for sources that are rate limited.
    fn rate_limits(&self) -> Option<RateLimitSnapshot> {
        None
    }
}
