// =============================================================================
// Binance Klines Client — public OHLCV history with retry + backoff
// =============================================================================
//
// GET /api/v3/klines is unsigned; no API key is needed. Long ranges are read
// in pages of up to 1000 klines, advancing `startTime` past the last open
// time returned.
//
// Retry policy per page request:
//   - HTTP 429 / 418 (rate limited / IP banned): retry, honouring
//     `Retry-After` when present, otherwise exponential backoff.
//   - HTTP 5xx and transport errors: retry with exponential backoff.
//   - Any other non-2xx: fail immediately.
// Every failure reaches the caller as `AnalysisError::NoDataAvailable`.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::StatusCode;
use tracing::{debug, instrument, warn};

use crate::error::{AnalysisError, AnalysisResult};
use crate::market_data::{Bar, MarketDataSource, OhlcvSeries};
use crate::runtime_config::DataSourceConfig;

use super::rate_limit::{Backoff, RateLimitSnapshot, RateLimitTracker};

/// Maximum klines per request accepted by Binance.
const PAGE_LIMIT: usize = 1000;

/// Binance public klines client.
#[derive(Clone)]
pub struct BinanceKlineSource {
    base_url: String,
    interval: String,
    client: reqwest::Client,
    backoff: Backoff,
    rate_limits: Arc<RateLimitTracker>,
}

impl BinanceKlineSource {
    pub fn new(config: &DataSourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        debug!(
            base_url = %config.base_url,
            interval = %config.interval,
            "BinanceKlineSource initialised"
        );

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            interval: config.interval.clone(),
            client,
            backoff: config.backoff(),
            rate_limits: Arc::new(RateLimitTracker::with_threshold(config.weight_warn_threshold)),
        })
    }

    fn page_url(&self, symbol: &str, start_ms: i64, end_ms: i64) -> String {
        format!(
            "{}/api/v3/klines?symbol={}&interval={}&startTime={}&endTime={}&limit={}",
            self.base_url, symbol, self.interval, start_ms, end_ms, PAGE_LIMIT
        )
    }

    /// GET `url`, retrying throttled, 5xx and transport failures.
    async fn get_with_retry(&self, url: &str) -> Result<serde_json::Value> {
        let mut attempt: u32 = 0;
        loop {
            let retry_reason = match self.client.get(url).send().await {
                Ok(resp) => {
                    self.rate_limits.update_from_headers(resp.headers());
                    let status = resp.status();

                    if is_throttled(status) {
                        self.rate_limits.record_throttled();
                        let retry_after = retry_after(resp.headers());
                        RetryReason::Status(status, retry_after)
                    } else if status.is_server_error() {
                        RetryReason::Status(status, None)
                    } else {
                        let body: serde_json::Value = resp
                            .json()
                            .await
                            .context("failed to parse klines response")?;
                        if !status.is_success() {
                            anyhow::bail!(
                                "Binance GET /api/v3/klines returned {}: {}",
                                status,
                                body
                            );
                        }
                        return Ok(body);
                    }
                }
                Err(e) => RetryReason::Transport(e.to_string()),
            };

            if attempt >= self.backoff.max_retries {
                anyhow::bail!("giving up after {} retries: {}", attempt, retry_reason);
            }

            let delay = match &retry_reason {
                RetryReason::Status(_, Some(after)) => (*after).min(self.backoff.max),
                _ => self.backoff.delay(attempt),
            };
            warn!(
                attempt = attempt + 1,
                max_retries = self.backoff.max_retries,
                delay_ms = delay.as_millis() as u64,
                reason = %retry_reason,
                "klines request failed, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    #[instrument(skip(self), name = "binance::get_klines")]
    async fn get_klines(&self, symbol: &str, start_ms: i64, end_ms: i64) -> Result<Vec<Bar>> {
        let mut bars: Vec<Bar> = Vec::new();
        let mut cursor = start_ms;

        while cursor <= end_ms {
            let body = self.get_with_retry(&self.page_url(symbol, cursor, end_ms)).await?;
            let page = parse_klines(&body)?;
            let page_len = page.len();

            let Some(last) = page.last() else {
                break;
            };
            let next = last.timestamp.timestamp_millis() + 1;
            bars.extend(page);

            if page_len < PAGE_LIMIT || next <= cursor {
                break;
            }
            cursor = next;
        }

        debug!(symbol, interval = %self.interval, count = bars.len(), "klines fetched");
        Ok(bars)
    }
}

#[async_trait]
impl MarketDataSource for BinanceKlineSource {
    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AnalysisResult<OhlcvSeries> {
        if start >= end {
            return Err(AnalysisError::no_data(
                symbol,
                format!("empty time range {start} .. {end}"),
            ));
        }

        let bars = self
            .get_klines(symbol, start.timestamp_millis(), end.timestamp_millis())
            .await
            .map_err(|e| AnalysisError::no_data(symbol, format!("{e:#}")))?;

        if bars.is_empty() {
            return Err(AnalysisError::no_data(
                symbol,
                format!("no klines between {start} and {end}"),
            ));
        }
        OhlcvSeries::new(symbol, bars)
            .map_err(|e| AnalysisError::no_data(symbol, format!("malformed klines: {e}")))
    }

    fn name(&self) -> &'static str {
        "binance"
    }

    fn rate_limits(&self) -> Option<RateLimitSnapshot> {
        Some(self.rate_limits.snapshot())
    }
}

impl std::fmt::Debug for BinanceKlineSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceKlineSource")
            .field("base_url", &self.base_url)
            .field("interval", &self.interval)
            .field("rate_limits", &self.rate_limits)
            .finish()
    }
}

enum RetryReason {
    Status(StatusCode, Option<Duration>),
    Transport(String),
}

impl std::fmt::Display for RetryReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Status(status, _) => write!(f, "HTTP {status}"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}

fn is_throttled(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Parse the kline array body:
/// `[[openTime, "open", "high", "low", "close", "volume", closeTime, ...], ...]`.
/// Rows with fewer than six fields are skipped.
pub(crate) fn parse_klines(body: &serde_json::Value) -> Result<Vec<Bar>> {
    let raw = body.as_array().context("klines response is not an array")?;

    let mut bars = Vec::with_capacity(raw.len());
    for entry in raw {
        let arr = entry.as_array().context("kline entry is not an array")?;
        if arr.len() < 6 {
            warn!("skipping malformed kline entry with {} elements", arr.len());
            continue;
        }

        let open_ms = arr[0].as_i64().context("kline open time is not an integer")?;
        let timestamp = Utc
            .timestamp_millis_opt(open_ms)
            .single()
            .with_context(|| format!("kline open time {open_ms} out of range"))?;

        bars.push(Bar::new(
            timestamp,
            parse_str_f64(&arr[1])?,
            parse_str_f64(&arr[2])?,
            parse_str_f64(&arr[3])?,
            parse_str_f64(&arr[4])?,
            parse_str_f64(&arr[5])?,
        ));
    }
    Ok(bars)
}

/// Binance sends numbers as strings; accept either.
fn parse_str_f64(val: &serde_json::Value) -> Result<f64> {
    if let Some(s) = val.as_str() {
        s.parse::<f64>()
            .with_context(|| format!("failed to parse '{s}' as f64"))
    } else if let Some(n) = val.as_f64() {
        Ok(n)
    } else {
        anyhow::bail!("expected string or number, got: {val}")
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_kline_rows() {
        let body = json!([
            [
                1704067200000i64, "42000.5", "42500.0", "41800.0", "42300.1", "1234.5",
                1704153599999i64, "0", 100, "0", "0", "0"
            ],
            [
                1704153600000i64, "42300.1", "43000.0", "42100.0", "42900.0", "999.0",
                1704239999999i64, "0", 80, "0", "0", "0"
            ]
        ]);
        let bars = parse_klines(&body).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].timestamp.timestamp_millis(), 1_704_067_200_000);
        assert!((bars[0].open - 42000.5).abs() < 1e-9);
        assert!((bars[0].close - 42300.1).abs() < 1e-9);
        assert!((bars[1].volume - 999.0).abs() < 1e-9);
    }

    #[test]
    fn short_rows_are_skipped() {
        let body = json!([
            [1704067200000i64, "1", "1"],
            [1704067200000i64, 1.0, 2.0, 0.5, 1.5, 10.0]
        ]);
        let bars = parse_klines(&body).unwrap();
        assert_eq!(bars.len(), 1);
        assert!((bars[0].high - 2.0).abs() < 1e-12);
    }

    #[test]
    fn non_array_body_is_an_error() {
        let body = json!({"code": -1121, "msg": "Invalid symbol."});
        assert!(parse_klines(&body).is_err());
    }

    #[test]
    fn bad_number_is_an_error() {
        let body = json!([[1704067200000i64, "abc", "1", "1", "1", "1"]]);
        assert!(parse_klines(&body).is_err());
    }

    #[test]
    fn throttle_statuses() {
        assert!(is_throttled(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_throttled(StatusCode::from_u16(418).unwrap()));
        assert!(!is_throttled(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn page_url_carries_range_and_limit() {
        let source = BinanceKlineSource::new(&DataSourceConfig::default()).unwrap();
        let url = source.page_url("BTCUSDT", 1, 2);
        assert_eq!(
            url,
            "https://api.binance.com/api/v3/klines?symbol=BTCUSDT&interval=1d&startTime=1&endTime=2&limit=1000"
        );
    }

    #[tokio::test]
    async fn empty_range_is_no_data() {
        let source = BinanceKlineSource::new(&DataSourceConfig::default()).unwrap();
        let now = Utc::now();
        let err = source.fetch_ohlcv("BTCUSDT", now, now).await.unwrap_err();
        assert!(matches!(err, AnalysisError::NoDataAvailable { .. }));
    }

    #[test]
    fn reports_rate_limit_usage() {
        let source = BinanceKlineSource::new(&DataSourceConfig::default()).unwrap();
        let snapshot = source.rate_limits().unwrap();
        assert_eq!(snapshot.used_weight_1m, 0);
        assert_eq!(snapshot.throttled_responses, 0);
    }

    #[tokio::test]
    async fn unreachable_host_is_no_data() {
        let config = DataSourceConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            max_retries: 0,
            timeout_secs: 1,
            ..Default::default()
        };
        let source = BinanceKlineSource::new(&config).unwrap();
        let end = Utc::now();
        let start = end - chrono::Duration::days(10);
        let err = source.fetch_ohlcv("BTCUSDT", start, end).await.unwrap_err();
        assert!(matches!(err, AnalysisError::NoDataAvailable { .. }));
    }
}
