//! Yahoo Finance provider.
//!
//! Fetches OHLCV bars and dividend/split events from Yahoo's v8 chart API.
//! Handles rate limiting, retries with exponential backoff plus jitter,
//! response parsing, and the circuit breaker.
//!
//! Yahoo has no official API and is subject to unannounced format changes.
//! The CSV provider is the fallback when Yahoo is unavailable.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate};
use rand::Rng;
use serde::Deserialize;
use tracing::{debug, warn};

use super::circuit_breaker::CircuitBreaker;
use super::provider::RemoteProvider;
use crate::domain::{CorporateAction, Period, RawBar};
use crate::error::ProviderError;

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
    #[serde(default)]
    events: Option<Events>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<u64>>,
}

#[derive(Debug, Default, Deserialize)]
struct Events {
    #[serde(default)]
    dividends: HashMap<String, DividendEvent>,
    #[serde(default)]
    splits: HashMap<String, SplitEvent>,
}

#[derive(Debug, Deserialize)]
struct DividendEvent {
    amount: f64,
    date: i64,
}

#[derive(Debug, Deserialize)]
struct SplitEvent {
    date: i64,
    numerator: f64,
    denominator: f64,
}

pub struct YahooProvider {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
    max_retries: u32,
    base_delay: Duration,
}

impl YahooProvider {
    pub fn new(circuit_breaker: Arc<CircuitBreaker>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| ProviderError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            circuit_breaker,
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        })
    }

    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_delay = base_delay;
        self
    }

    fn interval(period: Period) -> &'static str {
        match period {
            Period::Daily => "1d",
            Period::Weekly => "1wk",
            Period::Monthly => "1mo",
        }
    }

    fn chart_url(instrument_id: &str, start: NaiveDate, end: NaiveDate, period: Period) -> String {
        let start_ts = start.and_time(chrono::NaiveTime::MIN).and_utc().timestamp();
        // End of day, inclusive.
        let end_ts = end.and_time(chrono::NaiveTime::MIN).and_utc().timestamp() + 86_399;
        let interval = Self::interval(period);
        format!(
            "https://query2.finance.yahoo.com/v8/finance/chart/{instrument_id}\
             ?period1={start_ts}&period2={end_ts}&interval={interval}\
             &events=div%2Csplits"
        )
    }

    fn timestamp_date(ts: i64) -> Result<NaiveDate, ProviderError> {
        DateTime::from_timestamp(ts, 0)
            .map(|dt| dt.date_naive())
            .ok_or_else(|| ProviderError::ResponseFormatChanged(format!("invalid timestamp: {ts}")))
    }

    fn chart_data(instrument_id: &str, resp: ChartResponse) -> Result<ChartData, ProviderError> {
        let result = resp.chart.result.ok_or_else(|| match resp.chart.error {
            Some(err) if err.code == "Not Found" => ProviderError::SymbolNotFound {
                instrument_id: instrument_id.to_string(),
            },
            Some(err) => ProviderError::ResponseFormatChanged(format!("{}: {}", err.code, err.description)),
            None => ProviderError::ResponseFormatChanged("empty result with no error".into()),
        })?;

        result
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ResponseFormatChanged("result array is empty".into()))
    }

    fn parse_bars(data: &ChartData) -> Result<Vec<RawBar>, ProviderError> {
        // No timestamps means no trading in the window.
        let Some(timestamps) = data.timestamp.as_ref() else {
            return Ok(Vec::new());
        };
        let quote = data
            .indicators
            .quote
            .first()
            .ok_or_else(|| ProviderError::ResponseFormatChanged("no quote data".into()))?;

        let mut bars = Vec::with_capacity(timestamps.len());
        for (i, &ts) in timestamps.iter().enumerate() {
            let open = quote.open.get(i).copied().flatten();
            let high = quote.high.get(i).copied().flatten();
            let low = quote.low.get(i).copied().flatten();
            let close = quote.close.get(i).copied().flatten();
            let volume = quote.volume.get(i).copied().flatten();

            // Skip rows where everything is None (holidays/non-trading days)
            if open.is_none() && high.is_none() && low.is_none() && close.is_none() && volume.is_none() {
                continue;
            }

            let close = close.unwrap_or(f64::NAN);
            let volume = volume.unwrap_or(0);
            bars.push(RawBar {
                date: Self::timestamp_date(ts)?,
                open: open.unwrap_or(f64::NAN),
                high: high.unwrap_or(f64::NAN),
                low: low.unwrap_or(f64::NAN),
                close,
                volume,
                // Yahoo reports no turnover; approximated from the close.
                amount: close * volume as f64,
            });
        }
        Ok(bars)
    }

    /// Dividends become `dividend_per_share`; a split `n:d` becomes
    /// `bonus_ratio = (n/d - 1) * 10`. Events on the same day are merged.
    fn parse_actions(
        instrument_id: &str,
        data: &ChartData,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CorporateAction>, ProviderError> {
        let Some(events) = data.events.as_ref() else {
            return Ok(Vec::new());
        };
        let mut by_date: std::collections::BTreeMap<NaiveDate, CorporateAction> = Default::default();

        for event in events.dividends.values() {
            let ex_date = Self::timestamp_date(event.date)?;
            let action = by_date
                .entry(ex_date)
                .or_insert_with(|| CorporateAction::new(instrument_id, ex_date));
            action.dividend_per_share = Some(action.dividend_per_share.unwrap_or(0.0) + event.amount);
        }
        for event in events.splits.values() {
            if event.denominator <= 0.0 {
                return Err(ProviderError::ResponseFormatChanged(format!(
                    "split with denominator {}",
                    event.denominator
                )));
            }
            let ex_date = Self::timestamp_date(event.date)?;
            let action = by_date
                .entry(ex_date)
                .or_insert_with(|| CorporateAction::new(instrument_id, ex_date));
            action.bonus_ratio = Some((event.numerator / event.denominator - 1.0) * 10.0);
        }

        Ok(by_date
            .into_values()
            .filter(|a| start <= a.ex_date && a.ex_date <= end)
            .collect())
    }

    /// One chart request with retry and circuit-breaker handling.
    fn fetch_chart(
        &self,
        instrument_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        period: Period,
    ) -> Result<ChartData, ProviderError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(ProviderError::CircuitBreakerTripped);
        }

        let url = Self::chart_url(instrument_id, start, end, period);
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.base_delay * 2u32.pow(attempt - 1);
                let jitter_ms = rand::thread_rng().gen_range(0..=backoff.as_millis() as u64 / 4);
                std::thread::sleep(backoff + Duration::from_millis(jitter_ms));
            }

            if !self.circuit_breaker.is_allowed() {
                return Err(ProviderError::CircuitBreakerTripped);
            }

            debug!(instrument_id, attempt, "requesting chart");
            match self.client.get(&url).send() {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::FORBIDDEN {
                        self.circuit_breaker.trip();
                        return Err(ProviderError::CircuitBreakerTripped);
                    }

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        self.circuit_breaker.record_failure();
                        let retry_after = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(60);
                        warn!(instrument_id, retry_after, "rate limited");
                        last_error = Some(ProviderError::RateLimited {
                            retry_after_secs: retry_after,
                        });
                        continue;
                    }

                    if status == reqwest::StatusCode::UNAUTHORIZED {
                        return Err(ProviderError::AuthenticationRequired(
                            "Yahoo Finance requires authentication".into(),
                        ));
                    }

                    if status == reqwest::StatusCode::NOT_FOUND {
                        return Err(ProviderError::SymbolNotFound {
                            instrument_id: instrument_id.to_string(),
                        });
                    }

                    if !status.is_success() {
                        self.circuit_breaker.record_failure();
                        last_error = Some(ProviderError::Other(format!("HTTP {status} for {instrument_id}")));
                        continue;
                    }

                    let chart: ChartResponse = resp.json().map_err(|e| {
                        ProviderError::ResponseFormatChanged(format!(
                            "failed to parse response for {instrument_id}: {e}"
                        ))
                    })?;
                    let data = Self::chart_data(instrument_id, chart)?;
                    self.circuit_breaker.record_success();
                    return Ok(data);
                }
                Err(e) if e.is_connect() || e.is_timeout() => {
                    last_error = Some(ProviderError::NetworkUnreachable(e.to_string()));
                }
                Err(e) => return Err(ProviderError::NetworkUnreachable(e.to_string())),
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderError::Other("max retries exceeded".into())))
    }
}

impl RemoteProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn fetch_bars(
        &self,
        instrument_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        period: Period,
    ) -> Result<Vec<RawBar>, ProviderError> {
        let data = self.fetch_chart(instrument_id, start, end, period)?;
        let bars = Self::parse_bars(&data)?;
        Ok(bars
            .into_iter()
            .filter(|b| start <= b.date && b.date <= end)
            .collect())
    }

    fn fetch_corporate_actions(
        &self,
        instrument_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CorporateAction>, ProviderError> {
        let data = self.fetch_chart(instrument_id, start, end, Period::Daily)?;
        Self::parse_actions(instrument_id, &data, start, end)
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}
