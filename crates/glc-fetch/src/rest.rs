//! REST fetcher: the live per-bar-range klines endpoint.
//!
//! Requests are chunked to at most 1000 bars (spot) or 1500 (futures-perp)
//! per window and concatenated preserving strict timestamp order. Timestamps
//! on this surface are milliseconds regardless of instrument type. The retry
//! policy lives in `retry.rs`; exhausted budgets surface as
//! `TransientSource` and the caller decides whether to propagate or record a
//! gap.
//!
//! For futures-perp series the fetcher also reads the funding-rate endpoint
//! and decorates each bar with the latest rate at or before its open. The
//! decoration is best-effort: funding is optional on the row and absent
//! decoration never blocks authentic price data.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, warn};

use glc_core::bar::{Bar, DataSource, InstrumentType, SeriesKey};
use glc_core::DataError;

use crate::kline::KlineRow;
use crate::retry::{classify, with_retries, Attempt, Classified};
use crate::source::BarSource;

pub struct RestFetcher {
    http: reqwest::Client,
    spot_root: String,
    futures_root: String,
    chunk_size_spot: usize,
    chunk_size_futures: usize,
    max_retries: u32,
}

impl RestFetcher {
    pub fn new(
        spot_root: String,
        futures_root: String,
        http_timeout: Duration,
        max_retries: u32,
        chunk_size_spot: usize,
        chunk_size_futures: usize,
    ) -> Result<Self, DataError> {
        if chunk_size_spot == 0 || chunk_size_spot > InstrumentType::Spot.rest_chunk_limit() {
            return Err(DataError::Config(format!(
                "chunk_size_spot out of range: {chunk_size_spot}"
            )));
        }
        if chunk_size_futures == 0
            || chunk_size_futures > InstrumentType::FuturesPerp.rest_chunk_limit()
        {
            return Err(DataError::Config(format!(
                "chunk_size_futures out of range: {chunk_size_futures}"
            )));
        }
        let http = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|e| DataError::Config(format!("rest http client: {e}")))?;
        Ok(Self {
            http,
            spot_root: spot_root.trim_end_matches('/').to_string(),
            futures_root: futures_root.trim_end_matches('/').to_string(),
            chunk_size_spot,
            chunk_size_futures,
            max_retries,
        })
    }

    fn root(&self, instrument: InstrumentType) -> &str {
        match instrument {
            InstrumentType::Spot => &self.spot_root,
            InstrumentType::FuturesPerp => &self.futures_root,
        }
    }

    fn chunk_size(&self, instrument: InstrumentType) -> usize {
        match instrument {
            InstrumentType::Spot => self.chunk_size_spot,
            InstrumentType::FuturesPerp => self.chunk_size_futures,
        }
    }

    /// GET one klines window. `start_ms`/`end_ms` are both inclusive, as the
    /// endpoint defines them.
    async fn fetch_chunk(
        &self,
        series: &SeriesKey,
        start_ms: i64,
        end_ms: i64,
        limit: usize,
    ) -> Result<Vec<Value>, DataError> {
        let url = format!("{}/klines", self.root(series.instrument_type));
        let start_s = start_ms.to_string();
        let end_s = end_ms.to_string();
        let limit_s = limit.to_string();
        with_retries("klines chunk", self.max_retries, || async {
            let resp = match self
                .http
                .get(&url)
                .query(&[
                    ("symbol", series.symbol.as_str()),
                    ("interval", series.timeframe.rest_interval()),
                    ("startTime", start_s.as_str()),
                    ("endTime", end_s.as_str()),
                    ("limit", limit_s.as_str()),
                ])
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    return Attempt::Retry {
                        reason: format!("request failed: {e}"),
                        retry_after: None,
                    }
                }
            };
            match classify(resp) {
                Classified::Success(resp) => match resp.json::<Value>().await {
                    Ok(Value::Array(items)) => Attempt::Ok(items),
                    Ok(other) => Attempt::Fatal(DataError::MalformedInput(format!(
                        "klines response is not an array: {other}"
                    ))),
                    Err(e) => Attempt::Retry {
                        reason: format!("body decode failed: {e}"),
                        retry_after: None,
                    },
                },
                // The klines endpoint has no per-range 404; treat one as an
                // upstream hiccup rather than a terminal rejection.
                Classified::NotFound => Attempt::Retry {
                    reason: "http 404".to_string(),
                    retry_after: None,
                },
                Classified::Retry {
                    reason,
                    retry_after,
                } => Attempt::Retry {
                    reason,
                    retry_after,
                },
                Classified::Fatal(e) => Attempt::Fatal(e),
            }
        })
        .await
    }

    /// Funding-rate history for `[start_ms, end_ms]`, ascending by funding
    /// time. Futures-perp only.
    pub async fn fetch_funding_rates(
        &self,
        symbol: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<(i64, Decimal)>, DataError> {
        let url = format!("{}/fundingRate", self.futures_root);
        let start_s = start_ms.to_string();
        let end_s = end_ms.to_string();
        let items = with_retries("funding rates", self.max_retries, || async {
            let resp = match self
                .http
                .get(&url)
                .query(&[
                    ("symbol", symbol),
                    ("startTime", start_s.as_str()),
                    ("endTime", end_s.as_str()),
                    ("limit", "1000"),
                ])
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    return Attempt::Retry {
                        reason: format!("request failed: {e}"),
                        retry_after: None,
                    }
                }
            };
            match classify(resp) {
                Classified::Success(resp) => match resp.json::<Value>().await {
                    Ok(Value::Array(items)) => Attempt::Ok(items),
                    Ok(other) => Attempt::Fatal(DataError::MalformedInput(format!(
                        "fundingRate response is not an array: {other}"
                    ))),
                    Err(e) => Attempt::Retry {
                        reason: format!("body decode failed: {e}"),
                        retry_after: None,
                    },
                },
                Classified::NotFound => Attempt::Ok(Vec::new()),
                Classified::Retry {
                    reason,
                    retry_after,
                } => Attempt::Retry {
                    reason,
                    retry_after,
                },
                Classified::Fatal(e) => Attempt::Fatal(e),
            }
        })
        .await?;

        let mut out = Vec::with_capacity(items.len());
        for item in &items {
            let Some(obj) = item.as_object() else { continue };
            let ts = obj
                .get("fundingTime")
                .and_then(Value::as_i64)
                .ok_or_else(|| {
                    DataError::MalformedInput("fundingRate row missing fundingTime".into())
                })?;
            let rate_text = match obj.get("fundingRate") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => {
                    return Err(DataError::MalformedInput(
                        "fundingRate row missing fundingRate".into(),
                    ))
                }
            };
            let rate = glc_core::decimal::parse(&rate_text, "funding_rate")?;
            out.push((ts * 1_000, rate)); // ms -> us
        }
        out.sort_unstable_by_key(|(ts, _)| *ts);
        Ok(out)
    }
}

/// Assign each bar the latest funding rate at or before its open timestamp.
/// `rates` must be ascending. Bars before the first rate stay `None`.
pub fn apply_funding(bars: &mut [Bar], rates: &[(i64, Decimal)]) {
    for bar in bars.iter_mut() {
        let idx = rates.partition_point(|(ts, _)| *ts <= bar.timestamp_micros);
        bar.funding_rate = idx.checked_sub(1).map(|i| rates[i].1);
    }
}

#[async_trait]
impl BarSource for RestFetcher {
    fn name(&self) -> &'static str {
        DataSource::Rest.as_str()
    }

    async fn fetch(
        &self,
        series: &SeriesKey,
        start_micros: i64,
        end_micros: i64,
    ) -> Result<Vec<Bar>, DataError> {
        let points: Vec<i64> = series.timeframe.grid(start_micros, end_micros).collect();
        if points.is_empty() {
            return Ok(Vec::new());
        }

        let mut bars: Vec<Bar> = Vec::with_capacity(points.len());
        for chunk in points.chunks(self.chunk_size(series.instrument_type)) {
            let first = chunk[0];
            let last = *chunk.last().expect("chunks are non-empty");
            // endTime is inclusive: stop one microsecond before the next
            // grid point so the window holds exactly this chunk's bars.
            let start_ms = first / 1_000;
            let end_ms = (series.timeframe.next(last) - 1) / 1_000;
            debug!(%series, start_ms, end_ms, bars = chunk.len(), "fetching klines chunk");

            let items = self
                .fetch_chunk(series, start_ms, end_ms, chunk.len())
                .await?;
            for (i, item) in items.iter().enumerate() {
                let row = KlineRow::from_json_array(item, i)?;
                bars.push(row.into_bar(series, DataSource::Rest, None)?);
            }
        }

        for w in bars.windows(2) {
            if w[1].timestamp_micros <= w[0].timestamp_micros {
                return Err(DataError::MalformedInput(format!(
                    "klines out of order: {} then {}",
                    w[0].timestamp_micros, w[1].timestamp_micros
                )));
            }
        }

        if series.instrument_type == InstrumentType::FuturesPerp && !bars.is_empty() {
            match self
                .fetch_funding_rates(&series.symbol, start_micros / 1_000, (end_micros - 1) / 1_000)
                .await
            {
                Ok(rates) => apply_funding(&mut bars, &rates),
                Err(e) => {
                    warn!(%series, error = %e, "funding decoration skipped");
                }
            }
        }

        Ok(bars)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
