//! The bar model: one immutable OHLCV row plus its series identity.

use rust_decimal::Decimal;

use crate::error::DataError;
use crate::timeframe::Timeframe;

// ---------------------------------------------------------------------------
// Instrument / source tags
// ---------------------------------------------------------------------------

/// Market a series trades on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum InstrumentType {
    #[serde(rename = "spot")]
    Spot,
    #[serde(rename = "futures-perp")]
    FuturesPerp,
}

impl InstrumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentType::Spot => "spot",
            InstrumentType::FuturesPerp => "futures-perp",
        }
    }

    /// Path segment in the bulk archive URL schema.
    pub fn archive_segment(&self) -> &'static str {
        match self {
            InstrumentType::Spot => "spot",
            InstrumentType::FuturesPerp => "futures/um",
        }
    }

    /// Maximum bars per REST request window.
    pub fn rest_chunk_limit(&self) -> usize {
        match self {
            InstrumentType::Spot => 1_000,
            InstrumentType::FuturesPerp => 1_500,
        }
    }

    pub fn parse(s: &str) -> Result<Self, DataError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "spot" => Ok(InstrumentType::Spot),
            "futures-perp" | "futures" | "perp" => Ok(InstrumentType::FuturesPerp),
            other => Err(DataError::Config(format!(
                "invalid instrument type '{other}'. expected: spot | futures-perp"
            ))),
        }
    }
}

impl std::fmt::Display for InstrumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which upstream surface produced a row. Deliberately excluded from the
/// version hash so re-ingestion from the other surface converges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DataSource {
    #[serde(rename = "bulk")]
    Bulk,
    #[serde(rename = "rest")]
    Rest,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Bulk => "bulk",
            DataSource::Rest => "rest",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DataError> {
        match s.trim() {
            "bulk" => Ok(DataSource::Bulk),
            "rest" => Ok(DataSource::Rest),
            other => Err(DataError::MalformedInput(format!(
                "invalid data source tag '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Series identity
// ---------------------------------------------------------------------------

/// `(symbol, timeframe, instrument_type)`: everything but the timestamp of a
/// bar's primary identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct SeriesKey {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub instrument_type: InstrumentType,
}

impl SeriesKey {
    pub fn new<S: Into<String>>(symbol: S, timeframe: Timeframe, instrument_type: InstrumentType) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            instrument_type,
        }
    }
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.symbol, self.timeframe, self.instrument_type)
    }
}

// ---------------------------------------------------------------------------
// Bar
// ---------------------------------------------------------------------------

/// One OHLCV bar. Immutable once constructed; `version` is the deterministic
/// content hash (see `version.rs`) that drives engine-side deduplication.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Bar {
    /// Bar open instant, microseconds UTC, aligned to the timeframe grid.
    pub timestamp_micros: i64,
    /// `next_grid(timestamp) - 1us`.
    pub close_time_micros: i64,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub instrument_type: InstrumentType,
    pub data_source: DataSource,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub quote_volume: Decimal,
    pub taker_buy_base: Decimal,
    pub taker_buy_quote: Decimal,
    pub number_of_trades: u64,
    /// Present only for futures-perp, and even there may be absent.
    pub funding_rate: Option<Decimal>,
    pub version: u64,
}

impl Bar {
    pub fn series_key(&self) -> SeriesKey {
        SeriesKey {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
            instrument_type: self.instrument_type,
        }
    }

    /// Enforce every row invariant. Called by the loader before any
    /// insert; a violation is always a bug upstream of the caller.
    pub fn validate(&self) -> Result<(), DataError> {
        let fail = |detail: String| {
            Err(DataError::InvariantViolation {
                detail,
                bar: Box::new(self.clone()),
            })
        };

        if self.low <= Decimal::ZERO {
            return fail(format!("low must be positive, got {}", self.low));
        }
        let max_oc = self.open.max(self.close);
        let min_oc = self.open.min(self.close);
        if self.high < max_oc {
            return fail(format!("high {} < max(open, close) {}", self.high, max_oc));
        }
        if self.low > min_oc {
            return fail(format!("low {} > min(open, close) {}", self.low, min_oc));
        }
        for (name, v) in [
            ("volume", &self.volume),
            ("quote_volume", &self.quote_volume),
            ("taker_buy_base", &self.taker_buy_base),
            ("taker_buy_quote", &self.taker_buy_quote),
        ] {
            if v.is_sign_negative() {
                return fail(format!("{name} must be non-negative, got {v}"));
            }
        }
        if self.taker_buy_base > self.volume {
            return fail(format!(
                "taker_buy_base {} > volume {}",
                self.taker_buy_base, self.volume
            ));
        }
        if self.taker_buy_quote > self.quote_volume {
            return fail(format!(
                "taker_buy_quote {} > quote_volume {}",
                self.taker_buy_quote, self.quote_volume
            ));
        }
        if !self.timeframe.is_aligned(self.timestamp_micros) {
            return fail(format!(
                "timestamp {} not aligned to {} grid",
                self.timestamp_micros, self.timeframe
            ));
        }
        let expected_close = self.timeframe.close_time_micros(self.timestamp_micros);
        if self.close_time_micros != expected_close {
            return fail(format!(
                "close_time {} != expected {}",
                self.close_time_micros, expected_close
            ));
        }
        if self.funding_rate.is_some() && self.instrument_type != InstrumentType::FuturesPerp {
            return fail("funding_rate present on a non-futures row".to_string());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
