//! Positional kline-row decoding shared by the archive CSV and REST JSON
//! surfaces.
//!
//! Both surfaces carry the same 11 content columns in the same order:
//!
//! | # | field              |
//! |---|--------------------|
//! | 0 | open time (ms or us, see `timestamp::normalize_to_micros`) |
//! | 1 | open               |
//! | 2 | high               |
//! | 3 | low                |
//! | 4 | close              |
//! | 5 | volume             |
//! | 6 | close time (ignored; recomputed from the grid)              |
//! | 7 | quote volume       |
//! | 8 | number of trades   |
//! | 9 | taker buy base     |
//! | 10 | taker buy quote   |
//!
//! The futures dialect appends a 12th `ignore` column, discarded here.

use rust_decimal::Decimal;
use serde_json::Value;

use glc_core::bar::{Bar, DataSource, SeriesKey};
use glc_core::{bar_version, decimal, normalize_to_micros, DataError};

pub const SPOT_COLUMNS: usize = 11;
pub const FUTURES_COLUMNS: usize = 12;

/// One decoded row, still textual, before normalization into a [`Bar`].
#[derive(Debug, Clone)]
pub struct KlineRow {
    pub open_time_raw: i64,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,
    pub quote_volume: String,
    pub number_of_trades: u64,
    pub taker_buy_base: String,
    pub taker_buy_quote: String,
}

impl KlineRow {
    /// Decode from CSV fields (dialect A: 11 columns, dialect B: 12 with the
    /// trailing `ignore` discarded).
    pub fn from_csv_fields(fields: &[&str], row: usize) -> Result<Self, DataError> {
        if fields.len() != SPOT_COLUMNS && fields.len() != FUTURES_COLUMNS {
            return Err(DataError::MalformedInput(format!(
                "csv row {row}: expected {SPOT_COLUMNS} or {FUTURES_COLUMNS} columns, got {}",
                fields.len()
            )));
        }
        let int = |i: usize, name: &str| -> Result<i64, DataError> {
            fields[i].trim().parse::<i64>().map_err(|_| {
                DataError::MalformedInput(format!(
                    "csv row {row}: cannot parse {name} from '{}'",
                    fields[i]
                ))
            })
        };
        let trades = fields[8].trim().parse::<u64>().map_err(|_| {
            DataError::MalformedInput(format!(
                "csv row {row}: cannot parse number_of_trades from '{}'",
                fields[8]
            ))
        })?;
        Ok(Self {
            open_time_raw: int(0, "open_time")?,
            open: fields[1].trim().to_string(),
            high: fields[2].trim().to_string(),
            low: fields[3].trim().to_string(),
            close: fields[4].trim().to_string(),
            volume: fields[5].trim().to_string(),
            quote_volume: fields[7].trim().to_string(),
            number_of_trades: trades,
            taker_buy_base: fields[9].trim().to_string(),
            taker_buy_quote: fields[10].trim().to_string(),
        })
    }

    /// Decode from one REST JSON positional array.
    pub fn from_json_array(item: &Value, row: usize) -> Result<Self, DataError> {
        let arr = item.as_array().ok_or_else(|| {
            DataError::MalformedInput(format!("rest row {row}: expected a positional array"))
        })?;
        if arr.len() < SPOT_COLUMNS {
            return Err(DataError::MalformedInput(format!(
                "rest row {row}: expected at least {SPOT_COLUMNS} elements, got {}",
                arr.len()
            )));
        }
        let int = |i: usize, name: &str| -> Result<i64, DataError> {
            json_i64(&arr[i]).ok_or_else(|| {
                DataError::MalformedInput(format!(
                    "rest row {row}: cannot parse {name} from {}",
                    arr[i]
                ))
            })
        };
        let text = |i: usize, name: &str| -> Result<String, DataError> {
            json_decimal_text(&arr[i]).ok_or_else(|| {
                DataError::MalformedInput(format!(
                    "rest row {row}: cannot parse {name} from {}",
                    arr[i]
                ))
            })
        };
        let trades = int(8, "number_of_trades")?;
        let trades = u64::try_from(trades).map_err(|_| {
            DataError::MalformedInput(format!("rest row {row}: negative trade count {trades}"))
        })?;
        Ok(Self {
            open_time_raw: int(0, "open_time")?,
            open: text(1, "open")?,
            high: text(2, "high")?,
            low: text(3, "low")?,
            close: text(4, "close")?,
            volume: text(5, "volume")?,
            quote_volume: text(7, "quote_volume")?,
            number_of_trades: trades,
            taker_buy_base: text(9, "taker_buy_base")?,
            taker_buy_quote: text(10, "taker_buy_quote")?,
        })
    }

    /// Normalize into a [`Bar`]: precision coercion, grid alignment check,
    /// close-time derivation, version hash.
    pub fn into_bar(
        self,
        series: &SeriesKey,
        source: DataSource,
        funding_rate: Option<Decimal>,
    ) -> Result<Bar, DataError> {
        let ts = normalize_to_micros(self.open_time_raw)?;
        if !series.timeframe.is_aligned(ts) {
            return Err(DataError::MalformedInput(format!(
                "open time {ts}us is not aligned to the {} grid",
                series.timeframe
            )));
        }
        let mut bar = Bar {
            timestamp_micros: ts,
            close_time_micros: series.timeframe.close_time_micros(ts),
            symbol: series.symbol.clone(),
            timeframe: series.timeframe,
            instrument_type: series.instrument_type,
            data_source: source,
            open: decimal::parse(&self.open, "open")?,
            high: decimal::parse(&self.high, "high")?,
            low: decimal::parse(&self.low, "low")?,
            close: decimal::parse(&self.close, "close")?,
            volume: decimal::parse(&self.volume, "volume")?,
            quote_volume: decimal::parse(&self.quote_volume, "quote_volume")?,
            taker_buy_base: decimal::parse(&self.taker_buy_base, "taker_buy_base")?,
            taker_buy_quote: decimal::parse(&self.taker_buy_quote, "taker_buy_quote")?,
            number_of_trades: self.number_of_trades,
            funding_rate,
            version: 0,
        };
        bar.version = bar_version(&bar);
        Ok(bar)
    }
}

fn json_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.to_string().parse().ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Decimal text from either a JSON string (the usual upstream shape) or a
/// bare number (kept verbatim thanks to `arbitrary_precision`).
fn json_decimal_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
