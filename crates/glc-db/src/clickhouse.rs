//! ClickHouse-backed [`BarStore`] with the bootstrap state machine.
//!
//! Bootstrap runs once per connection:
//!
//! ```text
//! New -> Connecting -> HealthChecked -> SchemaValidated -> Ready
//!                                                       \-> Failed
//! ```
//!
//! `connect` only ever hands out a store in `Ready`; every other outcome is
//! an error, so no read or write can happen against an unvalidated schema.
//! With `strict_schema` disabled the validation step is skipped (the state
//! still passes through `SchemaValidated`); the default is strict.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use rust_decimal::Decimal;
use serde_json::{Number, Value};
use tracing::info;

use glc_config::DbConfig;
use glc_core::bar::{Bar, DataSource, InstrumentType};
use glc_core::{decimal, DataError, SeriesKey, Timeframe};

use crate::client::ClickHouseClient;
use crate::schema::{expected_schema, TABLE_NAME};
use crate::store::{BarStore, ReadMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    New,
    Connecting,
    HealthChecked,
    SchemaValidated,
    Ready,
    Failed,
}

#[derive(Debug)]
pub struct ClickHouseStore {
    client: ClickHouseClient,
    state: BootstrapState,
}

impl ClickHouseStore {
    /// Connect, health-check and (in strict mode) validate the live schema.
    /// Only a `Ready` store is ever returned.
    pub async fn connect(
        db: &DbConfig,
        http_timeout: Duration,
        strict_schema: bool,
    ) -> Result<Self, DataError> {
        // New -> Connecting
        let client = ClickHouseClient::new(db, http_timeout)?;
        // Connecting -> HealthChecked
        client.ping().await?;
        // HealthChecked -> SchemaValidated (skipped only in lax mode)
        if strict_schema {
            Self::validate_schema(&client).await?;
        }
        // SchemaValidated -> Ready
        info!(database = client.database(), strict_schema, "database bootstrap complete");
        Ok(Self {
            client,
            state: BootstrapState::Ready,
        })
    }

    pub fn state(&self) -> BootstrapState {
        self.state
    }

    /// Compare the live table against the compile-time contract. Strict: any
    /// divergence is `SchemaMismatch`.
    pub async fn validate_schema(client: &ClickHouseClient) -> Result<(), DataError> {
        let schema = expected_schema();
        let tables = client
            .query_json(&format!(
                "SELECT engine, engine_full, partition_key, sorting_key \
                 FROM system.tables \
                 WHERE database = currentDatabase() AND name = '{}'",
                schema.table
            ))
            .await?;
        let columns = client
            .query_json(&format!(
                "SELECT name, type, compression_codec \
                 FROM system.columns \
                 WHERE database = currentDatabase() AND table = '{}' \
                 ORDER BY position",
                schema.table
            ))
            .await?;
        schema.compare(tables.first(), &columns)
    }

    /// Create the table per the expected contract (operator bootstrap path).
    pub async fn create_table(&self) -> Result<(), DataError> {
        self.client.execute(&expected_schema().create_table_sql()).await
    }

    fn series_predicate(series: &SeriesKey, start_micros: i64, end_micros: i64) -> String {
        format!(
            "symbol = '{}' AND timeframe = '{}' AND instrument_type = '{}' \
             AND timestamp >= fromUnixTimestamp64Micro({start_micros}) \
             AND timestamp < fromUnixTimestamp64Micro({end_micros})",
            escape(&series.symbol),
            series.timeframe,
            series.instrument_type,
        )
    }
}

#[async_trait]
impl BarStore for ClickHouseStore {
    async fn insert(&self, bars: &[Bar]) -> Result<u64, DataError> {
        let rows: Vec<Value> = bars.iter().map(bar_to_row).collect();
        self.client.insert_json_each_row(TABLE_NAME, &rows).await?;
        Ok(bars.len() as u64)
    }

    async fn present_timestamps(
        &self,
        series: &SeriesKey,
        start_micros: i64,
        end_micros: i64,
    ) -> Result<Vec<i64>, DataError> {
        let sql = format!(
            "SELECT DISTINCT toUnixTimestamp64Micro(timestamp) AS ts FROM {TABLE_NAME} \
             WHERE {} ORDER BY ts",
            Self::series_predicate(series, start_micros, end_micros)
        );
        let rows = self.client.query_json(&sql).await?;
        rows.iter()
            .map(|r| {
                field_i64(r, "ts").ok_or_else(|| {
                    DataError::MalformedInput("present_timestamps row missing 'ts'".into())
                })
            })
            .collect()
    }

    async fn read_bars(
        &self,
        series: &SeriesKey,
        start_micros: i64,
        end_micros: i64,
        mode: ReadMode,
    ) -> Result<Vec<Bar>, DataError> {
        let final_kw = match mode {
            ReadMode::Deduplicated => " FINAL",
            ReadMode::AllowDuplicates => "",
        };
        // Partition-aware FINAL keeps the dedup read at a few percent
        // overhead instead of tens.
        let settings = match mode {
            ReadMode::Deduplicated => {
                " SETTINGS do_not_merge_across_partitions_select_final = 1"
            }
            ReadMode::AllowDuplicates => "",
        };
        let sql = format!(
            "SELECT toUnixTimestamp64Micro(timestamp) AS ts, \
             toUnixTimestamp64Micro(close_time) AS close_ts, \
             symbol, timeframe, instrument_type, data_source, \
             open, high, low, close, volume, quote_volume, \
             taker_buy_base, taker_buy_quote, number_of_trades, \
             funding_rate, version \
             FROM {TABLE_NAME}{final_kw} WHERE {} ORDER BY timestamp{settings}",
            Self::series_predicate(series, start_micros, end_micros)
        );
        let rows = self.client.query_json(&sql).await?;
        rows.iter().map(row_to_bar).collect()
    }
}

// ---------------------------------------------------------------------------
// Row codec
// ---------------------------------------------------------------------------

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

fn micros_to_datetime_text(micros: i64) -> String {
    DateTime::<chrono::Utc>::from_timestamp_micros(micros)
        .expect("timestamp in range")
        .format("%Y-%m-%d %H:%M:%S%.6f")
        .to_string()
}

/// Decimal text as a JSON number, preserved verbatim by
/// `arbitrary_precision`.
fn decimal_number(d: &Decimal) -> Value {
    match Number::from_str(&decimal::canonical(d)) {
        Ok(n) => Value::Number(n),
        Err(_) => Value::String(decimal::canonical(d)),
    }
}

fn bar_to_row(bar: &Bar) -> Value {
    let mut row = serde_json::Map::new();
    row.insert(
        "timestamp".into(),
        Value::String(micros_to_datetime_text(bar.timestamp_micros)),
    );
    row.insert(
        "close_time".into(),
        Value::String(micros_to_datetime_text(bar.close_time_micros)),
    );
    row.insert("symbol".into(), Value::String(bar.symbol.clone()));
    row.insert(
        "timeframe".into(),
        Value::String(bar.timeframe.as_str().to_string()),
    );
    row.insert(
        "instrument_type".into(),
        Value::String(bar.instrument_type.as_str().to_string()),
    );
    row.insert(
        "data_source".into(),
        Value::String(bar.data_source.as_str().to_string()),
    );
    row.insert("open".into(), decimal_number(&bar.open));
    row.insert("high".into(), decimal_number(&bar.high));
    row.insert("low".into(), decimal_number(&bar.low));
    row.insert("close".into(), decimal_number(&bar.close));
    row.insert("volume".into(), decimal_number(&bar.volume));
    row.insert("quote_volume".into(), decimal_number(&bar.quote_volume));
    row.insert("taker_buy_base".into(), decimal_number(&bar.taker_buy_base));
    row.insert(
        "taker_buy_quote".into(),
        decimal_number(&bar.taker_buy_quote),
    );
    row.insert(
        "number_of_trades".into(),
        Value::Number(bar.number_of_trades.into()),
    );
    row.insert(
        "funding_rate".into(),
        bar.funding_rate
            .as_ref()
            .map(decimal_number)
            .unwrap_or(Value::Null),
    );
    row.insert("version".into(), Value::Number(bar.version.into()));
    row.insert("sign".into(), Value::Number(1.into()));
    Value::Object(row)
}

/// 64-bit integers come back quoted in the engine's JSON output; accept both
/// shapes.
fn field_i64(row: &Value, key: &str) -> Option<i64> {
    match row.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.to_string().parse().ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn field_u64(row: &Value, key: &str) -> Option<u64> {
    match row.get(key)? {
        Value::Number(n) => n.as_u64().or_else(|| n.to_string().parse().ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn field_str<'a>(row: &'a Value, key: &str) -> Option<&'a str> {
    row.get(key)?.as_str()
}

/// Floats may render in scientific notation on the way out; accept both.
fn field_decimal(row: &Value, key: &str) -> Option<Decimal> {
    let text = match row.get(key)? {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Null => return None,
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

fn row_to_bar(row: &Value) -> Result<Bar, DataError> {
    let missing = |key: &str| DataError::MalformedInput(format!("db row missing '{key}'"));
    let dec = |key: &'static str| field_decimal(row, key).ok_or_else(|| missing(key));
    Ok(Bar {
        timestamp_micros: field_i64(row, "ts").ok_or_else(|| missing("ts"))?,
        close_time_micros: field_i64(row, "close_ts").ok_or_else(|| missing("close_ts"))?,
        symbol: field_str(row, "symbol").ok_or_else(|| missing("symbol"))?.to_string(),
        timeframe: Timeframe::parse(field_str(row, "timeframe").ok_or_else(|| missing("timeframe"))?)?,
        instrument_type: InstrumentType::parse(
            field_str(row, "instrument_type").ok_or_else(|| missing("instrument_type"))?,
        )?,
        data_source: DataSource::parse(
            field_str(row, "data_source").ok_or_else(|| missing("data_source"))?,
        )?,
        open: dec("open")?,
        high: dec("high")?,
        low: dec("low")?,
        close: dec("close")?,
        volume: dec("volume")?,
        quote_volume: dec("quote_volume")?,
        taker_buy_base: dec("taker_buy_base")?,
        taker_buy_quote: dec("taker_buy_quote")?,
        number_of_trades: field_u64(row, "number_of_trades")
            .ok_or_else(|| missing("number_of_trades"))?,
        funding_rate: field_decimal(row, "funding_rate"),
        version: field_u64(row, "version").ok_or_else(|| missing("version"))?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
