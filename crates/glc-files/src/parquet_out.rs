//! Parquet output contract (feature `parquet`).
//!
//! Mirrors the CSV logical schema; provenance travels in the file's
//! key-value metadata instead of comment lines. Prices are stored as
//! doubles; the lossless decimal text lives in the CSV surface and the
//! version hash was computed long before this point.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use parquet::data_type::{ByteArray, ByteArrayType, DoubleType, Int64Type};
use parquet::file::properties::WriterProperties;
use parquet::file::writer::SerializedFileWriter;
use parquet::format::KeyValue;
use parquet::schema::parser::parse_message_type;

use glc_core::bar::Bar;
use glc_core::{decimal, DataError};

use crate::csv_out::FileMeta;

const MESSAGE_TYPE: &str = "
message klines {
    required int64 timestamp;
    required int64 close_time;
    required binary symbol (UTF8);
    required binary timeframe (UTF8);
    required binary instrument_type (UTF8);
    required binary data_source (UTF8);
    required double open;
    required double high;
    required double low;
    required double close;
    required double volume;
    required double quote_volume;
    required double taker_buy_base;
    required double taker_buy_quote;
    required int64 number_of_trades;
    optional double funding_rate;
    required int64 version (UINT_64);
}
";

fn perr(what: &str, e: impl std::fmt::Display) -> DataError {
    DataError::MalformedInput(format!("parquet {what}: {e}"))
}

fn to_f64(d: &glc_core::Decimal, field: &str) -> Result<f64, DataError> {
    decimal::canonical(d)
        .parse::<f64>()
        .map_err(|e| perr(field, e))
}

/// Write bars to `path` as a single-row-group Parquet file. Callers wrap
/// this in [`crate::write_atomic`] by rendering to a temp path themselves;
/// the function writes directly and fsyncs.
pub fn write_parquet(path: &Path, meta: &FileMeta, bars: &[Bar]) -> Result<(), DataError> {
    let schema = Arc::new(parse_message_type(MESSAGE_TYPE).map_err(|e| perr("schema", e))?);

    let provenance: Vec<KeyValue> = meta
        .comment_lines()
        .iter()
        .map(|line| {
            let stripped = line.trim_start_matches('#').trim();
            let (key, value) = stripped.split_once(':').unwrap_or((stripped, ""));
            KeyValue::new(key.trim().to_string(), Some(value.trim().to_string()))
        })
        .collect();
    let props = Arc::new(
        WriterProperties::builder()
            .set_key_value_metadata(Some(provenance))
            .build(),
    );

    let file = File::create(path).map_err(|e| perr("create", e))?;
    let mut writer =
        SerializedFileWriter::new(file, schema, props).map_err(|e| perr("writer", e))?;

    let mut row_group = writer.next_row_group().map_err(|e| perr("row group", e))?;
    let mut column_index = 0usize;
    while let Some(mut col) = row_group.next_column().map_err(|e| perr("column", e))? {
        write_column(&mut col, column_index, bars)?;
        col.close().map_err(|e| perr("column close", e))?;
        column_index += 1;
    }
    row_group.close().map_err(|e| perr("row group close", e))?;
    writer.close().map_err(|e| perr("close", e))?;
    Ok(())
}

fn write_column(
    col: &mut parquet::file::writer::SerializedColumnWriter<'_>,
    index: usize,
    bars: &[Bar],
) -> Result<(), DataError> {
    let i64_batch = |col: &mut parquet::file::writer::SerializedColumnWriter<'_>,
                     values: Vec<i64>|
     -> Result<(), DataError> {
        col.typed::<Int64Type>()
            .write_batch(&values, None, None)
            .map_err(|e| perr("int64 batch", e))?;
        Ok(())
    };
    let utf8_batch = |col: &mut parquet::file::writer::SerializedColumnWriter<'_>,
                      values: Vec<ByteArray>|
     -> Result<(), DataError> {
        col.typed::<ByteArrayType>()
            .write_batch(&values, None, None)
            .map_err(|e| perr("utf8 batch", e))?;
        Ok(())
    };
    let f64_batch = |col: &mut parquet::file::writer::SerializedColumnWriter<'_>,
                     values: Vec<f64>|
     -> Result<(), DataError> {
        col.typed::<DoubleType>()
            .write_batch(&values, None, None)
            .map_err(|e| perr("double batch", e))?;
        Ok(())
    };
    let dec = |f: fn(&Bar) -> &glc_core::Decimal, field: &str| -> Result<Vec<f64>, DataError> {
        bars.iter().map(|b| to_f64(f(b), field)).collect()
    };

    match index {
        0 => i64_batch(col, bars.iter().map(|b| b.timestamp_micros).collect()),
        1 => i64_batch(col, bars.iter().map(|b| b.close_time_micros).collect()),
        2 => utf8_batch(col, bars.iter().map(|b| b.symbol.as_str().into()).collect()),
        3 => utf8_batch(col, bars.iter().map(|b| b.timeframe.as_str().into()).collect()),
        4 => utf8_batch(
            col,
            bars.iter()
                .map(|b| b.instrument_type.as_str().into())
                .collect(),
        ),
        5 => utf8_batch(
            col,
            bars.iter().map(|b| b.data_source.as_str().into()).collect(),
        ),
        6 => f64_batch(col, dec(|b| &b.open, "open")?),
        7 => f64_batch(col, dec(|b| &b.high, "high")?),
        8 => f64_batch(col, dec(|b| &b.low, "low")?),
        9 => f64_batch(col, dec(|b| &b.close, "close")?),
        10 => f64_batch(col, dec(|b| &b.volume, "volume")?),
        11 => f64_batch(col, dec(|b| &b.quote_volume, "quote_volume")?),
        12 => f64_batch(col, dec(|b| &b.taker_buy_base, "taker_buy_base")?),
        13 => f64_batch(col, dec(|b| &b.taker_buy_quote, "taker_buy_quote")?),
        14 => i64_batch(
            col,
            bars.iter().map(|b| b.number_of_trades as i64).collect(),
        ),
        15 => {
            // Optional column: definition level 1 where present.
            let def_levels: Vec<i16> = bars
                .iter()
                .map(|b| i16::from(b.funding_rate.is_some()))
                .collect();
            let values: Vec<f64> = bars
                .iter()
                .filter_map(|b| b.funding_rate.as_ref())
                .map(|d| decimal::canonical(d).parse::<f64>())
                .collect::<Result<_, _>>()
                .map_err(|e| perr("funding_rate", e))?;
            col.typed::<DoubleType>()
                .write_batch(&values, Some(&def_levels), None)
                .map_err(|e| perr("double batch", e))?;
            Ok(())
        }
        16 => i64_batch(col, bars.iter().map(|b| b.version as i64).collect()),
        other => Err(perr("column index", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use glc_core::bar::{DataSource, InstrumentType, SeriesKey};
    use glc_core::{bar_version, Timeframe};
    use parquet::file::reader::{FileReader, SerializedFileReader};

    const JAN1: i64 = 1_704_067_200_000_000;

    fn sample_bar() -> Bar {
        let mut bar = Bar {
            timestamp_micros: JAN1,
            close_time_micros: Timeframe::H1.close_time_micros(JAN1),
            symbol: "BTCUSDT".into(),
            timeframe: Timeframe::H1,
            instrument_type: InstrumentType::Spot,
            data_source: DataSource::Bulk,
            open: "42000.1".parse().unwrap(),
            high: "42100.5".parse().unwrap(),
            low: "41900".parse().unwrap(),
            close: "42050.25".parse().unwrap(),
            volume: "123.456".parse().unwrap(),
            quote_volume: "5190000.12".parse().unwrap(),
            taker_buy_base: "60.5".parse().unwrap(),
            taker_buy_quote: "2544000".parse().unwrap(),
            number_of_trades: 9876,
            funding_rate: None,
            version: 0,
        };
        bar.version = bar_version(&bar);
        bar
    }

    #[test]
    fn writes_readable_file_with_provenance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.parquet");
        let meta = FileMeta {
            series: SeriesKey::new("BTCUSDT", Timeframe::H1, InstrumentType::Spot),
            start_micros: JAN1,
            end_micros: JAN1 + 3_600_000_000,
            generated_at: DateTime::from_timestamp_micros(JAN1).unwrap(),
        };
        write_parquet(&path, &meta, &[sample_bar()]).unwrap();

        let reader = SerializedFileReader::new(std::fs::File::open(&path).unwrap()).unwrap();
        let file_meta = reader.metadata().file_metadata();
        assert_eq!(file_meta.num_rows(), 1);
        let kv = file_meta.key_value_metadata().unwrap();
        assert!(kv
            .iter()
            .any(|e| e.key == "symbol" && e.value.as_deref() == Some("BTCUSDT")));
    }
}
