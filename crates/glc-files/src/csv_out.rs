//! CSV output contract.
//!
//! UTF-8, LF line endings, leading `#`-prefixed provenance comments, one
//! header line, then one row per bar in the canonical column order.
//! Timestamps are written as integer microseconds so the file round-trips
//! losslessly;
//! decimals use the canonical text form (no exponent, no trailing zeros).

use chrono::{DateTime, SecondsFormat, Utc};

use glc_core::bar::{Bar, SeriesKey};
use glc_core::{decimal, DataError};

pub const CSV_HEADER: [&str; 17] = [
    "timestamp",
    "close_time",
    "symbol",
    "timeframe",
    "instrument_type",
    "data_source",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "quote_volume",
    "taker_buy_base",
    "taker_buy_quote",
    "number_of_trades",
    "funding_rate",
    "version",
];

/// Provenance recorded in the comment block (and in Parquet metadata).
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub series: SeriesKey,
    pub start_micros: i64,
    pub end_micros: i64,
    pub generated_at: DateTime<Utc>,
}

impl FileMeta {
    pub fn comment_lines(&self) -> Vec<String> {
        let iso = |micros: i64| {
            DateTime::<Utc>::from_timestamp_micros(micros)
                .expect("timestamp in range")
                .to_rfc3339_opts(SecondsFormat::Micros, true)
        };
        vec![
            format!("# symbol: {}", self.series.symbol),
            format!("# timeframe: {}", self.series.timeframe),
            format!("# instrument_type: {}", self.series.instrument_type),
            format!(
                "# range: [{}, {})",
                iso(self.start_micros),
                iso(self.end_micros)
            ),
            format!(
                "# generated_at: {}",
                self.generated_at.to_rfc3339_opts(SecondsFormat::Micros, true)
            ),
        ]
    }
}

/// Render bars to the full file contents (comments + header + rows).
pub fn render_csv(meta: &FileMeta, bars: &[Bar]) -> Result<Vec<u8>, DataError> {
    let mut out = String::new();
    for line in meta.comment_lines() {
        out.push_str(&line);
        out.push('\n');
    }

    let mut wtr = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    wtr.write_record(CSV_HEADER)
        .map_err(|e| DataError::MalformedInput(format!("csv header: {e}")))?;
    for bar in bars {
        wtr.write_record(bar_record(bar))
            .map_err(|e| DataError::MalformedInput(format!("csv row: {e}")))?;
    }
    let table = wtr
        .into_inner()
        .map_err(|e| DataError::MalformedInput(format!("csv flush: {e}")))?;
    out.push_str(
        std::str::from_utf8(&table)
            .map_err(|e| DataError::MalformedInput(format!("csv utf-8: {e}")))?,
    );
    Ok(out.into_bytes())
}

/// Whether a CSV line is the output-contract header.
pub fn is_output_header(line: &str) -> bool {
    line.trim() == CSV_HEADER.join(",")
}

/// Decode one output-contract record back into a [`Bar`]. The inverse of
/// [`bar_record`]; used by the validator and by consumers re-reading
/// exported files.
pub fn parse_record(fields: &[&str], row: usize) -> Result<Bar, DataError> {
    if fields.len() != CSV_HEADER.len() {
        return Err(DataError::MalformedInput(format!(
            "row {row}: expected {} columns, got {}",
            CSV_HEADER.len(),
            fields.len()
        )));
    }
    let int = |i: usize, name: &'static str| -> Result<i64, DataError> {
        fields[i].trim().parse::<i64>().map_err(|_| {
            DataError::MalformedInput(format!(
                "row {row}: cannot parse {name} from '{}'",
                fields[i]
            ))
        })
    };
    let dec = |i: usize, name: &'static str| decimal::parse(fields[i], name);

    let funding = fields[15].trim();
    let funding_rate = if funding.is_empty() {
        None
    } else {
        Some(decimal::parse(funding, "funding_rate")?)
    };

    Ok(Bar {
        timestamp_micros: int(0, "timestamp")?,
        close_time_micros: int(1, "close_time")?,
        symbol: fields[2].trim().to_string(),
        timeframe: glc_core::Timeframe::parse(fields[3])?,
        instrument_type: glc_core::InstrumentType::parse(fields[4])?,
        data_source: glc_core::DataSource::parse(fields[5])?,
        open: dec(6, "open")?,
        high: dec(7, "high")?,
        low: dec(8, "low")?,
        close: dec(9, "close")?,
        volume: dec(10, "volume")?,
        quote_volume: dec(11, "quote_volume")?,
        taker_buy_base: dec(12, "taker_buy_base")?,
        taker_buy_quote: dec(13, "taker_buy_quote")?,
        number_of_trades: fields[14].trim().parse::<u64>().map_err(|_| {
            DataError::MalformedInput(format!(
                "row {row}: cannot parse number_of_trades from '{}'",
                fields[14]
            ))
        })?,
        funding_rate,
        version: fields[16].trim().parse::<u64>().map_err(|_| {
            DataError::MalformedInput(format!(
                "row {row}: cannot parse version from '{}'",
                fields[16]
            ))
        })?,
    })
}

/// Read a whole output-contract file back into bars. Comment lines are
/// skipped; the header is required. Aborts on the first bad row.
pub fn parse_csv(text: &str) -> Result<Vec<Bar>, DataError> {
    let mut lines = text
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim_start().starts_with('#') && !l.trim().is_empty());

    match lines.next() {
        Some((_, l)) if is_output_header(l) => {}
        Some((n, _)) => {
            return Err(DataError::MalformedInput(format!(
                "line {}: missing output header",
                n + 1
            )))
        }
        None => return Ok(Vec::new()),
    }

    let mut out = Vec::new();
    for (n, line) in lines {
        let fields: Vec<&str> = line.split(',').collect();
        out.push(parse_record(&fields, n + 1)?);
    }
    Ok(out)
}

fn bar_record(bar: &Bar) -> Vec<String> {
    vec![
        bar.timestamp_micros.to_string(),
        bar.close_time_micros.to_string(),
        bar.symbol.clone(),
        bar.timeframe.as_str().to_string(),
        bar.instrument_type.as_str().to_string(),
        bar.data_source.as_str().to_string(),
        decimal::canonical(&bar.open),
        decimal::canonical(&bar.high),
        decimal::canonical(&bar.low),
        decimal::canonical(&bar.close),
        decimal::canonical(&bar.volume),
        decimal::canonical(&bar.quote_volume),
        decimal::canonical(&bar.taker_buy_base),
        decimal::canonical(&bar.taker_buy_quote),
        bar.number_of_trades.to_string(),
        bar.funding_rate
            .as_ref()
            .map(decimal::canonical)
            .unwrap_or_default(),
        bar.version.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use glc_core::bar::{DataSource, InstrumentType};
    use glc_core::{bar_version, Timeframe};

    const JAN1: i64 = 1_704_067_200_000_000;

    fn meta() -> FileMeta {
        FileMeta {
            series: SeriesKey::new("BTCUSDT", Timeframe::H1, InstrumentType::Spot),
            start_micros: JAN1,
            end_micros: JAN1 + 24 * 3_600_000_000,
            generated_at: DateTime::from_timestamp_micros(JAN1).unwrap(),
        }
    }

    fn sample_bar() -> Bar {
        let mut bar = Bar {
            timestamp_micros: JAN1,
            close_time_micros: Timeframe::H1.close_time_micros(JAN1),
            symbol: "BTCUSDT".into(),
            timeframe: Timeframe::H1,
            instrument_type: InstrumentType::Spot,
            data_source: DataSource::Bulk,
            open: "42000.10".parse().unwrap(),
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
    fn comments_then_header_then_rows() {
        let bytes = render_csv(&meta(), &[sample_bar()]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("# symbol: BTCUSDT"));
        assert!(lines[4].starts_with("# generated_at:"));
        assert_eq!(lines[5], CSV_HEADER.join(","));
        assert!(lines[6].starts_with(&format!("{JAN1},")));
        // LF only, no CR.
        assert!(!text.contains('\r'));
    }

    #[test]
    fn decimals_render_canonically() {
        let bytes = render_csv(&meta(), &[sample_bar()]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        // "42000.10" normalizes to "42000.1".
        assert!(text.contains(",42000.1,"));
        assert!(!text.contains("42000.10"));
    }

    #[test]
    fn absent_funding_is_empty_field() {
        let bytes = render_csv(&meta(), &[sample_bar()]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let row = text.lines().last().unwrap();
        let fields: Vec<&str> = row.split(',').collect();
        assert_eq!(fields.len(), 17);
        assert_eq!(fields[15], "");
    }

    #[test]
    fn range_comment_is_half_open_iso() {
        let text = String::from_utf8(render_csv(&meta(), &[]).unwrap()).unwrap();
        assert!(text.contains("# range: [2024-01-01T00:00:00.000000Z, 2024-01-02T00:00:00.000000Z)"));
    }

    #[test]
    fn render_parse_roundtrip() {
        let mut futures_bar = sample_bar();
        futures_bar.instrument_type = InstrumentType::FuturesPerp;
        futures_bar.funding_rate = Some("0.0001".parse().unwrap());
        let bars = vec![futures_bar];
        let bytes = render_csv(&meta(), &bars).unwrap();
        let parsed = parse_csv(std::str::from_utf8(&bytes).unwrap()).unwrap();
        assert_eq!(parsed.len(), 1);
        // The decimal text normalizes on render, so compare values.
        assert_eq!(parsed[0].open, bars[0].open);
        assert_eq!(parsed[0].funding_rate, bars[0].funding_rate);
        assert_eq!(parsed[0].version, bars[0].version);
        assert_eq!(parsed[0].timestamp_micros, bars[0].timestamp_micros);
        assert_eq!(parsed[0].data_source, bars[0].data_source);
    }

    #[test]
    fn parse_rejects_missing_header() {
        let err = parse_csv("1,2,3\n").unwrap_err();
        assert!(err.to_string().contains("missing output header"));
    }

    #[test]
    fn parse_empty_file_is_empty() {
        assert!(parse_csv("").unwrap().is_empty());
        assert!(parse_csv("# only: comments\n").unwrap().is_empty());
    }

    #[test]
    fn header_detection() {
        assert!(is_output_header(&CSV_HEADER.join(",")));
        assert!(!is_output_header("open_time,open,high"));
    }
}
