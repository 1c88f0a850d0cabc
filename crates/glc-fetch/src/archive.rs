//! Bulk archive fetcher: monthly/daily ZIP files on the upstream CDN.
//!
//! URL schema:
//!
//! ```text
//! {root}/{spot|futures/um}/{monthly|daily}/klines/{SYMBOL}/{TF}/
//!     {SYMBOL}-{TF}-{YYYY}-{MM}[-{DD}].zip
//! ```
//!
//! Each ZIP holds exactly one CSV member. Two dialects exist: spot files are
//! headerless with 11 columns, futures files carry a header row and a
//! trailing `ignore` column. A 404 on a monthly file triggers the
//! daily-granularity fallback for that month; a 404 on a daily file leaves
//! the day as a gap for the REST filler. Corrupt ZIPs, checksum mismatches
//! and truncated CSVs surface as `ArchiveCorrupt`, never partial ingestion.

use std::io::Read;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use glc_core::bar::{Bar, DataSource, SeriesKey};
use glc_core::DataError;

use crate::kline::KlineRow;
use crate::retry::{classify, with_retries, Attempt, Classified};
use crate::source::BarSource;

pub struct ArchiveFetcher {
    http: reqwest::Client,
    archive_root: String,
    max_retries: u32,
}

impl ArchiveFetcher {
    pub fn new(
        archive_root: String,
        http_timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, DataError> {
        let http = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|e| DataError::Config(format!("archive http client: {e}")))?;
        Ok(Self {
            http,
            archive_root: archive_root.trim_end_matches('/').to_string(),
            max_retries,
        })
    }

    fn monthly_url(&self, series: &SeriesKey, year: i32, month: u32) -> String {
        format!(
            "{}/{}/monthly/klines/{}/{}/{}-{}-{year:04}-{month:02}.zip",
            self.archive_root,
            series.instrument_type.archive_segment(),
            series.symbol,
            series.timeframe,
            series.symbol,
            series.timeframe,
        )
    }

    fn daily_url(&self, series: &SeriesKey, day: NaiveDate) -> String {
        format!(
            "{}/{}/daily/klines/{}/{}/{}-{}-{}.zip",
            self.archive_root,
            series.instrument_type.archive_segment(),
            series.symbol,
            series.timeframe,
            series.symbol,
            series.timeframe,
            day.format("%Y-%m-%d"),
        )
    }

    /// Fetch one archive month, falling back to daily archives on a monthly
    /// 404. Days that 404 are simply absent from the result.
    pub async fn fetch_month(
        &self,
        series: &SeriesKey,
        year: i32,
        month: u32,
    ) -> Result<Vec<Bar>, DataError> {
        let url = self.monthly_url(series, year, month);
        match self.download(&url).await? {
            Some(zip_bytes) => {
                self.verify_checksum(&url, &zip_bytes).await?;
                self.parse_zip(&zip_bytes, series, &url)
            }
            None => {
                info!(%series, year, month, "monthly archive absent, trying daily archives");
                self.fetch_month_daily(series, year, month).await
            }
        }
    }

    async fn fetch_month_daily(
        &self,
        series: &SeriesKey,
        year: i32,
        month: u32,
    ) -> Result<Vec<Bar>, DataError> {
        let mut out = Vec::new();
        let mut day = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| DataError::Config(format!("invalid month {year:04}-{month:02}")))?;
        while day.month() == month {
            let url = self.daily_url(series, day);
            match self.download(&url).await? {
                Some(zip_bytes) => {
                    self.verify_checksum(&url, &zip_bytes).await?;
                    out.extend(self.parse_zip(&zip_bytes, series, &url)?);
                }
                None => {
                    debug!(%series, %day, "daily archive absent, leaving day as a gap");
                }
            }
            day = match day.succ_opt() {
                Some(d) => d,
                None => break,
            };
        }
        Ok(out)
    }

    /// GET with the shared retry policy. 404 is `Ok(None)`, never retried.
    async fn download(&self, url: &str) -> Result<Option<Vec<u8>>, DataError> {
        with_retries("archive download", self.max_retries, || async {
            let resp = match self.http.get(url).send().await {
                Ok(r) => r,
                Err(e) => {
                    return Attempt::Retry {
                        reason: format!("request failed: {e}"),
                        retry_after: None,
                    }
                }
            };
            match classify(resp) {
                Classified::Success(resp) => match resp.bytes().await {
                    Ok(b) => Attempt::Ok(Some(b.to_vec())),
                    Err(e) => Attempt::Retry {
                        reason: format!("body read failed: {e}"),
                        retry_after: None,
                    },
                },
                Classified::NotFound => Attempt::Ok(None),
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

    /// Fetch the sibling `.CHECKSUM` file and verify the ZIP against it.
    /// Absent checksum files are tolerated; a mismatch is corruption.
    async fn verify_checksum(&self, zip_url: &str, zip_bytes: &[u8]) -> Result<(), DataError> {
        let checksum_url = format!("{zip_url}.CHECKSUM");
        let body = match self.http.get(&checksum_url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(t) => t,
                Err(_) => return Ok(()),
            },
            _ => return Ok(()),
        };
        let Some(expected) = body.split_whitespace().next() else {
            return Ok(());
        };
        let actual = hex::encode(Sha256::digest(zip_bytes));
        if !expected.eq_ignore_ascii_case(&actual) {
            return Err(DataError::ArchiveCorrupt(format!(
                "checksum mismatch for {zip_url}: expected {expected}, got {actual}"
            )));
        }
        Ok(())
    }

    fn parse_zip(
        &self,
        zip_bytes: &[u8],
        series: &SeriesKey,
        url: &str,
    ) -> Result<Vec<Bar>, DataError> {
        let csv_text = extract_single_csv(zip_bytes)
            .map_err(|e| DataError::ArchiveCorrupt(format!("{url}: {e}")))?;
        parse_archive_csv(&csv_text, series)
            // A row that fails to parse inside an archive means the file is
            // truncated or damaged; the caller treats the month as absent.
            .map_err(|e| DataError::ArchiveCorrupt(format!("{url}: {e}")))
    }
}

#[async_trait]
impl BarSource for ArchiveFetcher {
    fn name(&self) -> &'static str {
        DataSource::Bulk.as_str()
    }

    async fn fetch(
        &self,
        series: &SeriesKey,
        start_micros: i64,
        end_micros: i64,
    ) -> Result<Vec<Bar>, DataError> {
        let mut out = Vec::new();
        for (year, month) in months_overlapping(start_micros, end_micros) {
            let bars = self.fetch_month(series, year, month).await?;
            out.extend(
                bars.into_iter()
                    .filter(|b| b.timestamp_micros >= start_micros && b.timestamp_micros < end_micros),
            );
        }
        out.sort_unstable_by_key(|b| b.timestamp_micros);
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// ZIP / CSV decoding
// ---------------------------------------------------------------------------

fn extract_single_csv(zip_bytes: &[u8]) -> Result<String, String> {
    let cursor = std::io::Cursor::new(zip_bytes);
    let mut archive =
        zip::ZipArchive::new(cursor).map_err(|e| format!("unreadable zip: {e}"))?;
    let csv_idx = (0..archive.len())
        .find(|&i| {
            archive
                .by_index(i)
                .map(|f| f.name().ends_with(".csv"))
                .unwrap_or(false)
        })
        .ok_or_else(|| "no csv member in zip".to_string())?;
    let mut member = archive
        .by_index(csv_idx)
        .map_err(|e| format!("zip member unreadable: {e}"))?;
    let mut text = String::new();
    member
        .read_to_string(&mut text)
        .map_err(|e| format!("zip member truncated: {e}"))?;
    Ok(text)
}

/// Parse one archive CSV, auto-detecting the dialect: a first line whose
/// first token is non-numeric means the futures header row is present.
pub fn parse_archive_csv(text: &str, series: &SeriesKey) -> Result<Vec<Bar>, DataError> {
    let has_header = text
        .lines()
        .next()
        .map(first_token_is_non_numeric)
        .unwrap_or(false);

    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(has_header)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut out = Vec::new();
    for (i, rec) in rdr.records().enumerate() {
        let rec = rec.map_err(|e| DataError::MalformedInput(format!("csv row {i}: {e}")))?;
        let fields: Vec<&str> = rec.iter().collect();
        if fields.len() == 1 && fields[0].is_empty() {
            continue;
        }
        let row = KlineRow::from_csv_fields(&fields, i)?;
        out.push(row.into_bar(series, DataSource::Bulk, None)?);
    }
    Ok(out)
}

fn first_token_is_non_numeric(line: &str) -> bool {
    let token = line.split(',').next().unwrap_or("").trim();
    token.is_empty() || !token.chars().all(|c| c.is_ascii_digit())
}

/// Calendar months whose bars can overlap `[start, end)`.
fn months_overlapping(start_micros: i64, end_micros: i64) -> Vec<(i32, u32)> {
    let mut out = Vec::new();
    if start_micros >= end_micros {
        return out;
    }
    let start = DateTime::<Utc>::from_timestamp_micros(start_micros)
        .expect("timestamp in range");
    // end is exclusive: the instant `end` itself needs no month.
    let end = DateTime::<Utc>::from_timestamp_micros(end_micros - 1)
        .expect("timestamp in range");
    let (mut y, mut m) = (start.year(), start.month());
    loop {
        out.push((y, m));
        if (y, m) == (end.year(), end.month()) {
            break;
        }
        if m == 12 {
            y += 1;
            m = 1;
        } else {
            m += 1;
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use glc_core::bar::InstrumentType;
    use glc_core::Timeframe;
    use httpmock::prelude::*;
    use std::io::Write;

    fn series() -> SeriesKey {
        SeriesKey::new("BTCUSDT", Timeframe::H1, InstrumentType::Spot)
    }

    fn futures_series() -> SeriesKey {
        SeriesKey::new("BTCUSDT", Timeframe::H1, InstrumentType::FuturesPerp)
    }

    const JAN1_MS: i64 = 1_704_067_200_000; // 2024-01-01T00:00:00Z

    fn csv_line(open_ms: i64) -> String {
        format!(
            "{open_ms},42000.1,42100.5,41900,42050.25,123.456,{},5190000.12,9876,60.5,2544000",
            open_ms + 3_599_999
        )
    }

    fn zip_with_csv(name: &str, csv: &str) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut zw = zip::ZipWriter::new(&mut cursor);
            zw.start_file(name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zw.write_all(csv.as_bytes()).unwrap();
            zw.finish().unwrap();
        }
        cursor.into_inner()
    }

    fn fetcher(base: &str) -> ArchiveFetcher {
        ArchiveFetcher::new(base.to_string(), Duration::from_secs(5), 3).unwrap()
    }

    #[test]
    fn url_schema_monthly_and_daily() {
        let f = fetcher("https://cdn.example/data");
        assert_eq!(
            f.monthly_url(&series(), 2024, 1),
            "https://cdn.example/data/spot/monthly/klines/BTCUSDT/1h/BTCUSDT-1h-2024-01.zip"
        );
        assert_eq!(
            f.daily_url(
                &futures_series(),
                NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()
            ),
            "https://cdn.example/data/futures/um/daily/klines/BTCUSDT/1h/BTCUSDT-1h-2024-01-05.zip"
        );
    }

    #[test]
    fn dialect_detection() {
        assert!(first_token_is_non_numeric("open_time,open,high"));
        assert!(!first_token_is_non_numeric("1704067200000,42000.1"));
    }

    #[test]
    fn parse_headerless_spot_csv() {
        let csv = format!("{}\n{}\n", csv_line(JAN1_MS), csv_line(JAN1_MS + 3_600_000));
        let bars = parse_archive_csv(&csv, &series()).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].timestamp_micros, JAN1_MS * 1_000);
        assert_eq!(bars[0].data_source, DataSource::Bulk);
    }

    #[test]
    fn parse_futures_csv_with_header_and_ignore_column() {
        let header = "open_time,open,high,low,close,volume,close_time,quote_volume,count,taker_buy_volume,taker_buy_quote_volume,ignore";
        let csv = format!("{header}\n{},0\n", csv_line(JAN1_MS));
        let bars = parse_archive_csv(&csv, &futures_series()).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].instrument_type, InstrumentType::FuturesPerp);
    }

    #[test]
    fn truncated_csv_is_malformed() {
        let csv = format!("{}\n1704070800000,42000.1\n", csv_line(JAN1_MS));
        assert!(parse_archive_csv(&csv, &series()).is_err());
    }

    #[test]
    fn months_overlapping_spans_and_excludes_end() {
        let nov = 1_698_796_800_000_000_i64; // 2023-11-01
        let feb = 1_706_745_600_000_000_i64; // 2024-02-01 (exclusive end)
        assert_eq!(
            months_overlapping(nov, feb),
            vec![(2023, 11), (2023, 12), (2024, 1)]
        );
        assert!(months_overlapping(nov, nov).is_empty());
    }

    #[tokio::test]
    async fn fetch_month_happy_path() {
        let server = MockServer::start_async().await;
        let csv = format!("{}\n", csv_line(JAN1_MS));
        let zip_bytes = zip_with_csv("BTCUSDT-1h-2024-01.csv", &csv);
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/spot/monthly/klines/BTCUSDT/1h/BTCUSDT-1h-2024-01.zip");
                then.status(200).body(zip_bytes.clone());
            })
            .await;
        // No checksum file published.
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/spot/monthly/klines/BTCUSDT/1h/BTCUSDT-1h-2024-01.zip.CHECKSUM");
                then.status(404);
            })
            .await;

        let f = fetcher(&server.base_url());
        let bars = f.fetch_month(&series(), 2024, 1).await.unwrap();
        assert_eq!(bars.len(), 1);
        bars[0].validate().unwrap();
    }

    const MONTHLY_PATH: &str = "/spot/monthly/klines/BTCUSDT/1h/BTCUSDT-1h-2024-01.zip";

    #[tokio::test]
    async fn checksum_mismatch_is_archive_corrupt() {
        let server = MockServer::start_async().await;
        let zip_bytes = zip_with_csv("x.csv", &format!("{}\n", csv_line(JAN1_MS)));
        server
            .mock_async(|when, then| {
                when.method(GET).path(format!("{MONTHLY_PATH}.CHECKSUM"));
                then.status(200)
                    .body("deadbeef  BTCUSDT-1h-2024-01.zip\n");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(MONTHLY_PATH);
                then.status(200).body(zip_bytes.clone());
            })
            .await;

        let f = fetcher(&server.base_url());
        let err = f.fetch_month(&series(), 2024, 1).await.unwrap_err();
        assert!(matches!(err, DataError::ArchiveCorrupt(_)));
    }

    #[tokio::test]
    async fn monthly_404_falls_back_to_daily() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(MONTHLY_PATH);
                then.status(404);
            })
            .await;
        // Only Jan 1 exists as a daily archive; the other 30 days 404.
        let zip_bytes = zip_with_csv(
            "BTCUSDT-1h-2024-01-01.csv",
            &format!("{}\n", csv_line(JAN1_MS)),
        );
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/spot/daily/klines/BTCUSDT/1h/BTCUSDT-1h-2024-01-01.zip");
                then.status(200).body(zip_bytes.clone());
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/spot/daily/klines/BTCUSDT/1h/BTCUSDT-1h-2024-01-01.zip.CHECKSUM");
                then.status(404);
            })
            .await;
        for day in 2..=31 {
            server
                .mock_async(move |when, then| {
                    when.method(GET).path(format!(
                        "/spot/daily/klines/BTCUSDT/1h/BTCUSDT-1h-2024-01-{day:02}.zip"
                    ));
                    then.status(404);
                })
                .await;
        }

        let f = fetcher(&server.base_url());
        let bars = f.fetch_month(&series(), 2024, 1).await.unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].timestamp_micros, JAN1_MS * 1_000);
    }

    #[tokio::test]
    async fn corrupt_zip_is_archive_corrupt() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(format!("{MONTHLY_PATH}.CHECKSUM"));
                then.status(404);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(MONTHLY_PATH);
                then.status(200).body(b"this is not a zip".to_vec());
            })
            .await;

        let f = fetcher(&server.base_url());
        let err = f.fetch_month(&series(), 2024, 1).await.unwrap_err();
        assert!(matches!(err, DataError::ArchiveCorrupt(_)));
    }

    #[tokio::test]
    async fn range_fetch_filters_to_half_open_interval() {
        let server = MockServer::start_async().await;
        let csv = format!(
            "{}\n{}\n{}\n",
            csv_line(JAN1_MS),
            csv_line(JAN1_MS + 3_600_000),
            csv_line(JAN1_MS + 7_200_000),
        );
        let zip_bytes = zip_with_csv("m.csv", &csv);
        server
            .mock_async(|when, then| {
                when.method(GET).path(format!("{MONTHLY_PATH}.CHECKSUM"));
                then.status(404);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(MONTHLY_PATH);
                then.status(200).body(zip_bytes.clone());
            })
            .await;

        let f = fetcher(&server.base_url());
        let start = JAN1_MS * 1_000;
        let end = start + 2 * 3_600_000_000; // excludes the third bar
        let bars = f.fetch(&series(), start, end).await.unwrap();
        assert_eq!(bars.len(), 2);
        assert!(bars.windows(2).all(|w| w[0].timestamp_micros < w[1].timestamp_micros));
    }
}
