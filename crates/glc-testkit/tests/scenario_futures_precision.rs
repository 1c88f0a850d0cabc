//! Mixed-precision ingestion: a 2025 spot archive already in microseconds
//! and a futures archive still in milliseconds land on the same microsecond
//! grid; no timestamp off by a factor of 1000.

use std::sync::Arc;

use glc_core::bar::{InstrumentType, SeriesKey};
use glc_core::Timeframe;
use glc_db::{BarStore, Loader, ReadMode};
use glc_fetch::archive::parse_archive_csv;
use glc_testkit::MemoryBarStore;

const JAN1_2025_MS: i64 = 1_735_689_600_000; // 2025-01-01T00:00:00Z
const HOUR_MS: i64 = 3_600_000;
const HOURS: i64 = 31 * 24; // one archive month

fn spot_csv_micros() -> String {
    // Microsecond-precision source (post-switch spot format), headerless.
    let mut csv = String::new();
    for i in 0..HOURS {
        let open_us = (JAN1_2025_MS + i * HOUR_MS) * 1_000;
        csv.push_str(&format!(
            "{open_us},42000.1,42100.5,41900,42050.25,123.456,{},5190000.12,9876,60.5,2544000\n",
            open_us + (HOUR_MS * 1_000) - 1,
        ));
    }
    csv
}

fn futures_csv_millis() -> String {
    // Millisecond-precision source, header row plus trailing ignore column.
    let mut csv = String::from(
        "open_time,open,high,low,close,volume,close_time,quote_volume,count,taker_buy_volume,taker_buy_quote_volume,ignore\n",
    );
    for i in 0..HOURS {
        let open_ms = JAN1_2025_MS + i * HOUR_MS;
        csv.push_str(&format!(
            "{open_ms},42000.1,42100.5,41900,42050.25,123.456,{},5190000.12,9876,60.5,2544000,0\n",
            open_ms + HOUR_MS - 1,
        ));
    }
    csv
}

#[tokio::test]
async fn scenario_futures_precision() {
    let spot = SeriesKey::new("BTCUSDT", Timeframe::H1, InstrumentType::Spot);
    let futures = SeriesKey::new("BTCUSDT", Timeframe::H1, InstrumentType::FuturesPerp);

    let store = Arc::new(MemoryBarStore::new());
    let loader = Loader::new(store.clone());

    let spot_bars = parse_archive_csv(&spot_csv_micros(), &spot).unwrap();
    let fut_bars = parse_archive_csv(&futures_csv_millis(), &futures).unwrap();
    assert_eq!(spot_bars.len(), HOURS as usize);
    assert_eq!(fut_bars.len(), HOURS as usize);
    loader.load(&spot_bars).await.unwrap();
    loader.load(&fut_bars).await.unwrap();

    let start_us = JAN1_2025_MS * 1_000;
    let end_us = (JAN1_2025_MS + HOURS * HOUR_MS) * 1_000;

    let spot_read = store
        .read_bars(&spot, start_us, end_us, ReadMode::Deduplicated)
        .await
        .unwrap();
    let fut_read = store
        .read_bars(&futures, start_us, end_us, ReadMode::Deduplicated)
        .await
        .unwrap();

    assert_eq!(spot_read.len(), HOURS as usize);
    assert_eq!(fut_read.len(), HOURS as usize);

    for (s, f) in spot_read.iter().zip(fut_read.iter()) {
        // Both series land on the identical microsecond grid point.
        assert_eq!(s.timestamp_micros, f.timestamp_micros);
        assert!(Timeframe::H1.is_aligned(s.timestamp_micros));
        // Nothing is off by 1000x in either direction.
        assert!(s.timestamp_micros >= start_us && s.timestamp_micros < end_us);
    }
}
