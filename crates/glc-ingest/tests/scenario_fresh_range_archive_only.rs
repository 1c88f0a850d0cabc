//! A cold query over one archive month: everything arrives from the bulk
//! surface, the REST surface is never touched, and the returned table is
//! gap-free with exactly one row per grid point.

use std::collections::BTreeSet;
use std::sync::Arc;

use glc_core::bar::DataSource;
use glc_core::Timeframe;
use glc_fetch::SymbolRegistry;
use glc_ingest::{MarketDataService, QueryRequest};
use glc_testkit::{btc_hourly, sample_bars, MemoryBarStore, ScriptedSource};
use glc_validate::Validator;

const JAN1: i64 = 1_704_067_200_000_000; // 2024-01-01T00:00:00Z
const FEB1: i64 = 1_706_745_600_000_000; // 2024-02-01T00:00:00Z
const HOUR: i64 = 3_600_000_000;

#[tokio::test]
async fn scenario_fresh_range_archive_only() {
    let series = btc_hourly();
    let store = Arc::new(MemoryBarStore::new());
    let archive = Arc::new(ScriptedSource::new(
        "bulk",
        sample_bars(&series, JAN1, FEB1, DataSource::Bulk),
    ));
    let rest = Arc::new(ScriptedSource::new("rest", vec![]));
    let registry = Arc::new(SymbolRegistry::with_known_symbols(["BTCUSDT"]));
    let svc = MarketDataService::new(store, archive.clone(), rest.clone(), registry, 2);

    let req = QueryRequest::new("BTCUSDT", Timeframe::H1, JAN1, FEB1);
    let rows = svc.query(&req).await.unwrap();

    // 31 days of hourly bars.
    assert_eq!(rows.len(), 744);
    assert_eq!(rows[0].timestamp_micros, JAN1);
    assert_eq!(rows[743].timestamp_micros, FEB1 - HOUR); // 2024-01-31T23:00Z

    // No duplicates, strict order, all from the bulk surface.
    let unique: BTreeSet<i64> = rows.iter().map(|b| b.timestamp_micros).collect();
    assert_eq!(unique.len(), 744);
    assert!(rows.windows(2).all(|w| w[0].timestamp_micros < w[1].timestamp_micros));
    assert!(rows.iter().all(|b| b.data_source == DataSource::Bulk));

    // One archive fetch, zero REST requests.
    assert_eq!(archive.call_count(), 1);
    assert_eq!(rest.call_count(), 0);

    // Layers 1-3 of the validator pass on the returned table.
    let report = Validator::default().validate_bars(&rows, &series, JAN1, FEB1);
    assert!(report.passed(), "layers: {:?}", report.layers);
    assert!(report.gaps.is_empty());
}
