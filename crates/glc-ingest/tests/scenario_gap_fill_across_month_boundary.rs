//! Gap filling across a month boundary: two missing bars at the start of
//! February arrive via REST, and a second identical query issues zero
//! further upstream requests.

use std::sync::Arc;

use glc_core::bar::DataSource;
use glc_core::Timeframe;
use glc_db::BarStore;
use glc_fetch::SymbolRegistry;
use glc_ingest::{MarketDataService, QueryRequest};
use glc_testkit::{btc_hourly, sample_bar, sample_bars, MemoryBarStore, ScriptedSource};

const FEB1: i64 = 1_706_745_600_000_000; // 2024-02-01T00:00:00Z
const HOUR: i64 = 3_600_000_000;

#[tokio::test]
async fn scenario_gap_fill_across_month_boundary() {
    let series = btc_hourly();
    let store = Arc::new(MemoryBarStore::new());

    // Pre-load 2024-01-31T20:00..23:00 and 2024-02-01T02:00..05:00.
    for h in 0..4 {
        store
            .insert(&[sample_bar(&series, FEB1 - (4 - h) * HOUR, DataSource::Bulk)])
            .await
            .unwrap();
        store
            .insert(&[sample_bar(&series, FEB1 + (2 + h) * HOUR, DataSource::Bulk)])
            .await
            .unwrap();
    }

    // REST can serve the whole window; only the two missing bars should be
    // requested.
    let rest = Arc::new(ScriptedSource::new(
        "rest",
        sample_bars(&series, FEB1 - 4 * HOUR, FEB1 + 6 * HOUR, DataSource::Rest),
    ));
    let archive = Arc::new(ScriptedSource::new("bulk", vec![]));
    let registry = Arc::new(SymbolRegistry::with_known_symbols(["BTCUSDT"]));
    let svc = MarketDataService::new(store.clone(), archive.clone(), rest.clone(), registry, 2);

    let req = QueryRequest::new("BTCUSDT", Timeframe::H1, FEB1 - 4 * HOUR, FEB1 + 6 * HOUR);
    let rows = svc.query(&req).await.unwrap();

    assert_eq!(rows.len(), 10);
    // Exactly one row per grid point, in order.
    for (i, bar) in rows.iter().enumerate() {
        assert_eq!(bar.timestamp_micros, FEB1 - 4 * HOUR + i as i64 * HOUR);
    }

    // The fill touched REST only for the missing [00:00, 02:00) run.
    assert_eq!(archive.call_count(), 0);
    let calls = rest.calls();
    assert_eq!(calls, vec![(FEB1, FEB1 + 2 * HOUR)]);

    // A second identical query is fully warm: zero further REST requests.
    let again = svc.query(&req).await.unwrap();
    assert_eq!(again.len(), 10);
    assert_eq!(rest.call_count(), 1);
    assert_eq!(archive.call_count(), 0);
}
