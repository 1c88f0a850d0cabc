//! Deterministic dedup under rewrite: ingesting the same CSV twice, the
//! second time tagged as coming from the other source, changes neither the
//! post-dedup row count nor any version value.

use std::sync::Arc;

use glc_core::bar::DataSource;
use glc_db::{BarStore, Loader, ReadMode};
use glc_fetch::archive::parse_archive_csv;
use glc_testkit::{btc_hourly, MemoryBarStore};

const JAN1_MS: i64 = 1_704_067_200_000;
const HOUR_MS: i64 = 3_600_000;

fn thousand_bar_csv() -> String {
    let mut csv = String::new();
    for i in 0..1_000i64 {
        let open_ms = JAN1_MS + i * HOUR_MS;
        // Prices vary per row so the file is not a degenerate constant.
        let p = 42_000 + (i % 251);
        csv.push_str(&format!(
            "{open_ms},{p}.1,{}.5,{}.0,{p}.25,123.456,{},5190000.12,9876,60.5,2544000\n",
            p + 100,
            p - 100,
            open_ms + HOUR_MS - 1,
        ));
    }
    csv
}

#[tokio::test]
async fn scenario_dedup_under_rewrite() {
    let series = btc_hourly();
    let csv = thousand_bar_csv();

    let store = Arc::new(MemoryBarStore::new());
    let loader = Loader::new(store.clone());

    // First ingestion: archive bytes.
    let first = parse_archive_csv(&csv, &series).unwrap();
    assert_eq!(first.len(), 1_000);
    loader.load(&first).await.unwrap();
    assert_eq!(store.logical_row_count(), 1_000);

    let versions_before: Vec<u64> = first.iter().map(|b| b.version).collect();

    // Second ingestion: byte-identical content, different source tag.
    let mut second = parse_archive_csv(&csv, &series).unwrap();
    for bar in &mut second {
        bar.data_source = DataSource::Rest;
    }
    loader.load(&second).await.unwrap();

    // Physical copies doubled; logical view unchanged.
    assert_eq!(store.physical_row_count(), 2_000);
    assert_eq!(store.logical_row_count(), 1_000);

    let read = store
        .read_bars(
            &series,
            JAN1_MS * 1_000,
            (JAN1_MS + 1_000 * HOUR_MS) * 1_000,
            ReadMode::Deduplicated,
        )
        .await
        .unwrap();
    assert_eq!(read.len(), 1_000);

    // Version values are bit-identical across the rewrite.
    let versions_after: Vec<u64> = read.iter().map(|b| b.version).collect();
    assert_eq!(versions_before, versions_after);
}
