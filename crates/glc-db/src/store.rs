//! The storage capability the ingest layer programs against.

use async_trait::async_trait;

use glc_core::{Bar, DataError, SeriesKey};

/// How a read treats physical duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Observe post-dedup state: one row per identity, highest version wins.
    /// Pays the engine-side merge cost at read time.
    Deduplicated,
    /// Raw physical rows; cheaper, may contain duplicates.
    AllowDuplicates,
}

/// An append-only bar store with replacing-merge semantics on
/// `(symbol, timeframe, instrument_type, timestamp)` keyed by `version`.
#[async_trait]
pub trait BarStore: Send + Sync {
    /// Insert rows. Idempotent under the merge rule; returns rows written.
    async fn insert(&self, bars: &[Bar]) -> Result<u64, DataError>;

    /// Distinct timestamps present for `series` in `[start, end)`, ascending.
    async fn present_timestamps(
        &self,
        series: &SeriesKey,
        start_micros: i64,
        end_micros: i64,
    ) -> Result<Vec<i64>, DataError>;

    /// Read bars of `series` in `[start, end)`, ascending by timestamp.
    async fn read_bars(
        &self,
        series: &SeriesKey,
        start_micros: i64,
        end_micros: i64,
        mode: ReadMode,
    ) -> Result<Vec<Bar>, DataError>;
}
