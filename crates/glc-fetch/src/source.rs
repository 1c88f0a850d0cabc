//! The bar-source capability.

use async_trait::async_trait;

use glc_core::{Bar, DataError, SeriesKey};

/// A surface that can produce authentic bars for a half-open range.
///
/// Implementations must be object-safe: the ingestion planner holds both the
/// archive and REST fetchers as `&dyn BarSource` and selects per range.
#[async_trait]
pub trait BarSource: Send + Sync {
    /// Tag recorded as `data_source` on every bar this surface yields.
    fn name(&self) -> &'static str;

    /// Fetch all bars of `series` whose open timestamp lies in
    /// `[start_micros, end_micros)`. Bars are returned strictly increasing by
    /// timestamp; missing bars are simply absent (never synthesized).
    async fn fetch(
        &self,
        series: &SeriesKey,
        start_micros: i64,
        end_micros: i64,
    ) -> Result<Vec<Bar>, DataError>;
}
