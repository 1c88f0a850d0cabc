//! Gap detection against the timeframe grid.
//!
//! The expected grid over `[start, end)` is compared with the identities
//! actually present in the store; maximal contiguous runs of missing points
//! collapse into single half-open [`Gap`]s. A fully empty range is itself one
//! gap.

use std::collections::BTreeSet;

use glc_core::{missing_runs, DataError, Gap, SeriesKey};
use glc_db::BarStore;

/// Enumerate the missing bars of `series` over `[start, end)`.
///
/// `start` is rounded up to the grid; `end` is exclusive. The result is
/// sorted and non-overlapping, with adjacent missing points merged.
pub async fn detect_gaps(
    store: &dyn BarStore,
    series: &SeriesKey,
    start_micros: i64,
    end_micros: i64,
) -> Result<Vec<Gap>, DataError> {
    let tf = series.timeframe;
    let present: BTreeSet<i64> = store
        .present_timestamps(series, tf.align_up(start_micros), end_micros)
        .await?
        .into_iter()
        .collect();
    Ok(missing_runs(tf, start_micros, end_micros, &present))
}
