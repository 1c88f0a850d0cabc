//! Gap filling through the REST surface.
//!
//! Gaps fill in parallel on a bounded pool, but each gap is fetched
//! sequentially window-by-window to preserve chunk ordering. Bars flow to
//! the loader through a bounded channel so the loader's batch timing
//! back-pressures the fetch; one gap may be arbitrarily large and must not
//! buffer unbounded in memory.
//!
//! A `TransientSource` failure marks its gap as unfilled and is surfaced in
//! the report, never swallowed as success. Any other error aborts the fill.

use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use glc_core::{Bar, DataError, Gap, SeriesKey};
use glc_db::Loader;
use glc_fetch::BarSource;

/// Channel depth between fetch and load; two windows in flight is enough to
/// overlap network and insert latency.
const PIPELINE_DEPTH: usize = 2;

#[derive(Debug, Default)]
pub struct FillReport {
    pub bars_written: u64,
    /// Gaps that could not be filled, with the transient failure message.
    pub unfilled: Vec<(Gap, String)>,
}

impl FillReport {
    pub fn unfilled_gaps(&self) -> Vec<Gap> {
        self.unfilled.iter().map(|(g, _)| *g).collect()
    }
}

pub struct GapFiller {
    rest: Arc<dyn BarSource>,
    loader: Arc<Loader>,
    workers: usize,
}

impl GapFiller {
    pub fn new(rest: Arc<dyn BarSource>, loader: Arc<Loader>, workers: usize) -> Self {
        Self {
            rest,
            loader,
            workers: workers.max(1),
        }
    }

    /// Fill `gaps` for `series`. Transient failures are reported per gap;
    /// everything else propagates.
    pub async fn fill(&self, series: &SeriesKey, gaps: &[Gap]) -> Result<FillReport, DataError> {
        let results: Vec<(Gap, Result<u64, DataError>)> = stream::iter(gaps.iter().copied())
            .map(|gap| async move { (gap, self.fill_one(series, gap).await) })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        let mut report = FillReport::default();
        for (gap, result) in results {
            match result {
                Ok(written) => {
                    info!(%series, %gap, written, "gap filled");
                    report.bars_written += written;
                }
                Err(DataError::TransientSource(msg)) => {
                    warn!(%series, %gap, %msg, "gap left unfilled after retries");
                    report.unfilled.push((gap, msg));
                }
                Err(other) => return Err(other),
            }
        }
        Ok(report)
    }

    /// Fetch one gap sequentially in chunk-sized windows, streaming each
    /// window to the loader through a bounded channel.
    async fn fill_one(&self, series: &SeriesKey, gap: Gap) -> Result<u64, DataError> {
        let windows = fetch_windows(series, gap);
        let (tx, mut rx) = mpsc::channel::<Vec<Bar>>(PIPELINE_DEPTH);

        let producer = {
            let rest = Arc::clone(&self.rest);
            let series = series.clone();
            async move {
                for (ws, we) in windows {
                    let bars = rest.fetch(&series, ws, we).await?;
                    if bars.is_empty() {
                        continue;
                    }
                    if tx.send(bars).await.is_err() {
                        // Consumer failed; its error is the one that matters.
                        break;
                    }
                }
                Ok::<(), DataError>(())
            }
        };

        let consumer = {
            let loader = Arc::clone(&self.loader);
            async move {
                let mut written = 0u64;
                while let Some(batch) = rx.recv().await {
                    written += loader.load(&batch).await?;
                }
                Ok::<u64, DataError>(written)
            }
        };

        let (produced, consumed) = tokio::join!(producer, consumer);
        let written = consumed?;
        produced?;
        Ok(written)
    }
}

/// Split a gap's grid into windows of at most the instrument's REST chunk
/// limit, each window a half-open `[start, end)`.
fn fetch_windows(series: &SeriesKey, gap: Gap) -> Vec<(i64, i64)> {
    let points: Vec<i64> = series
        .timeframe
        .grid(gap.start_micros, gap.end_micros)
        .collect();
    points
        .chunks(series.instrument_type.rest_chunk_limit())
        .map(|chunk| {
            let first = chunk[0];
            let last = *chunk.last().expect("chunks are non-empty");
            (first, series.timeframe.next(last))
        })
        .collect()
}
