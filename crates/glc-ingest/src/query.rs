//! Unified query with lazy auto-ingest.
//!
//! Per `(symbol, timeframe, instrument_type)` the flow is:
//!
//! 1. detect gaps;
//! 2. if gaps and `auto_ingest`: plan and run the ingestion (archive months,
//!    REST residuals);
//! 3. re-detect;
//! 4. if gaps and `fill_gaps`: run the gap filler;
//! 5. read with the deduplicating mode and return.
//!
//! When both `auto_ingest` and `fill_gaps` were requested, residual gaps
//! after step 4 raise `UnfillableGap` enumerating them; incomplete data is
//! never returned silently. Multi-symbol calls apply the flow over the
//! sorted symbol list.

use std::sync::Arc;

use tracing::{info, warn};

use glc_core::bar::InstrumentType;
use glc_core::{Bar, DataError, SeriesKey, Timeframe};
use glc_db::{BarStore, Loader, ReadMode};
use glc_fetch::{BarSource, SymbolRegistry};

use crate::filler::GapFiller;
use crate::gaps::detect_gaps;
use crate::planner::{plan_ingestion, PlanStep, SourceKind};

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub symbols: Vec<String>,
    pub timeframe: Timeframe,
    pub instrument_type: InstrumentType,
    pub start_micros: i64,
    pub end_micros: i64,
    pub auto_ingest: bool,
    pub fill_gaps: bool,
}

impl QueryRequest {
    pub fn new<S: Into<String>>(
        symbol: S,
        timeframe: Timeframe,
        start_micros: i64,
        end_micros: i64,
    ) -> Self {
        Self {
            symbols: vec![symbol.into()],
            timeframe,
            instrument_type: InstrumentType::Spot,
            start_micros,
            end_micros,
            auto_ingest: true,
            fill_gaps: true,
        }
    }

    pub fn with_symbols(mut self, symbols: Vec<String>) -> Self {
        self.symbols = symbols;
        self
    }

    pub fn with_instrument(mut self, instrument_type: InstrumentType) -> Self {
        self.instrument_type = instrument_type;
        self
    }

    pub fn with_auto_ingest(mut self, auto_ingest: bool) -> Self {
        self.auto_ingest = auto_ingest;
        self
    }

    pub fn with_fill_gaps(mut self, fill_gaps: bool) -> Self {
        self.fill_gaps = fill_gaps;
        self
    }
}

pub struct MarketDataService {
    store: Arc<dyn BarStore>,
    archive: Arc<dyn BarSource>,
    rest: Arc<dyn BarSource>,
    registry: Arc<SymbolRegistry>,
    loader: Arc<Loader>,
    gap_workers: usize,
}

impl MarketDataService {
    pub fn new(
        store: Arc<dyn BarStore>,
        archive: Arc<dyn BarSource>,
        rest: Arc<dyn BarSource>,
        registry: Arc<SymbolRegistry>,
        gap_workers: usize,
    ) -> Self {
        let loader = Arc::new(Loader::new(store.clone()));
        Self {
            store,
            archive,
            rest,
            registry,
            loader,
            gap_workers,
        }
    }

    /// The public contract: gap-free rows for the requested range, ingesting
    /// lazily as needed.
    pub async fn query(&self, req: &QueryRequest) -> Result<Vec<Bar>, DataError> {
        if req.start_micros >= req.end_micros {
            return Err(DataError::Config(format!(
                "empty query range [{}, {})",
                req.start_micros, req.end_micros
            )));
        }

        let mut symbols = req.symbols.clone();
        symbols.sort_unstable();
        symbols.dedup();

        // Validate every symbol before any data I/O for any of them.
        let series_list: Vec<SeriesKey> = symbols
            .iter()
            .map(|s| SeriesKey::new(s.clone(), req.timeframe, req.instrument_type))
            .collect();
        for series in &series_list {
            self.registry.ensure_known(series).await?;
        }

        let mut out = Vec::new();
        for series in &series_list {
            out.extend(self.query_series(series, req).await?);
        }
        Ok(out)
    }

    async fn query_series(
        &self,
        series: &SeriesKey,
        req: &QueryRequest,
    ) -> Result<Vec<Bar>, DataError> {
        let (start, end) = (req.start_micros, req.end_micros);

        let gaps = detect_gaps(self.store.as_ref(), series, start, end).await?;
        if !gaps.is_empty() && req.auto_ingest {
            info!(%series, gaps = gaps.len(), "auto-ingest plan starting");
            self.run_plan(series, plan_ingestion(&gaps)).await?;
        }

        let gaps = detect_gaps(self.store.as_ref(), series, start, end).await?;
        if !gaps.is_empty() && req.fill_gaps {
            let filler = GapFiller::new(
                Arc::clone(&self.rest),
                Arc::clone(&self.loader),
                self.gap_workers,
            );
            filler.fill(series, &gaps).await?;
        }

        let residual = detect_gaps(self.store.as_ref(), series, start, end).await?;
        if !residual.is_empty() && req.auto_ingest && req.fill_gaps {
            return Err(DataError::UnfillableGap {
                series: series.clone(),
                gaps: residual,
            });
        }

        self.store
            .read_bars(series, start, end, ReadMode::Deduplicated)
            .await
    }

    async fn run_plan(&self, series: &SeriesKey, steps: Vec<PlanStep>) -> Result<(), DataError> {
        for step in steps {
            let source: &dyn BarSource = match step.source {
                SourceKind::Archive => self.archive.as_ref(),
                SourceKind::Rest => self.rest.as_ref(),
            };
            match source.fetch(series, step.start_micros, step.end_micros).await {
                Ok(bars) => {
                    self.loader.load(&bars).await?;
                }
                // A damaged archive month is treated as archive-absent; the
                // residual re-detect sends it to the REST filler.
                Err(DataError::ArchiveCorrupt(msg)) => {
                    warn!(%series, %msg, "archive step skipped as corrupt");
                }
                // Transient exhaustion on a plan step likewise leaves a gap
                // for the filler rather than aborting the whole query.
                Err(DataError::TransientSource(msg)) => {
                    warn!(%series, %msg, "plan step left unfilled after retries");
                }
                Err(other) => return Err(other),
            }
        }
        Ok(())
    }
}
