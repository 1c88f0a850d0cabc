//! glc-testkit
//!
//! Offline doubles for scenario tests: an in-memory bar store that mimics
//! the analytic engine's replacing-merge semantics, deterministic bar
//! builders, and a scripted bar source with programmable failures. Nothing
//! here touches the network or the real database.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use glc_core::bar::{Bar, DataSource, InstrumentType, SeriesKey};
use glc_core::{bar_version, DataError, Timeframe};
use glc_db::{BarStore, ReadMode};
use glc_fetch::BarSource;

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

type Identity = (SeriesKey, i64);

/// Keeps every physical copy, exactly like the real engine before a merge;
/// deduplicated reads pick the highest version per identity, ties broken by
/// newest insertion.
#[derive(Default)]
pub struct MemoryBarStore {
    rows: Mutex<BTreeMap<Identity, Vec<Bar>>>,
}

impl MemoryBarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Physical copies currently held (pre-merge view).
    pub fn physical_row_count(&self) -> usize {
        self.rows.lock().unwrap().values().map(Vec::len).sum()
    }

    /// Distinct identities (post-dedup view).
    pub fn logical_row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl BarStore for MemoryBarStore {
    async fn insert(&self, bars: &[Bar]) -> Result<u64, DataError> {
        let mut rows = self.rows.lock().unwrap();
        for bar in bars {
            rows.entry((bar.series_key(), bar.timestamp_micros))
                .or_default()
                .push(bar.clone());
        }
        Ok(bars.len() as u64)
    }

    async fn present_timestamps(
        &self,
        series: &SeriesKey,
        start_micros: i64,
        end_micros: i64,
    ) -> Result<Vec<i64>, DataError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .range((series.clone(), start_micros)..(series.clone(), end_micros))
            .map(|((_, ts), _)| *ts)
            .collect())
    }

    async fn read_bars(
        &self,
        series: &SeriesKey,
        start_micros: i64,
        end_micros: i64,
        mode: ReadMode,
    ) -> Result<Vec<Bar>, DataError> {
        let rows = self.rows.lock().unwrap();
        let mut out = Vec::new();
        for ((_, _), copies) in
            rows.range((series.clone(), start_micros)..(series.clone(), end_micros))
        {
            match mode {
                ReadMode::AllowDuplicates => out.extend(copies.iter().cloned()),
                ReadMode::Deduplicated => {
                    // Highest version wins; on equal versions the newest
                    // insertion (latest copy) replaces the earlier one.
                    let mut winner = &copies[0];
                    for c in &copies[1..] {
                        if c.version >= winner.version {
                            winner = c;
                        }
                    }
                    out.push(winner.clone());
                }
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Bar builders
// ---------------------------------------------------------------------------

/// A valid bar with prices derived deterministically from the timestamp, so
/// re-building the same identity yields byte-identical content (and thus an
/// identical version hash).
pub fn sample_bar(series: &SeriesKey, ts_micros: i64, source: DataSource) -> Bar {
    let step = (ts_micros / 1_000_000 % 97) as i64; // small deterministic wiggle
    let base = 42_000 + step;
    let mut bar = Bar {
        timestamp_micros: ts_micros,
        close_time_micros: series.timeframe.close_time_micros(ts_micros),
        symbol: series.symbol.clone(),
        timeframe: series.timeframe,
        instrument_type: series.instrument_type,
        data_source: source,
        open: base.into(),
        high: (base + 50).into(),
        low: (base - 50).into(),
        close: (base + 25).into(),
        volume: "123.456".parse().unwrap(),
        quote_volume: "5190000.12".parse().unwrap(),
        taker_buy_base: "60.5".parse().unwrap(),
        taker_buy_quote: "2544000".parse().unwrap(),
        number_of_trades: 1_000 + step as u64,
        funding_rate: None,
        version: 0,
    };
    bar.version = bar_version(&bar);
    bar
}

/// Every grid bar of `series` over `[start, end)`.
pub fn sample_bars(
    series: &SeriesKey,
    start_micros: i64,
    end_micros: i64,
    source: DataSource,
) -> Vec<Bar> {
    series
        .timeframe
        .grid(start_micros, end_micros)
        .map(|ts| sample_bar(series, ts, source))
        .collect()
}

/// Convenience: hourly spot BTCUSDT series key.
pub fn btc_hourly() -> SeriesKey {
    SeriesKey::new("BTCUSDT", Timeframe::H1, InstrumentType::Spot)
}

// ---------------------------------------------------------------------------
// Scripted source
// ---------------------------------------------------------------------------

/// A [`BarSource`] serving canned bars, with optional failure windows and a
/// call log for asserting how many upstream requests a flow issued.
pub struct ScriptedSource {
    name: &'static str,
    bars: BTreeMap<i64, Bar>,
    /// Ranges `[start, end)` whose fetches fail with `TransientSource`.
    fail_ranges: Vec<(i64, i64)>,
    calls: Mutex<Vec<(i64, i64)>>,
}

impl ScriptedSource {
    pub fn new(name: &'static str, bars: Vec<Bar>) -> Self {
        Self {
            name,
            bars: bars.into_iter().map(|b| (b.timestamp_micros, b)).collect(),
            fail_ranges: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Any fetch overlapping `[start, end)` fails as transient (after the
    /// real fetcher would have exhausted its retries).
    pub fn failing_for(mut self, start_micros: i64, end_micros: i64) -> Self {
        self.fail_ranges.push((start_micros, end_micros));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<(i64, i64)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BarSource for ScriptedSource {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn fetch(
        &self,
        _series: &SeriesKey,
        start_micros: i64,
        end_micros: i64,
    ) -> Result<Vec<Bar>, DataError> {
        self.calls.lock().unwrap().push((start_micros, end_micros));
        for (fs, fe) in &self.fail_ranges {
            if start_micros < *fe && end_micros > *fs {
                return Err(DataError::TransientSource(format!(
                    "scripted failure for [{fs}, {fe})"
                )));
            }
        }
        Ok(self
            .bars
            .range(start_micros..end_micros)
            .map(|(_, b)| b.clone())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
