//! The five validation layers.
//!
//! 1. **Structure**: column set/ordering/types per the 11-column (spot) or
//!    12-column (futures) upstream contract, or the exported-file layout
//!    (detected by its header); `#`-prefixed comment lines are stripped.
//! 2. **Temporal**: strictly increasing timestamps, no duplicates, grid
//!    alignment; the gap list is computed with the same `missing_runs` the
//!    gap detector uses, so the two always agree. Gaps are reported as
//!    warnings (coverage judges completeness); ordering violations are
//!    errors.
//! 3. **OHLC**: the full row-invariant set.
//! 4. **Coverage**: observed bar count within a configurable band of the
//!    expected grid size. Warnings only.
//! 5. **Anomaly**: IQR outliers on close and volume, and repeated-value
//!    runs covering more than a configurable share of the file. Warnings
//!    only.

use std::collections::BTreeSet;

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use uuid::Uuid;

use glc_core::bar::{Bar, DataSource, InstrumentType, SeriesKey};
use glc_core::missing_runs;
use glc_fetch::kline::{KlineRow, FUTURES_COLUMNS, SPOT_COLUMNS};

use crate::report::{LayerReport, ValidationReport, LAYER_NAMES};

/// How many individual findings a layer lists before summarizing.
const MAX_LISTED: usize = 20;

#[derive(Debug, Clone)]
pub struct Validator {
    /// Coverage band, as fractions of the expected grid size.
    pub coverage_min: f64,
    pub coverage_max: f64,
    /// Repeated-value runs longer than this share of the file are flagged.
    pub repeat_run_fraction: f64,
    pub iqr_multiplier: f64,
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            coverage_min: 0.95,
            coverage_max: 1.05,
            repeat_run_fraction: 0.10,
            iqr_multiplier: 1.5,
        }
    }
}

impl Validator {
    /// Validate a CSV file in the upstream kline layout.
    pub fn validate_csv(
        &self,
        text: &str,
        series: &SeriesKey,
        start_micros: i64,
        end_micros: i64,
    ) -> ValidationReport {
        let (structure, bars) = structure_layer(text, series);
        self.finish(structure, bars, series, start_micros, end_micros)
    }

    /// Validate an in-memory table of bars.
    pub fn validate_bars(
        &self,
        bars: &[Bar],
        series: &SeriesKey,
        start_micros: i64,
        end_micros: i64,
    ) -> ValidationReport {
        let mut structure = LayerReport::new(LAYER_NAMES[0]);
        for (i, bar) in bars.iter().enumerate() {
            if bar.symbol != series.symbol
                || bar.timeframe != series.timeframe
                || bar.instrument_type != series.instrument_type
            {
                push_error(
                    &mut structure,
                    format!("row {i}: series mismatch: {}/{}/{}", bar.symbol, bar.timeframe, bar.instrument_type),
                );
            }
        }
        self.finish(structure, bars.to_vec(), series, start_micros, end_micros)
    }

    fn finish(
        &self,
        structure: LayerReport,
        bars: Vec<Bar>,
        series: &SeriesKey,
        start_micros: i64,
        end_micros: i64,
    ) -> ValidationReport {
        let (temporal, gaps) = temporal_layer(&bars, series, start_micros, end_micros);
        let ohlc = ohlc_layer(&bars);
        let expected_rows = series.timeframe.grid_len(start_micros, end_micros);
        let coverage = self.coverage_layer(bars.len(), expected_rows);
        let anomaly = self.anomaly_layer(&bars);

        ValidationReport {
            run_id: Uuid::new_v4(),
            symbol: series.symbol.clone(),
            timeframe: series.timeframe,
            instrument_type: series.instrument_type,
            created_at_utc: Utc::now().to_rfc3339(),
            total_rows: bars.len(),
            expected_rows,
            gaps,
            layers: vec![structure, temporal, ohlc, coverage, anomaly],
        }
    }

    fn coverage_layer(&self, observed: usize, expected: usize) -> LayerReport {
        let mut layer = LayerReport::new(LAYER_NAMES[3]);
        if expected == 0 {
            return layer;
        }
        let ratio = observed as f64 / expected as f64;
        if ratio < self.coverage_min || ratio > self.coverage_max {
            layer.warnings.push(format!(
                "coverage {observed}/{expected} ({:.1}%) outside [{:.0}%, {:.0}%]",
                ratio * 100.0,
                self.coverage_min * 100.0,
                self.coverage_max * 100.0,
            ));
        }
        layer
    }

    fn anomaly_layer(&self, bars: &[Bar]) -> LayerReport {
        let mut layer = LayerReport::new(LAYER_NAMES[4]);
        if bars.len() < 4 {
            return layer;
        }

        let closes: Vec<f64> = bars.iter().filter_map(|b| b.close.to_f64()).collect();
        let volumes: Vec<f64> = bars.iter().filter_map(|b| b.volume.to_f64()).collect();
        for (name, values) in [("close", &closes), ("volume", &volumes)] {
            let outliers = iqr_outlier_count(values, self.iqr_multiplier);
            if outliers > 0 {
                layer
                    .warnings
                    .push(format!("{outliers} IQR outliers on {name}"));
            }
        }

        let limit = ((bars.len() as f64) * self.repeat_run_fraction).floor() as usize;
        for (name, run) in [
            ("close", longest_equal_run(bars.iter().map(|b| &b.close))),
            ("volume", longest_equal_run(bars.iter().map(|b| &b.volume))),
        ] {
            if run > limit.max(1) {
                layer.warnings.push(format!(
                    "{name} repeats across {run} consecutive bars (> {:.0}% of {})",
                    self.repeat_run_fraction * 100.0,
                    bars.len(),
                ));
            }
        }
        layer
    }
}

// ---------------------------------------------------------------------------
// Layer implementations
// ---------------------------------------------------------------------------

fn push_error(layer: &mut LayerReport, msg: String) {
    if layer.errors.len() < MAX_LISTED {
        layer.errors.push(msg);
    } else if layer.errors.len() == MAX_LISTED {
        layer.errors.push("further findings elided".to_string());
    }
}

fn structure_layer(text: &str, series: &SeriesKey) -> (LayerReport, Vec<Bar>) {
    let mut layer = LayerReport::new(LAYER_NAMES[0]);
    let mut bars = Vec::new();

    // Metadata comment lines are tolerated and stripped before parsing.
    let mut lines = text
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim_start().starts_with('#') && !l.trim().is_empty())
        .peekable();

    // Exported files carry their own header and column set.
    if lines
        .peek()
        .map(|(_, l)| glc_files::is_output_header(l))
        .unwrap_or(false)
    {
        lines.next();
        for (lineno, line) in lines {
            let fields: Vec<&str> = line.split(',').collect();
            match glc_files::parse_record(&fields, lineno + 1) {
                Ok(bar) => {
                    if bar.symbol != series.symbol
                        || bar.timeframe != series.timeframe
                        || bar.instrument_type != series.instrument_type
                    {
                        push_error(
                            &mut layer,
                            format!("line {}: series mismatch", lineno + 1),
                        );
                    } else {
                        bars.push(bar);
                    }
                }
                Err(e) => push_error(&mut layer, format!("line {}: {e}", lineno + 1)),
            }
        }
        return (layer, bars);
    }

    let expected_width = match series.instrument_type {
        InstrumentType::Spot => SPOT_COLUMNS,
        InstrumentType::FuturesPerp => FUTURES_COLUMNS,
    };
    let header_expected = series.instrument_type == InstrumentType::FuturesPerp;

    let has_header = lines
        .peek()
        .map(|(_, l)| {
            let token = l.split(',').next().unwrap_or("").trim();
            token.is_empty() || !token.chars().all(|c| c.is_ascii_digit())
        })
        .unwrap_or(false);
    if has_header != header_expected {
        push_error(
            &mut layer,
            format!(
                "dialect mismatch: header {} but instrument is {}",
                if has_header { "present" } else { "absent" },
                series.instrument_type,
            ),
        );
    }
    if has_header {
        lines.next();
    }

    for (lineno, line) in lines {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != expected_width {
            push_error(
                &mut layer,
                format!(
                    "line {}: expected {expected_width} columns, got {}",
                    lineno + 1,
                    fields.len()
                ),
            );
            continue;
        }
        match KlineRow::from_csv_fields(&fields, lineno + 1)
            .and_then(|row| row.into_bar(series, DataSource::Bulk, None))
        {
            Ok(bar) => bars.push(bar),
            Err(e) => push_error(&mut layer, format!("line {}: {e}", lineno + 1)),
        }
    }

    (layer, bars)
}

fn temporal_layer(
    bars: &[Bar],
    series: &SeriesKey,
    start_micros: i64,
    end_micros: i64,
) -> (LayerReport, Vec<glc_core::Gap>) {
    let mut layer = LayerReport::new(LAYER_NAMES[1]);
    let mut seen: BTreeSet<i64> = BTreeSet::new();

    for (i, bar) in bars.iter().enumerate() {
        if !seen.insert(bar.timestamp_micros) {
            push_error(
                &mut layer,
                format!("row {i}: duplicate timestamp {}", bar.timestamp_micros),
            );
        }
        if !series.timeframe.is_aligned(bar.timestamp_micros) {
            push_error(
                &mut layer,
                format!(
                    "row {i}: timestamp {} not aligned to {} grid",
                    bar.timestamp_micros, series.timeframe
                ),
            );
        }
        if i > 0 && bar.timestamp_micros <= bars[i - 1].timestamp_micros {
            push_error(
                &mut layer,
                format!(
                    "row {i}: timestamp {} not strictly after {}",
                    bar.timestamp_micros,
                    bars[i - 1].timestamp_micros
                ),
            );
        }
    }

    let gaps = missing_runs(series.timeframe, start_micros, end_micros, &seen);
    for gap in &gaps {
        layer.warnings.push(format!(
            "gap {gap} ({} bars missing)",
            gap.bar_count(series.timeframe)
        ));
    }

    (layer, gaps)
}

fn ohlc_layer(bars: &[Bar]) -> LayerReport {
    let mut layer = LayerReport::new(LAYER_NAMES[2]);
    for (i, bar) in bars.iter().enumerate() {
        if let Err(e) = bar.validate() {
            push_error(&mut layer, format!("row {i}: {e}"));
        }
    }
    layer
}

fn iqr_outlier_count(values: &[f64], multiplier: f64) -> usize {
    if values.len() < 4 {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("finite values"));
    let q1 = sorted[sorted.len() / 4];
    let q3 = sorted[(sorted.len() * 3) / 4];
    let iqr = q3 - q1;
    let (lo, hi) = (q1 - multiplier * iqr, q3 + multiplier * iqr);
    values.iter().filter(|v| **v < lo || **v > hi).count()
}

fn longest_equal_run<'a, I, T>(values: I) -> usize
where
    I: Iterator<Item = &'a T>,
    T: PartialEq + 'a,
{
    let mut longest = 0usize;
    let mut current = 0usize;
    let mut prev: Option<&T> = None;
    for v in values {
        current = if prev == Some(v) { current + 1 } else { 1 };
        longest = longest.max(current);
        prev = Some(v);
    }
    longest
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
