//! Validation report model.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use glc_core::bar::{InstrumentType, SeriesKey};
use glc_core::{Gap, Timeframe};

pub const LAYER_NAMES: [&str; 5] = ["structure", "temporal", "ohlc", "coverage", "anomaly"];

/// Findings of one layer. Errors make the run fail (layers 1–3 only produce
/// errors); warnings never do.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayerReport {
    pub name: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl LayerReport {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub run_id: Uuid,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub instrument_type: InstrumentType,
    pub created_at_utc: String,
    pub total_rows: usize,
    /// Expected grid size of the validated range.
    pub expected_rows: usize,
    /// Same algorithm and output as the gap detector.
    pub gaps: Vec<Gap>,
    pub layers: Vec<LayerReport>,
}

impl ValidationReport {
    pub fn series_key(&self) -> SeriesKey {
        SeriesKey::new(self.symbol.clone(), self.timeframe, self.instrument_type)
    }

    /// PASS iff structure, temporal and OHLC found no errors.
    pub fn passed(&self) -> bool {
        self.layers.iter().take(3).all(LayerReport::is_clean)
    }

    pub fn layer(&self, name: &str) -> Option<&LayerReport> {
        self.layers.iter().find(|l| l.name == name)
    }
}
