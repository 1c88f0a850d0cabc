//! glc-core
//!
//! Domain types and pure algorithms shared by every other crate:
//! bar model, timeframe grid arithmetic, timestamp precision coercion,
//! the deterministic row-version hash, and the error taxonomy.
//!
//! This crate performs **no I/O**: no HTTP, no database, no filesystem.
//! Everything here is deterministic and unit-testable offline.

pub mod bar;
pub mod decimal;
pub mod error;
pub mod gap;
pub mod timeframe;
pub mod timestamp;
pub mod version;

pub use bar::{Bar, DataSource, InstrumentType, SeriesKey};
pub use rust_decimal::Decimal;
pub use error::DataError;
pub use gap::{missing_runs, Gap};
pub use timeframe::Timeframe;
pub use timestamp::{normalize_to_micros, EPOCH_FLOOR_MICROS};
pub use version::bar_version;
