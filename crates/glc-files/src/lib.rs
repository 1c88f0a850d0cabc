//! glc-files
//!
//! The file delivery surface: atomic writes (temp file + checksum + rename)
//! and the CSV/Parquet output contracts. A crash at any instant leaves the
//! previous file or no file, never a truncated one.

pub mod atomic;
pub mod csv_out;
#[cfg(feature = "parquet")]
pub mod parquet_out;

pub use atomic::write_atomic;
pub use csv_out::{is_output_header, parse_csv, parse_record, render_csv, FileMeta};
