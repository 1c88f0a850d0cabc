//! Error taxonomy for the whole pipeline.
//!
//! Each kind is a distinct variant, never merged: callers pattern-match to
//! pick recovery policy (retry, archive→daily→REST fallback) and the CLI maps
//! variants to exit statuses. No variant is ever downgraded to a log line,
//! and no code path substitutes synthetic data for a failed fetch.

use std::fmt;

use crate::bar::{Bar, SeriesKey};
use crate::gap::Gap;

#[derive(Debug, Clone)]
pub enum DataError {
    /// Missing or invalid configuration. Surfaced at startup, fatal.
    Config(String),
    /// Live database schema differs from the expected contract. Fatal, never
    /// recovered.
    SchemaMismatch(String),
    /// A CSV or JSON row could not be parsed. Aborts the batch.
    MalformedInput(String),
    /// Truncated ZIP or checksum failure; the affected archive is treated as
    /// absent and the REST fallback is tried.
    ArchiveCorrupt(String),
    /// Upstream 4xx other than 404/418/429. Terminal for the request.
    SourceRejected { status: u16, message: String },
    /// Retries exhausted on 5xx / timeout / 418 / 429.
    TransientSource(String),
    /// Residual gaps after ingestion and filling, when the caller required
    /// zero gaps.
    UnfillableGap { series: SeriesKey, gaps: Vec<Gap> },
    /// OHLC or volume inequality violated. Always a bug; carries the row.
    InvariantViolation { detail: String, bar: Box<Bar> },
}

impl DataError {
    /// Exit status contract for command wrappers:
    /// 0 success, 1 bar-level validation failure, 2 network/transient
    /// exhausted, 3 schema mismatch, 4 configuration error.
    pub fn exit_code(&self) -> i32 {
        match self {
            DataError::MalformedInput(_) | DataError::InvariantViolation { .. } => 1,
            DataError::ArchiveCorrupt(_)
            | DataError::SourceRejected { .. }
            | DataError::TransientSource(_)
            | DataError::UnfillableGap { .. } => 2,
            DataError::SchemaMismatch(_) => 3,
            DataError::Config(_) => 4,
        }
    }
}

impl fmt::Display for DataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataError::Config(msg) => write!(f, "config error: {msg}"),
            DataError::SchemaMismatch(msg) => write!(f, "schema mismatch: {msg}"),
            DataError::MalformedInput(msg) => write!(f, "malformed input: {msg}"),
            DataError::ArchiveCorrupt(msg) => write!(f, "archive corrupt: {msg}"),
            DataError::SourceRejected { status, message } => {
                write!(f, "source rejected request (http {status}): {message}")
            }
            DataError::TransientSource(msg) => {
                write!(f, "transient source failure, retries exhausted: {msg}")
            }
            DataError::UnfillableGap { series, gaps } => {
                write!(f, "unfillable gaps for {series}: ")?;
                for (i, g) in gaps.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{g}")?;
                }
                Ok(())
            }
            DataError::InvariantViolation { detail, bar } => {
                write!(
                    f,
                    "invariant violation: {detail} (row {}/{} @ {})",
                    bar.symbol, bar.timeframe, bar.timestamp_micros
                )
            }
        }
    }
}

impl std::error::Error for DataError {}
