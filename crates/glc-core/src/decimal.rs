//! Canonical decimal handling.
//!
//! Prices and volumes stay in `rust_decimal::Decimal` from parse to insert,
//! never through an `f64`, so the version hash (see `version.rs`) is
//! bit-stable across processes and machines.

use rust_decimal::Decimal;

use crate::error::DataError;

/// Canonical textual form used inside the version-hash preimage and in file
/// output: trailing fractional zeros stripped, no exponent, no locale.
///
/// `"1.50000000"` and `"1.5"` render identically; `"42.000"` renders `"42"`.
pub fn canonical(d: &Decimal) -> String {
    d.normalize().to_string()
}

/// Parse upstream decimal text. Rejects empty fields and anything
/// `rust_decimal` cannot represent exactly.
pub fn parse(raw: &str, field: &'static str) -> Result<Decimal, DataError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DataError::MalformedInput(format!("empty decimal field '{field}'")));
    }
    trimmed.parse::<Decimal>().map_err(|e| {
        DataError::MalformedInput(format!("field '{field}': cannot parse decimal '{trimmed}': {e}"))
    })
}
