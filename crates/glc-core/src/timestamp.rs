//! Timestamp precision coercion.
//!
//! The upstream provider switched spot archives from millisecond to
//! microsecond precision while futures stayed in milliseconds; the REST
//! surface is milliseconds everywhere. Magnitude disambiguates: anything
//! above `10^15` is already microseconds, everything else is milliseconds.

use crate::error::DataError;

/// 2017-01-01T00:00:00Z in microseconds. No supported market predates this;
/// smaller normalized values are malformed input, not old data.
pub const EPOCH_FLOOR_MICROS: i64 = 1_483_228_800_000_000;

const MICROS_THRESHOLD: i64 = 1_000_000_000_000_000; // 10^15

/// Normalize a raw upstream timestamp to microseconds.
pub fn normalize_to_micros(raw: i64) -> Result<i64, DataError> {
    let micros = if raw > MICROS_THRESHOLD {
        raw
    } else {
        raw.checked_mul(1_000).ok_or_else(|| {
            DataError::MalformedInput(format!("timestamp overflow: {raw}"))
        })?
    };
    if micros < EPOCH_FLOOR_MICROS {
        return Err(DataError::MalformedInput(format!(
            "timestamp {raw} normalizes to {micros}us, below the epoch floor"
        )));
    }
    Ok(micros)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_and_micros_converge() {
        // Spec property 6: both precisions of the same instant store equal.
        let ms = 1_704_067_200_000_i64;
        let us = 1_704_067_200_000_000_i64;
        assert_eq!(normalize_to_micros(ms).unwrap(), us);
        assert_eq!(normalize_to_micros(us).unwrap(), us);
    }

    #[test]
    fn micros_pass_through_unchanged() {
        let us = 1_735_689_600_123_456_i64; // 2025-01-01 with sub-ms detail
        assert_eq!(normalize_to_micros(us).unwrap(), us);
    }

    #[test]
    fn below_floor_is_malformed() {
        // 1970-era value in either precision.
        assert!(matches!(
            normalize_to_micros(1_000_000),
            Err(DataError::MalformedInput(_))
        ));
        // 2016 in milliseconds: normalizes below floor.
        assert!(normalize_to_micros(1_451_606_400_000).is_err());
    }

    #[test]
    fn floor_boundary_is_accepted() {
        assert_eq!(
            normalize_to_micros(EPOCH_FLOOR_MICROS / 1_000).unwrap(),
            EPOCH_FLOOR_MICROS
        );
    }
}
