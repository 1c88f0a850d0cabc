//! Timeframe enumeration and grid arithmetic.
//!
//! Every timeframe except `1mo` has a fixed duration and its grid is the set
//! of instants `offset + k·Δ` (microseconds, UTC). The offset is zero for all
//! fixed timeframes except `1w`, whose bars open on Monday 00:00 UTC: the
//! Unix epoch fell on a Thursday, so the weekly grid is shifted by four days.
//!
//! `1mo` follows calendar months: grid points are the first microsecond of a
//! UTC calendar month, and stepping forward adds one calendar month whatever
//! its day count.

use chrono::{DateTime, Datelike, TimeZone, Utc};

use crate::error::DataError;

pub const MICROS_PER_SEC: i64 = 1_000_000;

/// Monday 1970-01-05 00:00:00 UTC, in microseconds.
const WEEK_GRID_OFFSET_MICROS: i64 = 4 * 86_400 * MICROS_PER_SEC;

/// Supported bar intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1s")]
    S1,
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "3m")]
    M3,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "6h")]
    H6,
    #[serde(rename = "8h")]
    H8,
    #[serde(rename = "12h")]
    H12,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "3d")]
    D3,
    #[serde(rename = "1w")]
    W1,
    #[serde(rename = "1mo")]
    Mo1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 16] = [
        Timeframe::S1,
        Timeframe::M1,
        Timeframe::M3,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H2,
        Timeframe::H4,
        Timeframe::H6,
        Timeframe::H8,
        Timeframe::H12,
        Timeframe::D1,
        Timeframe::D3,
        Timeframe::W1,
        Timeframe::Mo1,
    ];

    /// Canonical string, used in archive URLs, file names and the version hash.
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::S1 => "1s",
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H4 => "4h",
            Timeframe::H6 => "6h",
            Timeframe::H8 => "8h",
            Timeframe::H12 => "12h",
            Timeframe::D1 => "1d",
            Timeframe::D3 => "3d",
            Timeframe::W1 => "1w",
            Timeframe::Mo1 => "1mo",
        }
    }

    /// Interval string understood by the REST klines endpoint.
    ///
    /// Identical to [`Self::as_str`] except the monthly interval, which the
    /// REST surface spells `1M`.
    pub fn rest_interval(&self) -> &'static str {
        match self {
            Timeframe::Mo1 => "1M",
            other => other.as_str(),
        }
    }

    pub fn parse(s: &str) -> Result<Self, DataError> {
        let canon = s.trim().to_ascii_lowercase();
        for tf in Timeframe::ALL {
            if canon == tf.as_str() {
                return Ok(tf);
            }
        }
        // REST spelling of the monthly interval.
        if s.trim() == "1M" {
            return Ok(Timeframe::Mo1);
        }
        Err(DataError::Config(format!(
            "invalid timeframe '{s}'. expected one of: 1s 1m 3m 5m 15m 30m 1h 2h 4h 6h 8h 12h 1d 3d 1w 1mo"
        )))
    }

    /// Fixed duration in microseconds, or `None` for the calendar-month grid.
    pub fn fixed_duration_micros(&self) -> Option<i64> {
        let secs = match self {
            Timeframe::S1 => 1,
            Timeframe::M1 => 60,
            Timeframe::M3 => 180,
            Timeframe::M5 => 300,
            Timeframe::M15 => 900,
            Timeframe::M30 => 1_800,
            Timeframe::H1 => 3_600,
            Timeframe::H2 => 7_200,
            Timeframe::H4 => 14_400,
            Timeframe::H6 => 21_600,
            Timeframe::H8 => 28_800,
            Timeframe::H12 => 43_200,
            Timeframe::D1 => 86_400,
            Timeframe::D3 => 259_200,
            Timeframe::W1 => 604_800,
            Timeframe::Mo1 => return None,
        };
        Some(secs * MICROS_PER_SEC)
    }

    fn grid_offset_micros(&self) -> i64 {
        match self {
            Timeframe::W1 => WEEK_GRID_OFFSET_MICROS,
            _ => 0,
        }
    }

    /// Largest grid point `<= ts`.
    pub fn align_down(&self, ts_micros: i64) -> i64 {
        match self.fixed_duration_micros() {
            Some(d) => {
                let off = self.grid_offset_micros();
                ts_micros - (ts_micros - off).rem_euclid(d)
            }
            None => month_floor_micros(ts_micros),
        }
    }

    /// Smallest grid point `>= ts`.
    pub fn align_up(&self, ts_micros: i64) -> i64 {
        let down = self.align_down(ts_micros);
        if down == ts_micros {
            ts_micros
        } else {
            self.next(down)
        }
    }

    /// The grid point following `aligned_ts` (which must itself be aligned).
    pub fn next(&self, aligned_ts: i64) -> i64 {
        match self.fixed_duration_micros() {
            Some(d) => aligned_ts + d,
            None => next_month_micros(aligned_ts),
        }
    }

    /// Whether `ts` lies exactly on this timeframe's grid.
    pub fn is_aligned(&self, ts_micros: i64) -> bool {
        self.align_down(ts_micros) == ts_micros
    }

    /// Close time of the bar opening at `open_ts`: one microsecond before the
    /// next grid point.
    pub fn close_time_micros(&self, open_ts: i64) -> i64 {
        self.next(self.align_down(open_ts)) - 1
    }

    /// Iterate the grid points of `[start, end)`, rounding `start` up to the
    /// grid and treating `end` as exclusive.
    pub fn grid(&self, start_micros: i64, end_micros: i64) -> GridIter {
        GridIter {
            tf: *self,
            cursor: self.align_up(start_micros),
            end: end_micros,
        }
    }

    /// Number of grid points in `[start, end)`.
    pub fn grid_len(&self, start_micros: i64, end_micros: i64) -> usize {
        match self.fixed_duration_micros() {
            Some(d) => {
                let first = self.align_up(start_micros);
                if first >= end_micros {
                    0
                } else {
                    ((end_micros - first - 1) / d + 1) as usize
                }
            }
            None => self.grid(start_micros, end_micros).count(),
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Iterator over timeframe grid points, end-exclusive.
#[derive(Debug, Clone)]
pub struct GridIter {
    tf: Timeframe,
    cursor: i64,
    end: i64,
}

impl Iterator for GridIter {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        if self.cursor >= self.end {
            return None;
        }
        let out = self.cursor;
        self.cursor = self.tf.next(out);
        Some(out)
    }
}

// ---------------------------------------------------------------------------
// Calendar-month helpers
// ---------------------------------------------------------------------------

fn utc_from_micros(ts_micros: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_micros(ts_micros)
        .expect("timestamp out of chrono range")
}

/// First microsecond of the UTC calendar month containing `ts`.
fn month_floor_micros(ts_micros: i64) -> i64 {
    let dt = utc_from_micros(ts_micros);
    Utc.with_ymd_and_hms(dt.year(), dt.month(), 1, 0, 0, 0)
        .single()
        .expect("month start is always a valid instant")
        .timestamp_micros()
}

/// First microsecond of the month after the one containing `ts`.
fn next_month_micros(ts_micros: i64) -> i64 {
    let dt = utc_from_micros(ts_micros);
    let (y, m) = if dt.month() == 12 {
        (dt.year() + 1, 1)
    } else {
        (dt.year(), dt.month() + 1)
    };
    Utc.with_ymd_and_hms(y, m, 1, 0, 0, 0)
        .single()
        .expect("month start is always a valid instant")
        .timestamp_micros()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn micros(iso: &str) -> i64 {
        DateTime::parse_from_rfc3339(iso)
            .unwrap()
            .with_timezone(&Utc)
            .timestamp_micros()
    }

    #[test]
    fn parse_roundtrip_all() {
        for tf in Timeframe::ALL {
            assert_eq!(Timeframe::parse(tf.as_str()).unwrap(), tf);
        }
        assert_eq!(Timeframe::parse("1M").unwrap(), Timeframe::Mo1);
        assert!(Timeframe::parse("7m").is_err());
    }

    #[test]
    fn rest_interval_only_differs_for_month() {
        assert_eq!(Timeframe::H1.rest_interval(), "1h");
        assert_eq!(Timeframe::Mo1.rest_interval(), "1M");
    }

    #[test]
    fn align_down_hourly() {
        let t = micros("2024-01-15T13:45:12.5Z");
        assert_eq!(Timeframe::H1.align_down(t), micros("2024-01-15T13:00:00Z"));
        assert!(Timeframe::H1.is_aligned(micros("2024-01-15T13:00:00Z")));
        assert!(!Timeframe::H1.is_aligned(t));
    }

    #[test]
    fn align_up_rounds_to_next_point() {
        let t = micros("2024-01-15T13:45:12Z");
        assert_eq!(Timeframe::H1.align_up(t), micros("2024-01-15T14:00:00Z"));
        // Already aligned: identity.
        let a = micros("2024-01-15T13:00:00Z");
        assert_eq!(Timeframe::H1.align_up(a), a);
    }

    #[test]
    fn weekly_grid_opens_on_monday() {
        // 2024-01-08 was a Monday.
        let mon = micros("2024-01-08T00:00:00Z");
        assert!(Timeframe::W1.is_aligned(mon));
        // Thursday (the raw epoch alignment) is NOT on the weekly grid.
        let thu = micros("2024-01-11T00:00:00Z");
        assert!(!Timeframe::W1.is_aligned(thu));
        assert_eq!(Timeframe::W1.align_down(thu), mon);
    }

    #[test]
    fn close_time_is_one_micro_before_next_open() {
        let open = micros("2024-01-15T13:00:00Z");
        assert_eq!(
            Timeframe::H1.close_time_micros(open),
            micros("2024-01-15T14:00:00Z") - 1
        );
    }

    #[test]
    fn grid_hourly_january_2024() {
        let start = micros("2024-01-01T00:00:00Z");
        let end = micros("2024-02-01T00:00:00Z");
        let points: Vec<i64> = Timeframe::H1.grid(start, end).collect();
        assert_eq!(points.len(), 744); // 31 days * 24
        assert_eq!(points[0], start);
        assert_eq!(*points.last().unwrap(), micros("2024-01-31T23:00:00Z"));
        assert_eq!(Timeframe::H1.grid_len(start, end), 744);
    }

    #[test]
    fn grid_unaligned_start_rounds_up() {
        let start = micros("2024-01-01T00:30:00Z");
        let end = micros("2024-01-01T03:00:00Z");
        let points: Vec<i64> = Timeframe::H1.grid(start, end).collect();
        assert_eq!(
            points,
            vec![
                micros("2024-01-01T01:00:00Z"),
                micros("2024-01-01T02:00:00Z"),
            ]
        );
        assert_eq!(Timeframe::H1.grid_len(start, end), 2);
    }

    #[test]
    fn grid_end_is_exclusive() {
        let start = micros("2024-01-01T00:00:00Z");
        let end = micros("2024-01-01T02:00:00Z");
        let points: Vec<i64> = Timeframe::H1.grid(start, end).collect();
        assert_eq!(points.len(), 2);
        assert!(!points.contains(&end));
    }

    // --- calendar months ---

    #[test]
    fn month_grid_february_leap_boundary() {
        let jan = micros("2024-01-01T00:00:00Z");
        let feb = micros("2024-02-01T00:00:00Z");
        let mar = micros("2024-03-01T00:00:00Z");
        assert_eq!(Timeframe::Mo1.next(jan), feb);
        // 2024 is a leap year: February has 29 days.
        assert_eq!(Timeframe::Mo1.next(feb), mar);
        assert_eq!(Timeframe::Mo1.close_time_micros(feb), mar - 1);
        // Non-leap February.
        let feb23 = micros("2023-02-01T00:00:00Z");
        assert_eq!(Timeframe::Mo1.next(feb23), micros("2023-03-01T00:00:00Z"));
    }

    #[test]
    fn month_grid_year_boundary() {
        let dec = micros("2023-12-01T00:00:00Z");
        assert_eq!(Timeframe::Mo1.next(dec), micros("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn month_align_mid_month() {
        let t = micros("2024-02-15T10:00:00Z");
        assert_eq!(Timeframe::Mo1.align_down(t), micros("2024-02-01T00:00:00Z"));
        assert_eq!(Timeframe::Mo1.align_up(t), micros("2024-03-01T00:00:00Z"));
    }

    #[test]
    fn month_grid_spans_year() {
        let start = micros("2023-11-01T00:00:00Z");
        let end = micros("2024-03-01T00:00:00Z");
        let points: Vec<i64> = Timeframe::Mo1.grid(start, end).collect();
        assert_eq!(
            points,
            vec![
                micros("2023-11-01T00:00:00Z"),
                micros("2023-12-01T00:00:00Z"),
                micros("2024-01-01T00:00:00Z"),
                micros("2024-02-01T00:00:00Z"),
            ]
        );
        assert_eq!(Timeframe::Mo1.grid_len(start, end), 4);
    }

    #[test]
    fn empty_range_has_empty_grid() {
        let t = micros("2024-01-01T00:00:00Z");
        assert_eq!(Timeframe::H1.grid(t, t).count(), 0);
        assert_eq!(Timeframe::H1.grid_len(t, t), 0);
    }

    #[test]
    fn epoch_alignment_property_fixed_timeframes() {
        // (timestamp - offset) mod duration == 0 for every grid point.
        let start = micros("2024-01-01T00:00:00Z");
        let end = micros("2024-01-08T00:00:00Z");
        for tf in Timeframe::ALL {
            let Some(d) = tf.fixed_duration_micros() else {
                continue;
            };
            let off = tf.grid_offset_micros();
            for p in tf.grid(start, end) {
                assert_eq!((p - off).rem_euclid(d), 0, "tf={tf}");
            }
        }
    }
}
