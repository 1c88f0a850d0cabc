//! Append-only report persistence in embedded SQLite.
//!
//! Reports are written once, keyed `(symbol, timeframe, run_id)`, and kept
//! forever for historical queries. Writing the same key twice is an error;
//! there is no update path.

use std::path::Path;

use rusqlite::{params, Connection};
use tracing::debug;

use glc_core::DataError;

use crate::report::ValidationReport;

pub struct ReportStore {
    conn: Connection,
}

/// One persisted row, summary view.
#[derive(Debug, Clone)]
pub struct StoredReport {
    pub symbol: String,
    pub timeframe: String,
    pub run_id: String,
    pub created_at_utc: String,
    pub passed: bool,
    pub report: ValidationReport,
}

impl ReportStore {
    pub fn open(path: &Path) -> Result<Self, DataError> {
        let conn = Connection::open(path)
            .map_err(|e| DataError::Config(format!("open report store {}: {e}", path.display())))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, DataError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DataError::Config(format!("open in-memory report store: {e}")))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, DataError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS validation_reports (
                symbol      TEXT NOT NULL,
                timeframe   TEXT NOT NULL,
                run_id      TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                passed      INTEGER NOT NULL,
                report_json TEXT NOT NULL,
                PRIMARY KEY (symbol, timeframe, run_id)
            )",
        )
        .map_err(|e| DataError::Config(format!("init report store: {e}")))?;
        Ok(Self { conn })
    }

    /// Append one report. A duplicate `(symbol, timeframe, run_id)` is a
    /// caller bug and surfaces as an error.
    pub fn append(&self, report: &ValidationReport) -> Result<(), DataError> {
        let json = serde_json::to_string(report)
            .map_err(|e| DataError::MalformedInput(format!("serialize report: {e}")))?;
        self.conn
            .execute(
                "INSERT INTO validation_reports
                 (symbol, timeframe, run_id, created_at, passed, report_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    report.symbol,
                    report.timeframe.as_str(),
                    report.run_id.to_string(),
                    report.created_at_utc,
                    report.passed() as i64,
                    json,
                ],
            )
            .map_err(|e| DataError::Config(format!("append report: {e}")))?;
        debug!(symbol = %report.symbol, run_id = %report.run_id, "validation report persisted");
        Ok(())
    }

    /// All reports for a series, oldest first.
    pub fn list(&self, symbol: &str, timeframe: &str) -> Result<Vec<StoredReport>, DataError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT symbol, timeframe, run_id, created_at, passed, report_json
                 FROM validation_reports
                 WHERE symbol = ?1 AND timeframe = ?2
                 ORDER BY created_at",
            )
            .map_err(|e| DataError::Config(format!("prepare list: {e}")))?;
        let rows = stmt
            .query_map(params![symbol, timeframe], |row| {
                let json: String = row.get(5)?;
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    json,
                ))
            })
            .map_err(|e| DataError::Config(format!("query reports: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            let (symbol, timeframe, run_id, created_at, passed, json) =
                row.map_err(|e| DataError::Config(format!("read report row: {e}")))?;
            let report: ValidationReport = serde_json::from_str(&json)
                .map_err(|e| DataError::MalformedInput(format!("decode stored report: {e}")))?;
            out.push(StoredReport {
                symbol,
                timeframe,
                run_id,
                created_at_utc: created_at,
                passed: passed != 0,
                report,
            });
        }
        Ok(out)
    }
}
