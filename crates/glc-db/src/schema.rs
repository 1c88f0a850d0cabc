//! Expected-schema contract and strict comparison.
//!
//! The live table must match this contract exactly: column names, order,
//! types, codecs, engine, partition key and sorting key. There is no
//! best-effort path: any divergence is `SchemaMismatch` and the bootstrap
//! refuses to reach `Ready`.

use serde_json::Value;

use glc_core::DataError;

pub const TABLE_NAME: &str = "klines";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedColumn {
    pub name: &'static str,
    pub ch_type: &'static str,
    /// Expected compression codec, or `None` when the column uses the table
    /// default (then the live codec must be empty too).
    pub codec: Option<&'static str>,
}

#[derive(Debug, Clone)]
pub struct ExpectedSchema {
    pub table: &'static str,
    pub engine: &'static str,
    /// Substring that must appear in `engine_full`: pins the version column
    /// of the replacing merge.
    pub engine_full_contains: &'static str,
    pub partition_key: &'static str,
    pub sorting_key: &'static str,
    pub columns: Vec<ExpectedColumn>,
}

/// The one schema this pipeline writes.
pub fn expected_schema() -> ExpectedSchema {
    const GORILLA: Option<&str> = Some("CODEC(Gorilla, LZ4)");
    ExpectedSchema {
        table: TABLE_NAME,
        engine: "ReplacingMergeTree",
        engine_full_contains: "ReplacingMergeTree(version)",
        partition_key: "toDate(timestamp)",
        sorting_key: "symbol, timeframe, toStartOfHour(timestamp), timestamp",
        columns: vec![
            ExpectedColumn {
                name: "timestamp",
                ch_type: "DateTime64(6, 'UTC')",
                codec: Some("CODEC(DoubleDelta, LZ4)"),
            },
            ExpectedColumn {
                name: "close_time",
                ch_type: "DateTime64(6, 'UTC')",
                codec: Some("CODEC(DoubleDelta, LZ4)"),
            },
            ExpectedColumn {
                name: "symbol",
                ch_type: "LowCardinality(String)",
                codec: None,
            },
            ExpectedColumn {
                name: "timeframe",
                ch_type: "LowCardinality(String)",
                codec: None,
            },
            ExpectedColumn {
                name: "instrument_type",
                ch_type: "LowCardinality(String)",
                codec: None,
            },
            ExpectedColumn {
                name: "data_source",
                ch_type: "LowCardinality(String)",
                codec: None,
            },
            ExpectedColumn {
                name: "open",
                ch_type: "Float64",
                codec: GORILLA,
            },
            ExpectedColumn {
                name: "high",
                ch_type: "Float64",
                codec: GORILLA,
            },
            ExpectedColumn {
                name: "low",
                ch_type: "Float64",
                codec: GORILLA,
            },
            ExpectedColumn {
                name: "close",
                ch_type: "Float64",
                codec: GORILLA,
            },
            ExpectedColumn {
                name: "volume",
                ch_type: "Float64",
                codec: GORILLA,
            },
            ExpectedColumn {
                name: "quote_volume",
                ch_type: "Float64",
                codec: GORILLA,
            },
            ExpectedColumn {
                name: "taker_buy_base",
                ch_type: "Float64",
                codec: GORILLA,
            },
            ExpectedColumn {
                name: "taker_buy_quote",
                ch_type: "Float64",
                codec: GORILLA,
            },
            ExpectedColumn {
                name: "number_of_trades",
                ch_type: "UInt64",
                codec: Some("CODEC(T64, LZ4)"),
            },
            ExpectedColumn {
                name: "funding_rate",
                ch_type: "Nullable(Float64)",
                codec: None,
            },
            ExpectedColumn {
                name: "version",
                ch_type: "UInt64",
                codec: None,
            },
            ExpectedColumn {
                name: "sign",
                ch_type: "Int8",
                codec: None,
            },
        ],
    }
}

impl ExpectedSchema {
    /// DDL creating the table this contract describes.
    pub fn create_table_sql(&self) -> String {
        let cols: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let mut s = format!("    {} {}", c.name, c.ch_type);
                if let Some(codec) = c.codec {
                    s.push(' ');
                    s.push_str(codec);
                }
                if c.name == "sign" {
                    s.push_str(" DEFAULT 1");
                }
                s
            })
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n)\nENGINE = ReplacingMergeTree(version)\nPARTITION BY {}\nORDER BY ({})",
            self.table,
            cols.join(",\n"),
            self.partition_key,
            self.sorting_key,
        )
    }

    /// Strict comparison against the live table description.
    ///
    /// `table_row` is one row from `system.tables`, `column_rows` are the
    /// `system.columns` rows ordered by position. Every divergence is
    /// collected so the operator sees the full diff, then surfaced as one
    /// `SchemaMismatch`.
    pub fn compare(
        &self,
        table_row: Option<&Value>,
        column_rows: &[Value],
    ) -> Result<(), DataError> {
        let mut diffs: Vec<String> = Vec::new();

        let Some(table_row) = table_row else {
            return Err(DataError::SchemaMismatch(format!(
                "table '{}' does not exist",
                self.table
            )));
        };

        let str_field = |row: &Value, key: &str| -> String {
            row.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let engine = str_field(table_row, "engine");
        if engine != self.engine {
            diffs.push(format!("engine: expected {}, got {engine}", self.engine));
        }
        let engine_full = str_field(table_row, "engine_full");
        if !engine_full.contains(self.engine_full_contains) {
            diffs.push(format!(
                "engine_full: expected to contain '{}', got '{engine_full}'",
                self.engine_full_contains
            ));
        }
        let partition_key = str_field(table_row, "partition_key");
        if partition_key != self.partition_key {
            diffs.push(format!(
                "partition_key: expected '{}', got '{partition_key}'",
                self.partition_key
            ));
        }
        let sorting_key = str_field(table_row, "sorting_key");
        if sorting_key != self.sorting_key {
            diffs.push(format!(
                "sorting_key: expected '{}', got '{sorting_key}'",
                self.sorting_key
            ));
        }

        if column_rows.len() != self.columns.len() {
            diffs.push(format!(
                "column count: expected {}, got {}",
                self.columns.len(),
                column_rows.len()
            ));
        }
        for (i, expected) in self.columns.iter().enumerate() {
            let Some(live) = column_rows.get(i) else {
                diffs.push(format!("column {}: missing '{}'", i + 1, expected.name));
                continue;
            };
            let name = str_field(live, "name");
            if name != expected.name {
                diffs.push(format!(
                    "column {}: expected '{}', got '{name}'",
                    i + 1,
                    expected.name
                ));
                continue;
            }
            let ch_type = str_field(live, "type");
            if ch_type != expected.ch_type {
                diffs.push(format!(
                    "column '{}': expected type {}, got {ch_type}",
                    expected.name, expected.ch_type
                ));
            }
            let codec = str_field(live, "compression_codec");
            let expected_codec = expected.codec.unwrap_or("");
            if codec != expected_codec {
                diffs.push(format!(
                    "column '{}': expected codec '{expected_codec}', got '{codec}'",
                    expected.name
                ));
            }
        }

        if diffs.is_empty() {
            Ok(())
        } else {
            Err(DataError::SchemaMismatch(diffs.join("; ")))
        }
    }
}
