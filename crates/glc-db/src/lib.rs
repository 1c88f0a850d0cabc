//! glc-db
//!
//! Everything that talks to the analytic database: the HTTP client, the
//! expected-schema contract and its strict validator, the bootstrap state
//! machine, the batched loader, and the [`BarStore`] trait the ingest layer
//! programs against.
//!
//! Correctness does not rest on transactions (the engine has none across
//! rows) but on the deterministic `version` hash: re-inserting identical
//! content merges away, so partial writes from a cancelled ingestion are
//! harmless.

pub mod client;
pub mod clickhouse;
pub mod loader;
pub mod schema;
pub mod store;

pub use client::ClickHouseClient;
pub use clickhouse::{BootstrapState, ClickHouseStore};
pub use loader::Loader;
pub use schema::{expected_schema, ExpectedColumn, ExpectedSchema};
pub use store::{BarStore, ReadMode};
