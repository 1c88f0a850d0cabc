//! glc-fetch
//!
//! The two upstream surfaces and their reconciliation seam:
//! - bulk archive fetcher (monthly/daily ZIP files on the CDN),
//! - REST fetcher (per-bar-range klines endpoint),
//! - the symbol registry (authoritative `(symbol, instrument_type)` list).
//!
//! Both fetchers implement [`BarSource`], the one dynamic-dispatch boundary
//! in the system. This crate never touches the database: callers hand the
//! fetched bars to the loader.

pub mod archive;
pub mod kline;
pub mod registry;
pub mod rest;
mod retry;

pub mod source;

pub use archive::ArchiveFetcher;
pub use registry::SymbolRegistry;
pub use rest::RestFetcher;
pub use source::BarSource;
