//! Symbol registry: the authoritative list of supported symbols.
//!
//! One list serves both instrument types: spot and perpetual futures are
//! aligned on the same identifiers. The list is fetched lazily from the
//! exchange-info oracle, once per process; every query validates its symbols
//! here before any data I/O happens.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::info;

use glc_core::{DataError, SeriesKey};

pub struct SymbolRegistry {
    http: reqwest::Client,
    exchange_info_url: String,
    symbols: OnceCell<HashSet<String>>,
}

impl SymbolRegistry {
    pub fn new(rest_spot_root: &str, http_timeout: Duration) -> Result<Self, DataError> {
        let http = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|e| DataError::Config(format!("registry http client: {e}")))?;
        Ok(Self {
            http,
            exchange_info_url: format!("{}/exchangeInfo", rest_spot_root.trim_end_matches('/')),
            symbols: OnceCell::new(),
        })
    }

    /// Registry preloaded with a fixed symbol set; no network. For tests and
    /// for deployments that pin their universe in config.
    pub fn with_known_symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: HashSet<String> = symbols.into_iter().map(Into::into).collect();
        Self {
            http: reqwest::Client::new(),
            exchange_info_url: String::new(),
            symbols: OnceCell::new_with(Some(set)),
        }
    }

    async fn load(&self) -> Result<&HashSet<String>, DataError> {
        self.symbols
            .get_or_try_init(|| async {
                let resp = self
                    .http
                    .get(&self.exchange_info_url)
                    .send()
                    .await
                    .map_err(|e| {
                        DataError::TransientSource(format!("exchange info request failed: {e}"))
                    })?;
                if !resp.status().is_success() {
                    return Err(DataError::TransientSource(format!(
                        "exchange info returned http {}",
                        resp.status().as_u16()
                    )));
                }
                let body: Value = resp.json().await.map_err(|e| {
                    DataError::MalformedInput(format!("exchange info decode failed: {e}"))
                })?;
                let items = body
                    .get("symbols")
                    .and_then(Value::as_array)
                    .ok_or_else(|| {
                        DataError::MalformedInput("exchange info missing 'symbols'".into())
                    })?;
                let mut set = HashSet::with_capacity(items.len());
                for item in items {
                    let Some(sym) = item.get("symbol").and_then(Value::as_str) else {
                        continue;
                    };
                    // Delisted pairs stay queryable historically only if the
                    // oracle still lists them; status filtering keeps the
                    // registry aligned with what upstream actually serves.
                    let trading = item
                        .get("status")
                        .and_then(Value::as_str)
                        .map(|s| s == "TRADING")
                        .unwrap_or(true);
                    if trading {
                        set.insert(sym.to_string());
                    }
                }
                info!(count = set.len(), "symbol registry loaded");
                Ok(set)
            })
            .await
    }

    /// Fail before any data I/O if the symbol is unknown.
    pub async fn ensure_known(&self, series: &SeriesKey) -> Result<(), DataError> {
        let set = self.load().await?;
        if set.contains(&series.symbol) {
            Ok(())
        } else {
            Err(DataError::Config(format!(
                "unknown symbol '{}' ({})",
                series.symbol, series.instrument_type
            )))
        }
    }

    pub async fn known_symbols(&self) -> Result<Vec<String>, DataError> {
        let set = self.load().await?;
        let mut v: Vec<String> = set.iter().cloned().collect();
        v.sort_unstable();
        Ok(v)
    }
}
