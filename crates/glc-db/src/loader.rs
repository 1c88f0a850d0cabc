//! Batched loader: validates rows, then inserts in batches.
//!
//! Schema validation happened at store bootstrap, before any loader can
//! exist. Every row is checked against the full invariant set first; an
//! invariant violation aborts the whole call with the offending row and
//! nothing is inserted. Insertion is idempotent under the engine's merge
//! rule, so a batch that partially landed before a crash is safe to replay.

use std::sync::Arc;

use tracing::debug;

use glc_core::{Bar, DataError};

use crate::store::BarStore;

/// Chosen to keep merge cost low without holding large ranges in memory.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

pub struct Loader {
    store: Arc<dyn BarStore>,
    batch_size: usize,
}

impl Loader {
    pub fn new(store: Arc<dyn BarStore>) -> Self {
        Self {
            store,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(store: Arc<dyn BarStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Validate all rows, then insert them in batches. Returns rows written.
    pub async fn load(&self, bars: &[Bar]) -> Result<u64, DataError> {
        for bar in bars {
            bar.validate()?;
            if bar.version == 0 {
                return Err(DataError::InvariantViolation {
                    detail: "bar reached the loader without a version hash".into(),
                    bar: Box::new(bar.clone()),
                });
            }
        }
        let mut written = 0u64;
        for batch in bars.chunks(self.batch_size) {
            written += self.store.insert(batch).await?;
            debug!(batch = batch.len(), written, "loader batch inserted");
        }
        Ok(written)
    }
}
