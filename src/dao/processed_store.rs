use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use super::KvStore;
use crate::model::{BatchOutcome, Outcome, WriteBatch, PROCESSED_IPS_PATH};

/// Access to the `processed_ips` namespace and bulk writes against the store.
#[derive(Clone)]
pub struct ProcessedStore {
    store: Arc<dyn KvStore>,
}

impl ProcessedStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Reads every processed IP key. A failed read yields an empty set tagged as
    /// degraded: the run continues and may reprocess IPs.
    pub async fn load_processed(&self) -> Outcome<HashSet<String>> {
        match self.store.shallow_keys(PROCESSED_IPS_PATH).await {
            Ok(keys) => {
                info!("Fetched {} processed IPs from {}", keys.len(), self.store.name());
                Outcome::Ok(keys)
            }
            Err(e) => {
                warn!("Failed to fetch processed IPs, continuing with an empty set: {}", e);
                Outcome::degraded(HashSet::new(), e.to_string())
            }
        }
    }

    /// One bulk upsert of every path in the batch. There is no partial success:
    /// a rejected request means nothing in the batch was written.
    pub async fn apply_batch<V: Serialize>(&self, batch: &WriteBatch<V>) -> BatchOutcome {
        if batch.is_empty() {
            return BatchOutcome::Empty;
        }

        let entries = match batch.to_json() {
            Ok(entries) => entries,
            Err(e) => return BatchOutcome::Failed(format!("failed to encode batch: {}", e)),
        };

        match self.store.update(entries).await {
            Ok(()) => BatchOutcome::Applied(batch.len()),
            Err(e) => BatchOutcome::Failed(e.to_string()),
        }
    }
}
