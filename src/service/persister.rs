use tracing::{error, info};

use crate::dao::ProcessedStore;
use crate::model::{BatchOutcome, ProcessedBatch, ThreatBatch};

/// Outcome of the two end-of-run writes, reported separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistReport {
    pub threats: BatchOutcome,
    pub processed: BatchOutcome,
}

impl PersistReport {
    pub fn fully_applied(&self) -> bool {
        !self.threats.is_failed() && !self.processed.is_failed()
    }

    /// Exactly one of the two writes failed, so records and markers disagree.
    pub fn is_inconsistent(&self) -> bool {
        self.threats.is_failed() != self.processed.is_failed()
    }
}

/// Writes threat records, then processed markers. The two writes are
/// independent: neither is retried or rolled back when the other fails.
pub struct Persister {
    store: ProcessedStore,
}

impl Persister {
    pub fn new(store: ProcessedStore) -> Self {
        Self { store }
    }

    pub async fn persist(&self, threats: &ThreatBatch, processed: &ProcessedBatch) -> PersistReport {
        if threats.is_empty() {
            info!("No new geolocated threats to push");
        } else {
            info!("Pushing {} new threat entries...", threats.len());
        }
        let threats_outcome = self.store.apply_batch(threats).await;
        match &threats_outcome {
            BatchOutcome::Applied(n) => info!("Threat data pushed successfully ({} entries)", n),
            BatchOutcome::Failed(e) => error!("Failed to push threat data: {}", e),
            BatchOutcome::Empty => {}
        }

        if processed.is_empty() {
            info!("No new IPs encountered in this run to mark as processed");
        } else {
            info!("Marking {} IPs as processed...", processed.len());
        }
        let processed_outcome = self.store.apply_batch(processed).await;
        match &processed_outcome {
            BatchOutcome::Applied(n) => info!("Processed IPs list updated successfully ({} entries)", n),
            BatchOutcome::Failed(e) => error!("Failed to update processed IPs: {}", e),
            BatchOutcome::Empty => {}
        }

        PersistReport {
            threats: threats_outcome,
            processed: processed_outcome,
        }
    }
}
