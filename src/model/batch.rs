use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::{ThreatRecord, PROCESSED_IPS_PATH};

/// Store path to value mapping, flushed to the store in one bulk update.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteBatch<V> {
    entries: BTreeMap<String, V>,
}

impl<V> Default for WriteBatch<V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<V: Serialize> WriteBatch<V> {
    /// Returns false if the path was already present; the first value is kept.
    pub fn insert(&mut self, path: String, value: V) -> bool {
        if self.entries.contains_key(&path) {
            return false;
        }
        self.entries.insert(path, value);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub fn get(&self, path: &str) -> Option<&V> {
        self.entries.get(path)
    }

    /// JSON body for a multi-path update.
    pub fn to_json(&self) -> serde_json::Result<Map<String, Value>> {
        let mut map = Map::with_capacity(self.entries.len());
        for (path, value) in &self.entries {
            map.insert(path.clone(), serde_json::to_value(value)?);
        }
        Ok(map)
    }
}

pub type ThreatBatch = WriteBatch<ThreatRecord>;
pub type ProcessedBatch = WriteBatch<bool>;

impl ThreatBatch {
    pub fn push_record(&mut self, record: ThreatRecord) -> bool {
        self.insert(record.path(), record)
    }

    #[cfg(test)]
    pub fn records(&self) -> impl Iterator<Item = &ThreatRecord> {
        self.entries.values()
    }
}

impl ProcessedBatch {
    pub fn mark(&mut self, ip: &str) -> bool {
        self.insert(processed_path(ip), true)
    }
}

pub fn processed_path(ip: &str) -> String {
    format!("{}/{}", PROCESSED_IPS_PATH, ip)
}
