mod firebase;
pub mod google_auth;
mod processed_store;
mod sqlite_db;

pub use firebase::FirebaseStore;
pub use processed_store::ProcessedStore;
pub use sqlite_db::SqliteStore;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::{IngestError, Result};

/// URL scheme selecting the local SQLite backend.
pub const SQLITE_SCHEME: &str = "sqlite://";

/// Path-addressed key-value store.
#[async_trait]
pub trait KvStore: Send + Sync {
    fn name(&self) -> &str;

    /// Names of the direct children of `path`, without their values.
    async fn shallow_keys(&self, path: &str) -> Result<HashSet<String>>;

    /// Multi-path upsert: every key of `entries` is a full path.
    async fn update(&self, entries: Map<String, Value>) -> Result<()>;
}

/// Connection settings for the persistent store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub url: String,
    pub credentials: Option<PathBuf>,
    pub timeout: Duration,
}

impl StoreConfig {
    pub fn is_local(&self) -> bool {
        self.url.starts_with(SQLITE_SCHEME)
    }

    /// Checks the settings without touching the network.
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(IngestError::Config("store URL is empty".to_string()));
        }
        if self.is_local() {
            return Ok(());
        }
        match &self.credentials {
            Some(path) if path.exists() => Ok(()),
            Some(path) => Err(IngestError::Credentials(format!(
                "service account key file not found at {}",
                path.display()
            ))),
            None => Err(IngestError::Config(
                "credentials path is required for a remote store".to_string(),
            )),
        }
    }
}

/// Opens the store named by `config.url`.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn KvStore>> {
    config.validate()?;

    if let Some(path) = config.url.strip_prefix(SQLITE_SCHEME) {
        info!("Using local SQLite store at {}", path);
        return Ok(Arc::new(SqliteStore::new(path)?));
    }

    let credentials = config
        .credentials
        .as_deref()
        .ok_or_else(|| IngestError::Config("credentials path is required".to_string()))?;
    let store = FirebaseStore::connect(&config.url, credentials, config.timeout).await?;
    Ok(Arc::new(store))
}
