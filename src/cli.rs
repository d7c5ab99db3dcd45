use anyhow::{bail, Context};
use clap::Parser;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::dao::StoreConfig;
use crate::error::{IngestError, Result};
use crate::model::{default_feeds, Feed};
use crate::service::geo_provision::{GeoDbConfig, MAXMIND_DOWNLOAD_BASE};

pub const DEFAULT_CREDENTIALS_PATH: &str = "service-account.json";
pub const DEFAULT_GEOIP_DB_PATH: &str = "geoip_db/GeoLite2-City.mmdb";
pub const DEFAULT_FEED_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_STORE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_FEED_CONCURRENCY: usize = 4;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "threat-ingest")]
#[command(version = "0.1.0")]
#[command(about = "Incremental threat-feed ingestion with GeoIP enrichment", long_about = None)]
pub struct Args {
    /// TOML config file with feeds and defaults
    #[arg(short = 'c', long, env = "THREAT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Realtime Database URL, or sqlite://<path> for a local store
    #[arg(short = 's', long, env = "FIREBASE_DATABASE_URL")]
    pub store_url: Option<String>,

    /// Service account key file
    #[arg(long, env = "GOOGLE_APPLICATION_CREDENTIALS")]
    pub credentials: Option<PathBuf>,

    /// MaxMind license key, used only when the GeoIP database must be downloaded
    #[arg(long, env = "MAXMIND_LICENSE_KEY", hide_env_values = true)]
    pub maxmind_license_key: Option<String>,

    /// GeoLite2-City database path
    #[arg(short = 'g', long, env = "THREAT_GEOIP_DB")]
    pub geoip_db: Option<PathBuf>,

    /// Timeout for each feed request in seconds
    #[arg(long, env = "THREAT_FEED_TIMEOUT")]
    pub feed_timeout_secs: Option<u64>,

    /// Timeout for each store request in seconds
    #[arg(long, env = "THREAT_STORE_TIMEOUT")]
    pub store_timeout_secs: Option<u64>,

    /// Number of feeds fetched concurrently
    #[arg(long, env = "THREAT_FEED_CONCURRENCY")]
    pub feed_concurrency: Option<usize>,

    /// Verbose output
    #[arg(short = 'v', long, env = "THREAT_VERBOSE")]
    pub verbose: bool,
}

/// Contents of the optional TOML config file. Every field is optional;
/// command line and environment values take precedence.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub store_url: Option<String>,
    pub credentials: Option<PathBuf>,
    pub geoip_db: Option<PathBuf>,
    pub maxmind_download_url: Option<String>,
    pub feed_timeout_secs: Option<u64>,
    pub store_timeout_secs: Option<u64>,
    pub feed_concurrency: Option<usize>,
    pub feeds: Option<Vec<Feed>>,
}

impl FileConfig {
    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub store_url: Option<String>,
    pub credentials: PathBuf,
    pub store_timeout: Duration,
    pub geo: GeoDbConfig,
    pub feeds: Vec<Feed>,
    pub feed_timeout: Duration,
    pub feed_concurrency: usize,
    pub verbose: bool,
}

impl RunConfig {
    /// Store settings; a missing URL is a configuration error that aborts the run.
    pub fn store_config(&self) -> Result<StoreConfig> {
        let url = self
            .store_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                IngestError::Config("FIREBASE_DATABASE_URL environment variable not set".to_string())
            })?;

        Ok(StoreConfig {
            url: url.to_string(),
            credentials: Some(self.credentials.clone()),
            timeout: self.store_timeout,
        })
    }
}

impl Args {
    /// Reads the config file named by `--config` (if any) and resolves every setting.
    pub fn merge_with_config(self) -> anyhow::Result<RunConfig> {
        let file = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                FileConfig::from_toml(&raw)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?
            }
            None => FileConfig::default(),
        };
        self.resolve(file)
    }

    pub fn resolve(self, file: FileConfig) -> anyhow::Result<RunConfig> {
        let feeds = file.feeds.unwrap_or_else(default_feeds);
        validate_feeds(&feeds)?;

        let feed_concurrency = self
            .feed_concurrency
            .or(file.feed_concurrency)
            .unwrap_or(DEFAULT_FEED_CONCURRENCY);
        if feed_concurrency == 0 {
            bail!("feed concurrency must be at least 1");
        }

        let geo = GeoDbConfig {
            path: self
                .geoip_db
                .or(file.geoip_db)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_GEOIP_DB_PATH)),
            license_key: self.maxmind_license_key.filter(|k| !k.is_empty()),
            download_url: file
                .maxmind_download_url
                .unwrap_or_else(|| MAXMIND_DOWNLOAD_BASE.to_string()),
            timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
        };

        Ok(RunConfig {
            store_url: self.store_url.or(file.store_url),
            credentials: self
                .credentials
                .or(file.credentials)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CREDENTIALS_PATH)),
            store_timeout: Duration::from_secs(
                self.store_timeout_secs
                    .or(file.store_timeout_secs)
                    .unwrap_or(DEFAULT_STORE_TIMEOUT_SECS),
            ),
            geo,
            feeds,
            feed_timeout: Duration::from_secs(
                self.feed_timeout_secs
                    .or(file.feed_timeout_secs)
                    .unwrap_or(DEFAULT_FEED_TIMEOUT_SECS),
            ),
            feed_concurrency,
            verbose: self.verbose,
        })
    }
}

fn validate_feeds(feeds: &[Feed]) -> anyhow::Result<()> {
    if feeds.is_empty() {
        bail!("at least one feed must be configured");
    }
    let mut seen = HashSet::new();
    for feed in feeds {
        if feed.attack_type.trim().is_empty() || feed.url.trim().is_empty() {
            bail!("feed entries need both attack_type and url");
        }
        if !seen.insert(feed.attack_type.as_str()) {
            bail!("duplicate feed attack_type: {}", feed.attack_type);
        }
    }
    Ok(())
}
