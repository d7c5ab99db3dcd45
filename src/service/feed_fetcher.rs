use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{IngestError, Result};
use crate::model::{parse_feed_body, Outcome};

/// Source of the current IP set for a feed.
///
/// Implementations never raise: a transport failure is reported as a degraded
/// outcome with an empty set, and a feed that can never be fetched (a malformed
/// URL) as `Fatal`.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Outcome<HashSet<String>>;
}

/// Fetches plain-text IP lists over HTTP.
#[derive(Clone)]
pub struct HttpFeedFetcher {
    client: Client,
}

impl HttpFeedFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    async fn fetch_body(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}

#[async_trait]
impl FeedSource for HttpFeedFetcher {
    async fn fetch(&self, url: &str) -> Outcome<HashSet<String>> {
        match self.fetch_body(url).await {
            Ok(body) => {
                let parsed = parse_feed_body(&body);
                if parsed.rejected > 0 {
                    debug!("Skipped {} malformed lines from {}", parsed.rejected, url);
                }
                info!("Fetched {} unique IPs from {}", parsed.ips.len(), url);
                Outcome::Ok(parsed.ips)
            }
            Err(IngestError::Http(e)) if e.is_builder() => {
                Outcome::Fatal(IngestError::Config(format!("invalid feed URL {}: {}", url, e)))
            }
            Err(e) => {
                warn!("Error fetching {}: {}", url, e);
                Outcome::degraded(HashSet::new(), e.to_string())
            }
        }
    }
}
