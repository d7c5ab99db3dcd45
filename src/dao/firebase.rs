use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::google_auth::{fetch_access_token, ServiceAccountKey};
use super::KvStore;
use crate::error::{IngestError, Result};

/// Realtime Database client over the REST API.
pub struct FirebaseStore {
    client: Client,
    base_url: String,
    access_token: Option<String>,
}

impl FirebaseStore {
    /// Loads the service-account key and obtains an access token.
    /// Any failure here means the store is unreachable for this run.
    pub async fn connect(base_url: &str, credentials: &Path, timeout: Duration) -> Result<Self> {
        let key = ServiceAccountKey::from_file(credentials)?;
        let client = Client::builder().timeout(timeout).build()?;
        let token = fetch_access_token(&client, &key).await?;
        info!(
            "Connected to {} as {} (project {})",
            base_url,
            key.client_email,
            key.project_id.as_deref().unwrap_or("unknown")
        );
        Ok(Self::with_token(client, base_url, Some(token)))
    }

    pub fn with_token(client: Client, base_url: &str, access_token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
        }
    }

    fn url_for(&self, path: &str) -> String {
        let path = path.trim_matches('/');
        if path.is_empty() {
            format!("{}/.json", self.base_url)
        } else {
            format!("{}/{}.json", self.base_url, path)
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check(response: reqwest::Response, action: &str) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(IngestError::Store(format!("{} failed: {} - {}", action, status, body)))
    }
}

#[async_trait]
impl KvStore for FirebaseStore {
    fn name(&self) -> &str {
        "firebase"
    }

    async fn shallow_keys(&self, path: &str) -> Result<HashSet<String>> {
        let request = self
            .client
            .get(self.url_for(path))
            .query(&[("shallow", "true")]);
        let response = Self::check(self.authorize(request).send().await?, "shallow read").await?;

        match response.json::<Value>().await? {
            Value::Null => Ok(HashSet::new()),
            Value::Object(map) => Ok(map.into_iter().map(|(k, _)| k).collect()),
            other => Err(IngestError::Store(format!(
                "expected an object at {}, got {}",
                path, other
            ))),
        }
    }

    async fn update(&self, entries: Map<String, Value>) -> Result<()> {
        debug!("PATCH {} paths to {}", entries.len(), self.base_url);
        let request = self.client.patch(self.url_for("")).json(&entries);
        Self::check(self.authorize(request).send().await?, "multi-path update").await?;
        Ok(())
    }
}
