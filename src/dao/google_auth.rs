//! Service-account authentication for the Realtime Database REST API.
//!
//! A signed JWT assertion (RS256) is exchanged at the account's token endpoint
//! for a short-lived OAuth2 access token.

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::error::{IngestError, Result};

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const DATABASE_SCOPES: &str =
    "https://www.googleapis.com/auth/firebase.database https://www.googleapis.com/auth/userinfo.email";
const ASSERTION_TTL_SECS: i64 = 3600;

/// The fields of a service-account key file this crate needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(IngestError::Credentials(format!(
                "service account key file not found at {}",
                path.display()
            )));
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| IngestError::Credentials(format!("invalid service account key: {}", e)))
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Builds the signed JWT sent to the token endpoint.
pub fn build_assertion(key: &ServiceAccountKey, issued_at: i64) -> Result<String> {
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope: DATABASE_SCOPES,
        aud: &key.token_uri,
        iat: issued_at,
        exp: issued_at + ASSERTION_TTL_SECS,
    };
    let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())?;
    Ok(encode(&Header::new(Algorithm::RS256), &claims, &signing_key)?)
}

/// Exchanges the service-account assertion for an access token.
pub async fn fetch_access_token(client: &Client, key: &ServiceAccountKey) -> Result<String> {
    let assertion = build_assertion(key, Utc::now().timestamp())?;

    let response = client
        .post(&key.token_uri)
        .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(IngestError::Credentials(format!(
            "token exchange rejected: {} - {}",
            status, body
        )));
    }

    let token: TokenResponse = response.json().await?;
    debug!(
        "Obtained access token for {} (expires in {:?}s)",
        key.client_email, token.expires_in
    );
    Ok(token.access_token)
}
