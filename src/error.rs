use thiserror::Error;

/// Error type for the ingestion pipeline
#[derive(Error, Debug)]
pub enum IngestError {
    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential file missing, unreadable or rejected
    #[error("Credentials error: {0}")]
    Credentials(String),

    /// Persistent store rejected or failed an operation
    #[error("Store error: {0}")]
    Store(String),

    /// Network operation error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// GeoIP database open or lookup error
    #[error("GeoIP error: {0}")]
    GeoIp(String),

    /// GeoIP database download/extraction error
    #[error("Provisioning error: {0}")]
    Provision(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

impl From<maxminddb::MaxMindDBError> for IngestError {
    fn from(err: maxminddb::MaxMindDBError) -> Self {
        IngestError::GeoIp(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
