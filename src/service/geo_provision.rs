//! Download and extraction of the GeoLite2-City database.
//!
//! Only runs when the database file is missing. MaxMind serves the database
//! as a tar.gz archive containing a dated directory with the `.mmdb` inside.

use flate2::read::GzDecoder;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tar::Archive;
use tracing::{debug, info};

use crate::error::{IngestError, Result};

pub const MAXMIND_DOWNLOAD_BASE: &str = "https://download.maxmind.com/app/geoip_download";
pub const GEOLITE_EDITION: &str = "GeoLite2-City";

#[derive(Debug, Clone)]
pub struct GeoDbConfig {
    pub path: PathBuf,
    pub license_key: Option<String>,
    pub download_url: String,
    pub timeout: Duration,
}

/// Makes sure the database file exists, downloading it if needed.
pub async fn ensure_database(config: &GeoDbConfig) -> Result<()> {
    if config.path.exists() {
        info!("Using existing GeoLite DB at {}", config.path.display());
        return Ok(());
    }

    info!("GeoLite DB not found at {}. Attempting download...", config.path.display());
    let license_key = config.license_key.as_deref().ok_or_else(|| {
        IngestError::Config("MAXMIND_LICENSE_KEY environment variable not set".to_string())
    })?;

    let archive = download_archive(&config.download_url, license_key, config.timeout).await?;
    info!("Download complete ({} bytes). Extracting...", archive.len());

    let mmdb = extract_mmdb(&archive, GEOLITE_EDITION)?;
    write_database(&config.path, &mmdb).await?;
    info!("GeoLite2 DB extracted to {}", config.path.display());
    Ok(())
}

async fn download_archive(base_url: &str, license_key: &str, timeout: Duration) -> Result<Vec<u8>> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let response = client
        .get(base_url)
        .query(&[
            ("edition_id", GEOLITE_EDITION),
            ("license_key", license_key),
            ("suffix", "tar.gz"),
        ])
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(IngestError::Provision(format!(
            "download failed with status {}; check that the license key is correct and active",
            response.status()
        )));
    }

    Ok(response.bytes().await?.to_vec())
}

/// Pulls `<edition>.mmdb` out of a tar.gz archive, wherever it sits in the tree.
pub fn extract_mmdb(tar_gz: &[u8], edition: &str) -> Result<Vec<u8>> {
    let expected = format!("{}.mmdb", edition);
    let mut archive = Archive::new(GzDecoder::new(tar_gz));

    for entry in archive.entries()? {
        let mut entry = entry?;
        let is_match = entry
            .path()?
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n == expected)
            .unwrap_or(false);

        if is_match {
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes)?;
            debug!("Extracted {} ({} bytes)", expected, bytes.len());
            return Ok(bytes);
        }
    }

    Err(IngestError::Provision(format!(
        "{} not found within the downloaded archive",
        expected
    )))
}

/// Writes through a temporary sibling file so a partial write never leaves a
/// truncated database at the final path.
async fn write_database(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await?;
    }
    let partial = path.with_extension("mmdb.part");
    tokio::fs::write(&partial, bytes).await?;
    tokio::fs::rename(&partial, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tar::Builder;
    use tempfile::tempdir;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tar_gz(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = Builder::new(Vec::new());
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_path(name).unwrap();
            header.set_size(content.len() as u64);
            header.set_cksum();
            builder.append(&header, *content).unwrap();
        }
        let tar_bytes = builder.into_inner().unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        encoder.finish().unwrap()
    }

    fn config_for(path: PathBuf, url: String, key: Option<&str>) -> GeoDbConfig {
        GeoDbConfig {
            path,
            license_key: key.map(str::to_string),
            download_url: url,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_extract_nested_mmdb() {
        let archive = tar_gz(&[
            ("GeoLite2-City_20240102/COPYRIGHT.txt", b"copyright"),
            ("GeoLite2-City_20240102/GeoLite2-City.mmdb", b"mmdb-bytes"),
        ]);
        assert_eq!(extract_mmdb(&archive, GEOLITE_EDITION).unwrap(), b"mmdb-bytes");
    }

    #[test]
    fn test_extract_missing_mmdb() {
        let archive = tar_gz(&[("GeoLite2-City_20240102/LICENSE.txt", b"license")]);
        let err = extract_mmdb(&archive, GEOLITE_EDITION).unwrap_err();
        assert!(matches!(err, IngestError::Provision(_)));
    }

    #[test]
    fn test_extract_rejects_non_gzip() {
        assert!(extract_mmdb(b"plain bytes", GEOLITE_EDITION).is_err());
    }

    #[tokio::test]
    async fn test_existing_database_skips_download() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("GeoLite2-City.mmdb");
        std::fs::write(&path, b"present").unwrap();

        let config = config_for(path.clone(), "http://127.0.0.1:9/".to_string(), None);
        ensure_database(&config).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"present");
    }

    #[tokio::test]
    async fn test_missing_database_without_license_key() {
        let dir = tempdir().unwrap();
        let config = config_for(dir.path().join("db.mmdb"), "http://127.0.0.1:9/".to_string(), None);
        assert!(matches!(ensure_database(&config).await, Err(IngestError::Config(_))));
    }

    #[tokio::test]
    async fn test_download_and_extract() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("edition_id", "GeoLite2-City"))
            .and(query_param("license_key", "secret"))
            .and(query_param("suffix", "tar.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(tar_gz(&[(
                "GeoLite2-City_20240102/GeoLite2-City.mmdb",
                b"downloaded",
            )])))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let path = dir.path().join("geoip_db").join("GeoLite2-City.mmdb");
        let config = config_for(path.clone(), server.uri(), Some("secret"));

        ensure_database(&config).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"downloaded");
        assert!(!path.with_extension("mmdb.part").exists());
    }

    #[tokio::test]
    async fn test_download_rejected_license() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Invalid license key"))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let path = dir.path().join("GeoLite2-City.mmdb");
        let config = config_for(path.clone(), server.uri(), Some("wrong"));

        assert!(matches!(ensure_database(&config).await, Err(IngestError::Provision(_))));
        assert!(!path.exists());
    }
}
