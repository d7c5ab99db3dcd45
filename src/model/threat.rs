use serde::{Deserialize, Serialize};

use super::GeoEnrichment;

/// Store namespace for geolocated threat records.
pub const THREAT_DATA_PATH: &str = "threats";

/// One geolocated sighting of a new IP in one feed.
///
/// Field names match what the dashboard reads from `threats/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatRecord {
    pub ip: String,
    pub lat: f64,
    pub lon: f64,
    pub country: String,
    pub attack_type: String,
    pub timestamp: i64,
}

impl ThreatRecord {
    /// Returns `None` unless the enrichment carries a country code.
    pub fn from_enrichment(
        ip: &str,
        geo: &GeoEnrichment,
        attack_type: &str,
        timestamp_ms: i64,
    ) -> Option<Self> {
        let country = geo.country_code.as_deref().filter(|c| !c.is_empty())?;
        Some(Self {
            ip: ip.to_string(),
            lat: geo.latitude,
            lon: geo.longitude,
            country: country.to_string(),
            attack_type: attack_type.to_string(),
            timestamp: timestamp_ms,
        })
    }

    /// Record key: `<timestamp_ms>_<sanitized ip>`.
    pub fn key(&self) -> String {
        threat_key(self.timestamp, &self.ip)
    }

    /// Full store path of this record.
    pub fn path(&self) -> String {
        format!("{}/{}", THREAT_DATA_PATH, self.key())
    }
}

/// Makes an IP usable inside a store key. Injective for parsed IP addresses,
/// which never contain `_` or `-`.
pub fn sanitize_ip(ip: &str) -> String {
    ip.replace('.', "_").replace(':', "-")
}

pub fn threat_key(timestamp_ms: i64, ip: &str) -> String {
    format!("{}_{}", timestamp_ms, sanitize_ip(ip))
}
