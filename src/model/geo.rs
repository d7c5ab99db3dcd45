use serde::{Deserialize, Serialize};

/// Location data for a single IP, as returned by the geolocation adapter.
///
/// Coordinates are always present; a lookup without both is reported as no data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoEnrichment {
    pub latitude: f64,
    pub longitude: f64,
    pub country_code: Option<String>,
}

impl GeoEnrichment {
    pub fn new(latitude: f64, longitude: f64, country_code: Option<String>) -> Self {
        Self {
            latitude,
            longitude,
            country_code,
        }
    }

    /// Builds an enrichment from optional lookup fields.
    pub fn from_parts(
        latitude: Option<f64>,
        longitude: Option<f64>,
        country_code: Option<String>,
    ) -> Option<Self> {
        match (latitude, longitude) {
            (Some(lat), Some(lon)) => Some(Self::new(lat, lon, country_code)),
            _ => None,
        }
    }
}
