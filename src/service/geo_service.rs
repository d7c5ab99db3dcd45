use maxminddb::{geoip2, MaxMindDBError};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::model::GeoEnrichment;

/// Result of one geolocation lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum GeoLookup {
    Found(GeoEnrichment),
    /// The address is not in the database. Common and expected.
    NotFound,
    /// A record exists but lacks latitude or longitude
    Incomplete,
    /// Any other lookup error (corrupt record, unparseable address)
    Failed(String),
}

/// IP to location lookup capability.
pub trait GeoLocator: Send + Sync {
    fn lookup(&self, ip: &str) -> GeoLookup;
}

/// GeoLite2-City reader. The database is held open for the lifetime of this
/// value and released when it is dropped.
pub struct GeoService {
    reader: maxminddb::Reader<Vec<u8>>,
    path: PathBuf,
}

impl GeoService {
    pub fn open(path: &Path) -> Result<Self> {
        let reader = maxminddb::Reader::open_readfile(path)?;
        info!(
            "GeoIP database opened: {} (build {})",
            path.display(),
            reader.metadata.build_epoch
        );
        Ok(Self {
            reader,
            path: path.to_path_buf(),
        })
    }
}

impl GeoLocator for GeoService {
    fn lookup(&self, ip: &str) -> GeoLookup {
        let addr = match ip.parse::<IpAddr>() {
            Ok(addr) => addr,
            Err(e) => {
                warn!("Error geolocating IP {}: {}", ip, e);
                return GeoLookup::Failed(e.to_string());
            }
        };

        match self.reader.lookup::<geoip2::City>(addr) {
            Ok(city) => {
                let (latitude, longitude) = city
                    .location
                    .map(|loc| (loc.latitude, loc.longitude))
                    .unwrap_or((None, None));
                let country_code = city
                    .country
                    .and_then(|c| c.iso_code)
                    .map(|code| code.to_string());

                match GeoEnrichment::from_parts(latitude, longitude, country_code) {
                    Some(geo) => GeoLookup::Found(geo),
                    None => {
                        debug!("Geolocation data incomplete for IP: {}", ip);
                        GeoLookup::Incomplete
                    }
                }
            }
            Err(MaxMindDBError::AddressNotFoundError(_)) => GeoLookup::NotFound,
            Err(e) => {
                warn!("Error geolocating IP {}: {}", ip, e);
                GeoLookup::Failed(e.to_string())
            }
        }
    }
}

impl Drop for GeoService {
    fn drop(&mut self) {
        debug!("GeoIP database closed: {}", self.path.display());
    }
}
