mod batch;
mod feed;
mod geo;
mod outcome;
mod threat;

pub use batch::{ProcessedBatch, ThreatBatch, WriteBatch};
pub use feed::{canonical_ip, default_feeds, parse_feed_body, Feed};
pub use geo::GeoEnrichment;
pub use outcome::{BatchOutcome, Outcome};
pub use threat::ThreatRecord;

/// Store namespace holding one `true` marker per IP ever handled.
pub const PROCESSED_IPS_PATH: &str = "processed_ips";
