use serde::Serialize;
use std::time::Duration;

/// Counters for a single feed within one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedStats {
    pub attack_type: String,
    /// Unique IPs returned by the feed
    pub fetched: usize,
    /// IPs not yet in the working set when this feed was processed
    pub new_ips: usize,
    /// New IPs that produced a threat record
    pub geolocated: usize,
    /// True when the fetch failed and the feed contributed nothing
    pub fetch_failed: bool,
}

impl FeedStats {
    pub fn new(attack_type: &str) -> Self {
        FeedStats {
            attack_type: attack_type.to_string(),
            ..Default::default()
        }
    }
}

/// Per-feed and total counters for one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub feeds: Vec<FeedStats>,
    pub processed_loaded: usize,
    pub lookup_failures: usize,
    pub threats_pushed: usize,
    pub ips_marked: usize,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_feed(&mut self, feed: FeedStats) {
        self.feeds.push(feed);
    }

    pub fn total_new_ips(&self) -> usize {
        self.feeds.iter().map(|f| f.new_ips).sum()
    }

    pub fn total_geolocated(&self) -> usize {
        self.feeds.iter().map(|f| f.geolocated).sum()
    }

    pub fn failed_feeds(&self) -> usize {
        self.feeds.iter().filter(|f| f.fetch_failed).count()
    }

    #[cfg(test)]
    pub fn feed(&self, attack_type: &str) -> Option<&FeedStats> {
        self.feeds.iter().find(|f| f.attack_type == attack_type)
    }

    /// Share of new IPs that produced a record, in percent.
    pub fn geolocation_rate(&self) -> f64 {
        let new_ips = self.total_new_ips();
        if new_ips > 0 {
            self.total_geolocated() as f64 / new_ips as f64 * 100.0
        } else {
            0.0
        }
    }

    pub fn print_summary(&self, elapsed: Duration) {
        tracing::info!("=== Run Summary ===");
        for feed in &self.feeds {
            tracing::info!(
                "  [{}] fetched: {}, new: {}, geolocated: {}{}",
                feed.attack_type,
                feed.fetched,
                feed.new_ips,
                feed.geolocated,
                if feed.fetch_failed { " (fetch failed)" } else { "" }
            );
        }
        tracing::info!("  Feeds failed: {}/{}", self.failed_feeds(), self.feeds.len());
        tracing::info!("  Previously processed IPs: {}", self.processed_loaded);
        tracing::info!("  Total new unique IPs found: {}", self.total_new_ips());
        tracing::info!(
            "  Successfully geolocated: {} ({:.1}%)",
            self.total_geolocated(),
            self.geolocation_rate()
        );
        tracing::info!("  Lookup errors: {}", self.lookup_failures);
        tracing::info!("  Threats pushed: {}", self.threats_pushed);
        tracing::info!("  IPs marked as processed: {}", self.ips_marked);
        tracing::info!("  Elapsed time: {:.2}s", elapsed.as_secs_f64());
    }
}
