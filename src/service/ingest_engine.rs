//! Novelty detection, enrichment and batch assembly for one run.
//!
//! The engine owns the run-local working set. Feeds may be fetched
//! concurrently, but their results are consumed one feed at a time in
//! configured order, and every novel IP is added to the working set before
//! the next feed is looked at. An IP listed by several feeds is therefore
//! enriched and marked at most once per run, attributed to the first feed.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::feed_fetcher::FeedSource;
use super::geo_service::{GeoLocator, GeoLookup};
use crate::metrics::{FeedStats, RunStats};
use crate::model::{canonical_ip, Feed, Outcome, ProcessedBatch, ThreatBatch, ThreatRecord};

type Clock = Box<dyn Fn() -> i64 + Send + Sync>;

/// Mutable state threaded through every feed of a run.
#[derive(Debug, Default)]
pub struct IngestState {
    pub working_set: HashSet<String>,
    pub threats: ThreatBatch,
    pub processed: ProcessedBatch,
    pub stats: RunStats,
}

impl IngestState {
    /// Seeds the working set with the IPs persisted by earlier runs. Stored keys
    /// are compared in the same canonical form as feed lines.
    pub fn new(processed_ips: HashSet<String>) -> Self {
        let stats = RunStats {
            processed_loaded: processed_ips.len(),
            ..Default::default()
        };
        Self {
            working_set: processed_ips.iter().map(|ip| canonical_ip(ip)).collect(),
            stats,
            ..Default::default()
        }
    }
}

pub struct IngestEngine<'a> {
    geo: &'a dyn GeoLocator,
    clock: Clock,
    feed_concurrency: usize,
}

impl<'a> IngestEngine<'a> {
    pub fn new(geo: &'a dyn GeoLocator) -> Self {
        Self {
            geo,
            clock: Box::new(|| Utc::now().timestamp_millis()),
            feed_concurrency: 1,
        }
    }

    /// Millisecond clock used for record timestamps.
    #[cfg(test)]
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_feed_concurrency(mut self, concurrency: usize) -> Self {
        self.feed_concurrency = concurrency.max(1);
        self
    }

    /// Fetches every feed and folds the results into `state`, in feed order.
    pub async fn ingest(&self, feeds: &[Feed], source: &dyn FeedSource, state: &mut IngestState) {
        let mut fetched = stream::iter(feeds)
            .map(|feed| async move { (feed, source.fetch(&feed.url).await) })
            .buffered(self.feed_concurrency);

        while let Some((feed, outcome)) = fetched.next().await {
            let (ips, failed) = match outcome {
                Outcome::Ok(ips) => (ips, false),
                Outcome::Degraded { fallback, reason } => {
                    warn!("Feed '{}' unavailable this run: {}", feed.attack_type, reason);
                    (fallback, true)
                }
                Outcome::Fatal(e) => {
                    warn!("Feed '{}' failed: {}", feed.attack_type, e);
                    (HashSet::new(), true)
                }
            };

            let mut feed_stats = self.process_feed(&feed.attack_type, ips, state);
            feed_stats.fetch_failed = failed;
            state.stats.record_feed(feed_stats);
        }
    }

    /// Handles one feed's IP set against the current working set.
    pub fn process_feed(
        &self,
        attack_type: &str,
        feed_ips: HashSet<String>,
        state: &mut IngestState,
    ) -> FeedStats {
        let mut stats = FeedStats::new(attack_type);
        stats.fetched = feed_ips.len();

        let mut novel: Vec<String> = feed_ips
            .into_iter()
            .filter(|ip| !state.working_set.contains(ip))
            .collect();
        novel.sort();
        stats.new_ips = novel.len();
        info!("Found {} new IPs for type '{}'", novel.len(), attack_type);

        for ip in novel {
            match self.geo.lookup(&ip) {
                GeoLookup::Found(geo) => {
                    let record = ThreatRecord::from_enrichment(&ip, &geo, attack_type, (self.clock)());
                    match record {
                        Some(record) => {
                            if state.threats.push_record(record) {
                                stats.geolocated += 1;
                            } else {
                                warn!("Duplicate threat key for {}, record dropped", ip);
                            }
                        }
                        None => debug!("No country code for {}, no record created", ip),
                    }
                }
                GeoLookup::NotFound | GeoLookup::Incomplete => {}
                GeoLookup::Failed(reason) => {
                    debug!("Lookup failed for {}: {}", ip, reason);
                    state.stats.lookup_failures += 1;
                }
            }

            // Marked whatever the lookup said: a miss now is a miss on every later run.
            state.processed.mark(&ip);
            state.working_set.insert(ip);
        }

        stats
    }
}
