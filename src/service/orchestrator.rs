//! Run lifecycle: preconditions, ingestion and persistence for one run.
//!
//! `Init → PreconditionsChecked → ProcessedLoaded → FeedsIngested → Persisted → Done`.
//! A run can only abort before any data is read: from `Init` when the
//! configuration or store connection is unusable, and from
//! `PreconditionsChecked` when the GeoIP database cannot be opened.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::feed_fetcher::{FeedSource, HttpFeedFetcher};
use super::geo_provision::{ensure_database, GeoDbConfig};
use super::geo_service::{GeoLocator, GeoService};
use super::ingest_engine::{IngestEngine, IngestState};
use super::persister::{PersistReport, Persister};
use crate::cli::RunConfig;
use crate::dao::{self, KvStore, ProcessedStore};
use crate::error::{IngestError, Result};
use crate::metrics::RunStats;
use crate::model::Feed;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RunState {
    Init,
    PreconditionsChecked,
    ProcessedLoaded,
    FeedsIngested,
    Persisted,
    Done,
    Aborted(String),
}

impl RunState {
    pub fn can_transition_to(&self, next: &RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Init, PreconditionsChecked)
                | (Init, Aborted(_))
                | (PreconditionsChecked, ProcessedLoaded)
                | (PreconditionsChecked, Aborted(_))
                | (ProcessedLoaded, FeedsIngested)
                | (FeedsIngested, Persisted)
                | (Persisted, Done)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Aborted(_))
    }
}

/// Everything known about a finished run.
#[derive(Debug)]
pub struct RunReport {
    pub state: RunState,
    pub stats: RunStats,
    pub persist: Option<PersistReport>,
    /// The processed set could not be read and the run started from empty
    pub processed_load_degraded: bool,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.state == RunState::Done
    }

    pub fn print_summary(&self) {
        match &self.state {
            RunState::Aborted(reason) => {
                error!("Run aborted: {}", reason);
                return;
            }
            RunState::Done => info!("ThreatStream update run finished"),
            other => warn!("Run ended in unexpected state {:?}", other),
        }

        self.stats.print_summary(self.elapsed);
        if self.processed_load_degraded {
            warn!("  Processed set could not be loaded; IPs may have been reprocessed");
        }
        if let Some(persist) = &self.persist {
            if !persist.fully_applied() {
                warn!("  One or more store writes failed");
            }
            if persist.is_inconsistent() {
                warn!(
                    "  Only one of the two writes succeeded (threats: {:?}, markers: {:?})",
                    persist.threats, persist.processed
                );
            }
        }
    }
}

pub struct RunOrchestrator {
    state: RunState,
    started: Instant,
}

impl Default for RunOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl RunOrchestrator {
    pub fn new() -> Self {
        Self {
            state: RunState::Init,
            started: Instant::now(),
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Moves to `next` if the transition is legal; illegal moves are logged and ignored.
    fn enter(&mut self, next: RunState) -> bool {
        if self.state.is_terminal() {
            error!("Run already ended in {:?}, ignoring {:?}", self.state, next);
            return false;
        }
        if !self.state.can_transition_to(&next) {
            error!("Illegal run state transition {:?} -> {:?}", self.state, next);
            return false;
        }
        debug!("Run state {:?} -> {:?}", self.state, next);
        self.state = next;
        true
    }

    fn abort(mut self, err: IngestError) -> RunReport {
        error!("{}. Aborting.", err);
        self.enter(RunState::Aborted(err.to_string()));
        RunReport {
            state: self.state,
            stats: RunStats::new(),
            persist: None,
            processed_load_degraded: false,
            elapsed: self.started.elapsed(),
        }
    }

    /// Full run against the configured store, feeds and GeoIP database.
    pub async fn run(mut self, config: &RunConfig) -> RunReport {
        info!(
            "Starting ThreatStream update run at {} UTC",
            Utc::now().format("%Y-%m-%d %H:%M:%S")
        );

        let (store, fetcher) = match Self::connect(config).await {
            Ok(parts) => parts,
            Err(e) => return self.abort(e),
        };
        self.enter(RunState::PreconditionsChecked);

        let geo = match Self::open_geo(&config.geo).await {
            Ok(geo) => geo,
            Err(e) => return self.abort(e),
        };

        let report = self
            .ingest_and_persist(store, &fetcher, &geo, &config.feeds, config.feed_concurrency)
            .await;
        drop(geo);
        report
    }

    /// Runs with components the caller has already connected and opened.
    #[cfg(test)]
    pub async fn run_with(
        mut self,
        store: Arc<dyn KvStore>,
        source: &dyn FeedSource,
        geo: &dyn GeoLocator,
        feeds: &[Feed],
        feed_concurrency: usize,
    ) -> RunReport {
        self.enter(RunState::PreconditionsChecked);
        self.ingest_and_persist(store, source, geo, feeds, feed_concurrency)
            .await
    }

    async fn connect(config: &RunConfig) -> Result<(Arc<dyn KvStore>, HttpFeedFetcher)> {
        let store_config = config.store_config()?;
        let fetcher = HttpFeedFetcher::new(config.feed_timeout)?;
        let store = dao::connect(&store_config).await?;
        info!("Store initialized ({})", store.name());
        Ok((store, fetcher))
    }

    async fn open_geo(config: &GeoDbConfig) -> Result<GeoService> {
        ensure_database(config).await?;
        let path = config.path.clone();
        tokio::task::spawn_blocking(move || GeoService::open(&path))
            .await
            .map_err(|e| IngestError::GeoIp(format!("database open task failed: {}", e)))?
    }

    async fn ingest_and_persist(
        mut self,
        store: Arc<dyn KvStore>,
        source: &dyn FeedSource,
        geo: &dyn GeoLocator,
        feeds: &[Feed],
        feed_concurrency: usize,
    ) -> RunReport {
        let store_name = store.name().to_string();
        let processed_store = ProcessedStore::new(store);

        let loaded = processed_store.load_processed().await;
        let processed_load_degraded = loaded.is_degraded();
        let processed_ips = loaded.into_result().unwrap_or_else(|e| {
            warn!("Processed set unavailable, continuing with an empty set: {}", e);
            Default::default()
        });
        self.enter(RunState::ProcessedLoaded);

        info!("--- Processing {} threat feeds ---", feeds.len());
        let mut state = IngestState::new(processed_ips);
        IngestEngine::new(geo)
            .with_feed_concurrency(feed_concurrency)
            .ingest(feeds, source, &mut state)
            .await;
        self.enter(RunState::FeedsIngested);

        info!("--- Pushing updates to {} ---", store_name);
        let persist = Persister::new(processed_store)
            .persist(&state.threats, &state.processed)
            .await;
        state.stats.threats_pushed = persist.threats.applied();
        state.stats.ips_marked = persist.processed.applied();
        self.enter(RunState::Persisted);
        self.enter(RunState::Done);

        RunReport {
            state: self.state,
            stats: state.stats,
            persist: Some(persist),
            processed_load_degraded,
            elapsed: self.started.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Args, FileConfig};
    use crate::dao::testing::MemoryStore;
    use crate::model::BatchOutcome;
    use crate::service::testing::{feed_url, FakeFeeds, FakeGeo};
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn feeds(names: &[&str]) -> Vec<Feed> {
        names.iter().map(|n| Feed::new(*n, feed_url(n))).collect()
    }

    #[test]
    fn test_transitions() {
        use RunState::*;
        assert!(Init.can_transition_to(&PreconditionsChecked));
        assert!(Init.can_transition_to(&Aborted("x".into())));
        assert!(PreconditionsChecked.can_transition_to(&Aborted("x".into())));
        assert!(!ProcessedLoaded.can_transition_to(&Aborted("x".into())));
        assert!(!Init.can_transition_to(&Done));
        assert!(!Done.can_transition_to(&Init));
        assert!(Done.is_terminal());
        assert!(!Persisted.is_terminal());
    }

    #[test]
    fn test_illegal_transition_is_ignored() {
        let mut orchestrator = RunOrchestrator::new();
        assert!(!orchestrator.enter(RunState::FeedsIngested));
        assert_eq!(orchestrator.state(), &RunState::Init);
    }

    #[test]
    fn test_finished_run_accepts_no_transitions() {
        let mut orchestrator = RunOrchestrator::new();
        orchestrator.state = RunState::Aborted("no store".to_string());
        assert!(!orchestrator.enter(RunState::PreconditionsChecked));
        assert!(!orchestrator.enter(RunState::Aborted("again".to_string())));
        assert_eq!(orchestrator.state(), &RunState::Aborted("no store".to_string()));
    }

    #[tokio::test]
    async fn test_scenario_overlapping_feeds() {
        let store = Arc::new(MemoryStore::new());
        let source = FakeFeeds::new()
            .with_feed("A", &["1.1.1.1", "2.2.2.2"])
            .with_feed("B", &["2.2.2.2", "3.3.3.3"]);
        let geo = FakeGeo::new().with("1.1.1.1", "AU").with("3.3.3.3", "FR");

        let report = RunOrchestrator::new()
            .run_with(store.clone(), &source, &geo, &feeds(&["A", "B"]), 2)
            .await;

        assert!(report.succeeded());
        assert_eq!(report.stats.total_new_ips(), 3);
        assert_eq!(report.stats.total_geolocated(), 2);
        assert_eq!(report.stats.threats_pushed, 2);
        assert_eq!(report.stats.ips_marked, 3);
        assert_eq!(store.paths_under("processed_ips").len(), 3);

        let mut threat_ips: Vec<String> = store
            .paths_under("threats")
            .iter()
            .filter_map(|p| store.get(p))
            .filter_map(|v| v["ip"].as_str().map(str::to_string))
            .collect();
        threat_ips.sort();
        assert_eq!(threat_ips, vec!["1.1.1.1", "3.3.3.3"]);
    }

    #[tokio::test]
    async fn test_scenario_nothing_new() {
        let store = Arc::new(MemoryStore::with_processed(&["1.1.1.1"]));
        let source = FakeFeeds::new().with_feed("A", &["1.1.1.1"]);
        let geo = FakeGeo::new().with("1.1.1.1", "AU");

        let report = RunOrchestrator::new()
            .run_with(store.clone(), &source, &geo, &feeds(&["A"]), 1)
            .await;

        assert!(report.succeeded());
        assert_eq!(report.stats.total_new_ips(), 0);
        assert_eq!(store.update_calls(), 0);
        assert_eq!(geo.total_calls(), 0);
        let persist = report.persist.unwrap();
        assert_eq!(persist.threats, BatchOutcome::Empty);
        assert_eq!(persist.processed, BatchOutcome::Empty);
    }

    #[tokio::test]
    async fn test_scenario_failing_feed() {
        let store = Arc::new(MemoryStore::new());
        let source = FakeFeeds::new()
            .with_failing_feed("A")
            .with_feed("B", &["5.5.5.5"]);
        let geo = FakeGeo::new().with("5.5.5.5", "BR");

        let report = RunOrchestrator::new()
            .run_with(store.clone(), &source, &geo, &feeds(&["A", "B"]), 2)
            .await;

        assert!(report.succeeded());
        assert_eq!(source.fetch_count(), 2);
        let threats = store.paths_under("threats");
        assert_eq!(threats.len(), 1);
        let record = store.get(&threats[0]).unwrap();
        assert_eq!(record["ip"], "5.5.5.5");
        assert_eq!(record["attack_type"], "B");
        assert!(report.stats.feed("A").unwrap().fetch_failed);
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let source = FakeFeeds::new().with_feed("A", &["1.1.1.1", "2.2.2.2"]);
        let geo = FakeGeo::new().with("1.1.1.1", "AU");

        let first = RunOrchestrator::new()
            .run_with(store.clone(), &source, &geo, &feeds(&["A"]), 1)
            .await;
        assert_eq!(first.stats.total_new_ips(), 2);

        let second = RunOrchestrator::new()
            .run_with(store.clone(), &source, &geo, &feeds(&["A"]), 1)
            .await;
        assert_eq!(second.stats.total_new_ips(), 0);
        assert_eq!(store.paths_under("threats").len(), 1);
        assert_eq!(geo.calls("1.1.1.1"), 1);
        assert_eq!(geo.calls("2.2.2.2"), 1);
    }

    #[tokio::test]
    async fn test_unreadable_processed_set_is_reported() {
        let store = Arc::new(MemoryStore::new());
        store.fail_reads(true);
        let source = FakeFeeds::new().with_feed("A", &["9.9.9.9"]);
        let geo = FakeGeo::new();

        let report = RunOrchestrator::new()
            .run_with(store.clone(), &source, &geo, &feeds(&["A"]), 1)
            .await;

        assert!(report.succeeded());
        assert!(report.processed_load_degraded);
        assert_eq!(report.stats.ips_marked, 1);
    }

    #[tokio::test]
    async fn test_marker_write_failure_still_completes() {
        let store = Arc::new(MemoryStore::new());
        store.fail_writes_under("processed_ips");
        let source = FakeFeeds::new().with_feed("A", &["1.1.1.1"]);
        let geo = FakeGeo::new().with("1.1.1.1", "AU");

        let report = RunOrchestrator::new()
            .run_with(store.clone(), &source, &geo, &feeds(&["A"]), 1)
            .await;

        assert_eq!(report.state, RunState::Done);
        assert_eq!(report.stats.threats_pushed, 1);
        assert_eq!(report.stats.ips_marked, 0);
        assert!(report.persist.unwrap().is_inconsistent());
    }

    #[tokio::test]
    async fn test_missing_store_url_aborts() {
        let config = Args::default().resolve(FileConfig::default()).unwrap();
        let report = RunOrchestrator::new().run(&config).await;

        assert!(matches!(report.state, RunState::Aborted(_)));
        assert!(!report.succeeded());
        assert!(report.persist.is_none());
    }

    #[tokio::test]
    async fn test_missing_credentials_aborts() {
        let args = Args {
            store_url: Some("https://demo.firebaseio.com".to_string()),
            credentials: Some(PathBuf::from("/nonexistent/service-account.json")),
            ..Default::default()
        };
        let config = args.resolve(FileConfig::default()).unwrap();
        let report = RunOrchestrator::new().run(&config).await;

        match report.state {
            RunState::Aborted(reason) => assert!(reason.contains("service account key")),
            other => panic!("unexpected state: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unavailable_geo_database_aborts_without_writes() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("store.db");
        let args = Args {
            store_url: Some(format!("sqlite://{}", db_path.display())),
            geoip_db: Some(dir.path().join("missing.mmdb")),
            ..Default::default()
        };
        let config = args.resolve(FileConfig::default()).unwrap();
        let report = RunOrchestrator::new().run(&config).await;

        assert!(matches!(report.state, RunState::Aborted(_)));
        assert_eq!(report.stats.total_new_ips(), 0);

        let store = crate::dao::SqliteStore::new(db_path.to_str().unwrap()).unwrap();
        assert_eq!(store.count("processed_ips").unwrap(), 0);
        assert_eq!(store.count("threats").unwrap(), 0);
    }
}
