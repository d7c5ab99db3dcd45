pub mod feed_fetcher;
pub mod geo_provision;
pub mod geo_service;
pub mod ingest_engine;
pub mod orchestrator;
pub mod persister;

pub use orchestrator::RunOrchestrator;
