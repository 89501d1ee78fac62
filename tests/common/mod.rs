//! Shared setup for the integration tests: an in-memory broker, temp artifact
//! directories and configurations tuned for fast runs.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use split_crawler::config::{BrokerConfig, ExecutorConfig};
use split_crawler::messaging::{ConnectionManager, InMemoryBroker, Session, SessionPurpose};
use split_crawler::orchestration::SplitExecutor;
use split_crawler::storage::ArtifactStore;
use split_crawler::test_helpers::ScriptedSource;
use tempfile::TempDir;

pub const WORK_QUEUE: &str = "crawl_splits";
pub const COMPLETION_QUEUE: &str = "crawl_splits_downloaded";
pub const DEAD_LETTER_QUEUE: &str = "crawl_splits_dlq";

pub const WAIT: Duration = Duration::from_millis(20);

/// No page delay and a 1ms retry backoff
pub fn fast_executor_config() -> ExecutorConfig {
    ExecutorConfig {
        page_retry_backoff_ms: 1,
        page_delay_ms: 0,
        ..ExecutorConfig::default()
    }
}

pub fn broker_config() -> BrokerConfig {
    BrokerConfig {
        poll_wait_ms: 20,
        ..BrokerConfig::default()
    }
}

pub struct ExecutorHarness {
    pub dir: TempDir,
    pub broker: InMemoryBroker,
    pub connections: Arc<ConnectionManager>,
    pub source: Arc<ScriptedSource>,
    pub raw: ArtifactStore,
    pub executor: SplitExecutor,
}

impl ExecutorHarness {
    pub fn new(source: ScriptedSource) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let raw = ArtifactStore::new(dir.path().join("raw"));
        Self::with_store(dir, raw, source)
    }

    /// Harness running `config` instead of the fast test timings
    pub fn with_config(source: ScriptedSource, config: ExecutorConfig) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let raw = ArtifactStore::new(dir.path().join("raw"));
        Self::build(dir, raw, source, config)
    }

    pub fn with_store(dir: TempDir, raw: ArtifactStore, source: ScriptedSource) -> Self {
        Self::build(dir, raw, source, fast_executor_config())
    }

    fn build(
        dir: TempDir,
        raw: ArtifactStore,
        source: ScriptedSource,
        config: ExecutorConfig,
    ) -> Self {
        let broker = InMemoryBroker::new();
        let connections = Arc::new(ConnectionManager::new(
            Arc::new(broker.clone()),
            broker_config(),
        ));
        let source = Arc::new(source);
        let executor = SplitExecutor::new(
            source.clone(),
            raw.clone(),
            connections.clone(),
            config,
        );
        Self {
            dir,
            broker,
            connections,
            source,
            raw,
            executor,
        }
    }

    pub async fn consume_session(&self) -> Session {
        self.connections
            .acquire(SessionPurpose::Consume)
            .await
            .expect("consume session")
    }
}
