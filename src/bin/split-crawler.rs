//! # Split Crawler
//!
//! One binary, one subcommand per pipeline stage. Each long-running stage stops
//! on Ctrl-C after finishing the unit of work in hand.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};

use split_crawler::config::{ConfigManager, CrawlerConfig};
use split_crawler::database::connect_and_migrate;
use split_crawler::downstream::{
    DocumentLoader, EntityEnrichmentWorker, HttpEntityAnnotator, PgDocumentSink,
};
use split_crawler::jobs::PgJobStore;
use split_crawler::logging::init_structured_logging;
use split_crawler::messaging::{ConnectionManager, RabbitMqConnector};
use split_crawler::orchestration::{sleep_or_shutdown, SplitExecutor, SplitPlanner};
use split_crawler::source::HttpArticleSource;
use split_crawler::storage::{ArtifactStore, ProcessedLedger};

#[derive(Parser)]
#[command(name = "split-crawler")]
#[command(about = "Queue-driven split crawl pipeline")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Directory holding split-crawler.yaml (default: ./config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Environment section to apply (default: SPLIT_CRAWLER_ENV, APP_ENV or development)
    #[arg(short, long)]
    environment: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Claim crawl jobs and publish their splits
    Planner,

    /// Consume splits, crawl their pages and write artifacts
    Executor,

    /// Annotate completed splits with named entities
    Enricher,

    /// Load augmented artifacts into the document store
    Loader {
        /// Repeat the pass every N seconds instead of running once
        #[arg(long)]
        interval_seconds: Option<u64>,
    },

    /// Load, validate and print the effective configuration
    ValidateConfig,
}

impl Commands {
    fn component(&self) -> &'static str {
        match self {
            Commands::Planner => "split-planner",
            Commands::Executor => "split-executor",
            Commands::Enricher => "entity-enricher",
            Commands::Loader { .. } => "document-loader",
            Commands::ValidateConfig => "config-validator",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let component = cli.command.component();
    init_structured_logging(component);

    let environment = cli
        .environment
        .clone()
        .unwrap_or_else(ConfigManager::detect_environment);
    let manager = ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), &environment)
        .context("failed to load configuration")?;
    let config = manager.config().clone();

    if let Commands::ValidateConfig = cli.command {
        println!("{}", serde_json::to_string_pretty(&manager.debug_config())?);
        info!(environment = %manager.environment(), "✅ Configuration is valid");
        return Ok(());
    }

    let shutdown = shutdown_signal();

    let result = match cli.command {
        Commands::Planner => run_planner(&config, component, shutdown).await,
        Commands::Executor => run_executor(&config, component, shutdown).await,
        Commands::Enricher => run_enricher(&config, component, shutdown).await,
        Commands::Loader { interval_seconds } => {
            run_loader(&config, interval_seconds, shutdown).await
        }
        Commands::ValidateConfig => Ok(()),
    };

    if let Err(e) = &result {
        error!(component = component, error = %e, "Component failed");
    }
    result
}

/// Flip a watch channel when Ctrl-C arrives
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("🛑 Shutdown requested");
            let _ = tx.send(true);
        }
    });
    rx
}

fn connection_manager(config: &CrawlerConfig, component: &str) -> Arc<ConnectionManager> {
    let connector = RabbitMqConnector::new(&config.broker.url, component);
    Arc::new(ConnectionManager::new(Arc::new(connector), config.broker.clone()))
}

async fn run_planner(
    config: &CrawlerConfig,
    component: &str,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let database = connect_and_migrate(&config.database).await?;
    let claimer_id = format!("{component}-{}", uuid::Uuid::new_v4());
    let jobs = PgJobStore::new(
        database.pool().clone(),
        claimer_id,
        Duration::from_secs(config.planner.claim_timeout_seconds),
    );
    let planner = SplitPlanner::new(
        Arc::new(jobs),
        Arc::new(HttpArticleSource::new(&config.source)?),
        connection_manager(config, component),
        config.planner.clone(),
    );

    planner.run(shutdown).await;
    database.close().await;
    Ok(())
}

async fn run_executor(
    config: &CrawlerConfig,
    component: &str,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let executor = SplitExecutor::new(
        Arc::new(HttpArticleSource::new(&config.source)?),
        ArtifactStore::new(&config.storage.raw_dir),
        connection_manager(config, component),
        config.executor.clone(),
    );
    executor.run(shutdown).await;
    Ok(())
}

async fn run_enricher(
    config: &CrawlerConfig,
    component: &str,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let worker = EntityEnrichmentWorker::new(
        Arc::new(HttpEntityAnnotator::new(&config.enrichment)?),
        ArtifactStore::new(&config.storage.raw_dir),
        ArtifactStore::new(&config.storage.augmented_dir),
        connection_manager(config, component),
        config.enrichment.text_field.clone(),
    );
    worker.run(shutdown).await;
    Ok(())
}

async fn run_loader(
    config: &CrawlerConfig,
    interval_seconds: Option<u64>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let database = connect_and_migrate(&config.database).await?;
    let loader = DocumentLoader::new(
        &config.storage.augmented_dir,
        ProcessedLedger::new(config.storage.ledger_path()),
        Arc::new(PgDocumentSink::new(database.pool().clone())),
    );

    let outcome = async {
        loop {
            loader.run_once().await?;
            let Some(seconds) = interval_seconds else {
                return Ok::<(), anyhow::Error>(());
            };
            if sleep_or_shutdown(Duration::from_secs(seconds), &mut shutdown).await {
                return Ok(());
            }
        }
    }
    .await;

    database.close().await;
    outcome
}
