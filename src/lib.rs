#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, RabbitMQ in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Split Crawler
//!
//! Queue-driven crawl pipeline for a paginated article collection.
//!
//! ## Overview
//!
//! A crawl job names a page size. The planner asks the source for the total
//! item count and publishes one split message per `page_size` pages to the work
//! queue. Executors consume one split at a time, fetch its page range, write a
//! combined artifact plus a summary and announce the split on the completion
//! queue. Downstream, the enrichment worker annotates every artifact and the
//! loader upserts the annotated records into the document store, keeping a
//! ledger of files it has handled.
//!
//! ## Module Organization
//!
//! - [`messaging`] - Broker sessions, the connection manager and queue messages
//! - [`jobs`] - Crawl job store (PostgreSQL and in-memory)
//! - [`source`] - Paginated article source
//! - [`orchestration`] - Split planner, split executor and completion publisher
//! - [`storage`] - Artifact files and the processed-file ledger
//! - [`downstream`] - Entity enrichment, normalization and document loading
//! - [`config`] - YAML configuration with environment overrides
//! - [`database`] - Connection pool and migrations
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Delivery guarantees
//!
//! Splits are delivered at least once. Every stage after the planner is
//! idempotent per `(jobId, splitNumber)`: artifacts are overwritten with the
//! same name, the ledger skips handled files and documents are upserted by DOI.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use split_crawler::config::ConfigManager;
//! use split_crawler::messaging::{ConnectionManager, RabbitMqConnector};
//! use split_crawler::orchestration::SplitExecutor;
//! use split_crawler::source::HttpArticleSource;
//! use split_crawler::storage::ArtifactStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let config = manager.config();
//!
//! let connector = RabbitMqConnector::new(&config.broker.url, "split-executor");
//! let connections = Arc::new(ConnectionManager::new(Arc::new(connector), config.broker.clone()));
//! let executor = SplitExecutor::new(
//!     Arc::new(HttpArticleSource::new(&config.source)?),
//!     ArtifactStore::new(&config.storage.raw_dir),
//!     connections,
//!     config.executor.clone(),
//! );
//!
//! let (_stop, shutdown) = tokio::sync::watch::channel(false);
//! executor.run(shutdown).await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod database;
pub mod downstream;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod messaging;
pub mod orchestration;
pub mod source;
pub mod storage;
pub mod test_helpers;

pub use config::{ConfigManager, CrawlerConfig};
pub use error::{CrawlerError, Result};
pub use messaging::{CompletionMessage, ConnectionManager, SplitMessage};
pub use orchestration::{split_count, SplitExecutor, SplitPlanner};
