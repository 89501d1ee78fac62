//! # Crate Error Types
//!
//! Every component error converges here so the long-running loops can log a
//! single error type and decide whether to retry.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::downstream::AnnotationError;
use crate::messaging::MessagingError;
use crate::source::SourceError;

#[derive(Error, Debug)]
pub enum CrawlerError {
    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Annotation error: {0}")]
    Annotation(#[from] AnnotationError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Job store error: {0}")]
    JobStore(String),

    #[error("Document sink error: {0}")]
    DocumentSink(String),
}

impl CrawlerError {
    /// Wrap an I/O failure with the path it happened on
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

pub type Result<T> = std::result::Result<T, CrawlerError>;
