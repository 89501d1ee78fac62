//! Opaque "text in, entities out" capability and its HTTP client

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::config::EnrichmentConfig;

/// A named entity found in a text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub text: String,
    pub label: String,
}

impl Entity {
    pub fn new(text: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            label: label.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum AnnotationError {
    #[error("HTTP client could not be built: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Annotator request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("Annotator returned HTTP {status}")]
    Status { status: u16 },

    #[error("Annotator response is not a list of entities: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait EntityAnnotator: Send + Sync {
    async fn annotate(&self, text: &str) -> Result<Vec<Entity>, AnnotationError>;
}

/// POSTs `{"text": ...}` and expects `[{"text": ..., "label": ...}]`
#[derive(Debug, Clone)]
pub struct HttpEntityAnnotator {
    client: reqwest::Client,
    url: String,
}

impl HttpEntityAnnotator {
    pub fn new(config: &EnrichmentConfig) -> Result<Self, AnnotationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(AnnotationError::Client)?;
        Ok(Self::with_client(client, &config.annotator_url))
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl EntityAnnotator for HttpEntityAnnotator {
    async fn annotate(&self, text: &str) -> Result<Vec<Entity>, AnnotationError> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "text": text }))
            .send()
            .await
            .map_err(AnnotationError::Request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnnotationError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(AnnotationError::Request)?;
        serde_json::from_slice(&body).map_err(|e| AnnotationError::InvalidResponse(e.to_string()))
    }
}
