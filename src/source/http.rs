//! HTTP implementation of [`ArticleSource`] over `reqwest`

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::{parse_total, ArticleSource, SourceError, SourcePage};
use crate::config::SourceConfig;

/// Source whose configured URL is page 0 (`.../0`); page N lives at `.../N`
#[derive(Debug, Clone)]
pub struct HttpArticleSource {
    client: reqwest::Client,
    count_url: String,
    page_base: String,
}

impl HttpArticleSource {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(SourceError::Client)?;
        Ok(Self::with_client(client, &config.api_url))
    }

    pub fn with_client(client: reqwest::Client, api_url: &str) -> Self {
        let trimmed = api_url.trim_end_matches('/');
        let page_base = trimmed.strip_suffix("/0").unwrap_or(trimmed).to_string();
        Self {
            client,
            count_url: api_url.to_string(),
            page_base,
        }
    }

    pub fn page_url(&self, page: u64) -> String {
        format!("{}/{}", self.page_base, page)
    }

    async fn get_json(&self, url: &str, page: u64) -> Result<Value, SourceError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| SourceError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|source| SourceError::Request {
            url: url.to_string(),
            source,
        })?;
        serde_json::from_slice(&body).map_err(|e| SourceError::malformed(page, e.to_string()))
    }
}

#[async_trait]
impl ArticleSource for HttpArticleSource {
    async fn total_count(&self) -> u64 {
        let body = match self.get_json(&self.count_url, 0).await {
            Ok(body) => body,
            Err(e) => {
                error!(
                    url = %self.count_url,
                    error = %e,
                    "Error calling article source for total count"
                );
                return 0;
            }
        };

        match parse_total(&body) {
            Some(total) => {
                info!(total = total, "Total articles found");
                total
            }
            None => {
                warn!(url = %self.count_url, "Unexpected count response structure");
                0
            }
        }
    }

    async fn fetch_page(&self, page: u64) -> Result<SourcePage, SourceError> {
        let url = self.page_url(page);
        debug!(page = page, url = %url, "Requesting page");
        let body = self.get_json(&url, page).await?;
        SourcePage::from_value(page, body)
    }
}
