//! Document store keyed by DOI

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{debug, error};

use crate::constants::fields;
use crate::error::{CrawlerError, Result};

#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Upsert documents by `rel_doi`, merging fields into an existing document.
    /// Documents without a DOI are always inserted. Returns the number written.
    async fn upsert(&self, source_file: &str, documents: &[Value]) -> Result<usize>;
}

/// Postgres-backed sink over the `documents` table
#[derive(Debug, Clone)]
pub struct PgDocumentSink {
    pool: PgPool,
}

impl PgDocumentSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn doi_of(document: &Value) -> Option<&str> {
    document
        .get(fields::REL_DOI)
        .and_then(Value::as_str)
        .filter(|doi| !doi.trim().is_empty())
}

#[async_trait]
impl DocumentSink for PgDocumentSink {
    async fn upsert(&self, source_file: &str, documents: &[Value]) -> Result<usize> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            error!(error = %e, "Failed to open document transaction");
            CrawlerError::DocumentSink(e.to_string())
        })?;

        for document in documents {
            let result = match doi_of(document) {
                Some(doi) => {
                    sqlx::query(
                        r#"
                        INSERT INTO documents (rel_doi, body, source_file)
                        VALUES ($1, $2, $3)
                        ON CONFLICT (rel_doi) DO UPDATE
                        SET body = documents.body || EXCLUDED.body,
                            source_file = EXCLUDED.source_file,
                            updated_at = NOW()
                        "#,
                    )
                    .bind(doi)
                    .bind(document)
                    .bind(source_file)
                    .execute(&mut *tx)
                    .await
                }
                None => {
                    sqlx::query("INSERT INTO documents (body, source_file) VALUES ($1, $2)")
                        .bind(document)
                        .bind(source_file)
                        .execute(&mut *tx)
                        .await
                }
            };
            result.map_err(|e| {
                error!(source_file = source_file, error = %e, "Document upsert failed");
                CrawlerError::DocumentSink(e.to_string())
            })?;
        }

        tx.commit()
            .await
            .map_err(|e| CrawlerError::DocumentSink(e.to_string()))?;
        debug!(source_file = source_file, documents = documents.len(), "Documents upserted");
        Ok(documents.len())
    }
}
