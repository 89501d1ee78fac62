//! # Downstream Stages
//!
//! What happens to a split after its completion message: entity enrichment of
//! the raw artifact, then a ledger-driven load of the augmented artifacts into
//! the document store.
//!
//! - [`EntityEnrichmentWorker`] consumes completion messages and writes augmented artifacts
//! - [`DocumentLoader`] normalizes unprocessed augmented artifacts and upserts them,
//!   recording handled files in the [`ProcessedLedger`](crate::storage::ProcessedLedger)

pub mod annotator;
pub mod document_sink;
pub mod enrichment;
pub mod loader;
pub mod transform;

pub use annotator::{AnnotationError, Entity, EntityAnnotator, HttpEntityAnnotator};
pub use document_sink::{DocumentSink, PgDocumentSink};
pub use enrichment::EntityEnrichmentWorker;
pub use loader::{DocumentLoader, LoadReport};
pub use transform::ArticleNormalizer;
