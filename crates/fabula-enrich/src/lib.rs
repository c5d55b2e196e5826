//! # fabula-enrich
//!
//! The enrichment pipeline: context window assembly, prompt construction,
//! response validation, and batch orchestration.
//!
//! The pipeline per chunk is window -> prompt -> generate -> validate ->
//! persist. [`Enricher`] drives it over a selection of chunks in
//! sequential batches with bounded concurrency inside each batch.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fabula_enrich::{Enricher, EnrichConfig, Selection};
//! use fabula_db::{create_pool, PgChunkSource, PgMetadataRepository};
//! use fabula_inference::OllamaBackend;
//!
//! #[tokio::main]
//! async fn main() -> fabula_core::Result<()> {
//!     let pool = create_pool("postgres://localhost/fabula").await?;
//!     let enricher = Enricher::new(
//!         Arc::new(PgChunkSource::new(pool.clone())),
//!         Arc::new(PgMetadataRepository::new(pool)),
//!         Arc::new(OllamaBackend::from_env()),
//!         EnrichConfig::from_env(),
//!     );
//!     let report = enricher.run(Selection::MissingMetadata).await?;
//!     println!("persisted {} of {}", report.persisted, report.total_chunks);
//!     Ok(())
//! }
//! ```

pub mod orchestrator;
pub mod prompt;
pub mod testing;
pub mod validate;
pub mod window;

pub use orchestrator::{
    AbortHandle, ChunkFailure, CostAccumulator, EnrichConfig, Enricher, ReplicateMode, RunReport,
    Selection,
};
pub use validate::validate;
pub use window::WindowBuilder;
