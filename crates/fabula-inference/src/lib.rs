//! # fabula-inference
//!
//! Generation backend implementations for the fabula enrichment pipeline.
//!
//! This crate provides:
//! - Ollama implementation of [`fabula_core::GenerationBackend`] with
//!   schema-constrained structured output
//! - Deterministic mock backend for orchestrator and pipeline tests
//!
//! Backends are stateless per call and never retry internally; the
//! orchestrator in `fabula-enrich` owns retry and backoff policy.
//!
//! # Example
//!
//! ```rust,no_run
//! use fabula_inference::OllamaBackend;
//! use fabula_core::{schema, GenerationBackend};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = OllamaBackend::from_env();
//!     let response = backend
//!         .generate_structured(
//!             "You extract metadata.",
//!             "...",
//!             &schema::json_schema(schema::SeasonEpisodeInclusion::BOTH),
//!         )
//!         .await
//!         .unwrap();
//!     println!("{}", response.raw);
//! }
//! ```

pub mod mock;
pub mod ollama;

pub use mock::{MockGenerationBackend, MockOutcome};
pub use ollama::OllamaBackend;
