//! # fabula-core
//!
//! Core types, traits, and the metadata schema contract for the fabula
//! narrative-enrichment pipeline.
//!
//! This crate provides the foundational data structures and trait
//! definitions the other fabula crates depend on.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod schema;
pub mod tokenizer;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, GenerationError, GenerationErrorKind, Result, ValidationError};
pub use models::*;
pub use tokenizer::{estimate_tokens, TiktokenTokenizer, Tokenizer};
pub use traits::*;
