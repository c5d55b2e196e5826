//! # fabula-db
//!
//! PostgreSQL persistence layer for fabula.
//!
//! This crate provides:
//! - Connection pool management
//! - The chunk source (`chunk` table, stable sequence ordering)
//! - The metadata repository with atomic protected-field upserts
//!
//! Schema DDL lives in `migrations/` and is applied with sqlx's migrator.
//!
//! ## Example
//!
//! ```rust,ignore
//! use fabula_db::{create_pool, PgChunkSource, PgMetadataRepository};
//! use fabula_core::ChunkSource;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = create_pool("postgres://localhost/fabula").await?;
//!     let chunks = PgChunkSource::new(pool.clone());
//!
//!     let pending = chunks.list_missing_metadata().await?;
//!     println!("{} chunks awaiting enrichment", pending.len());
//!     Ok(())
//! }
//! ```

pub mod chunks;
pub mod metadata;
pub mod pool;

// Re-export core types
pub use fabula_core::*;

pub use chunks::PgChunkSource;
pub use metadata::PgMetadataRepository;
pub use pool::{create_pool, create_pool_with_config, PoolConfig};
