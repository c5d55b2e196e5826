//! Core traits for fabula abstractions.
//!
//! These traits define the seams between the pipeline and its
//! collaborators (chunk store, metadata store, generative service),
//! enabling pluggable backends and testability.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{GenerationError, Result};
use crate::models::{Chunk, ChunkMetadata, StructuredResponse, ValidatedMetadata};

// =============================================================================
// CHUNK SOURCE
// =============================================================================

/// Ordered store of narrative chunks.
///
/// Implementations must expose stable `seq` ordering: `get_range`,
/// `preceding` and `following` return chunks sorted by sequence position.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// Fetch a chunk by ID.
    async fn get_chunk(&self, id: Uuid) -> Result<Chunk>;

    /// Fetch a chunk by sequence position, if one exists there.
    async fn get_by_seq(&self, seq: i64) -> Result<Option<Chunk>>;

    /// Fetch all chunks with `start_seq <= seq <= end_seq`, ascending.
    async fn get_range(&self, start_seq: i64, end_seq: i64) -> Result<Vec<Chunk>>;

    /// Fetch up to `limit` chunks with `seq < before`, descending from
    /// the boundary (nearest neighbor first).
    async fn preceding(&self, before: i64, limit: i64) -> Result<Vec<Chunk>>;

    /// Fetch up to `limit` chunks with `seq > after`, ascending from the
    /// boundary (nearest neighbor first).
    async fn following(&self, after: i64, limit: i64) -> Result<Vec<Chunk>>;

    /// List every chunk ID in sequence order.
    async fn list_all_ids(&self) -> Result<Vec<Uuid>>;

    /// List IDs of chunks with no metadata record, in sequence order.
    async fn list_missing_metadata(&self) -> Result<Vec<Uuid>>;
}

// =============================================================================
// METADATA REPOSITORY
// =============================================================================

/// Store for chunk metadata records.
#[async_trait]
pub trait MetadataRepository: Send + Sync {
    /// Fetch the metadata record for a chunk, if one exists.
    async fn get(&self, chunk_id: Uuid) -> Result<Option<ChunkMetadata>>;

    /// Idempotent upsert of validated metadata for a chunk.
    ///
    /// Protected fields (`season`, `episode`) are written only when
    /// currently null in storage; all other field groups are overwritten
    /// wholesale. The write is all-or-nothing per chunk and the
    /// protected-field check is atomic with the write (no read-then-write
    /// race under concurrent upserts to the same chunk).
    async fn upsert(&self, chunk_id: Uuid, metadata: &ValidatedMetadata) -> Result<()>;

    /// Whether a metadata record exists for the chunk.
    async fn exists(&self, chunk_id: Uuid) -> Result<bool>;
}

// =============================================================================
// GENERATION BACKEND
// =============================================================================

/// Backend for structured text generation (LLM).
///
/// A single call to the external service. Implementations must not retry
/// internally (retry policy lives in the orchestrator) and must hold no
/// state between calls, so repeated invocation is always safe.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate a structured payload for the given prompt under the given
    /// JSON Schema. Token usage is reported in both the success envelope
    /// and the failure, since partial usage may be billed.
    async fn generate_structured(
        &self,
        system: &str,
        prompt: &str,
        schema: &serde_json::Value,
    ) -> std::result::Result<StructuredResponse, GenerationError>;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}
