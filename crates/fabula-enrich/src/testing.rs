//! In-memory fixtures for pipeline tests.
//!
//! Always compiled so integration tests and downstream crates can drive
//! the orchestrator without Postgres. Semantics mirror the `fabula-db`
//! implementations, including the protected-field upsert rule.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use fabula_core::{
    Chunk, ChunkMetadata, ChunkSource, Error, MetadataRepository, Result, ValidatedMetadata,
};

type MetadataStore = Arc<Mutex<HashMap<Uuid, ChunkMetadata>>>;

fn lock_poisoned() -> Error {
    Error::Internal("fixture lock poisoned".to_string())
}

// =============================================================================
// CHUNK SOURCE
// =============================================================================

/// In-memory [`ChunkSource`] keyed by sequence position.
#[derive(Clone)]
pub struct MemoryChunkSource {
    by_seq: Arc<Mutex<BTreeMap<i64, Chunk>>>,
    metadata: MetadataStore,
}

impl MemoryChunkSource {
    pub fn new() -> Self {
        Self {
            by_seq: Arc::new(Mutex::new(BTreeMap::new())),
            metadata: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Insert a chunk at `seq`, returning its generated ID.
    pub fn add_chunk(&self, seq: i64, content: &str) -> Uuid {
        let chunk = Chunk {
            id: Uuid::new_v4(),
            seq,
            content: content.to_string(),
        };
        let id = chunk.id;
        if let Ok(mut map) = self.by_seq.lock() {
            map.insert(seq, chunk);
        }
        id
    }

    /// ID of the chunk at `seq`, if present.
    pub fn id_at(&self, seq: i64) -> Option<Uuid> {
        self.by_seq.lock().ok()?.get(&seq).map(|c| c.id)
    }

    /// A metadata repository sharing this source's metadata store, so
    /// `list_missing_metadata` observes the repository's writes.
    pub fn metadata_repository(&self) -> MemoryMetadataRepository {
        MemoryMetadataRepository {
            records: Arc::clone(&self.metadata),
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for MemoryChunkSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChunkSource for MemoryChunkSource {
    async fn get_chunk(&self, id: Uuid) -> Result<Chunk> {
        let map = self.by_seq.lock().map_err(|_| lock_poisoned())?;
        map.values()
            .find(|c| c.id == id)
            .cloned()
            .ok_or(Error::ChunkNotFound(id))
    }

    async fn get_by_seq(&self, seq: i64) -> Result<Option<Chunk>> {
        let map = self.by_seq.lock().map_err(|_| lock_poisoned())?;
        Ok(map.get(&seq).cloned())
    }

    async fn get_range(&self, start_seq: i64, end_seq: i64) -> Result<Vec<Chunk>> {
        let map = self.by_seq.lock().map_err(|_| lock_poisoned())?;
        Ok(map.range(start_seq..=end_seq).map(|(_, c)| c.clone()).collect())
    }

    async fn preceding(&self, before: i64, limit: i64) -> Result<Vec<Chunk>> {
        let map = self.by_seq.lock().map_err(|_| lock_poisoned())?;
        Ok(map
            .range(..before)
            .rev()
            .take(limit.max(0) as usize)
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn following(&self, after: i64, limit: i64) -> Result<Vec<Chunk>> {
        let map = self.by_seq.lock().map_err(|_| lock_poisoned())?;
        Ok(map
            .range((after + 1)..)
            .take(limit.max(0) as usize)
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn list_all_ids(&self) -> Result<Vec<Uuid>> {
        let map = self.by_seq.lock().map_err(|_| lock_poisoned())?;
        Ok(map.values().map(|c| c.id).collect())
    }

    async fn list_missing_metadata(&self) -> Result<Vec<Uuid>> {
        let map = self.by_seq.lock().map_err(|_| lock_poisoned())?;
        let records = self.metadata.lock().map_err(|_| lock_poisoned())?;
        Ok(map
            .values()
            .filter(|c| !records.contains_key(&c.id))
            .map(|c| c.id)
            .collect())
    }
}

// =============================================================================
// METADATA REPOSITORY
// =============================================================================

/// In-memory [`MetadataRepository`] with the protected-field upsert rule.
#[derive(Clone)]
pub struct MemoryMetadataRepository {
    records: MetadataStore,
    unavailable: Arc<AtomicBool>,
}

impl MemoryMetadataRepository {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Simulate the store going down: every subsequent call fails with a
    /// pool-level error, which the orchestrator treats as fatal.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of a stored record (test assertions).
    pub fn snapshot(&self, chunk_id: Uuid) -> Option<ChunkMetadata> {
        self.records.lock().ok()?.get(&chunk_id).cloned()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Database(sqlx::Error::PoolClosed));
        }
        Ok(())
    }
}

impl Default for MemoryMetadataRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataRepository for MemoryMetadataRepository {
    async fn get(&self, chunk_id: Uuid) -> Result<Option<ChunkMetadata>> {
        self.check_available()?;
        let records = self.records.lock().map_err(|_| lock_poisoned())?;
        Ok(records.get(&chunk_id).cloned())
    }

    async fn upsert(&self, chunk_id: Uuid, metadata: &ValidatedMetadata) -> Result<()> {
        self.check_available()?;
        let mut records = self.records.lock().map_err(|_| lock_poisoned())?;
        let existing = records.get(&chunk_id);

        // COALESCE(existing, excluded): protected fields only transition
        // null -> non-null.
        let season = existing.and_then(|m| m.season).or(metadata.season);
        let episode = existing.and_then(|m| m.episode).or(metadata.episode);

        records.insert(
            chunk_id,
            ChunkMetadata {
                chunk_id,
                season,
                episode,
                structured: metadata.structured.clone(),
                source: metadata.source.clone(),
                last_updated: Utc::now(),
            },
        );
        Ok(())
    }

    async fn exists(&self, chunk_id: Uuid) -> Result<bool> {
        self.check_available()?;
        let records = self.records.lock().map_err(|_| lock_poisoned())?;
        Ok(records.contains_key(&chunk_id))
    }
}

// =============================================================================
// RECORDING WRAPPER
// =============================================================================

/// Wraps a repository and records every `upsert` call. Used to prove the
/// dry-run path never touches the store.
#[derive(Clone)]
pub struct RecordingMetadataRepository {
    inner: MemoryMetadataRepository,
    upserts: Arc<Mutex<Vec<Uuid>>>,
}

impl RecordingMetadataRepository {
    pub fn new(inner: MemoryMetadataRepository) -> Self {
        Self {
            inner,
            upserts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn upsert_count(&self) -> usize {
        self.upserts.lock().map(|u| u.len()).unwrap_or(0)
    }

    pub fn upserted_ids(&self) -> Vec<Uuid> {
        self.upserts.lock().map(|u| u.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MetadataRepository for RecordingMetadataRepository {
    async fn get(&self, chunk_id: Uuid) -> Result<Option<ChunkMetadata>> {
        self.inner.get(chunk_id).await
    }

    async fn upsert(&self, chunk_id: Uuid, metadata: &ValidatedMetadata) -> Result<()> {
        if let Ok(mut upserts) = self.upserts.lock() {
            upserts.push(chunk_id);
        }
        self.inner.upsert(chunk_id, metadata).await
    }

    async fn exists(&self, chunk_id: Uuid) -> Result<bool> {
        self.inner.exists(chunk_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabula_core::{Provenance, ProvenanceMap, StructuredFields};

    fn validated(season: Option<i32>) -> ValidatedMetadata {
        ValidatedMetadata {
            season,
            episode: None,
            structured: StructuredFields::default(),
            source: ProvenanceMap {
                season_episode: season.map(|_| Provenance::Generated),
                structured: Provenance::Generated,
            },
        }
    }

    #[tokio::test]
    async fn test_chunk_source_ordering() {
        let source = MemoryChunkSource::new();
        for seq in 0..5 {
            source.add_chunk(seq, &format!("chunk {}", seq));
        }

        let preceding = source.preceding(3, 2).await.unwrap();
        assert_eq!(
            preceding.iter().map(|c| c.seq).collect::<Vec<_>>(),
            vec![2, 1],
            "preceding must be nearest-first"
        );

        let following = source.following(1, 2).await.unwrap();
        assert_eq!(
            following.iter().map(|c| c.seq).collect::<Vec<_>>(),
            vec![2, 3]
        );

        let range = source.get_range(1, 3).await.unwrap();
        assert_eq!(range.len(), 3);

        let by_seq = source.get_by_seq(4).await.unwrap();
        assert_eq!(by_seq.map(|c| c.seq), Some(4));
        assert!(source.get_by_seq(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_metadata_reflects_repository_writes() {
        let source = MemoryChunkSource::new();
        let a = source.add_chunk(0, "a");
        let b = source.add_chunk(1, "b");
        let repo = source.metadata_repository();

        assert_eq!(source.list_missing_metadata().await.unwrap(), vec![a, b]);

        repo.upsert(a, &validated(None)).await.unwrap();
        assert_eq!(source.list_missing_metadata().await.unwrap(), vec![b]);
    }

    #[tokio::test]
    async fn test_protected_field_survives_upsert() {
        let repo = MemoryMetadataRepository::new();
        let id = Uuid::new_v4();

        repo.upsert(id, &validated(Some(3))).await.unwrap();
        repo.upsert(id, &validated(Some(9))).await.unwrap();

        assert_eq!(repo.snapshot(id).unwrap().season, Some(3));
    }

    #[tokio::test]
    async fn test_unavailable_repository_fails_with_pool_error() {
        let repo = MemoryMetadataRepository::new();
        repo.set_unavailable(true);

        let err = repo.get(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_storage_unavailable());
    }

    #[tokio::test]
    async fn test_recording_wrapper_counts_upserts() {
        let recorder = RecordingMetadataRepository::new(MemoryMetadataRepository::new());
        let id = Uuid::new_v4();

        recorder.upsert(id, &validated(None)).await.unwrap();
        assert_eq!(recorder.upsert_count(), 1);
        assert_eq!(recorder.upserted_ids(), vec![id]);
    }
}
