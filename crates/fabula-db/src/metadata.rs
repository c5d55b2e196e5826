//! Metadata record repository with protected-field upsert semantics.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use fabula_core::{
    ChunkMetadata, Error, MetadataRepository, ProvenanceMap, Result, StructuredFields,
    ValidatedMetadata,
};

/// PostgreSQL implementation of [`MetadataRepository`].
pub struct PgMetadataRepository {
    pool: PgPool,
}

impl PgMetadataRepository {
    /// Create a new PgMetadataRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetadataRepository for PgMetadataRepository {
    async fn get(&self, chunk_id: Uuid) -> Result<Option<ChunkMetadata>> {
        let row = sqlx::query(
            r#"
            SELECT chunk_id, season, episode, structured, source, last_updated
            FROM chunk_metadata
            WHERE chunk_id = $1
            "#,
        )
        .bind(chunk_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            None => Ok(None),
            Some(row) => {
                let structured: StructuredFields =
                    serde_json::from_value(row.get::<serde_json::Value, _>("structured"))?;
                let source: ProvenanceMap =
                    serde_json::from_value(row.get::<serde_json::Value, _>("source"))?;
                Ok(Some(ChunkMetadata {
                    chunk_id: row.get("chunk_id"),
                    season: row.get("season"),
                    episode: row.get("episode"),
                    structured,
                    source,
                    last_updated: row.get("last_updated"),
                }))
            }
        }
    }

    /// Single-statement conditional upsert.
    ///
    /// `COALESCE(chunk_metadata.season, EXCLUDED.season)` makes the
    /// protected-field check atomic with the write: a stored non-null
    /// season/episode always wins, a null one takes the incoming value,
    /// and concurrent upserts to the same chunk serialize on the row
    /// without any separate read. Everything else is overwritten
    /// wholesale, so re-applying the same payload is a no-op.
    #[instrument(skip(self, metadata), fields(subsystem = "db", component = "metadata", op = "upsert", chunk_id = %chunk_id))]
    async fn upsert(&self, chunk_id: Uuid, metadata: &ValidatedMetadata) -> Result<()> {
        let structured = serde_json::to_value(&metadata.structured)?;
        let source = serde_json::to_value(&metadata.source)?;

        sqlx::query(
            r#"
            INSERT INTO chunk_metadata (chunk_id, season, episode, structured, source, last_updated)
            VALUES ($1, $2, $3, $4, $5, now())
            ON CONFLICT (chunk_id) DO UPDATE SET
                season = COALESCE(chunk_metadata.season, EXCLUDED.season),
                episode = COALESCE(chunk_metadata.episode, EXCLUDED.episode),
                structured = EXCLUDED.structured,
                source = EXCLUDED.source,
                last_updated = now()
            "#,
        )
        .bind(chunk_id)
        .bind(metadata.season)
        .bind(metadata.episode)
        .bind(structured)
        .bind(source)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!("Metadata upserted");
        Ok(())
    }

    async fn exists(&self, chunk_id: Uuid) -> Result<bool> {
        let row = sqlx::query("SELECT 1 AS present FROM chunk_metadata WHERE chunk_id = $1")
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(row.is_some())
    }
}
