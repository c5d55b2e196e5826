//! Chunk source backed by the `chunk` table.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use fabula_core::{Chunk, ChunkSource, Error, Result};

/// PostgreSQL implementation of [`ChunkSource`].
///
/// Sequence ordering is backed by the `seq bigint UNIQUE` column, so the
/// ordering guarantees of the trait come directly from the index.
pub struct PgChunkSource {
    pool: PgPool,
}

impl PgChunkSource {
    /// Create a new PgChunkSource with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_chunk(row: sqlx::postgres::PgRow) -> Chunk {
        Chunk {
            id: row.get("id"),
            seq: row.get("seq"),
            content: row.get("content"),
        }
    }
}

#[async_trait]
impl ChunkSource for PgChunkSource {
    async fn get_chunk(&self, id: Uuid) -> Result<Chunk> {
        let row = sqlx::query("SELECT id, seq, content FROM chunk WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.map(Self::row_to_chunk).ok_or(Error::ChunkNotFound(id))
    }

    async fn get_by_seq(&self, seq: i64) -> Result<Option<Chunk>> {
        let row = sqlx::query("SELECT id, seq, content FROM chunk WHERE seq = $1")
            .bind(seq)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(row.map(Self::row_to_chunk))
    }

    #[instrument(skip(self), fields(subsystem = "db", component = "chunks", op = "get_range"))]
    async fn get_range(&self, start_seq: i64, end_seq: i64) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT id, seq, content FROM chunk WHERE seq >= $1 AND seq <= $2 ORDER BY seq",
        )
        .bind(start_seq)
        .bind(end_seq)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(chunk_count = rows.len(), "Fetched chunk range");
        Ok(rows.into_iter().map(Self::row_to_chunk).collect())
    }

    async fn preceding(&self, before: i64, limit: i64) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT id, seq, content FROM chunk WHERE seq < $1 ORDER BY seq DESC LIMIT $2",
        )
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::row_to_chunk).collect())
    }

    async fn following(&self, after: i64, limit: i64) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT id, seq, content FROM chunk WHERE seq > $1 ORDER BY seq ASC LIMIT $2",
        )
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::row_to_chunk).collect())
    }

    async fn list_all_ids(&self) -> Result<Vec<Uuid>> {
        let rows = sqlx::query("SELECT id FROM chunk ORDER BY seq")
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(rows.into_iter().map(|row| row.get("id")).collect())
    }

    #[instrument(skip(self), fields(subsystem = "db", component = "chunks", op = "list_missing_metadata"))]
    async fn list_missing_metadata(&self) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id
            FROM chunk c
            LEFT JOIN chunk_metadata m ON m.chunk_id = c.id
            WHERE m.chunk_id IS NULL
            ORDER BY c.seq
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(chunk_count = rows.len(), "Chunks missing metadata");
        Ok(rows.into_iter().map(|row| row.get("id")).collect())
    }
}
