//! Context window assembly around a target chunk.
//!
//! The window is budgeted in estimated tokens, split into independent
//! before/after budgets. Chunks are accumulated whole (a chunk is either
//! entirely in the window or entirely outside it) and accumulation on a
//! side stops once the budget is met or first crossed. Running out of
//! neighbors at a sequence boundary truncates the side silently.

use std::time::Instant;

use tracing::{debug, instrument};
use uuid::Uuid;

use fabula_core::{estimate_tokens, Chunk, ChunkSource, ContextWindow, Error, Result};

/// Builds bounded context windows from a [`ChunkSource`].
///
/// Pages neighbors outward from the target rather than loading the whole
/// narrative, so window cost stays proportional to the budget.
pub struct WindowBuilder {
    tokens_before: usize,
    tokens_after: usize,
    fetch_page: i64,
}

impl WindowBuilder {
    /// Create a builder with the given per-side token budgets.
    pub fn new(tokens_before: usize, tokens_after: usize) -> Self {
        Self {
            tokens_before,
            tokens_after,
            fetch_page: fabula_core::defaults::WINDOW_FETCH_PAGE,
        }
    }

    /// Override the neighbor page size (testing hook).
    pub fn with_fetch_page(mut self, fetch_page: i64) -> Self {
        self.fetch_page = fetch_page.max(1);
        self
    }

    /// Build the window around `target_id`.
    ///
    /// Fails only when the target itself cannot be fetched; a missing
    /// neighborhood is a boundary, not an error.
    #[instrument(skip(self, source), fields(subsystem = "enrich", component = "window", op = "build", chunk_id = %target_id))]
    pub async fn build(
        &self,
        source: &dyn ChunkSource,
        target_id: Uuid,
    ) -> Result<ContextWindow> {
        let start = Instant::now();
        let target = source.get_chunk(target_id).await.map_err(|e| match e {
            Error::ChunkNotFound(id) => {
                Error::WindowBuild(format!("target chunk {} not found", id))
            }
            other => other,
        })?;

        let before = self.collect_before(source, target.seq).await?;
        let after = self.collect_after(source, target.seq).await?;

        let window = ContextWindow {
            before,
            target,
            after,
        };

        debug!(
            seq = window.target.seq,
            before_chunks = window.before.len(),
            after_chunks = window.after.len(),
            before_tokens = window.before_tokens(),
            after_tokens = window.after_tokens(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Window assembled"
        );

        Ok(window)
    }

    /// Collect preceding context, nearest neighbor first, then restore
    /// ascending sequence order for the caller.
    async fn collect_before(&self, source: &dyn ChunkSource, seq: i64) -> Result<Vec<Chunk>> {
        if self.tokens_before == 0 {
            return Ok(Vec::new());
        }

        let mut collected: Vec<Chunk> = Vec::new();
        let mut used = 0usize;
        let mut cursor = seq;

        'paging: loop {
            let page = source.preceding(cursor, self.fetch_page).await?;
            if page.is_empty() {
                break;
            }
            for chunk in page {
                cursor = chunk.seq;
                used += estimate_tokens(&chunk.content);
                collected.push(chunk);
                // Stop after the chunk that meets or crosses the budget.
                if used >= self.tokens_before {
                    break 'paging;
                }
            }
        }

        collected.reverse();
        Ok(collected)
    }

    /// Collect following context, ascending from the target.
    async fn collect_after(&self, source: &dyn ChunkSource, seq: i64) -> Result<Vec<Chunk>> {
        if self.tokens_after == 0 {
            return Ok(Vec::new());
        }

        let mut collected: Vec<Chunk> = Vec::new();
        let mut used = 0usize;
        let mut cursor = seq;

        'paging: loop {
            let page = source.following(cursor, self.fetch_page).await?;
            if page.is_empty() {
                break;
            }
            for chunk in page {
                cursor = chunk.seq;
                used += estimate_tokens(&chunk.content);
                collected.push(chunk);
                if used >= self.tokens_after {
                    break 'paging;
                }
            }
        }

        Ok(collected)
    }
}
