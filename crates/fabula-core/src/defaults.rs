//! Centralized default constants for the fabula pipeline.
//!
//! **This module is the single source of truth** for shared default
//! values. Crates reference these constants instead of defining their own
//! magic numbers.

// =============================================================================
// CONTEXT WINDOW
// =============================================================================

/// Default token budget for context preceding the target chunk.
pub const WINDOW_TOKENS_BEFORE: usize = 4000;

/// Default token budget for context following the target chunk.
pub const WINDOW_TOKENS_AFTER: usize = 2000;

/// Neighbor chunks fetched per page while walking outward from the target.
pub const WINDOW_FETCH_PAGE: i64 = 8;

// =============================================================================
// BATCHING
// =============================================================================

/// Default number of chunks per batch.
pub const BATCH_SIZE: usize = 20;

/// Default concurrent chunk pipelines within a batch.
pub const BATCH_CONCURRENCY: usize = 4;

// =============================================================================
// GENERATION
// =============================================================================

/// Default Ollama base URL.
pub const OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Default generation model name (Ollama).
pub const GEN_MODEL: &str = "gpt-oss:20b";

/// Timeout for generation requests in seconds.
pub const GEN_TIMEOUT_SECS: u64 = 120;

/// Default number of generations per chunk.
pub const REPLICATES: usize = 1;

// =============================================================================
// RETRY
// =============================================================================

/// Attempt ceiling per generation (first try plus retries).
pub const MAX_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff between retries, in milliseconds.
pub const BACKOFF_BASE_MS: u64 = 500;

/// Upper bound on a single backoff delay, in milliseconds.
pub const BACKOFF_CAP_MS: u64 = 30_000;

// =============================================================================
// COST
// =============================================================================

/// Default input token rate, currency units per million tokens.
pub const COST_INPUT_PER_MTOK: f64 = 0.0;

/// Default output token rate, currency units per million tokens.
pub const COST_OUTPUT_PER_MTOK: f64 = 0.0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_ceiling_positive() {
        assert!(MAX_ATTEMPTS >= 1);
    }

    #[test]
    fn test_backoff_cap_above_base() {
        assert!(BACKOFF_CAP_MS > BACKOFF_BASE_MS);
    }

    #[test]
    fn test_window_page_positive() {
        assert!(WINDOW_FETCH_PAGE > 0);
    }
}
