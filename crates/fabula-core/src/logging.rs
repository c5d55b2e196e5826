//! Structured logging field name constants for fabula.
//!
//! All crates use these constants for consistent structured logging
//! fields, so log aggregation tools can query by standardized names
//! across every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events, batch/run completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-chunk iteration, high-volume data |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "enrich", "db", "inference"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "orchestrator", "window", "validator", "ollama", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "run", "build_window", "generate", "upsert"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Chunk UUID being operated on.
pub const CHUNK_ID: &str = "chunk_id";

/// Sequence position of a chunk.
pub const SEQ: &str = "seq";

/// Zero-based batch index within a run.
pub const BATCH: &str = "batch";

/// One-based generation attempt number for a chunk.
pub const ATTEMPT: &str = "attempt";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of chunks selected or processed.
pub const CHUNK_COUNT: &str = "chunk_count";

/// Tokens consumed on the input side of a generation call.
pub const INPUT_TOKENS: &str = "input_tokens";

/// Tokens produced on the output side of a generation call.
pub const OUTPUT_TOKENS: &str = "output_tokens";

/// Running cost estimate in currency units.
pub const COST: &str = "cost";

/// Byte length of a prompt.
pub const PROMPT_LEN: &str = "prompt_len";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

// ─── Inference fields ──────────────────────────────────────────────────────

/// Model name used for generation.
pub const MODEL: &str = "model";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Terminal status of a chunk ("persisted", "failed").
pub const STATUS: &str = "status";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Slow operation threshold exceeded.
pub const SLOW: &str = "slow";

/// Whether the run was a dry run.
pub const DRY_RUN: &str = "dry_run";
