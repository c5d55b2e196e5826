//! Batch orchestration of the enrichment pipeline.
//!
//! Batches are strictly sequential: batch N drains completely before
//! batch N+1 starts, which keeps load on the generation service bounded
//! and makes abort semantics simple. Within a batch, chunk pipelines run
//! concurrently under a semaphore. A chunk failure never takes down its
//! batch; only storage becoming wholly unavailable aborts the remainder
//! of the run.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use fabula_core::{
    schema, ChunkSource, ChunkStatus, Direction, Error, GenerationBackend, GenerationError,
    MetadataRepository, Result, StructuredResponse, TokenUsage, ValidatedMetadata,
};

use crate::prompt::{extraction_prompt, SYSTEM_PROMPT};
use crate::validate::validate;
use crate::window::WindowBuilder;

// =============================================================================
// SELECTION
// =============================================================================

/// Which chunks a run targets. Exactly one mode per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Every chunk in the source.
    All,
    /// Chunks with no metadata record yet.
    MissingMetadata,
    /// Chunks with `start_seq <= seq <= end_seq`.
    Range { start_seq: i64, end_seq: i64 },
    /// A single chunk by ID.
    Single(Uuid),
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// How multiple replicates per chunk are resolved into one payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicateMode {
    /// Persist the first replicate that validates.
    First,
    /// Majority-vote direction, average magnitude, union themes; first
    /// validated replicate supplies the remaining fields.
    Consensus,
}

/// Configuration for an enrichment run.
#[derive(Debug, Clone)]
pub struct EnrichConfig {
    /// Chunks per batch.
    pub batch_size: usize,
    /// Token budget for context preceding the target.
    pub tokens_before: usize,
    /// Token budget for context following the target.
    pub tokens_after: usize,
    /// Generations per chunk.
    pub replicates: usize,
    pub replicate_mode: ReplicateMode,
    /// Concurrent chunk pipelines within a batch.
    pub concurrency: usize,
    /// Attempt ceiling per generation call (first try plus retries).
    pub max_attempts: u32,
    /// Base delay for exponential backoff, in milliseconds.
    pub backoff_base_ms: u64,
    /// Upper bound on a single backoff delay, in milliseconds.
    pub backoff_cap_ms: u64,
    /// Run the full pipeline but skip the store write.
    pub dry_run: bool,
    /// Input token rate, currency units per million tokens.
    pub cost_input_per_mtok: f64,
    /// Output token rate, currency units per million tokens.
    pub cost_output_per_mtok: f64,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        use fabula_core::defaults;
        Self {
            batch_size: defaults::BATCH_SIZE,
            tokens_before: defaults::WINDOW_TOKENS_BEFORE,
            tokens_after: defaults::WINDOW_TOKENS_AFTER,
            replicates: defaults::REPLICATES,
            replicate_mode: ReplicateMode::First,
            concurrency: defaults::BATCH_CONCURRENCY,
            max_attempts: defaults::MAX_ATTEMPTS,
            backoff_base_ms: defaults::BACKOFF_BASE_MS,
            backoff_cap_ms: defaults::BACKOFF_CAP_MS,
            dry_run: false,
            cost_input_per_mtok: defaults::COST_INPUT_PER_MTOK,
            cost_output_per_mtok: defaults::COST_OUTPUT_PER_MTOK,
        }
    }
}

impl EnrichConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `FABULA_BATCH_SIZE` | `20` | Chunks per batch |
    /// | `FABULA_TOKENS_BEFORE` | `4000` | Before-context token budget |
    /// | `FABULA_TOKENS_AFTER` | `2000` | After-context token budget |
    /// | `FABULA_REPLICATES` | `1` | Generations per chunk |
    /// | `FABULA_CONCURRENCY` | `4` | Concurrent pipelines per batch |
    /// | `FABULA_MAX_ATTEMPTS` | `3` | Generation attempt ceiling |
    /// | `FABULA_COST_INPUT_PER_MTOK` | `0.0` | Input token rate |
    /// | `FABULA_COST_OUTPUT_PER_MTOK` | `0.0` | Output token rate |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        fn env_parse<T: std::str::FromStr>(key: &str, fallback: T) -> T {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse::<T>().ok())
                .unwrap_or(fallback)
        }

        Self {
            batch_size: env_parse("FABULA_BATCH_SIZE", defaults.batch_size).max(1),
            tokens_before: env_parse("FABULA_TOKENS_BEFORE", defaults.tokens_before),
            tokens_after: env_parse("FABULA_TOKENS_AFTER", defaults.tokens_after),
            replicates: env_parse("FABULA_REPLICATES", defaults.replicates).max(1),
            concurrency: env_parse("FABULA_CONCURRENCY", defaults.concurrency).max(1),
            max_attempts: env_parse("FABULA_MAX_ATTEMPTS", defaults.max_attempts).max(1),
            cost_input_per_mtok: env_parse(
                "FABULA_COST_INPUT_PER_MTOK",
                defaults.cost_input_per_mtok,
            ),
            cost_output_per_mtok: env_parse(
                "FABULA_COST_OUTPUT_PER_MTOK",
                defaults.cost_output_per_mtok,
            ),
            ..defaults
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_window(mut self, tokens_before: usize, tokens_after: usize) -> Self {
        self.tokens_before = tokens_before;
        self.tokens_after = tokens_after;
        self
    }

    pub fn with_replicates(mut self, replicates: usize, mode: ReplicateMode) -> Self {
        self.replicates = replicates.max(1);
        self.replicate_mode = mode;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, backoff_base_ms: u64) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.backoff_base_ms = backoff_base_ms;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_cost_rates(mut self, input_per_mtok: f64, output_per_mtok: f64) -> Self {
        self.cost_input_per_mtok = input_per_mtok;
        self.cost_output_per_mtok = output_per_mtok;
        self
    }

    /// Backoff delay before the retry following `attempt` (1-indexed).
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let ms = self
            .backoff_base_ms
            .saturating_mul(1u64 << exp)
            .min(self.backoff_cap_ms);
        Duration::from_millis(ms)
    }
}

// =============================================================================
// COST ACCOUNTING
// =============================================================================

/// Run-wide token accumulator shared across concurrent chunk pipelines.
///
/// Tokens are the atomic unit; money is derived once at report time so
/// no floating-point accumulation races exist.
#[derive(Default)]
pub struct CostAccumulator {
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

impl CostAccumulator {
    pub fn record(&self, usage: TokenUsage) {
        self.input_tokens.fetch_add(usage.input_tokens, Ordering::Relaxed);
        self.output_tokens.fetch_add(usage.output_tokens, Ordering::Relaxed);
    }

    pub fn totals(&self) -> TokenUsage {
        TokenUsage::new(
            self.input_tokens.load(Ordering::Relaxed),
            self.output_tokens.load(Ordering::Relaxed),
        )
    }
}

// =============================================================================
// RUN REPORT
// =============================================================================

/// One failed chunk with the reason it failed.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkFailure {
    pub chunk_id: Uuid,
    pub reason: String,
}

/// Summary of a completed (or aborted) run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Chunks selected for the run.
    pub total_chunks: usize,
    /// Chunks that reached `persisted` (dry-run chunks included).
    pub persisted: usize,
    /// Chunks that reached `failed`.
    pub failed: usize,
    /// Chunks never attempted (abort or fatal stop).
    pub skipped: usize,
    /// Total generation attempts across all chunks and replicates.
    pub attempts: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Derived from token totals and the configured rates.
    pub total_cost: f64,
    pub dry_run: bool,
    pub failures: Vec<ChunkFailure>,
    /// Set when storage became unavailable and the run stopped early.
    pub fatal_error: Option<String>,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal_error.is_some()
    }
}

// =============================================================================
// ABORT HANDLE
// =============================================================================

/// Cooperative abort flag, honored at batch boundaries only. In-flight
/// generation calls always run to completion.
#[derive(Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// =============================================================================
// ENRICHER
// =============================================================================

/// Per-chunk outcome produced by one pipeline task.
struct ChunkOutcome {
    chunk_id: Uuid,
    status: ChunkStatus,
    attempts: u64,
    failure: Option<String>,
    /// Storage wholly unavailable; the run cannot make durable progress.
    fatal: bool,
}

/// The batch enrichment orchestrator.
pub struct Enricher {
    source: Arc<dyn ChunkSource>,
    repo: Arc<dyn MetadataRepository>,
    backend: Arc<dyn GenerationBackend>,
    config: EnrichConfig,
    abort: AbortHandle,
}

impl Enricher {
    pub fn new(
        source: Arc<dyn ChunkSource>,
        repo: Arc<dyn MetadataRepository>,
        backend: Arc<dyn GenerationBackend>,
        config: EnrichConfig,
    ) -> Self {
        Self {
            source,
            repo,
            backend,
            config,
            abort: AbortHandle::default(),
        }
    }

    /// Handle for requesting a stop between batches.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Run the pipeline over the selected chunks.
    ///
    /// Returns a report even when the run stops early; only selection
    /// resolution errors surface as `Err`.
    #[instrument(skip(self), fields(subsystem = "enrich", component = "orchestrator", op = "run", dry_run = self.config.dry_run))]
    pub async fn run(&self, selection: Selection) -> Result<RunReport> {
        let start = Instant::now();
        let ids = self.resolve_selection(&selection).await?;
        let cost = Arc::new(CostAccumulator::default());

        info!(
            chunk_count = ids.len(),
            batch_size = self.config.batch_size,
            concurrency = self.config.concurrency,
            model = self.backend.model_name(),
            "Starting enrichment run"
        );

        let mut persisted = 0usize;
        let mut failed = 0usize;
        let mut attempts = 0u64;
        let mut failures: Vec<ChunkFailure> = Vec::new();
        let mut fatal_error: Option<String> = None;
        let mut processed = 0usize;

        for (batch_idx, batch) in ids.chunks(self.config.batch_size).enumerate() {
            if self.abort.is_aborted() {
                info!(batch = batch_idx, "Run aborted before batch");
                break;
            }
            if fatal_error.is_some() {
                break;
            }

            let batch_start = Instant::now();
            let outcomes = self.run_batch(batch, Arc::clone(&cost)).await;

            for outcome in outcomes {
                processed += 1;
                attempts += outcome.attempts;
                match outcome.status {
                    ChunkStatus::Persisted => persisted += 1,
                    _ => {
                        failed += 1;
                        failures.push(ChunkFailure {
                            chunk_id: outcome.chunk_id,
                            reason: outcome
                                .failure
                                .unwrap_or_else(|| "unknown failure".to_string()),
                        });
                    }
                }
                if outcome.fatal && fatal_error.is_none() {
                    fatal_error = failures.last().map(|f| f.reason.clone());
                }
            }

            debug!(
                batch = batch_idx,
                chunk_count = batch.len(),
                duration_ms = batch_start.elapsed().as_millis() as u64,
                "Batch drained"
            );
        }

        let totals = cost.totals();
        let report = RunReport {
            total_chunks: ids.len(),
            persisted,
            failed,
            skipped: ids.len() - processed,
            attempts,
            input_tokens: totals.input_tokens,
            output_tokens: totals.output_tokens,
            total_cost: totals.cost(
                self.config.cost_input_per_mtok,
                self.config.cost_output_per_mtok,
            ),
            dry_run: self.config.dry_run,
            failures,
            fatal_error,
        };

        if let Some(err) = &report.fatal_error {
            error!(error_msg = %err, "Run stopped: storage unavailable");
        }
        info!(
            persisted = report.persisted,
            failed = report.failed,
            skipped = report.skipped,
            attempts = report.attempts,
            input_tokens = report.input_tokens,
            output_tokens = report.output_tokens,
            cost = report.total_cost,
            duration_ms = start.elapsed().as_millis() as u64,
            "Run complete"
        );

        Ok(report)
    }

    async fn resolve_selection(&self, selection: &Selection) -> Result<Vec<Uuid>> {
        match selection {
            Selection::All => self.source.list_all_ids().await,
            Selection::MissingMetadata => self.source.list_missing_metadata().await,
            Selection::Range { start_seq, end_seq } => {
                if start_seq > end_seq {
                    return Err(Error::InvalidInput(format!(
                        "invalid range: {} > {}",
                        start_seq, end_seq
                    )));
                }
                let chunks = self.source.get_range(*start_seq, *end_seq).await?;
                Ok(chunks.into_iter().map(|c| c.id).collect())
            }
            Selection::Single(id) => Ok(vec![*id]),
        }
    }

    /// Spawn one pipeline task per chunk and drain them all.
    async fn run_batch(&self, batch: &[Uuid], cost: Arc<CostAccumulator>) -> Vec<ChunkOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut tasks: JoinSet<ChunkOutcome> = JoinSet::new();

        for &chunk_id in batch {
            let task = ChunkTask {
                source: Arc::clone(&self.source),
                repo: Arc::clone(&self.repo),
                backend: Arc::clone(&self.backend),
                config: self.config.clone(),
                cost: Arc::clone(&cost),
            };
            let semaphore = Arc::clone(&semaphore);

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return ChunkOutcome {
                            chunk_id,
                            status: ChunkStatus::Failed,
                            attempts: 0,
                            failure: Some("worker pool closed".to_string()),
                            fatal: false,
                        }
                    }
                };
                task.process(chunk_id).await
            });
        }

        let mut outcomes = Vec::with_capacity(batch.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!(error_msg = %e, "Chunk pipeline task panicked");
                }
            }
        }
        outcomes
    }
}

// =============================================================================
// PER-CHUNK PIPELINE
// =============================================================================

/// Everything one chunk pipeline needs, cloneable into a spawned task.
struct ChunkTask {
    source: Arc<dyn ChunkSource>,
    repo: Arc<dyn MetadataRepository>,
    backend: Arc<dyn GenerationBackend>,
    config: EnrichConfig,
    cost: Arc<CostAccumulator>,
}

impl ChunkTask {
    /// window -> prompt -> generate (with retry) -> validate -> persist.
    async fn process(&self, chunk_id: Uuid) -> ChunkOutcome {
        let mut attempts = 0u64;

        match self.process_inner(chunk_id, &mut attempts).await {
            Ok(status) => ChunkOutcome {
                chunk_id,
                status,
                attempts,
                failure: None,
                fatal: false,
            },
            Err(e) => {
                let fatal = e.is_storage_unavailable();
                warn!(
                    chunk_id = %chunk_id,
                    error_msg = %e,
                    "Chunk pipeline failed"
                );
                ChunkOutcome {
                    chunk_id,
                    status: ChunkStatus::Failed,
                    attempts,
                    failure: Some(e.to_string()),
                    fatal,
                }
            }
        }
    }

    async fn process_inner(&self, chunk_id: Uuid, attempts: &mut u64) -> Result<ChunkStatus> {
        debug!(chunk_id = %chunk_id, status = %ChunkStatus::Pending, "Chunk entering pipeline");

        // Protection check, per field: once season or episode is stored,
        // the model is never asked for that field again.
        let existing = self.repo.get(chunk_id).await?;
        let inclusion = existing
            .map(|m| schema::SeasonEpisodeInclusion {
                season: m.season.is_none(),
                episode: m.episode.is_none(),
            })
            .unwrap_or(schema::SeasonEpisodeInclusion::BOTH);

        let window = WindowBuilder::new(self.config.tokens_before, self.config.tokens_after)
            .build(self.source.as_ref(), chunk_id)
            .await?;
        debug!(
            chunk_id = %chunk_id,
            status = %ChunkStatus::InWindow,
            before_chunks = window.before.len(),
            after_chunks = window.after.len(),
            "Context window assembled"
        );

        let request_schema = schema::json_schema(inclusion);
        let prompt = extraction_prompt(&window);

        let mut validated: Vec<ValidatedMetadata> = Vec::new();
        let mut last_failure: Option<Error> = None;

        for replicate in 0..self.config.replicates {
            let result = self
                .generate_with_retry(&prompt, &request_schema, attempts)
                .await;

            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    last_failure = Some(e.into());
                    continue;
                }
            };
            debug!(
                chunk_id = %chunk_id,
                replicate,
                status = %ChunkStatus::Generated,
                "Replicate generated"
            );

            match validate(&response.raw, inclusion) {
                Ok(payload) => {
                    debug!(
                        chunk_id = %chunk_id,
                        replicate,
                        status = %ChunkStatus::Validated,
                        "Replicate validated"
                    );
                    validated.push(payload);
                    // First-wins mode needs no further replicates.
                    if self.config.replicate_mode == ReplicateMode::First {
                        break;
                    }
                }
                Err(e) => {
                    debug!(
                        chunk_id = %chunk_id,
                        replicate,
                        field_path = %e.field_path,
                        "Replicate rejected by validator"
                    );
                    last_failure = Some(e.into());
                }
            }
        }

        if validated.is_empty() {
            return Err(last_failure
                .unwrap_or_else(|| Error::Internal("no replicates produced".to_string())));
        }

        let payload = match self.config.replicate_mode {
            ReplicateMode::First => validated.swap_remove(0),
            ReplicateMode::Consensus => combine_consensus(validated),
        };

        if self.config.dry_run {
            debug!(chunk_id = %chunk_id, dry_run = true, "Skipping persist");
            return Ok(ChunkStatus::Persisted);
        }

        self.repo.upsert(chunk_id, &payload).await?;
        Ok(ChunkStatus::Persisted)
    }

    /// One logical generation: retries rate-limit and timeout failures
    /// with exponential backoff, fails everything else immediately. Token
    /// usage from every attempt, failed ones included, goes to the
    /// accumulator.
    async fn generate_with_retry(
        &self,
        prompt: &str,
        request_schema: &serde_json::Value,
        attempts: &mut u64,
    ) -> std::result::Result<StructuredResponse, GenerationError> {
        let mut attempt = 1u32;
        loop {
            *attempts += 1;
            match self
                .backend
                .generate_structured(SYSTEM_PROMPT, prompt, request_schema)
                .await
            {
                Ok(response) => {
                    self.cost.record(response.usage);
                    return Ok(response);
                }
                Err(e) => {
                    self.cost.record(e.usage);
                    if e.kind.is_retryable() && attempt < self.config.max_attempts {
                        let delay = self.config.backoff_delay(attempt);
                        warn!(
                            attempt,
                            error_msg = %e,
                            backoff_ms = delay.as_millis() as u64,
                            "Retryable generation failure"
                        );
                        sleep(delay).await;
                        attempt += 1;
                    } else {
                        return Err(e);
                    }
                }
            }
        }
    }
}

/// Merge validated replicates: majority direction, averaged magnitude,
/// unioned themes; the first replicate supplies everything else.
fn combine_consensus(mut validated: Vec<ValidatedMetadata>) -> ValidatedMetadata {
    if validated.len() == 1 {
        return validated.swap_remove(0);
    }

    let mut combined = validated[0].clone();

    let mut direction_votes: Vec<(Direction, usize)> = Vec::new();
    for payload in &validated {
        let direction = payload.structured.narrative_vector.direction;
        match direction_votes.iter_mut().find(|(d, _)| *d == direction) {
            Some((_, count)) => *count += 1,
            None => direction_votes.push((direction, 1)),
        }
    }
    // Strictly-greater keeps the earliest-seen direction on ties.
    let mut winner: Option<(Direction, usize)> = None;
    for (direction, count) in &direction_votes {
        if winner.map_or(true, |(_, best)| *count > best) {
            winner = Some((*direction, *count));
        }
    }
    if let Some((direction, _)) = winner {
        combined.structured.narrative_vector.direction = direction;
    }

    let magnitude_sum: f64 = validated
        .iter()
        .map(|p| p.structured.narrative_vector.magnitude)
        .sum();
    combined.structured.narrative_vector.magnitude = magnitude_sum / validated.len() as f64;

    let mut themes: Vec<String> = Vec::new();
    for payload in &validated {
        for theme in &payload.structured.themes {
            if !themes.contains(theme) {
                themes.push(theme.clone());
            }
        }
    }
    combined.structured.themes = themes;

    combined
}
