//! Core data model for narrative chunks and their enrichment metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tokenizer::estimate_tokens;

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// A contiguous unit of narrative text.
///
/// Immutable once created; owned by the chunk source. `seq` is the
/// monotonic ordering key within a narrative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub seq: i64,
    pub content: String,
}

impl Chunk {
    /// Estimated token length of this chunk's text.
    ///
    /// Derived with the deterministic estimator so window budgeting never
    /// needs a live model call.
    pub fn token_len(&self) -> usize {
        estimate_tokens(&self.content)
    }
}

// ---------------------------------------------------------------------------
// Structured metadata fields (the schema contract's value type)
// ---------------------------------------------------------------------------

/// Where and when a chunk is oriented in the narrative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Orientation {
    pub location: String,
    pub timeframe: String,
    pub pov: String,
}

/// Characters appearing in or referenced by a chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Characters {
    pub present: Vec<String>,
    pub mentioned: Vec<String>,
}

/// Direction of narrative movement within a chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Rising,
    Falling,
    #[default]
    Steady,
    Climax,
    Resolution,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rising => write!(f, "rising"),
            Self::Falling => write!(f, "falling"),
            Self::Steady => write!(f, "steady"),
            Self::Climax => write!(f, "climax"),
            Self::Resolution => write!(f, "resolution"),
        }
    }
}

/// Narrative movement: direction plus intensity in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeVector {
    pub direction: Direction,
    pub magnitude: f64,
}

impl Default for NarrativeVector {
    fn default() -> Self {
        Self {
            direction: Direction::Steady,
            magnitude: 0.0,
        }
    }
}

/// Pacing of the prose in a chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pacing {
    Slow,
    #[default]
    Measured,
    Brisk,
    Frantic,
}

impl std::fmt::Display for Pacing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Slow => write!(f, "slow"),
            Self::Measured => write!(f, "measured"),
            Self::Brisk => write!(f, "brisk"),
            Self::Frantic => write!(f, "frantic"),
        }
    }
}

/// Prose-level analysis of a chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prose {
    pub tone: String,
    pub pacing: Pacing,
    pub summary: String,
}

/// Links to earlier and later narrative material.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Continuity {
    pub callbacks: Vec<String>,
    pub foreshadowing: Vec<String>,
}

/// The full structured metadata payload for one chunk.
///
/// `Default` is the canonical empty value for every field, so downstream
/// consumers only ever branch on record absence, never on field absence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredFields {
    pub orientation: Orientation,
    pub characters: Characters,
    pub narrative_vector: NarrativeVector,
    pub prose: Prose,
    pub themes: Vec<String>,
    pub continuity: Continuity,
}

// ---------------------------------------------------------------------------
// Provenance
// ---------------------------------------------------------------------------

/// How a field group was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Set by the deterministic season/episode pre-pass.
    Deterministic,
    /// Produced by a validated model generation.
    Generated,
}

/// Per-field-group provenance tags, kept for auditability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceMap {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season_episode: Option<Provenance>,
    pub structured: Provenance,
}

// ---------------------------------------------------------------------------
// Metadata record
// ---------------------------------------------------------------------------

/// The stored metadata record for a chunk (one-to-one by chunk id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub chunk_id: Uuid,
    /// Protected: once non-null, never overwritten by later runs.
    pub season: Option<i32>,
    /// Protected: once non-null, never overwritten by later runs.
    pub episode: Option<i32>,
    pub structured: StructuredFields,
    pub source: ProvenanceMap,
    pub last_updated: DateTime<Utc>,
}

/// A validated payload ready for persistence.
///
/// `season`/`episode` are `None` whenever protection applies: the
/// orchestrator strips them before validation, and the persistence layer
/// additionally refuses to overwrite non-null stored values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedMetadata {
    pub season: Option<i32>,
    pub episode: Option<i32>,
    pub structured: StructuredFields,
    pub source: ProvenanceMap,
}

// ---------------------------------------------------------------------------
// Context window
// ---------------------------------------------------------------------------

/// A bounded span of chunks around a target, in strict sequence order.
#[derive(Debug, Clone)]
pub struct ContextWindow {
    /// Chunks preceding the target, ascending by `seq`.
    pub before: Vec<Chunk>,
    pub target: Chunk,
    /// Chunks following the target, ascending by `seq`.
    pub after: Vec<Chunk>,
}

impl ContextWindow {
    /// Estimated token length of the before-context.
    pub fn before_tokens(&self) -> usize {
        self.before.iter().map(Chunk::token_len).sum()
    }

    /// Estimated token length of the after-context.
    pub fn after_tokens(&self) -> usize {
        self.after.iter().map(Chunk::token_len).sum()
    }

    /// All chunks in sequence order, target included.
    pub fn ordered(&self) -> impl Iterator<Item = &Chunk> {
        self.before
            .iter()
            .chain(std::iter::once(&self.target))
            .chain(self.after.iter())
    }
}

// ---------------------------------------------------------------------------
// Run bookkeeping
// ---------------------------------------------------------------------------

/// Per-chunk pipeline status within a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Pending,
    InWindow,
    Generated,
    Validated,
    Persisted,
    Failed,
}

impl ChunkStatus {
    /// Whether this status is terminal for the run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Persisted | Self::Failed)
    }
}

impl std::fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InWindow => write!(f, "in_window"),
            Self::Generated => write!(f, "generated"),
            Self::Validated => write!(f, "validated"),
            Self::Persisted => write!(f, "persisted"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Token counts consumed by one generation call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Cost of this usage in currency units, given per-million-token rates.
    pub fn cost(&self, input_per_mtok: f64, output_per_mtok: f64) -> f64 {
        (self.input_tokens as f64 / 1_000_000.0) * input_per_mtok
            + (self.output_tokens as f64 / 1_000_000.0) * output_per_mtok
    }
}

/// A successful raw response from the generative service.
#[derive(Debug, Clone)]
pub struct StructuredResponse {
    /// Parsed JSON payload, not yet validated against the contract.
    pub raw: serde_json::Value,
    pub usage: TokenUsage,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(seq: i64, content: &str) -> Chunk {
        Chunk {
            id: Uuid::new_v4(),
            seq,
            content: content.to_string(),
        }
    }

    #[test]
    fn test_chunk_token_len_matches_estimator() {
        let c = chunk(0, "The storm broke over the harbor at midnight.");
        assert_eq!(c.token_len(), estimate_tokens(&c.content));
    }

    #[test]
    fn test_structured_fields_default_is_empty() {
        let fields = StructuredFields::default();
        assert!(fields.orientation.location.is_empty());
        assert!(fields.characters.present.is_empty());
        assert_eq!(fields.narrative_vector.direction, Direction::Steady);
        assert_eq!(fields.narrative_vector.magnitude, 0.0);
        assert_eq!(fields.prose.pacing, Pacing::Measured);
        assert!(fields.themes.is_empty());
        assert!(fields.continuity.callbacks.is_empty());
    }

    #[test]
    fn test_direction_serialization_lowercase() {
        let json = serde_json::to_string(&Direction::Climax).unwrap();
        assert_eq!(json, "\"climax\"");
        let back: Direction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Direction::Climax);
    }

    #[test]
    fn test_pacing_display_roundtrip() {
        for pacing in [Pacing::Slow, Pacing::Measured, Pacing::Brisk, Pacing::Frantic] {
            let json = serde_json::to_string(&pacing).unwrap();
            assert_eq!(json, format!("\"{}\"", pacing));
        }
    }

    #[test]
    fn test_provenance_serialization() {
        let json = serde_json::to_string(&Provenance::Deterministic).unwrap();
        assert_eq!(json, "\"deterministic\"");
    }

    #[test]
    fn test_context_window_ordering() {
        let window = ContextWindow {
            before: vec![chunk(1, "a"), chunk(2, "b")],
            target: chunk(3, "c"),
            after: vec![chunk(4, "d")],
        };

        let seqs: Vec<i64> = window.ordered().map(|c| c.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_context_window_token_sums() {
        let window = ContextWindow {
            before: vec![chunk(1, "aaaa"), chunk(2, "bbbb")],
            target: chunk(3, "cccc"),
            after: vec![],
        };
        assert_eq!(
            window.before_tokens(),
            estimate_tokens("aaaa") + estimate_tokens("bbbb")
        );
        assert_eq!(window.after_tokens(), 0);
    }

    #[test]
    fn test_chunk_status_terminal() {
        assert!(ChunkStatus::Persisted.is_terminal());
        assert!(ChunkStatus::Failed.is_terminal());
        assert!(!ChunkStatus::Pending.is_terminal());
        assert!(!ChunkStatus::Validated.is_terminal());
    }

    #[test]
    fn test_token_usage_cost() {
        let usage = TokenUsage::new(1_000_000, 500_000);
        let cost = usage.cost(0.40, 1.60);
        assert!((cost - (0.40 + 0.80)).abs() < 1e-9);
    }

    #[test]
    fn test_token_usage_cost_zero() {
        assert_eq!(TokenUsage::default().cost(10.0, 10.0), 0.0);
    }

    #[test]
    fn test_validated_metadata_serde_roundtrip() {
        let meta = ValidatedMetadata {
            season: Some(2),
            episode: None,
            structured: StructuredFields::default(),
            source: ProvenanceMap {
                season_episode: Some(Provenance::Generated),
                structured: Provenance::Generated,
            },
        };
        let json = serde_json::to_string(&meta).unwrap();
        let back: ValidatedMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }
}
