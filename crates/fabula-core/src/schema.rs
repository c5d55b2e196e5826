//! The schema contract for generated chunk metadata.
//!
//! **This module is the single source of truth** for the output structure
//! the generative model must produce. The same static field table feeds
//! both sides of the boundary: [`json_schema`] renders the structure into
//! the request (so the model is told what to emit), and the response
//! validator walks [`fields`] to check what came back. The two can never
//! diverge because neither carries its own copy.

use serde_json::{json, Map, Value};

use crate::models::{Direction, Pacing};

/// Magnitude values outside [0, 1] by at most this much are clamped and
/// flagged; beyond it the response is rejected.
pub const MAGNITUDE_TOLERANCE: f64 = 0.25;

/// Canonical enum values for `narrative_vector.direction`.
pub const DIRECTION_VALUES: &[&str] = &["rising", "falling", "steady", "climax", "resolution"];

/// Canonical enum values for `prose.pacing`.
pub const PACING_VALUES: &[&str] = &["slow", "measured", "brisk", "frantic"];

/// Accepted aliases for direction values, folded to canonical forms.
const DIRECTION_ALIASES: &[(&str, Direction)] = &[
    ("up", Direction::Rising),
    ("ascending", Direction::Rising),
    ("building", Direction::Rising),
    ("down", Direction::Falling),
    ("descending", Direction::Falling),
    ("flat", Direction::Steady),
    ("stable", Direction::Steady),
    ("peak", Direction::Climax),
    ("denouement", Direction::Resolution),
    ("resolving", Direction::Resolution),
];

/// Accepted aliases for pacing values, folded to canonical forms.
const PACING_ALIASES: &[(&str, Pacing)] = &[
    ("leisurely", Pacing::Slow),
    ("languid", Pacing::Slow),
    ("moderate", Pacing::Measured),
    ("steady", Pacing::Measured),
    ("quick", Pacing::Brisk),
    ("fast", Pacing::Brisk),
    ("breakneck", Pacing::Frantic),
    ("urgent", Pacing::Frantic),
];

/// Expected kind of a schema field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind {
    String,
    /// Floating-point number (range enforcement is the validator's job).
    Number,
    /// Integer, used only for the optional season/episode fields.
    Integer,
    StringList,
    /// Enumerated string drawn from a fixed value set.
    Enum(&'static [&'static str]),
}

/// One required field path in the contract.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Dotted path from the payload root (e.g. "narrative_vector.magnitude").
    pub path: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

/// Per-field request inclusion for the protected season/episode pair.
///
/// Protection is independent per field: a record with `season` stored but
/// `episode` still null may ask the model for `episode` alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeasonEpisodeInclusion {
    pub season: bool,
    pub episode: bool,
}

impl SeasonEpisodeInclusion {
    /// Both fields protected; neither appears in the request.
    pub const NONE: Self = Self {
        season: false,
        episode: false,
    };

    /// Neither field protected; both may be inferred.
    pub const BOTH: Self = Self {
        season: true,
        episode: true,
    };

    /// Whether a leaf at `path` ("season" or "episode") is included.
    pub fn includes(self, path: &str) -> bool {
        match path {
            "season" => self.season,
            "episode" => self.episode,
            _ => false,
        }
    }
}

/// Every leaf field of the structured payload, in document order.
const FIELDS: &[FieldSpec] = &[
    FieldSpec {
        path: "orientation.location",
        kind: FieldKind::String,
        required: true,
    },
    FieldSpec {
        path: "orientation.timeframe",
        kind: FieldKind::String,
        required: true,
    },
    FieldSpec {
        path: "orientation.pov",
        kind: FieldKind::String,
        required: true,
    },
    FieldSpec {
        path: "characters.present",
        kind: FieldKind::StringList,
        required: true,
    },
    FieldSpec {
        path: "characters.mentioned",
        kind: FieldKind::StringList,
        required: true,
    },
    FieldSpec {
        path: "narrative_vector.direction",
        kind: FieldKind::Enum(DIRECTION_VALUES),
        required: true,
    },
    FieldSpec {
        path: "narrative_vector.magnitude",
        kind: FieldKind::Number,
        required: true,
    },
    FieldSpec {
        path: "prose.tone",
        kind: FieldKind::String,
        required: true,
    },
    FieldSpec {
        path: "prose.pacing",
        kind: FieldKind::Enum(PACING_VALUES),
        required: true,
    },
    FieldSpec {
        path: "prose.summary",
        kind: FieldKind::String,
        required: true,
    },
    FieldSpec {
        path: "themes",
        kind: FieldKind::StringList,
        required: true,
    },
    FieldSpec {
        path: "continuity.callbacks",
        kind: FieldKind::StringList,
        required: true,
    },
    FieldSpec {
        path: "continuity.foreshadowing",
        kind: FieldKind::StringList,
        required: true,
    },
];

/// Season/episode leaves, present in the contract only when the stored
/// record does not already carry protected values.
const SEASON_EPISODE_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        path: "season",
        kind: FieldKind::Integer,
        required: false,
    },
    FieldSpec {
        path: "episode",
        kind: FieldKind::Integer,
        required: false,
    },
];

/// The structured field paths of the contract (season/episode excluded).
pub fn fields() -> &'static [FieldSpec] {
    FIELDS
}

/// The optional season/episode field paths.
pub fn season_episode_fields() -> &'static [FieldSpec] {
    SEASON_EPISODE_FIELDS
}

/// Top-level keys the contract permits. Anything else in a response is
/// rejected outright to catch schema drift early.
pub fn allowed_top_level(inclusion: SeasonEpisodeInclusion) -> Vec<&'static str> {
    let mut keys: Vec<&'static str> = Vec::new();
    for spec in FIELDS {
        let top = top_segment(spec.path);
        if !keys.contains(&top) {
            keys.push(top);
        }
    }
    for spec in SEASON_EPISODE_FIELDS {
        if inclusion.includes(spec.path) {
            keys.push(top_segment(spec.path));
        }
    }
    keys
}

fn top_segment(path: &'static str) -> &'static str {
    path.split('.').next().unwrap_or(path)
}

// ---------------------------------------------------------------------------
// Request-side rendering
// ---------------------------------------------------------------------------

/// Render the contract as a JSON Schema object for the generation request.
///
/// Built from the same field table the validator walks, so the structure
/// the model is asked for and the structure the validator accepts are one
/// definition. A protected field is absent from the request entirely: the
/// model is never even asked for it.
pub fn json_schema(inclusion: SeasonEpisodeInclusion) -> Value {
    let mut properties = Map::new();
    let mut required: Vec<Value> = Vec::new();

    for spec in FIELDS {
        insert_leaf(&mut properties, &mut required, spec);
    }
    for spec in SEASON_EPISODE_FIELDS {
        if inclusion.includes(spec.path) {
            insert_leaf(&mut properties, &mut required, spec);
        }
    }

    json!({
        "type": "object",
        "properties": Value::Object(properties),
        "required": required,
        "additionalProperties": false,
    })
}

fn insert_leaf(properties: &mut Map<String, Value>, required: &mut Vec<Value>, spec: &FieldSpec) {
    let mut segments = spec.path.split('.');
    let top = segments.next().expect("non-empty field path");

    match segments.next() {
        None => {
            properties.insert(top.to_string(), kind_schema(spec.kind));
            if spec.required {
                required.push(json!(top));
            }
        }
        Some(leaf) => {
            let entry = properties.entry(top.to_string()).or_insert_with(|| {
                json!({
                    "type": "object",
                    "properties": {},
                    "required": [],
                    "additionalProperties": false,
                })
            });
            let obj = entry.as_object_mut().expect("object schema node");
            obj.get_mut("properties")
                .and_then(Value::as_object_mut)
                .expect("properties map")
                .insert(leaf.to_string(), kind_schema(spec.kind));
            if spec.required {
                obj.get_mut("required")
                    .and_then(Value::as_array_mut)
                    .expect("required list")
                    .push(json!(leaf));
            }
            // A nested group is required at the top level as soon as any
            // of its leaves is.
            if spec.required && !required.iter().any(|v| v.as_str() == Some(top)) {
                required.push(json!(top));
            }
        }
    }
}

fn kind_schema(kind: FieldKind) -> Value {
    match kind {
        FieldKind::String => json!({"type": "string"}),
        FieldKind::Number => json!({"type": "number", "minimum": 0.0, "maximum": 1.0}),
        FieldKind::Integer => json!({"type": ["integer", "null"]}),
        FieldKind::StringList => json!({"type": "array", "items": {"type": "string"}}),
        FieldKind::Enum(values) => json!({"type": "string", "enum": values}),
    }
}

// ---------------------------------------------------------------------------
// Enum folding
// ---------------------------------------------------------------------------

/// Fold a raw direction string (case-insensitive, alias-tolerant) to its
/// canonical enum value. Returns `None` for unrecognized input.
pub fn fold_direction(raw: &str) -> Option<Direction> {
    let needle = raw.trim().to_ascii_lowercase();
    match needle.as_str() {
        "rising" => Some(Direction::Rising),
        "falling" => Some(Direction::Falling),
        "steady" => Some(Direction::Steady),
        "climax" => Some(Direction::Climax),
        "resolution" => Some(Direction::Resolution),
        other => DIRECTION_ALIASES
            .iter()
            .find(|(alias, _)| *alias == other)
            .map(|(_, canonical)| *canonical),
    }
}

/// Fold a raw pacing string to its canonical enum value.
pub fn fold_pacing(raw: &str) -> Option<Pacing> {
    let needle = raw.trim().to_ascii_lowercase();
    match needle.as_str() {
        "slow" => Some(Pacing::Slow),
        "measured" => Some(Pacing::Measured),
        "brisk" => Some(Pacing::Brisk),
        "frantic" => Some(Pacing::Frantic),
        other => PACING_ALIASES
            .iter()
            .find(|(alias, _)| *alias == other)
            .map(|(_, canonical)| *canonical),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_field_path_has_a_schema_property() {
        let schema = json_schema(SeasonEpisodeInclusion::NONE);
        let properties = schema["properties"].as_object().unwrap();

        for spec in fields() {
            let mut node = &schema;
            for segment in spec.path.split('.') {
                node = &node["properties"][segment];
            }
            assert!(
                !node.is_null(),
                "field path {} missing from rendered schema",
                spec.path
            );
        }
        assert!(properties.contains_key("orientation"));
        assert!(!properties.contains_key("season"));
    }

    #[test]
    fn test_schema_includes_season_episode_when_unprotected() {
        let schema = json_schema(SeasonEpisodeInclusion::BOTH);
        let properties = schema["properties"].as_object().unwrap();
        assert!(properties.contains_key("season"));
        assert!(properties.contains_key("episode"));
        // Optional fields never appear in the required list.
        let required = schema["required"].as_array().unwrap();
        assert!(!required.iter().any(|v| v.as_str() == Some("season")));
    }

    #[test]
    fn test_schema_inclusion_is_per_field() {
        let schema = json_schema(SeasonEpisodeInclusion {
            season: false,
            episode: true,
        });
        let properties = schema["properties"].as_object().unwrap();
        assert!(!properties.contains_key("season"));
        assert!(properties.contains_key("episode"));
    }

    #[test]
    fn test_schema_rejects_additional_properties() {
        let schema = json_schema(SeasonEpisodeInclusion::NONE);
        assert_eq!(schema["additionalProperties"], json!(false));
        assert_eq!(
            schema["properties"]["narrative_vector"]["additionalProperties"],
            json!(false)
        );
    }

    #[test]
    fn test_direction_enum_rendered_into_schema() {
        let schema = json_schema(SeasonEpisodeInclusion::NONE);
        let values = schema["properties"]["narrative_vector"]["properties"]["direction"]["enum"]
            .as_array()
            .unwrap();
        assert_eq!(values.len(), DIRECTION_VALUES.len());
    }

    #[test]
    fn test_allowed_top_level_keys() {
        let keys = allowed_top_level(SeasonEpisodeInclusion::NONE);
        assert_eq!(
            keys,
            vec![
                "orientation",
                "characters",
                "narrative_vector",
                "prose",
                "themes",
                "continuity"
            ]
        );

        let with_se = allowed_top_level(SeasonEpisodeInclusion::BOTH);
        assert!(with_se.contains(&"season"));
        assert!(with_se.contains(&"episode"));

        let episode_only = allowed_top_level(SeasonEpisodeInclusion {
            season: false,
            episode: true,
        });
        assert!(!episode_only.contains(&"season"));
        assert!(episode_only.contains(&"episode"));
    }

    #[test]
    fn test_fold_direction_canonical_and_aliases() {
        assert_eq!(fold_direction("rising"), Some(Direction::Rising));
        assert_eq!(fold_direction("RISING"), Some(Direction::Rising));
        assert_eq!(fold_direction("  up  "), Some(Direction::Rising));
        assert_eq!(fold_direction("Denouement"), Some(Direction::Resolution));
        assert_eq!(fold_direction("sideways"), None);
    }

    #[test]
    fn test_fold_pacing_canonical_and_aliases() {
        assert_eq!(fold_pacing("measured"), Some(Pacing::Measured));
        assert_eq!(fold_pacing("Breakneck"), Some(Pacing::Frantic));
        assert_eq!(fold_pacing("quick"), Some(Pacing::Brisk));
        assert_eq!(fold_pacing("glacial"), None);
    }

    #[test]
    fn test_magnitude_tolerance_value() {
        assert_eq!(MAGNITUDE_TOLERANCE, 0.25);
    }
}
