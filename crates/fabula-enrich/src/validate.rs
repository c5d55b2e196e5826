//! Response validation and normalization against the schema contract.
//!
//! The validator walks the same static field table the request schema is
//! rendered from, so a payload that passes here is exactly a payload the
//! model was asked for. Validation is strict: unknown keys at any level
//! are rejected, as are missing required paths and wrong kinds. The only
//! repairs performed are enum alias folding and a bounded magnitude
//! clamp; everything else fails with the offending dotted path.
//!
//! Normalization is a fixed point: re-validating an already-validated
//! payload yields an identical result.

use serde_json::{Map, Value};
use tracing::warn;

use fabula_core::schema::{
    self, fold_direction, fold_pacing, SeasonEpisodeInclusion, MAGNITUDE_TOLERANCE,
};
use fabula_core::{
    Characters, Continuity, NarrativeVector, Orientation, Prose, Provenance, ProvenanceMap,
    StructuredFields, ValidatedMetadata, ValidationError,
};

/// Validate a raw model payload and normalize it into [`ValidatedMetadata`].
///
/// `inclusion` mirrors the request schema: when protection applies to a
/// field the model was never asked for it, so its presence in the
/// response is an unknown-key rejection like any other.
pub fn validate(
    raw: &Value,
    inclusion: SeasonEpisodeInclusion,
) -> Result<ValidatedMetadata, ValidationError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| ValidationError::new("$", "payload is not a JSON object"))?;

    reject_unknown_keys(obj, inclusion)?;

    let structured = StructuredFields {
        orientation: Orientation {
            location: take_string(obj, "orientation.location")?,
            timeframe: take_string(obj, "orientation.timeframe")?,
            pov: take_string(obj, "orientation.pov")?,
        },
        characters: Characters {
            present: take_string_list(obj, "characters.present")?,
            mentioned: take_string_list(obj, "characters.mentioned")?,
        },
        narrative_vector: NarrativeVector {
            direction: take_direction(obj, "narrative_vector.direction")?,
            magnitude: take_magnitude(obj, "narrative_vector.magnitude")?,
        },
        prose: Prose {
            tone: take_string(obj, "prose.tone")?,
            pacing: take_pacing(obj, "prose.pacing")?,
            summary: take_string(obj, "prose.summary")?,
        },
        themes: take_string_list(obj, "themes")?,
        continuity: Continuity {
            callbacks: take_string_list(obj, "continuity.callbacks")?,
            foreshadowing: take_string_list(obj, "continuity.foreshadowing")?,
        },
    };

    let season = if inclusion.season {
        take_optional_int(obj, "season")?
    } else {
        None
    };
    let episode = if inclusion.episode {
        take_optional_int(obj, "episode")?
    } else {
        None
    };

    let season_episode = if season.is_some() || episode.is_some() {
        Some(Provenance::Generated)
    } else {
        None
    };

    Ok(ValidatedMetadata {
        season,
        episode,
        structured,
        source: ProvenanceMap {
            season_episode,
            structured: Provenance::Generated,
        },
    })
}

/// Reject keys the contract does not declare, at the top level and inside
/// every nested group.
fn reject_unknown_keys(
    obj: &Map<String, Value>,
    inclusion: SeasonEpisodeInclusion,
) -> Result<(), ValidationError> {
    let allowed = schema::allowed_top_level(inclusion);
    for key in obj.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(ValidationError::new(key.clone(), "unknown field"));
        }
    }

    for top in &allowed {
        let Some(group) = obj.get(*top).and_then(Value::as_object) else {
            continue;
        };
        let leaves: Vec<&str> = schema::fields()
            .iter()
            .filter_map(|spec| {
                let mut parts = spec.path.splitn(2, '.');
                (parts.next() == Some(*top)).then(|| parts.next()).flatten()
            })
            .collect();
        // Flat leaves (themes) have no nested keys to police.
        if leaves.is_empty() {
            continue;
        }
        for key in group.keys() {
            if !leaves.contains(&key.as_str()) {
                return Err(ValidationError::new(
                    format!("{}.{}", top, key),
                    "unknown field",
                ));
            }
        }
    }

    Ok(())
}

fn resolve<'a>(obj: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut node: Option<&Value> = None;
    for segment in path.split('.') {
        node = match node {
            None => obj.get(segment),
            Some(value) => value.get(segment),
        };
        node?;
    }
    node
}

fn required<'a>(
    obj: &'a Map<String, Value>,
    path: &str,
) -> Result<&'a Value, ValidationError> {
    resolve(obj, path).ok_or_else(|| ValidationError::new(path, "missing required field"))
}

fn take_string(obj: &Map<String, Value>, path: &str) -> Result<String, ValidationError> {
    required(obj, path)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ValidationError::new(path, "expected a string"))
}

fn take_string_list(obj: &Map<String, Value>, path: &str) -> Result<Vec<String>, ValidationError> {
    let items = required(obj, path)?
        .as_array()
        .ok_or_else(|| ValidationError::new(path, "expected a list of strings"))?;

    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| ValidationError::new(path, "expected a list of strings"))
        })
        .collect()
}

fn take_direction(
    obj: &Map<String, Value>,
    path: &str,
) -> Result<fabula_core::Direction, ValidationError> {
    let raw = required(obj, path)?
        .as_str()
        .ok_or_else(|| ValidationError::new(path, "expected a string"))?;
    fold_direction(raw)
        .ok_or_else(|| ValidationError::new(path, format!("unrecognized direction \"{}\"", raw)))
}

fn take_pacing(
    obj: &Map<String, Value>,
    path: &str,
) -> Result<fabula_core::Pacing, ValidationError> {
    let raw = required(obj, path)?
        .as_str()
        .ok_or_else(|| ValidationError::new(path, "expected a string"))?;
    fold_pacing(raw)
        .ok_or_else(|| ValidationError::new(path, format!("unrecognized pacing \"{}\"", raw)))
}

/// Magnitude must land in [0, 1]. Values straying by at most
/// [`MAGNITUDE_TOLERANCE`] are clamped to the nearest bound; anything
/// further out is rejected rather than silently rewritten.
fn take_magnitude(obj: &Map<String, Value>, path: &str) -> Result<f64, ValidationError> {
    let value = required(obj, path)?
        .as_f64()
        .ok_or_else(|| ValidationError::new(path, "expected a number"))?;

    if !value.is_finite() {
        return Err(ValidationError::new(path, "expected a finite number"));
    }
    if (0.0..=1.0).contains(&value) {
        return Ok(value);
    }
    if value >= -MAGNITUDE_TOLERANCE && value <= 1.0 + MAGNITUDE_TOLERANCE {
        let clamped = value.clamp(0.0, 1.0);
        warn!(
            subsystem = "enrich",
            component = "validate",
            field = path,
            raw = value,
            clamped,
            "Magnitude outside [0, 1], clamped within tolerance"
        );
        return Ok(clamped);
    }
    Err(ValidationError::new(
        path,
        format!("magnitude {} outside [0, 1] beyond tolerance", value),
    ))
}

fn take_optional_int(obj: &Map<String, Value>, path: &str) -> Result<Option<i32>, ValidationError> {
    match resolve(obj, path) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => {
            let n = value
                .as_i64()
                .ok_or_else(|| ValidationError::new(path, "expected an integer"))?;
            i32::try_from(n)
                .map(Some)
                .map_err(|_| ValidationError::new(path, "integer out of range"))
        }
    }
}
