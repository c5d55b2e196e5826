//! Prompt construction for structured metadata extraction.
//!
//! The window is rendered with explicit delimiters so the model knows
//! which chunk it is annotating; the surrounding context is labeled as
//! read-only. Output structure is enforced by the request schema, not by
//! prose instructions, but the prompt still names the expectation so
//! smaller models stay on track.

use fabula_core::ContextWindow;

/// System message for every extraction call.
pub const SYSTEM_PROMPT: &str = "You are a precise literary analyst. You read a passage of a \
longer narrative together with its surrounding context and extract structured metadata about \
the TARGET passage only. You answer with a single JSON object matching the requested schema, \
nothing else.";

/// Render the extraction prompt for a window.
pub fn extraction_prompt(window: &ContextWindow) -> String {
    let mut before = String::new();
    for chunk in &window.before {
        before.push_str(&chunk.content);
        before.push_str("\n\n");
    }

    let mut after = String::new();
    for chunk in &window.after {
        after.push_str(&chunk.content);
        after.push_str("\n\n");
    }

    format!(
        r#"Analyze the TARGET passage below. The CONTEXT BEFORE and CONTEXT AFTER sections exist only to help you resolve references, characters, and continuity; describe the TARGET passage alone.

=== CONTEXT BEFORE ===
{before}
=== TARGET (annotate this passage) ===
{target}

=== CONTEXT AFTER ===
{after}
=== END ===

Extract the metadata for the TARGET passage:
- orientation: where and when the passage takes place, and its point of view
- characters: who is physically present vs. merely mentioned
- narrative_vector: direction of dramatic movement and its intensity from 0.0 to 1.0
- prose: tone, pacing, and a one-to-two sentence summary
- themes: the passage's themes as short phrases
- continuity: callbacks to earlier events and foreshadowing of later ones

Respond with a single JSON object. Use empty strings or empty lists when the passage gives no evidence for a field."#,
        before = before.trim_end(),
        target = window.target.content,
        after = after.trim_end(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabula_core::Chunk;
    use uuid::Uuid;

    fn chunk(seq: i64, content: &str) -> Chunk {
        Chunk {
            id: Uuid::new_v4(),
            seq,
            content: content.to_string(),
        }
    }

    #[test]
    fn test_prompt_contains_all_window_sections() {
        let window = ContextWindow {
            before: vec![chunk(1, "The storm gathered."), chunk(2, "Rain began.")],
            target: chunk(3, "Mira ran for the lighthouse."),
            after: vec![chunk(4, "The door was already open.")],
        };

        let prompt = extraction_prompt(&window);
        assert!(prompt.contains("The storm gathered."));
        assert!(prompt.contains("Rain began."));
        assert!(prompt.contains("Mira ran for the lighthouse."));
        assert!(prompt.contains("The door was already open."));
        let before_pos = prompt.find("The storm gathered.").unwrap();
        let target_pos = prompt.find("Mira ran").unwrap();
        let after_pos = prompt.find("The door was").unwrap();
        assert!(before_pos < target_pos && target_pos < after_pos);
    }

    #[test]
    fn test_prompt_handles_empty_context() {
        let window = ContextWindow {
            before: vec![],
            target: chunk(0, "Opening line."),
            after: vec![],
        };

        let prompt = extraction_prompt(&window);
        assert!(prompt.contains("Opening line."));
        assert!(prompt.contains("=== TARGET"));
    }

    #[test]
    fn test_system_prompt_demands_json() {
        assert!(SYSTEM_PROMPT.contains("JSON"));
    }
}
