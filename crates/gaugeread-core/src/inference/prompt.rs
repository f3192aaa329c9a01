//! Chain-of-thought prompt for instrument reading.
//!
//! The template is fixed; only the instrument context at the top varies. The
//! final lines pin the answer format that the structured-tail extractor
//! looks for.

use crate::types::{InstrumentMetadata, ScaleHint};
use std::fmt::Write as _;

const INSTRUCTIONS: &str = "\
Carefully examine the image and determine the exact numerical reading by following these steps:

**Step 1 - Identify the Instrument:**
- What kind of instrument is this, and is it analog or digital?
- What quantity does it measure?

**Step 2 - Analyze the Scale:**
- What is the full scale range? (e.g., 0-100, 0-300)
- What are the MAJOR tick mark intervals? (e.g., every 10 units)
- What are the MINOR tick mark intervals? (e.g., every 1 unit)
- What unit is printed on the scale or display?

**Step 3 - Locate the Indicator:**
- Find the pointer, needle, meniscus, or displayed digits
- Identify which major tick marks it is between
- Count how many minor ticks past the lower major mark

**Step 4 - Calculate the Reading:**
- Start from the lower major tick value
- Add the contribution from minor ticks
- If the indicator is between minor ticks, interpolate

**Step 5 - Provide Final Answer:**
After showing your reasoning, end with your answer in this EXACT format:
Answer: <number> <unit>
Confidence: <number between 0 and 1>

Example: Answer: 4.4 A
Example: Answer: 66 ml
Example: Answer: 285 psi
";

const DEFAULT_QUESTION: &str = "What is the reading shown on the instrument?";

/// Build the prompt for one image.
///
/// Deterministic: the same metadata always yields the same text.
pub fn build_prompt(metadata: &InstrumentMetadata) -> String {
    let mut prompt = String::with_capacity(INSTRUCTIONS.len() + 256);

    prompt.push_str("You are an expert at reading measuring instruments with high precision.\n\n");
    let _ = writeln!(
        prompt,
        "**Instrument Type:** {}",
        metadata.instrument_type.display_name()
    );
    if let Some(hint) = &metadata.scale_hint {
        if let Some(line) = describe_scale(hint) {
            let _ = writeln!(prompt, "**Scale Hint:** {line}");
        }
    }
    let question = metadata
        .question
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .unwrap_or(DEFAULT_QUESTION);
    let _ = writeln!(prompt, "**Question:** {question}\n");

    prompt.push_str(INSTRUCTIONS);
    prompt
}

/// One-line summary of the known parts of a scale hint.
fn describe_scale(hint: &ScaleHint) -> Option<String> {
    let mut parts = Vec::new();
    match (hint.min, hint.max) {
        (Some(min), Some(max)) => parts.push(format!("range {min} to {max}")),
        (Some(min), None) => parts.push(format!("starts at {min}")),
        (None, Some(max)) => parts.push(format!("ends at {max}")),
        (None, None) => {}
    }
    if let Some(major) = hint.major_tick {
        parts.push(format!("major ticks every {major}"));
    }
    if let Some(minor) = hint.minor_tick {
        parts.push(format!("minor ticks every {minor}"));
    }
    if let Some(unit) = hint.unit.as_deref().filter(|u| !u.trim().is_empty()) {
        parts.push(format!("unit {}", unit.trim()));
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}
