//! Completion normalization.
//!
//! Reasoning models may prefix completions with `<think>…</think>` (or an
//! empty `<think/>`), and chat models like to wrap JSON in a markdown fence.
//! Both decorations are stripped before any parsing happens.

/// Remove every leading `<think>…</think>` / `<think/>` / `<think />` block.
pub fn strip_think_prefix(text: &str) -> &str {
    let mut rest = text.trim_start();
    loop {
        if let Some(after_open) = rest.strip_prefix("<think>") {
            match after_open.find("</think>") {
                Some(pos) => rest = after_open[pos + "</think>".len()..].trim_start(),
                None => break,
            }
        } else if let Some(after) = rest
            .strip_prefix("<think/>")
            .or_else(|| rest.strip_prefix("<think />"))
        {
            rest = after.trim_start();
        } else {
            break;
        }
    }
    rest
}

/// Strip a surrounding markdown code fence (```json … ```), if present.
pub fn strip_json_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        trimmed
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim()
    } else {
        trimmed
    }
}

/// Full normalization applied before JSON parsing.
pub fn normalize_completion(text: &str) -> &str {
    strip_json_fence(strip_think_prefix(text))
}
