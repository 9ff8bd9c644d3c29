//! Tolerant parsing of free-form model output into a summary and tags.
//!
//! Models are asked to answer with a `SUMMARY:` section followed by a
//! `TAGS:` section holding a JSON array. They frequently deviate, so every
//! step here degrades instead of failing: a missing marker, an unbalanced
//! bracket or a bulleted list all still produce a usable result.

use serde_json::Value;
use tracing::debug;

use papertrail_core::{defaults, ParsedSummary};

const SUMMARY_MARKER: &str = "SUMMARY:";
const TAGS_MARKER: &str = "TAGS:";

/// Characters stripped from the start of a tag in line mode.
const BULLET_CHARS: &[char] = &['-', '*', '•'];

/// Split raw model output into a summary and at most eight tags.
///
/// Never fails. Empty input yields an empty summary and no tags.
pub fn parse_model_output(raw: &str) -> ParsedSummary {
    let (summary, tags) = match raw.split_once(TAGS_MARKER) {
        Some((summary_part, tags_part)) => {
            let tags_part = tags_part.trim();
            let tags = parse_tag_list_json(tags_part).unwrap_or_else(|| {
                debug!(
                    subsystem = "inference",
                    component = "parser",
                    "Tag list is not a JSON array, falling back to line mode"
                );
                parse_tag_lines(tags_part)
            });
            (strip_summary_marker(summary_part), tags)
        }
        None => (strip_summary_marker(raw), Vec::new()),
    };

    ParsedSummary {
        summary: summary.trim().to_string(),
        tags: normalize_tags(tags),
    }
}

/// Text after the first `SUMMARY:` marker, or the input unchanged.
fn strip_summary_marker(text: &str) -> &str {
    text.split_once(SUMMARY_MARKER)
        .map(|(_, rest)| rest)
        .unwrap_or(text)
}

/// Decode the span from the first `[` to the first `]` as a JSON array.
///
/// Returns `None` when either bracket is missing, they are out of order, or
/// the span is not a JSON array. Non-string elements are dropped.
pub fn parse_tag_list_json(text: &str) -> Option<Vec<String>> {
    let start = text.find('[')?;
    let end = text.find(']')?;
    if end < start {
        return None;
    }

    match serde_json::from_str::<Value>(&text[start..=end]).ok()? {
        Value::Array(items) => Some(
            items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
        ),
        _ => None,
    }
}

/// One tag per non-empty line, with list bullets removed.
pub fn parse_tag_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(BULLET_CHARS)
                .trim_end_matches('-')
                .trim()
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .collect()
}

/// Trim every tag, drop empty ones and keep the first eight in order.
pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .take(defaults::MAX_TAGS)
        .collect()
}
