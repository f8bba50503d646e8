//! Text classification at the agent boundary.
//!
//! Agent replies are free text. Everything past this module works on
//! `Verdict` and issue lists, never on the raw reply.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::Verdict;

/// Reply keywords that flag a checkpoint. Matched case-insensitively as substrings.
pub const FLAG_KEYWORDS: [&str; 2] = ["FAILED", "CRITICAL"];

/// Substring match, so `test_parser.py`, `unittest` and `pytest_cache` count.
/// Words like "latest" or "attestation" also count.
static TEST_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(test|assert)").expect("test marker regex should be valid")
});

/// Classify a reviewer reply.
///
/// Returns `Flagged` with the offending lines when any keyword appears.
pub fn classify_reply(reply: &str) -> (Verdict, Vec<String>) {
    let issues: Vec<String> = reply
        .lines()
        .filter(|line| contains_flag_keyword(line))
        .map(|line| line.trim().to_string())
        .collect();
    if issues.is_empty() {
        (Verdict::Passed, issues)
    } else {
        (Verdict::Flagged, issues)
    }
}

fn contains_flag_keyword(text: &str) -> bool {
    let upper = text.to_uppercase();
    FLAG_KEYWORDS.iter().any(|kw| upper.contains(kw))
}

/// Whether recent agent output looks like it ran or touched tests.
pub fn has_test_markers(output: &str) -> bool {
    TEST_MARKER_RE.is_match(output)
}

/// Last `max_lines` lines of `text`, joined with `\n`.
pub fn tail_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

/// Last `max_bytes` of `text`, cut on a char boundary.
pub fn tail_bytes(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
