//! Grounding validator — the quality gate on produced documents
//!
//! A pure function of (document, unique sentences, anchor universe). Four
//! independent sub-checks, all of which must pass:
//!
//! 1. every sentence carries at least one citation token
//! 2. at least three unique sentences
//! 3. zero mentions of well-known external frameworks
//! 4. zero fake anchors (citations outside the anchor universe)
//!
//! The orchestrator treats `passed == false` as the retry signal; it never
//! interprets individual sub-checks.

use super::state::ValidationReport;
use std::collections::HashSet;
use tracing::{info, warn};

/// Target share of sentences carrying a citation.
const ANCHORED_TARGET: f64 = 1.0;

/// Minimum number of unique sentences the proposal must carry.
const MIN_UNIQUE_SENTENCES: usize = 3;

/// List items shorter than this (after markup stripping) are noise.
const MIN_UNIQUE_SENTENCE_LEN: usize = 10;

/// Named frameworks the proposal must not lean on. Matched
/// case-insensitively on whole-word boundaries.
const EXTERNAL_FRAMEWORKS: [&str; 12] = [
    "SWOT",
    "PEST",
    "5 Forces",
    "Porter",
    "Blue Ocean",
    "Lean",
    "Agile",
    "PDCA",
    "BCG Matrix",
    "Ansoff",
    "4P",
    "STP",
];

/// Validate a produced document against the anchor universe.
///
/// `anchor_universe` must be the union of every anchor exposed to any stage
/// in the run — the full index snapshot plus the per-domain assigned
/// anchors — or valid citations will be reported as fake.
pub fn validate(
    document: &str,
    unique_sentences: &[String],
    anchor_universe: &HashSet<String>,
) -> ValidationReport {
    let mut errors = Vec::new();

    let anchored_ratio = anchored_ratio(document);
    if anchored_ratio < ANCHORED_TARGET {
        errors.push(format!(
            "anchored ratio {:.2} (target {:.2})",
            anchored_ratio, ANCHORED_TARGET
        ));
    }

    let unique_insight_count = unique_sentences.len();
    if unique_insight_count < MIN_UNIQUE_SENTENCES {
        errors.push(format!(
            "unique sentences: {} (minimum {})",
            unique_insight_count, MIN_UNIQUE_SENTENCES
        ));
    }

    let external_framework_hits = count_framework_hits(document);
    if external_framework_hits > 0 {
        errors.push(format!(
            "external frameworks: {} hits (allowed 0)",
            external_framework_hits
        ));
    }

    let fake_anchor_ids = fake_anchors(document, anchor_universe);
    if !fake_anchor_ids.is_empty() {
        warn!(fakes = ?fake_anchor_ids, "fake anchors detected");
        errors.push(format!("fake anchors: {:?}", fake_anchor_ids));
    }

    let passed = errors.is_empty();
    if passed {
        info!(anchored_ratio, unique_insight_count, "validation passed");
    } else {
        warn!(?errors, "validation failed");
    }

    ValidationReport {
        anchored_ratio,
        unique_insight_count,
        external_framework_hits,
        fake_anchor_ids,
        passed,
        errors,
    }
}

/// Share of sentences carrying at least one citation token. A document
/// with no sentences at all scores 0.0.
pub fn anchored_ratio(document: &str) -> f64 {
    let sentences = split_sentences(document);
    if sentences.is_empty() {
        return 0.0;
    }
    let anchored = sentences
        .iter()
        .filter(|s| !extract_citations(s).is_empty())
        .count();
    anchored as f64 / sentences.len() as f64
}

/// Split on sentence-terminal punctuation followed by whitespace.
///
/// Newlines alone do not split: headers and metadata lines merge into the
/// chunk that follows, matching how produced markdown reads as prose.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let bytes = text.as_bytes();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        if matches!(bytes[i], b'.' | b'!' | b'?')
            && bytes.get(i + 1).is_some_and(|b| b.is_ascii_whitespace())
        {
            let sentence = text[start..=i].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = i + 1;
        }
        i += 1;
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Every bracketed citation token in the document, in order of appearance.
pub fn extract_citations(text: &str) -> Vec<String> {
    let mut citations = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        match after.find(']') {
            Some(close) => {
                let token = &after[..close];
                if !token.is_empty() {
                    citations.push(token.to_string());
                }
                rest = &after[close + 1..];
            }
            None => break,
        }
    }
    citations
}

/// Citation tokens not present in the anchor universe, deduplicated, in
/// order of first appearance.
fn fake_anchors(document: &str, anchor_universe: &HashSet<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    extract_citations(document)
        .into_iter()
        .filter(|c| !anchor_universe.contains(c))
        .filter(|c| seen.insert(c.clone()))
        .collect()
}

/// Count whole-word, case-insensitive mentions of denylisted frameworks.
pub fn count_framework_hits(document: &str) -> usize {
    let haystack = document.to_lowercase();
    EXTERNAL_FRAMEWORKS
        .iter()
        .map(|keyword| count_whole_word(&haystack, &keyword.to_lowercase()))
        .sum()
}

fn count_whole_word(haystack: &str, needle: &str) -> usize {
    let mut count = 0;
    let mut offset = 0;
    while let Some(pos) = haystack[offset..].find(needle) {
        let start = offset + pos;
        let end = start + needle.len();
        let before_ok = start == 0
            || !haystack[..start]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric());
        let after_ok = end == haystack.len()
            || !haystack[end..].chars().next().is_some_and(|c| c.is_alphanumeric());
        if before_ok && after_ok {
            count += 1;
        }
        offset = start + needle.len();
    }
    count
}

/// Extract the unique sentences from a proposal's designated section.
///
/// The section is the heading containing "unique sentence"; items are its
/// numbered or bulleted list entries with bold markup and citation tokens
/// stripped. Items under 10 characters are discarded as noise.
pub fn extract_unique_sentences(document: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut in_section = false;

    for line in document.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('#') {
            in_section = trimmed.to_lowercase().contains("unique sentence");
            continue;
        }
        if !in_section {
            continue;
        }
        if let Some(item) = strip_list_marker(trimmed) {
            let cleaned = strip_markup(item);
            if cleaned.chars().count() >= MIN_UNIQUE_SENTENCE_LEN {
                sentences.push(cleaned);
            }
        }
    }

    sentences
}

/// Strip a leading `1.` / `-` / `*` list marker; returns None for
/// non-list lines.
fn strip_list_marker(line: &str) -> Option<&str> {
    if let Some(rest) = line.strip_prefix('-').or_else(|| line.strip_prefix('*')) {
        return Some(rest.trim());
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        if let Some(rest) = line[digits..].strip_prefix('.') {
            return Some(rest.trim());
        }
    }
    None
}

/// Remove bold markers and bracketed citation tokens (with any
/// `(anchored_by: …)` style parenthetical left dangling around them).
fn strip_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {}
            '[' => {
                for inner in chars.by_ref() {
                    if inner == ']' {
                        break;
                    }
                }
            }
            _ => out.push(c),
        }
    }
    // Drop an empty trailing citation wrapper like `(anchored_by: )`.
    let cleaned = out
        .replace("(anchored_by: )", "")
        .replace("(anchored_by:)", "");
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}
