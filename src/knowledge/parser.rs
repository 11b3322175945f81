//! Corpus document parser
//!
//! A domain document is a line-oriented, markdown-like sequence of
//! subcategory sections:
//!
//! ```text
//! ### Pricing Strategy
//! | Insight | References |
//! | :--- | :--- |
//! | Anchoring shapes willingness to pay (fusion) | Priceless, Thinking Fast and Slow |
//! **Integrated**
//! Prices are judged relative to reference points, never in isolation.
//! ```
//!
//! Rows that cannot be parsed are skipped and reported; they never abort
//! the load. Anchor ids are derived deterministically so reloading the same
//! document always yields the same citation keys.

use super::item::{Domain, KnowledgeItem};
use thiserror::Error;
use tracing::warn;

/// Tag inside an insight cell marking a multi-work fusion insight.
const FUSION_TAG: &str = "(fusion)";

/// A recoverable problem with one row of a corpus document.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
    #[error("line {line}: malformed row: {reason}")]
    MalformedRow { line: usize, reason: String },

    #[error("line {line}: row appears before any subcategory header")]
    OrphanRow { line: usize },
}

/// The outcome of parsing one domain document.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub items: Vec<KnowledgeItem>,
    /// Rows that were skipped, with reasons
    pub errors: Vec<ParseError>,
}

/// Parse one domain's raw document into knowledge items.
///
/// Row anchor ids are `{domain}_{subcategory}_{NNN}` with a per-domain
/// running counter; integrated-block anchor ids are
/// `{domain}_{subcategory}_integrated`. Slashes in subcategory names are
/// flattened to underscores so anchors stay single tokens.
pub fn parse_domain_document(domain: Domain, content: &str) -> ParsedDocument {
    let mut items = Vec::new();
    let mut errors = Vec::new();
    let mut subcategory: Option<String> = None;
    let mut row_counter: usize = 1;

    let lines: Vec<&str> = content.lines().collect();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim();

        if let Some(name) = parse_subcategory_header(trimmed) {
            subcategory = Some(name);
            i += 1;
            continue;
        }

        if is_integrated_marker(trimmed) {
            // Collect the free-text block until the next subcategory header.
            let mut block = Vec::new();
            i += 1;
            while i < lines.len() {
                let next = lines[i].trim();
                if parse_subcategory_header(next).is_some() {
                    break;
                }
                if !next.is_empty() {
                    block.push(next);
                }
                i += 1;
            }
            match &subcategory {
                Some(sub) if !block.is_empty() => {
                    let flat = sub.replace('/', "_");
                    items.push(KnowledgeItem {
                        id: format!("kb_{}_integrated_{}", domain, flat),
                        domain,
                        subcategory: sub.clone(),
                        anchor_id: format!("{}_{}_integrated", domain, flat),
                        content: block.join(" "),
                        is_fusion: false,
                        is_integrated: true,
                        reference_works: Vec::new(),
                    });
                }
                Some(_) => {}
                None => errors.push(ParseError::OrphanRow { line: i }),
            }
            continue;
        }

        if trimmed.starts_with('|') && !is_alignment_row(trimmed) {
            match &subcategory {
                Some(sub) => match parse_table_row(trimmed) {
                    Ok(Some((insight, references))) => {
                        let is_fusion = insight.contains(FUSION_TAG);
                        let content = if is_fusion {
                            insight.replace(FUSION_TAG, "").trim().to_string()
                        } else {
                            insight
                        };
                        let flat = sub.replace('/', "_");
                        items.push(KnowledgeItem {
                            id: format!("kb_{}_{:04}", domain, row_counter),
                            domain,
                            subcategory: sub.clone(),
                            anchor_id: format!("{}_{}_{:03}", domain, flat, row_counter),
                            content,
                            is_fusion,
                            is_integrated: false,
                            reference_works: references,
                        });
                        row_counter += 1;
                    }
                    Ok(None) => {} // header row
                    Err(reason) => {
                        warn!(domain = %domain, line = i + 1, %reason, "skipping malformed row");
                        errors.push(ParseError::MalformedRow {
                            line: i + 1,
                            reason,
                        });
                    }
                },
                None => {
                    warn!(domain = %domain, line = i + 1, "skipping row before any subcategory");
                    errors.push(ParseError::OrphanRow { line: i + 1 });
                }
            }
        }

        i += 1;
    }

    ParsedDocument { items, errors }
}

/// Match a subcategory header line: `### <name>`, bold markers and an
/// optional `Subcategory:` prefix tolerated.
fn parse_subcategory_header(line: &str) -> Option<String> {
    let rest = line.strip_prefix("###")?;
    let mut name = rest.trim().trim_matches('*').trim();
    if let Some(stripped) = name.strip_prefix("Subcategory:") {
        name = stripped.trim();
    }
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Match the marker that opens an integrated-knowledge block.
fn is_integrated_marker(line: &str) -> bool {
    let inner = line.trim_matches('*').trim();
    inner.eq_ignore_ascii_case("integrated") || inner.eq_ignore_ascii_case("integrated knowledge")
}

/// Table alignment rows look like `| :--- | ---: |`.
fn is_alignment_row(line: &str) -> bool {
    line.chars().all(|c| matches!(c, '|' | ':' | '-' | ' '))
}

/// Split a `| insight | references |` row into its two cells.
///
/// Returns `Ok(None)` for the column-header row, `Err` for rows that do not
/// yield both cells.
fn parse_table_row(line: &str) -> Result<Option<(String, Vec<String>)>, String> {
    let cells: Vec<&str> = line
        .trim_matches('|')
        .split('|')
        .map(|c| c.trim())
        .collect();

    if cells.len() < 2 {
        return Err(format!("expected 2 cells, found {}", cells.len()));
    }
    let insight = cells[0];
    let references = cells[1];
    if insight.is_empty() || references.is_empty() {
        return Err("empty insight or reference cell".to_string());
    }

    // Column-header row, not data.
    let insight_plain = insight.trim_matches('*');
    if insight_plain.eq_ignore_ascii_case("insight") || insight_plain.eq_ignore_ascii_case("key insight")
    {
        return Ok(None);
    }

    let works: Vec<String> = references
        .split(',')
        .map(|w| w.trim().to_string())
        .filter(|w| !w.is_empty())
        .collect();
    if works.is_empty() {
        return Err("no reference works listed".to_string());
    }

    Ok(Some((insight.to_string(), works)))
}
