//! KnowledgeIndex: the search engine over the curated corpus
//!
//! Built once at process start from the four domain corpora, read-only
//! afterward. Every item gets one sparse TF-IDF vector in a shared
//! vocabulary; queries are vectorized in the same space and scored by
//! cosine similarity. Integrated items receive a small ranking bonus so a
//! subcategory's synthesized statement outranks its individual rows on
//! near-equal similarity, but callers always see the raw cosine score.

use super::item::{Domain, KnowledgeItem};
use super::parser::{parse_domain_document, ParseError};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::{error, info, warn};

/// Ranking bonus applied to integrated items. Affects ordering only; the
/// reported score stays the raw cosine similarity.
const INTEGRATED_BONUS: f64 = 0.05;

/// Minimum token length kept by the tokenizer.
const MIN_TOKEN_LEN: usize = 2;

/// Fatal index construction errors. A process must not serve with a
/// corrupted or empty index.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("duplicate anchor ids in corpus: {0:?}")]
    DuplicateAnchors(Vec<String>),

    #[error("duplicate item ids in corpus: {0:?}")]
    DuplicateIds(Vec<String>),

    #[error("no knowledge items loaded from any domain")]
    EmptyCorpus,
}

/// Result type for index operations
pub type IndexResult<T> = Result<T, IndexError>;

/// What happened during a corpus load. Recoverable problems land here;
/// fatal ones surface as [`IndexError`].
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub items_per_domain: BTreeMap<Domain, usize>,
    /// Rows skipped during parsing, with the domain they belonged to
    pub skipped_rows: Vec<(Domain, ParseError)>,
    /// Domains whose source document was absent
    pub missing_domains: Vec<Domain>,
}

/// One ranked search result.
#[derive(Debug, Clone)]
pub struct SearchHit<'a> {
    pub item: &'a KnowledgeItem,
    /// Raw cosine similarity, unaffected by the integrated ranking bonus
    pub score: f64,
}

/// Duplicate-id audit over the loaded corpus.
#[derive(Debug, Clone)]
pub struct UniquenessReport {
    pub duplicate_anchor_ids: Vec<String>,
    pub duplicate_item_ids: Vec<String>,
    pub total_items: usize,
}

impl UniquenessReport {
    pub fn is_clean(&self) -> bool {
        self.duplicate_anchor_ids.is_empty() && self.duplicate_item_ids.is_empty()
    }
}

/// Corpus counts by kind and domain.
#[derive(Debug, Clone)]
pub struct IndexStats {
    pub total_items: usize,
    pub fusion_items: usize,
    pub integrated_items: usize,
    pub items_per_domain: BTreeMap<Domain, usize>,
}

/// The knowledge retrieval index. Immutable after construction; safe to
/// share behind an `Arc` and query concurrently.
#[derive(Debug)]
pub struct KnowledgeIndex {
    items: Vec<KnowledgeItem>,
    by_anchor: HashMap<String, usize>,
    vocabulary: HashMap<String, usize>,
    idf: Vec<f64>,
    /// One L2-normalized sparse vector per item, sorted by term id
    vectors: Vec<Vec<(usize, f64)>>,
}

impl KnowledgeIndex {
    /// Load the corpus from raw domain documents and build the vector space.
    ///
    /// An absent domain is fatal for that domain only: it is recorded in the
    /// report and the remaining domains still load. Duplicate anchor or item
    /// ids are fatal for the whole index.
    pub fn load(sources: &HashMap<Domain, String>) -> IndexResult<(Self, LoadReport)> {
        let mut report = LoadReport::default();
        let mut items = Vec::new();

        for domain in Domain::ALL {
            match sources.get(&domain) {
                Some(content) => {
                    let parsed = parse_domain_document(domain, content);
                    report.items_per_domain.insert(domain, parsed.items.len());
                    for err in parsed.errors {
                        report.skipped_rows.push((domain, err));
                    }
                    info!(
                        domain = %domain,
                        items = parsed.items.len(),
                        "domain corpus loaded"
                    );
                    items.extend(parsed.items);
                }
                None => {
                    error!(domain = %domain, "corpus document missing for domain");
                    report.missing_domains.push(domain);
                }
            }
        }

        let index = Self::from_items(items)?;
        info!(total = index.len(), "knowledge index built");
        Ok((index, report))
    }

    /// Build an index directly from pre-constructed items.
    ///
    /// Runs the uniqueness invariant check before building vectors.
    pub fn from_items(items: Vec<KnowledgeItem>) -> IndexResult<Self> {
        if items.is_empty() {
            return Err(IndexError::EmptyCorpus);
        }

        let report = audit_uniqueness(&items);
        if !report.duplicate_anchor_ids.is_empty() {
            return Err(IndexError::DuplicateAnchors(report.duplicate_anchor_ids));
        }
        if !report.duplicate_item_ids.is_empty() {
            return Err(IndexError::DuplicateIds(report.duplicate_item_ids));
        }

        let by_anchor = items
            .iter()
            .enumerate()
            .map(|(idx, item)| (item.anchor_id.clone(), idx))
            .collect();

        // Shared vocabulary and document frequencies over the whole corpus.
        let mut vocabulary: HashMap<String, usize> = HashMap::new();
        let mut document_frequency: Vec<usize> = Vec::new();
        let token_lists: Vec<Vec<String>> =
            items.iter().map(|item| tokenize(&item.content)).collect();

        for tokens in &token_lists {
            let mut seen: Vec<usize> = Vec::new();
            for token in tokens {
                let term_id = match vocabulary.get(token) {
                    Some(&id) => id,
                    None => {
                        let id = vocabulary.len();
                        vocabulary.insert(token.clone(), id);
                        document_frequency.push(0);
                        id
                    }
                };
                if !seen.contains(&term_id) {
                    seen.push(term_id);
                    document_frequency[term_id] += 1;
                }
            }
        }

        let corpus_len = items.len() as f64;
        let idf: Vec<f64> = document_frequency
            .iter()
            .map(|&df| (corpus_len / (1.0 + df as f64)).ln() + 1.0)
            .collect();

        let vectors = token_lists
            .iter()
            .map(|tokens| weigh_and_normalize(tokens, &vocabulary, &idf))
            .collect();

        Ok(Self {
            items,
            by_anchor,
            vocabulary,
            idf,
            vectors,
        })
    }

    /// Similarity search over the corpus.
    ///
    /// Restricts candidates to `domain` when given, ranks by cosine
    /// similarity with the integrated bonus applied to ordering only, and
    /// returns at most `top_k` hits. An empty result is a normal outcome
    /// (callers substitute a sentinel anchor), never an error.
    pub fn search(
        &self,
        query: &str,
        domain: Option<Domain>,
        top_k: usize,
        prioritize_integrated: bool,
    ) -> Vec<SearchHit<'_>> {
        let query_vector = weigh_and_normalize(&tokenize(query), &self.vocabulary, &self.idf);

        // (candidate index, ranking key, raw score); stable sort keeps
        // insertion order on equal keys.
        let mut scored: Vec<(usize, f64, f64)> = self
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| domain.map_or(true, |d| item.domain == d))
            .map(|(idx, item)| {
                let score = sparse_dot(&query_vector, &self.vectors[idx]);
                let key = if prioritize_integrated && item.is_integrated {
                    score + INTEGRATED_BONUS
                } else {
                    score
                };
                (idx, key, score)
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        scored
            .into_iter()
            .map(|(idx, _, score)| SearchHit {
                item: &self.items[idx],
                score,
            })
            .collect()
    }

    /// Look an item up by its citation key.
    pub fn get_by_anchor(&self, anchor_id: &str) -> Option<&KnowledgeItem> {
        self.by_anchor.get(anchor_id).map(|&idx| &self.items[idx])
    }

    /// The complete anchor universe, in corpus insertion order.
    ///
    /// Fake-anchor detection depends on this being the full, unfiltered set.
    pub fn all_anchor_ids(&self) -> Vec<String> {
        self.items.iter().map(|i| i.anchor_id.clone()).collect()
    }

    /// Duplicate-id audit. `from_items` already enforces this as a fatal
    /// startup invariant; this surfaces the same report on demand.
    pub fn validate_uniqueness(&self) -> UniquenessReport {
        let report = audit_uniqueness(&self.items);
        if !report.is_clean() {
            warn!(
                anchors = report.duplicate_anchor_ids.len(),
                ids = report.duplicate_item_ids.len(),
                "index uniqueness audit found duplicates"
            );
        }
        report
    }

    /// Corpus counts by kind and domain.
    pub fn stats(&self) -> IndexStats {
        let mut items_per_domain = BTreeMap::new();
        for item in &self.items {
            *items_per_domain.entry(item.domain).or_insert(0) += 1;
        }
        IndexStats {
            total_items: self.items.len(),
            fusion_items: self.items.iter().filter(|i| i.is_fusion).count(),
            integrated_items: self.items.iter().filter(|i| i.is_integrated).count(),
            items_per_domain,
        }
    }

    /// All items, in insertion order.
    pub fn items(&self) -> &[KnowledgeItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn audit_uniqueness(items: &[KnowledgeItem]) -> UniquenessReport {
    let mut anchor_counts: HashMap<&str, usize> = HashMap::new();
    let mut id_counts: HashMap<&str, usize> = HashMap::new();
    for item in items {
        *anchor_counts.entry(item.anchor_id.as_str()).or_insert(0) += 1;
        *id_counts.entry(item.id.as_str()).or_insert(0) += 1;
    }

    let mut duplicate_anchor_ids: Vec<String> = anchor_counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(a, _)| a.to_string())
        .collect();
    duplicate_anchor_ids.sort();
    let mut duplicate_item_ids: Vec<String> = id_counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(a, _)| a.to_string())
        .collect();
    duplicate_item_ids.sort();

    UniquenessReport {
        duplicate_anchor_ids,
        duplicate_item_ids,
        total_items: items.len(),
    }
}

/// Lowercase alphanumeric tokens, minimum length 2.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= MIN_TOKEN_LEN)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Term-count × idf weights for a token list, L2-normalized, sparse and
/// sorted by term id. Unknown terms are ignored (queries may contain them).
fn weigh_and_normalize(
    tokens: &[String],
    vocabulary: &HashMap<String, usize>,
    idf: &[f64],
) -> Vec<(usize, f64)> {
    let mut counts: HashMap<usize, f64> = HashMap::new();
    for token in tokens {
        if let Some(&term_id) = vocabulary.get(token) {
            *counts.entry(term_id).or_insert(0.0) += 1.0;
        }
    }

    let mut weights: Vec<(usize, f64)> = counts
        .into_iter()
        .map(|(term_id, tf)| (term_id, tf * idf[term_id]))
        .collect();
    weights.sort_by_key(|(term_id, _)| *term_id);

    let norm = weights.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
    if norm > 0.0 {
        for (_, w) in &mut weights {
            *w /= norm;
        }
    }
    weights
}

/// Dot product of two sparse vectors sorted by term id.
fn sparse_dot(a: &[(usize, f64)], b: &[(usize, f64)]) -> f64 {
    let mut dot = 0.0;
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                dot += a[i].1 * b[j].1;
                i += 1;
                j += 1;
            }
        }
    }
    dot
}
