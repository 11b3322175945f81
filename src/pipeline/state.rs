//! Pipeline state: the typed aggregate threaded through one run
//!
//! Stages never mutate the aggregate directly. Each stage returns a
//! [`StageUpdate`] — a partial update whose fields carry an explicit merge
//! strategy — and the orchestrator folds it in. Overwrite fields take the
//! last written value; accumulate fields append across the fan-out branches
//! in whatever order they complete.

use crate::knowledge::Domain;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// How a stage's partial value folds into the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Last write wins
    Overwrite,
    /// Append to the aggregate list; order across branches is not defined
    Append,
}

/// Integration strategy for the four domain reviews.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Reduce the reviews into 2–3 tension axes with syntheses
    Synthesis,
    /// Juxtapose the reviews verbatim with one bridging conclusion
    SimpleMerge,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Synthesis => f.write_str("synthesis"),
            Mode::SimpleMerge => f.write_str("simple_merge"),
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synthesis" => Ok(Mode::Synthesis),
            "simple_merge" => Ok(Mode::SimpleMerge),
            other => Err(format!("unknown mode: {}", other)),
        }
    }
}

/// Target rendition of the final proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalFormat {
    /// Editorial content (article, essay, video)
    Content,
    /// A service or product concept
    Service,
}

impl fmt::Display for ProposalFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProposalFormat::Content => f.write_str("content"),
            ProposalFormat::Service => f.write_str("service"),
        }
    }
}

impl FromStr for ProposalFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "content" => Ok(ProposalFormat::Content),
            "service" => Ok(ProposalFormat::Service),
            other => Err(format!("unknown format: {}", other)),
        }
    }
}

/// The book whose summary seeds the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookDescriptor {
    pub id: String,
    pub title: String,
    pub author: String,
    pub topic: String,
    pub summary: String,
}

impl BookDescriptor {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        author: impl Into<String>,
        topic: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            author: author.into(),
            topic: topic.into(),
            summary: summary.into(),
        }
    }
}

/// One domain's review of the book against its assigned anchor.
///
/// A failed branch still produces a review — `error` set, text fields
/// empty — so the fan-in barrier always sees one entry per domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainReview {
    pub domain: Domain,
    pub anchor_id: String,
    pub advantages: String,
    pub problems: String,
    pub conditions: String,
    pub error: Option<String>,
}

impl DomainReview {
    /// An empty review recording a branch failure.
    pub fn failed(domain: Domain, anchor_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            domain,
            anchor_id: anchor_id.into(),
            advantages: String::new(),
            problems: String::new(),
            conditions: String::new(),
            error: Some(error.into()),
        }
    }
}

/// A pair of opposing considerations with a proposed balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensionAxis {
    pub axis_name: String,
    pub pole_a: String,
    pub pole_b: String,
    pub synthesis: String,
}

/// The Integration stage's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationOutcome {
    /// The assembled integration record
    pub text: String,
    /// Empty in simple-merge mode
    pub tension_axes: Vec<TensionAxis>,
    /// One line justifying the format choice
    pub format_reasoning: String,
    /// One closing sentence
    pub conclusion: String,
}

/// The grounding quality gate's verdict. Created once per validation pass;
/// a retry produces a fresh report rather than mutating this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Share of sentences carrying at least one citation token, 0.0–1.0
    pub anchored_ratio: f64,
    pub unique_insight_count: usize,
    pub external_framework_hits: usize,
    /// Citation tokens not present in the anchor universe
    pub fake_anchor_ids: Vec<String>,
    /// All sub-checks green
    pub passed: bool,
    /// Human-readable reasons for each failed sub-check
    pub errors: Vec<String>,
}

/// The aggregate threaded through one pipeline run.
///
/// Owned exclusively by one orchestrator run; branches receive narrowed
/// views and never write here directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    // Overwrite fields
    pub book: BookDescriptor,
    pub mode: Mode,
    pub format: ProposalFormat,
    /// Chosen anchor per domain (sentinels included)
    pub anchors: BTreeMap<Domain, String>,
    /// Convergence/conflict/gaps/boundary analysis across the four anchors
    pub anchor_analysis: Option<String>,
    /// Complete anchor universe snapshot taken at anchor-mapping time
    pub available_anchors: Vec<String>,
    pub integration: Option<IntegrationOutcome>,
    /// The Production stage's seven-part proposal
    pub proposal: Option<String>,
    /// The final assembled document
    pub document: Option<String>,
    pub unique_sentences: Vec<String>,
    pub validation: Option<ValidationReport>,
    /// Monotonically non-decreasing, bounded by the configured maximum
    pub retry_count: u32,
    pub error_message: Option<String>,

    // Accumulate fields
    pub reviews: Vec<DomainReview>,
    pub log_messages: Vec<String>,
    pub validation_errors: Vec<String>,
}

impl PipelineState {
    pub fn new(book: BookDescriptor, mode: Mode, format: ProposalFormat) -> Self {
        Self {
            book,
            mode,
            format,
            anchors: BTreeMap::new(),
            anchor_analysis: None,
            available_anchors: Vec::new(),
            integration: None,
            proposal: None,
            document: None,
            unique_sentences: Vec::new(),
            validation: None,
            retry_count: 0,
            error_message: None,
            reviews: Vec::new(),
            log_messages: Vec::new(),
            validation_errors: Vec::new(),
        }
    }

    /// Fold a stage's partial update into the aggregate, applying each
    /// field's declared merge strategy.
    pub fn apply(&mut self, update: StageUpdate) {
        // Overwrite
        if let Some(anchors) = update.anchors {
            self.anchors = anchors;
        }
        if let Some(analysis) = update.anchor_analysis {
            self.anchor_analysis = Some(analysis);
        }
        if let Some(available) = update.available_anchors {
            self.available_anchors = available;
        }
        if let Some(integration) = update.integration {
            self.integration = Some(integration);
        }
        if let Some(proposal) = update.proposal {
            self.proposal = Some(proposal);
        }
        if let Some(document) = update.document {
            self.document = Some(document);
        }
        if let Some(unique) = update.unique_sentences {
            self.unique_sentences = unique;
        }
        if let Some(validation) = update.validation {
            self.validation = Some(validation);
        }

        // Append
        self.reviews.extend(update.reviews);
        self.log_messages.extend(update.log_messages);
        self.validation_errors.extend(update.validation_errors);
    }

    /// Re-enter anchor mapping for another attempt: the previous reviews
    /// and produced artifacts are discarded, accumulated validation errors
    /// are kept for observability, and the retry counter advances.
    pub fn reset_for_retry(&mut self) {
        self.retry_count += 1;
        self.reviews.clear();
        self.proposal = None;
        self.document = None;
        self.unique_sentences.clear();
        self.validation = None;
    }
}

/// A stage's partial update. Field strategies:
/// `reviews`, `log_messages`, `validation_errors` are [`MergeStrategy::Append`];
/// everything else is [`MergeStrategy::Overwrite`].
#[derive(Debug, Clone, Default)]
pub struct StageUpdate {
    pub anchors: Option<BTreeMap<Domain, String>>,
    pub anchor_analysis: Option<String>,
    pub available_anchors: Option<Vec<String>>,
    pub integration: Option<IntegrationOutcome>,
    pub proposal: Option<String>,
    pub document: Option<String>,
    pub unique_sentences: Option<Vec<String>>,
    pub validation: Option<ValidationReport>,
    pub reviews: Vec<DomainReview>,
    pub log_messages: Vec<String>,
    pub validation_errors: Vec<String>,
}

impl StageUpdate {
    /// The strategy applied to a named field; used by tests to pin the
    /// merge table.
    pub fn strategy_for(field: &str) -> MergeStrategy {
        match field {
            "reviews" | "log_messages" | "validation_errors" => MergeStrategy::Append,
            _ => MergeStrategy::Overwrite,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> PipelineState {
        PipelineState::new(
            BookDescriptor::new("b1", "T", "A", "topic", "a summary long enough"),
            Mode::Synthesis,
            ProposalFormat::Content,
        )
    }

    fn review(domain: Domain) -> DomainReview {
        DomainReview {
            domain,
            anchor_id: "a1".to_string(),
            advantages: "adv".to_string(),
            problems: "prob".to_string(),
            conditions: "cond".to_string(),
            error: None,
        }
    }

    #[test]
    fn overwrite_fields_take_last_write() {
        let mut s = state();
        s.apply(StageUpdate {
            proposal: Some("first".to_string()),
            ..Default::default()
        });
        s.apply(StageUpdate {
            proposal: Some("second".to_string()),
            ..Default::default()
        });
        assert_eq!(s.proposal.as_deref(), Some("second"));
    }

    #[test]
    fn accumulate_fields_append_across_updates() {
        let mut s = state();
        s.apply(StageUpdate {
            reviews: vec![review(Domain::Business)],
            ..Default::default()
        });
        s.apply(StageUpdate {
            reviews: vec![review(Domain::Science)],
            log_messages: vec!["note".to_string()],
            ..Default::default()
        });
        assert_eq!(s.reviews.len(), 2);
        assert_eq!(s.log_messages, vec!["note".to_string()]);
    }

    #[test]
    fn none_fields_leave_state_untouched() {
        let mut s = state();
        s.apply(StageUpdate {
            proposal: Some("kept".to_string()),
            ..Default::default()
        });
        s.apply(StageUpdate::default());
        assert_eq!(s.proposal.as_deref(), Some("kept"));
    }

    #[test]
    fn retry_reset_discards_attempt_but_keeps_validation_errors() {
        let mut s = state();
        s.apply(StageUpdate {
            reviews: vec![review(Domain::Business)],
            proposal: Some("p".to_string()),
            document: Some("d".to_string()),
            unique_sentences: Some(vec!["u".to_string()]),
            validation_errors: vec!["anchored_ratio below target".to_string()],
            ..Default::default()
        });

        s.reset_for_retry();

        assert_eq!(s.retry_count, 1);
        assert!(s.reviews.is_empty());
        assert!(s.proposal.is_none());
        assert!(s.document.is_none());
        assert!(s.unique_sentences.is_empty());
        assert_eq!(s.validation_errors.len(), 1);
    }

    #[test]
    fn merge_table_matches_field_semantics() {
        assert_eq!(StageUpdate::strategy_for("reviews"), MergeStrategy::Append);
        assert_eq!(
            StageUpdate::strategy_for("log_messages"),
            MergeStrategy::Append
        );
        assert_eq!(
            StageUpdate::strategy_for("proposal"),
            MergeStrategy::Overwrite
        );
    }

    #[test]
    fn mode_and_format_parse_from_str() {
        assert_eq!("synthesis".parse::<Mode>().unwrap(), Mode::Synthesis);
        assert_eq!("simple_merge".parse::<Mode>().unwrap(), Mode::SimpleMerge);
        assert_eq!(
            "service".parse::<ProposalFormat>().unwrap(),
            ProposalFormat::Service
        );
        assert!("reduce".parse::<Mode>().is_err());
    }
}
