//! End-to-end runs over a small in-memory corpus and a scripted client.

use super::*;
use crate::generation::{GenerationError, MockClient, SchemaName};
use crate::knowledge::{Domain, KnowledgeIndex, KnowledgeItem};
use serde_json::json;
use std::sync::{Arc, Mutex};

fn item(anchor: &str, domain: Domain, content: &str) -> KnowledgeItem {
    KnowledgeItem {
        id: format!("kb_{}", anchor),
        domain,
        subcategory: "core".to_string(),
        anchor_id: anchor.to_string(),
        content: content.to_string(),
        is_fusion: false,
        is_integrated: false,
        reference_works: vec!["Source Work".to_string()],
    }
}

fn index() -> Arc<KnowledgeIndex> {
    Arc::new(
        KnowledgeIndex::from_items(vec![
            item("a1", Domain::Business, "pricing strategy and incentives"),
            item("b1", Domain::Science, "attention and working memory"),
            item("c1", Domain::History, "printing press and information"),
            item("d1", Domain::Humanities, "habit formation and identity"),
        ])
        .expect("test corpus"),
    )
}

fn book() -> BookDescriptor {
    BookDescriptor::new(
        "b1",
        "Deep Focus",
        "Rae Author",
        "attention economics",
        "attention and incentives shape habits around information",
    )
}

fn review_fields() -> serde_json::Value {
    json!({
        "advantages": "strong incentive framing grounded in [a1]",
        "problems": "thin on memory limits noted in [b1]",
        "conditions": "requires identity-level habits from [d1]"
    })
}

fn synthesis_fields() -> serde_json::Value {
    json!({
        "tension_axes": [
            {"axis_name": "focus vs reach", "pole_a": "go deep [b1]",
             "pole_b": "go wide [c1]", "synthesis": "depth first [a1]"}
        ],
        "format_reasoning": "narrative fits the material [a1]",
        "conclusion": "attention is the scarce input [b1]"
    })
}

/// A proposal whose every sentence carries a citation and whose
/// unique-sentence section clears the minimum count.
const PASSING_PROPOSAL: &str = "\
## Title
A grounded take on deep attention [a1].
## Target audience
Builders who trade reach for depth [b1].
## Core message
Attention compounds when habits protect it [d1].
## Structure
Three acts moving from incentives to identity [a1].
## Unique sentences
- \"Attention is the only currency worth holding\" [b1]
- \"Incentives decide what attention buys\" [a1]
- \"Identity is the habit that survives the calendar\" [d1]
## Differentiation
Anchored in four domains instead of one [c1].
## Call to action
Start tomorrow with one protected hour [b1].
";

const ANALYSIS_TEXT: &str = "anchors converge on incentives and habit protection [a1] [d1]";

fn passing_client() -> Arc<MockClient> {
    Arc::new(
        MockClient::new()
            .with_structured(SchemaName::domain_review(), review_fields())
            .with_structured(SchemaName::integration_synthesis(), synthesis_fields())
            .with_text(ANALYSIS_TEXT)
            .with_text(PASSING_PROPOSAL),
    )
}

#[tokio::test]
async fn synthesis_run_completes_first_attempt() {
    let orchestrator = Orchestrator::new(index(), passing_client(), OrchestratorConfig::default());

    let outcome = orchestrator
        .run(book(), Mode::Synthesis, ProposalFormat::Content)
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert!(outcome.started_at <= outcome.finished_at);
    assert_eq!(outcome.state.retry_count, 0);
    assert_eq!(outcome.state.reviews.len(), 4);
    assert_eq!(outcome.state.anchors.len(), 4);
    let validation = outcome.state.validation.unwrap();
    assert!(validation.passed, "{:?}", validation.errors);
    assert_eq!(validation.unique_insight_count, 3);
    let document = outcome.state.document.unwrap();
    assert!(document.contains("## Proposal"));
    assert!(document.contains("## Integration"));
}

#[tokio::test]
async fn simple_merge_run_completes_without_axes() {
    let client = Arc::new(
        MockClient::new()
            .with_structured(SchemaName::domain_review(), review_fields())
            .with_text(ANALYSIS_TEXT)
            .with_text("one incentive thread runs through all four domains [a1]")
            .with_text(PASSING_PROPOSAL),
    );
    let orchestrator = Orchestrator::new(index(), client, OrchestratorConfig::default());

    let outcome = orchestrator
        .run(book(), Mode::SimpleMerge, ProposalFormat::Service)
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    let integration = outcome.state.integration.unwrap();
    assert!(integration.tension_axes.is_empty());
    assert_eq!(integration.format_reasoning, "service format selected");
}

#[tokio::test]
async fn fake_anchor_exhausts_retries_and_fails() {
    let fabricated = "\
## Title
A take citing a made-up anchor [z9].
## Unique sentences
- \"A first fabricated-enough sentence\" [z9]
- \"A second fabricated-enough sentence\" [z9]
- \"A third fabricated-enough sentence\" [z9]
";
    let client = Arc::new(
        MockClient::new()
            .with_structured(SchemaName::domain_review(), review_fields())
            .with_structured(SchemaName::integration_synthesis(), synthesis_fields())
            .with_text_fallback(fabricated),
    );
    let orchestrator = Orchestrator::new(index(), client, OrchestratorConfig { max_retries: 1 });

    let outcome = orchestrator
        .run(book(), Mode::Synthesis, ProposalFormat::Content)
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.state.retry_count, 1);
    assert!(outcome
        .state
        .error_message
        .as_deref()
        .unwrap()
        .contains("validation failed"));
    let validation = outcome.state.validation.unwrap();
    assert!(validation.fake_anchor_ids.contains(&"z9".to_string()));
    // Errors accumulated across both attempts.
    assert!(outcome.state.validation_errors.len() > validation.errors.len());
}

#[tokio::test]
async fn zero_retries_fails_after_single_attempt() {
    let client = Arc::new(
        MockClient::new()
            .with_structured(SchemaName::domain_review(), review_fields())
            .with_structured(SchemaName::integration_synthesis(), synthesis_fields())
            .with_text_fallback("an unanchored proposal with no citations at all"),
    );
    let orchestrator = Orchestrator::new(index(), client, OrchestratorConfig { max_retries: 0 });

    let outcome = orchestrator
        .run(book(), Mode::Synthesis, ProposalFormat::Content)
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.state.retry_count, 0);
}

#[tokio::test]
async fn failed_review_branches_still_reach_the_barrier() {
    let client = Arc::new(
        MockClient::new()
            .with_structured_failure(
                SchemaName::domain_review(),
                GenerationError::Unavailable("service down".to_string()),
            )
            .with_structured(SchemaName::integration_synthesis(), synthesis_fields())
            .with_text(ANALYSIS_TEXT)
            .with_text(PASSING_PROPOSAL),
    );
    let orchestrator = Orchestrator::new(index(), client, OrchestratorConfig { max_retries: 0 });

    let outcome = orchestrator
        .run(book(), Mode::Synthesis, ProposalFormat::Content)
        .await
        .unwrap();

    // One review per domain, all carrying the branch error.
    assert_eq!(outcome.state.reviews.len(), 4);
    assert!(outcome.state.reviews.iter().all(|r| r.error.is_some()));
    assert_eq!(outcome.status, RunStatus::Completed);
}

#[tokio::test]
async fn short_summary_is_rejected_before_the_run() {
    let orchestrator = Orchestrator::new(index(), passing_client(), OrchestratorConfig::default());
    let short = BookDescriptor::new("b1", "T", "A", "t", "tiny");

    let err = orchestrator
        .run(short, Mode::Synthesis, ProposalFormat::Content)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::MissingInput { got: 4, .. }));
}

#[tokio::test]
async fn cancelled_token_stops_at_the_first_boundary() {
    let orchestrator = Orchestrator::new(index(), passing_client(), OrchestratorConfig::default());
    let token = CancellationToken::new();
    token.cancel();

    let err = orchestrator
        .run_with_cancellation(book(), Mode::Synthesis, ProposalFormat::Content, token)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled(_)));
}

struct RecordingSink {
    seen: Mutex<Vec<(StageKind, f64)>>,
}

impl ProgressSink for RecordingSink {
    fn stage_completed(&self, _run_id: RunId, stage: StageKind, percent: f64) {
        self.seen.lock().unwrap().push((stage, percent));
    }
}

#[tokio::test]
async fn progress_is_reported_after_every_stage() {
    let sink = Arc::new(RecordingSink {
        seen: Mutex::new(Vec::new()),
    });
    let orchestrator = Orchestrator::new(index(), passing_client(), OrchestratorConfig::default())
        .with_progress_sink(sink.clone());

    orchestrator
        .run(book(), Mode::Synthesis, ProposalFormat::Content)
        .await
        .unwrap();

    let seen = sink.seen.lock().unwrap();
    let percents: Vec<f64> = seen.iter().map(|(_, p)| *p).collect();
    assert_eq!(percents, vec![11.1, 33.3, 55.6, 77.8, 100.0, 88.9]);
    assert_eq!(seen[0].0, StageKind::AnchorMapping);
    assert_eq!(seen.last().unwrap().0, StageKind::Validation);
}

#[tokio::test]
async fn checkpoints_record_the_final_state() {
    let orchestrator = Orchestrator::new(index(), passing_client(), OrchestratorConfig::default());

    let outcome = orchestrator
        .run(book(), Mode::Synthesis, ProposalFormat::Content)
        .await
        .unwrap();

    let checkpoint = orchestrator.checkpoint(&outcome.run_id).unwrap();
    assert_eq!(checkpoint.status, RunStatus::Completed);
    assert_eq!(checkpoint.stage, StageKind::Validation);
    assert!(checkpoint.state.document.is_some());
}
