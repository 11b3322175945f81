//! Assembly stage — deterministic concatenation of the run's artifacts
//!
//! No generation call. The document layout is fixed: source metadata,
//! cross-anchor analysis, the four review cards, the integration record,
//! and the proposal. Missing artifacts render as placeholders instead of
//! aborting, so a partially degraded run still yields an inspectable
//! document.

use super::format::review_card;
use super::state::{PipelineState, StageUpdate};
use std::fmt::Write as _;
use tracing::info;

/// Run the stage.
pub(crate) fn assemble(state: &PipelineState) -> StageUpdate {
    let mut doc = String::new();

    let _ = writeln!(doc, "# Proposal: {}", state.book.title);
    let _ = writeln!(doc);
    let _ = writeln!(doc, "## Source");
    let _ = writeln!(doc, "- Title: {}", state.book.title);
    let _ = writeln!(doc, "- Author: {}", state.book.author);
    let _ = writeln!(doc, "- Topic: {}", state.book.topic);
    let _ = writeln!(doc, "- Mode: {} / format: {}", state.mode, state.format);
    for (domain, anchor) in &state.anchors {
        let _ = writeln!(doc, "- {} anchor: [{}]", domain, anchor);
    }
    let _ = writeln!(doc);

    let _ = writeln!(doc, "## Anchor analysis");
    let _ = writeln!(
        doc,
        "{}",
        state.anchor_analysis.as_deref().unwrap_or("(not available)")
    );
    let _ = writeln!(doc);

    let _ = writeln!(doc, "## Domain reviews");
    for review in &state.reviews {
        let _ = writeln!(doc, "{}", review_card(review));
    }

    let _ = writeln!(doc, "## Integration");
    match &state.integration {
        Some(integration) => {
            let _ = writeln!(doc, "{}", integration.text);
        }
        None => {
            let _ = writeln!(doc, "(not available)");
        }
    }
    let _ = writeln!(doc);

    let _ = writeln!(doc, "## Proposal");
    let _ = writeln!(
        doc,
        "{}",
        state.proposal.as_deref().unwrap_or("(not available)")
    );

    info!(chars = doc.chars().count(), "document assembled");
    StageUpdate {
        document: Some(doc),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::Domain;
    use crate::pipeline::state::{
        BookDescriptor, DomainReview, IntegrationOutcome, Mode, ProposalFormat,
    };

    fn state() -> PipelineState {
        let mut s = PipelineState::new(
            BookDescriptor::new("b1", "Deep Focus", "R. Author", "attention", "a summary"),
            Mode::Synthesis,
            ProposalFormat::Content,
        );
        s.anchors.insert(Domain::Business, "a1".to_string());
        s.anchor_analysis = Some("anchors converge on incentives [a1]".to_string());
        s.reviews = vec![DomainReview {
            domain: Domain::Business,
            anchor_id: "a1".to_string(),
            advantages: "adv [a1]".to_string(),
            problems: "prob [a1]".to_string(),
            conditions: "cond [a1]".to_string(),
            error: None,
        }];
        s.integration = Some(IntegrationOutcome {
            text: "## Conclusion\nbalance wins [a1]".to_string(),
            tension_axes: Vec::new(),
            format_reasoning: "content fits".to_string(),
            conclusion: "balance wins".to_string(),
        });
        s.proposal = Some("## Title\nA grounded take [a1]".to_string());
        s
    }

    #[test]
    fn sections_appear_in_fixed_order() {
        let doc = assemble(&state()).document.unwrap();
        let order = [
            "## Source",
            "## Anchor analysis",
            "## Domain reviews",
            "## Integration",
            "## Proposal",
        ];
        let positions: Vec<usize> = order.iter().map(|h| doc.find(h).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(doc.contains("- Business anchor: [a1]")|| doc.contains("- business anchor: [a1]"));
    }

    #[test]
    fn missing_artifacts_render_placeholders() {
        let mut s = state();
        s.proposal = None;
        s.integration = None;
        let doc = assemble(&s).document.unwrap();
        assert!(doc.contains("(not available)"));
    }

    #[test]
    fn assembly_is_deterministic() {
        let s = state();
        assert_eq!(assemble(&s).document, assemble(&s).document);
    }
}
