//! Production stage — generate the one-page seven-part proposal
//!
//! One free-text generation call, prompted with the book metadata, the
//! integration record, and the list of citable anchors. The raw domain
//! reviews never reach this prompt: the stage works only from the
//! integrated signal, so the proposal synthesizes rather than
//! re-paraphrases the reviews. The stage also parses the unique-sentence
//! section out of the returned markdown so the validator can count
//! insights without re-parsing.
//!
//! Requires a prior integration record; generation failure here is fatal
//! for the run.

use super::format::preview;
use super::orchestrator::StageError;
use super::state::{PipelineState, StageUpdate};
use super::validator;
use crate::generation::{GenerationClient, GenerationRequest};
use tracing::{debug, info};

/// Anchors listed verbatim in the prompt; the rest are summarized as a
/// count so the prompt stays bounded on large corpora.
const ANCHOR_LIST_CAP: usize = 50;

/// Book summary preview length inside the prompt.
const SUMMARY_PREVIEW_CHARS: usize = 300;

const PRODUCTION_SYSTEM_PROMPT: &str = "\
You write a one-page proposal grounded in a knowledge base. Produce markdown
with exactly these seven sections:
1. Title - a working title plus a one-line pitch
2. Target audience - who this is for and why they care
3. Core promise - the promised takeaways, as bullets
4. Delivery format - what shape the piece takes and why
5. Structure - the ordered section outline
6. Unique sentences - at least three original quotable sentences found
   nowhere in the source book, each quoted
7. Call to action - the next step for the reader
Rules:
- Every sentence must carry exactly one citation token like [anchor_id],
  drawn only from the allowed anchor list. Never invent an anchor id and
  never join several anchors in one citation.
- Never mention named analysis frameworks (SWOT, PEST, Porter's models,
  Blue Ocean, Lean, Agile, PDCA, BCG Matrix, Ansoff, 4P, STP). Reason from
  the cited anchors instead.";

/// Run the stage.
pub(crate) async fn produce(
    state: &PipelineState,
    client: &dyn GenerationClient,
) -> Result<StageUpdate, StageError> {
    let integration = state
        .integration
        .as_ref()
        .ok_or(StageError::MissingIntegration)?;
    info!(format = %state.format, "production started");

    let user_prompt = format!(
        "Requested format: {}\n\n\
         Book:\nTitle: {}\nAuthor: {}\nTopic: {}\nSummary: {}\n\n\
         Integration record:\n{}\n\n\
         Allowed anchors (cite only these):\n{}\n\
         Write the seven-part proposal.",
        state.format,
        state.book.title,
        state.book.author,
        state.book.topic,
        preview(&state.book.summary, SUMMARY_PREVIEW_CHARS),
        integration.text,
        anchor_list(state),
    );

    let completion = client
        .invoke(GenerationRequest::text(PRODUCTION_SYSTEM_PROMPT, user_prompt))
        .await?;
    debug!(
        stage = "production",
        total_tokens = completion.usage.total_tokens,
        "token usage"
    );

    let unique_sentences = validator::extract_unique_sentences(&completion.text);
    info!(
        chars = completion.text.chars().count(),
        unique_sentences = unique_sentences.len(),
        "production completed"
    );

    Ok(StageUpdate {
        proposal: Some(completion.text),
        unique_sentences: Some(unique_sentences),
        ..Default::default()
    })
}

/// The citable anchor list: the assigned anchors first, then the universe
/// snapshot up to the cap, then a count of the remainder.
fn anchor_list(state: &PipelineState) -> String {
    let mut listed: Vec<&str> = state.anchors.values().map(String::as_str).collect();
    let mut unlisted = 0usize;
    for anchor in &state.available_anchors {
        if listed.contains(&anchor.as_str()) {
            continue;
        }
        if listed.len() < ANCHOR_LIST_CAP {
            listed.push(anchor);
        } else {
            unlisted += 1;
        }
    }

    let mut out: String = listed.iter().map(|a| format!("- [{}]\n", a)).collect();
    if unlisted > 0 {
        out.push_str(&format!("(plus {} more)\n", unlisted));
    }
    out
}
