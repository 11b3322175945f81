//! AnchorMapping stage — map the book summary onto one anchor per domain
//!
//! Searches the index once per domain and picks the top hit as that
//! domain's anchor. An empty retrieval is a recoverable degraded path: the
//! domain gets its sentinel anchor and a warning. One generation call
//! produces the cross-anchor analysis (convergence / conflict / gaps /
//! boundary); its failure degrades to a placeholder rather than aborting
//! the stage.

use super::format::preview;
use super::state::{PipelineState, StageUpdate};
use crate::generation::{GenerationClient, GenerationRequest};
use crate::knowledge::{Domain, KnowledgeIndex};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Hits requested per domain; only the top one becomes the anchor.
const SEARCH_TOP_K: usize = 3;

/// Item content preview length inside the analysis prompt.
const CONTENT_PREVIEW_CHARS: usize = 100;

const ANALYSIS_SYSTEM_PROMPT: &str = "\
You analyze the relationships among four knowledge anchors, one per domain \
(economics & business, science & technology, history & society, humanities \
& self-development). Cover four aspects:
1. Convergence: which anchors point in a similar direction?
2. Conflict: which anchors contradict or oppose each other?
3. Gaps: which perspectives present in the book summary are missing?
4. Boundary: where do the anchors apply, and where do they stop?
Summarize in three to four lines.";

/// Run the stage. Never fails: every path degrades to a usable update.
pub(crate) async fn map_anchors(
    state: &PipelineState,
    index: &KnowledgeIndex,
    client: &dyn GenerationClient,
) -> StageUpdate {
    info!("anchor mapping started");

    let mut anchors: BTreeMap<Domain, String> = BTreeMap::new();
    let mut log_messages = Vec::new();
    let mut chosen = Vec::new();

    for domain in Domain::ALL {
        let hits = index.search(&state.book.summary, Some(domain), SEARCH_TOP_K, true);
        match hits.first() {
            Some(top) => {
                debug!(
                    domain = %domain,
                    anchor = %top.item.anchor_id,
                    score = top.score,
                    "anchor selected"
                );
                anchors.insert(domain, top.item.anchor_id.clone());
                chosen.push((
                    domain,
                    top.item.anchor_id.clone(),
                    preview(&top.item.content, CONTENT_PREVIEW_CHARS),
                    top.item.is_fusion,
                ));
            }
            None => {
                let sentinel = domain.sentinel_anchor();
                warn!(domain = %domain, anchor = %sentinel, "no anchor found, using sentinel");
                log_messages.push(format!(
                    "no anchor found for {}; assigned sentinel {}",
                    domain, sentinel
                ));
                anchors.insert(domain, sentinel);
            }
        }
    }

    let analysis = analyze_anchors(state, &chosen, client).await;

    // The complete anchor universe; fake-anchor detection depends on this
    // snapshot never being filtered.
    let available_anchors = index.all_anchor_ids();
    info!(anchors = available_anchors.len(), "anchor universe snapshot taken");

    StageUpdate {
        anchors: Some(anchors),
        anchor_analysis: Some(analysis),
        available_anchors: Some(available_anchors),
        log_messages,
        ..Default::default()
    }
}

/// One generation call for the cross-anchor analysis; failure degrades to
/// a placeholder string.
async fn analyze_anchors(
    state: &PipelineState,
    chosen: &[(Domain, String, String, bool)],
    client: &dyn GenerationClient,
) -> String {
    let anchor_summary: String = chosen
        .iter()
        .map(|(domain, anchor, content, is_fusion)| {
            format!("- {} [{}]: {} (fusion: {})\n", domain, anchor, content, is_fusion)
        })
        .collect();

    let user_prompt = format!(
        "Book summary:\n{}\n\nSelected anchors:\n{}\nProvide the analysis.",
        state.book.summary, anchor_summary
    );

    match client
        .invoke(GenerationRequest::text(ANALYSIS_SYSTEM_PROMPT, user_prompt))
        .await
    {
        Ok(completion) => {
            debug!(
                stage = "anchor_mapping",
                prompt_tokens = completion.usage.prompt_tokens,
                completion_tokens = completion.usage.completion_tokens,
                total_tokens = completion.usage.total_tokens,
                "token usage"
            );
            completion.text
        }
        Err(err) => {
            warn!(%err, "anchor analysis call failed, degrading to placeholder");
            format!("(anchor analysis unavailable: {})", err)
        }
    }
}
