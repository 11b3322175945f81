//! Integration stage — fold the four domain reviews into one record
//!
//! Two modes:
//! - `synthesis`: one structured generation call reduces the reviews into
//!   2–3 tension axes, each with two opposing poles and a synthesis
//!   statement, plus a format justification and a closing sentence
//! - `simple_merge`: the reviews are juxtaposed verbatim and one bridging
//!   conclusion is requested — no axis extraction
//!
//! Zero reviews is fatal for the whole run; so is a generation failure
//! here, since this stage has no degraded fallback.

use super::format::review_card;
use super::orchestrator::StageError;
use super::state::{IntegrationOutcome, Mode, PipelineState, StageUpdate, TensionAxis};
use crate::generation::{GenerationClient, GenerationError, GenerationRequest, SchemaName};
use serde::Deserialize;
use std::fmt::Write as _;
use tracing::{debug, info};

const SYNTHESIS_SYSTEM_PROMPT: &str = "\
You integrate four domain reviews of one book into tension axes.
Goals:
1. Find 2-3 core tension axes: pairs of considerations that oppose each \
other or need balancing (for example, efficiency versus ethics).
2. For each axis give both poles and a synthesis statement.
3. Explain in one line why the requested format fits the material.
4. Close with a single concluding sentence.
Return the structured object only.";

const MERGE_SYSTEM_PROMPT: &str = "\
You juxtapose four domain reviews of one book and write a single bridging \
conclusion sentence that runs through all of them. Do not extract tension \
axes or restructure the reviews.";

/// The structured object the synthesis call must return.
#[derive(Debug, Deserialize)]
struct SynthesisFields {
    tension_axes: Vec<TensionAxis>,
    format_reasoning: String,
    conclusion: String,
}

/// Run the stage.
pub(crate) async fn integrate(
    state: &PipelineState,
    client: &dyn GenerationClient,
) -> Result<StageUpdate, StageError> {
    if state.reviews.is_empty() {
        return Err(StageError::EmptyReviews);
    }
    info!(mode = %state.mode, reviews = state.reviews.len(), "integration started");

    let reviews_text: String = state
        .reviews
        .iter()
        .map(|r| format!("{}\n", review_card(r)))
        .collect();

    let outcome = match state.mode {
        Mode::Synthesis => synthesize(state, &reviews_text, client).await?,
        Mode::SimpleMerge => simple_merge(state, &reviews_text, client).await?,
    };

    info!(axes = outcome.tension_axes.len(), "integration completed");
    Ok(StageUpdate {
        integration: Some(outcome),
        ..Default::default()
    })
}

async fn synthesize(
    state: &PipelineState,
    reviews_text: &str,
    client: &dyn GenerationClient,
) -> Result<IntegrationOutcome, StageError> {
    let user_prompt = format!(
        "Requested format: {}\n\nDomain reviews:\n\n{}\nExtract the tension axes.",
        state.format, reviews_text
    );

    let completion = client
        .invoke(GenerationRequest::structured(
            SYNTHESIS_SYSTEM_PROMPT,
            user_prompt,
            SchemaName::integration_synthesis(),
        ))
        .await?;
    debug!(
        stage = "integration",
        total_tokens = completion.usage.total_tokens,
        "token usage"
    );

    let fields: SynthesisFields = completion
        .structured_value()
        .ok_or_else(|| GenerationError::MalformedResponse("no structured object".to_string()))
        .and_then(|v| {
            serde_json::from_value(v)
                .map_err(|e| GenerationError::MalformedResponse(e.to_string()))
        })?;
    if fields.tension_axes.is_empty() {
        return Err(StageError::Generation(GenerationError::MalformedResponse(
            "synthesis returned no tension axes".to_string(),
        )));
    }

    let mut text = String::from("## Tension axes\n");
    for axis in &fields.tension_axes {
        let _ = writeln!(
            text,
            "- {}: {} vs {} (synthesis: {})",
            axis.axis_name, axis.pole_a, axis.pole_b, axis.synthesis
        );
    }
    let _ = write!(
        text,
        "\n## Format reasoning\n{}\n\n## Conclusion\n{}",
        fields.format_reasoning, fields.conclusion
    );

    Ok(IntegrationOutcome {
        text,
        tension_axes: fields.tension_axes,
        format_reasoning: fields.format_reasoning,
        conclusion: fields.conclusion,
    })
}

async fn simple_merge(
    state: &PipelineState,
    reviews_text: &str,
    client: &dyn GenerationClient,
) -> Result<IntegrationOutcome, StageError> {
    let user_prompt = format!(
        "Domain reviews:\n\n{}\nWrite the single bridging conclusion sentence.",
        reviews_text
    );

    let completion = client
        .invoke(GenerationRequest::text(MERGE_SYSTEM_PROMPT, user_prompt))
        .await?;
    debug!(
        stage = "integration",
        total_tokens = completion.usage.total_tokens,
        "token usage"
    );

    let conclusion = completion.text.trim().to_string();
    let format_reasoning = format!("{} format selected", state.format);
    let text = format!(
        "## Domain reviews (juxtaposed)\n\n{}\n## Format\n{}\n\n## Conclusion\n{}",
        reviews_text, format_reasoning, conclusion
    );

    Ok(IntegrationOutcome {
        text,
        tension_axes: Vec::new(),
        format_reasoning,
        conclusion,
    })
}
