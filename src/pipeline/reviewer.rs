//! DomainReview stage — one branch per domain, run in parallel
//!
//! Each branch receives a narrowed view of the run (its domain, its
//! assigned anchor, the book) rather than the shared aggregate. A branch
//! never returns an error: generation failure yields a review with `error`
//! set and empty text fields, so the fan-in barrier always completes with
//! one entry per domain.

use super::format::preview;
use super::state::{BookDescriptor, DomainReview};
use crate::generation::{GenerationClient, GenerationError, GenerationRequest, SchemaName};
use crate::knowledge::{Domain, KnowledgeIndex};
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Supplementary hits listed in the prompt.
const SEARCH_TOP_K: usize = 3;

/// Insight content preview length inside the prompt.
const CONTENT_PREVIEW_CHARS: usize = 100;

/// The narrowed per-branch view of the run.
#[derive(Debug, Clone)]
pub struct ReviewRequest {
    pub domain: Domain,
    pub anchor_id: String,
    pub book: BookDescriptor,
}

/// The structured object the generation service must return.
#[derive(Debug, Deserialize)]
struct ReviewFields {
    advantages: String,
    problems: String,
    conditions: String,
}

fn system_prompt(domain: Domain) -> String {
    format!(
        "You are a domain expert in {label}. Review the given book against \
         the assigned anchor from the {label} knowledge base.\n\
         Return exactly three fields:\n\
         - advantages: what the book's specific claims get right from the \
         anchor's perspective (2-3 sentences)\n\
         - problems: where the book's specific claims fall short (2-3 sentences)\n\
         - conditions: what must hold for the book's ideas to succeed (2-3 sentences)\n\
         Rules: cite the book's concrete content, never generalities; embed at \
         least one anchor citation token like [anchor_id] in every field.",
        label = domain.label()
    )
}

/// Run one review branch.
pub(crate) async fn review_domain(
    request: ReviewRequest,
    index: &KnowledgeIndex,
    client: &dyn GenerationClient,
) -> DomainReview {
    info!(domain = %request.domain, anchor = %request.anchor_id, "domain review started");

    // Supplementary retrieval restricted to this branch's domain.
    let supplementary: String = index
        .search(&request.book.summary, Some(request.domain), SEARCH_TOP_K, true)
        .iter()
        .map(|hit| {
            format!(
                "- [{}] {}\n",
                hit.item.anchor_id,
                preview(&hit.item.content, CONTENT_PREVIEW_CHARS)
            )
        })
        .collect();

    let user_prompt = format!(
        "Assigned {} anchor (the evaluation standard):\n{}\n\n\
         Book under review:\nTitle: {}\nTopic: {}\n\nSummary:\n{}\n\n\
         Additional knowledge available for citation:\n{}\n\
         Review the book from the assigned anchor's perspective. Embed \
         [{}] (or another listed anchor) in every field.",
        request.domain,
        request.anchor_id,
        request.book.title,
        request.book.topic,
        request.book.summary,
        supplementary,
        request.anchor_id,
    );

    let generation = client
        .invoke(GenerationRequest::structured(
            system_prompt(request.domain),
            user_prompt,
            SchemaName::domain_review(),
        ))
        .await;

    match generation {
        Ok(completion) => {
            debug!(
                stage = "domain_review",
                domain = %request.domain,
                prompt_tokens = completion.usage.prompt_tokens,
                completion_tokens = completion.usage.completion_tokens,
                total_tokens = completion.usage.total_tokens,
                "token usage"
            );
            match parse_fields(&completion.structured_value()) {
                Ok(fields) => {
                    info!(domain = %request.domain, "domain review completed");
                    DomainReview {
                        domain: request.domain,
                        anchor_id: request.anchor_id,
                        advantages: fields.advantages,
                        problems: fields.problems,
                        conditions: fields.conditions,
                        error: None,
                    }
                }
                Err(err) => {
                    warn!(domain = %request.domain, %err, "review response malformed");
                    DomainReview::failed(request.domain, request.anchor_id, err.to_string())
                }
            }
        }
        Err(err) => {
            warn!(domain = %request.domain, %err, "review generation failed");
            DomainReview::failed(request.domain, request.anchor_id, err.to_string())
        }
    }
}

fn parse_fields(value: &Option<serde_json::Value>) -> Result<ReviewFields, GenerationError> {
    let value = value
        .as_ref()
        .ok_or_else(|| GenerationError::MalformedResponse("no structured object".to_string()))?;
    let fields: ReviewFields = serde_json::from_value(value.clone())
        .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;
    if fields.advantages.trim().is_empty()
        || fields.problems.trim().is_empty()
        || fields.conditions.trim().is_empty()
    {
        return Err(GenerationError::MalformedResponse(
            "empty review field".to_string(),
        ));
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::MockClient;
    use crate::knowledge::KnowledgeItem;
    use serde_json::json;

    fn index() -> KnowledgeIndex {
        KnowledgeIndex::from_items(vec![KnowledgeItem {
            id: "kb_a1".to_string(),
            domain: Domain::Business,
            subcategory: "s".to_string(),
            anchor_id: "a1".to_string(),
            content: "pricing strategy".to_string(),
            is_fusion: false,
            is_integrated: false,
            reference_works: vec!["W".to_string()],
        }])
        .unwrap()
    }

    fn request() -> ReviewRequest {
        ReviewRequest {
            domain: Domain::Business,
            anchor_id: "a1".to_string(),
            book: BookDescriptor::new("b1", "T", "A", "topic", "pricing strategy summary"),
        }
    }

    #[tokio::test]
    async fn successful_branch_fills_all_fields() {
        let client = MockClient::new().with_structured(
            SchemaName::domain_review(),
            json!({
                "advantages": "The book's pricing chapter aligns with [a1].",
                "problems": "It ignores demand elasticity [a1].",
                "conditions": "Adoption requires pricing discipline [a1]."
            }),
        );

        let review = review_domain(request(), &index(), &client).await;
        assert!(review.error.is_none());
        assert!(review.advantages.contains("[a1]"));
        assert_eq!(review.domain, Domain::Business);
    }

    #[tokio::test]
    async fn generation_failure_yields_error_review_not_panic() {
        let client = MockClient::new().with_structured_failure(
            SchemaName::domain_review(),
            GenerationError::Unavailable("down".to_string()),
        );

        let review = review_domain(request(), &index(), &client).await;
        assert!(review.error.is_some());
        assert!(review.advantages.is_empty());
        assert_eq!(review.anchor_id, "a1");
    }

    #[tokio::test]
    async fn empty_field_counts_as_malformed() {
        let client = MockClient::new().with_structured(
            SchemaName::domain_review(),
            json!({"advantages": "", "problems": "p", "conditions": "c"}),
        );

        let review = review_domain(request(), &index(), &client).await;
        assert!(review.error.as_deref().unwrap().contains("empty review field"));
    }
}
