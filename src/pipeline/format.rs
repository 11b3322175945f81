//! Text shaping shared by prompt construction and document assembly

use super::state::DomainReview;

/// Char-safe preview of a longer text, with an ellipsis when truncated.
pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}

/// One review rendered as a card, the shape both the integration prompt
/// and the assembled document use.
pub(crate) fn review_card(review: &DomainReview) -> String {
    if let Some(error) = &review.error {
        return format!(
            "## {} — anchor: [{}]\n(review unavailable: {})\n",
            review.domain.label(),
            review.anchor_id,
            error
        );
    }
    format!(
        "## {} — anchor: [{}]\n\
         Advantages: {}\n\
         Problems: {}\n\
         Conditions: {}\n",
        review.domain.label(),
        review.anchor_id,
        review.advantages,
        review.problems,
        review.conditions
    )
}
