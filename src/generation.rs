//! Generation client — interface to the text-generation service
//!
//! Defines the client trait and response types the pipeline stages call.
//! Two implementations:
//! - an external transport (HTTP, subprocess) supplied by the embedding
//!   application
//! - `MockClient`: returns preconfigured responses (testing)
//!
//! The pipeline treats the service as a black box: prompt in, text or
//! structured object out, token-usage metadata, fails with
//! [`GenerationError`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Identifier of a fixed structured-output schema.
///
/// Stages that need structured results name their schema here; transports
/// translate it into whatever schema enforcement the service offers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaName(pub String);

impl SchemaName {
    /// Advantages / problems / conditions of one domain review.
    pub fn domain_review() -> Self {
        SchemaName("domain_review".to_string())
    }

    /// Tension axes plus conclusion for synthesis-mode integration.
    pub fn integration_synthesis() -> Self {
        SchemaName("integration_synthesis".to_string())
    }
}

/// One generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    /// Present when the caller expects a structured object back
    pub schema: Option<SchemaName>,
}

impl GenerationRequest {
    pub fn text(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            schema: None,
        }
    }

    pub fn structured(
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
        schema: SchemaName,
    ) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            schema: Some(schema),
        }
    }
}

/// Token-usage metadata reported by the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The result of one generation call.
#[derive(Debug, Clone)]
pub struct Completion {
    /// The generated text (may be empty when only a structured object came back)
    pub text: String,
    /// Structured object, present when the request named a schema and the
    /// transport could enforce it
    pub structured: Option<serde_json::Value>,
    pub usage: TokenUsage,
}

impl Completion {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            structured: None,
            usage: TokenUsage::default(),
        }
    }

    pub fn from_structured(value: serde_json::Value) -> Self {
        Self {
            text: String::new(),
            structured: Some(value),
            usage: TokenUsage::default(),
        }
    }

    /// The structured object, recovering one from the text when the
    /// transport returned plain text for a structured request.
    pub fn structured_value(&self) -> Option<serde_json::Value> {
        match &self.structured {
            Some(v) => Some(v.clone()),
            None => extract_json(&self.text),
        }
    }
}

/// Errors from generation calls.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    #[error("generation service unavailable: {0}")]
    Unavailable(String),

    #[error("generation call failed: {0}")]
    InvocationFailed(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// Client trait for the text-generation service.
///
/// Abstracts over transport so stages don't depend on how the service is
/// reached. Implementations must be shareable across the four concurrent
/// review branches.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Run one generation call.
    async fn invoke(&self, request: GenerationRequest) -> Result<Completion, GenerationError>;
}

/// Extract a JSON object from generation response text.
///
/// Services sometimes wrap JSON in markdown code fences or add explanation
/// text around it. Tries, in order: direct parse, fenced block, first-`{`
/// to last-`}` span.
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    let trimmed = text.trim();

    if let Ok(v) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if v.is_object() {
            return Some(v);
        }
    }

    for fence in ["```json", "```"] {
        if let Some(start) = trimmed.find(fence) {
            let after = &trimmed[start + fence.len()..];
            if let Some(end) = after.find("```") {
                if let Ok(v) = serde_json::from_str::<serde_json::Value>(after[..end].trim()) {
                    if v.is_object() {
                        return Some(v);
                    }
                }
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(v) = serde_json::from_str::<serde_json::Value>(&trimmed[start..=end]) {
                if v.is_object() {
                    return Some(v);
                }
            }
        }
    }

    None
}

type MockResult = Result<Completion, GenerationError>;

/// Mock client for testing — returns preconfigured responses.
///
/// Structured requests are answered by schema name; free-text requests pop
/// a FIFO queue, falling back to a default completion when the queue is
/// empty. The queue makes sequential free-text calls (anchor analysis, then
/// production) scriptable without inspecting prompt text.
#[derive(Default)]
pub struct MockClient {
    structured: HashMap<SchemaName, MockResult>,
    text_queue: Mutex<VecDeque<MockResult>>,
    text_fallback: Option<Completion>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the structured object returned for a schema.
    pub fn with_structured(mut self, schema: SchemaName, value: serde_json::Value) -> Self {
        self.structured
            .insert(schema, Ok(Completion::from_structured(value)));
        self
    }

    /// Register a failure for a schema.
    pub fn with_structured_failure(mut self, schema: SchemaName, error: GenerationError) -> Self {
        self.structured.insert(schema, Err(error));
        self
    }

    /// Queue a free-text response (FIFO across free-text calls).
    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.text_queue
            .lock()
            .expect("mock queue poisoned")
            .push_back(Ok(Completion::from_text(text)));
        self
    }

    /// Queue a free-text failure.
    pub fn with_text_failure(self, error: GenerationError) -> Self {
        self.text_queue
            .lock()
            .expect("mock queue poisoned")
            .push_back(Err(error));
        self
    }

    /// Response used when the free-text queue is exhausted.
    pub fn with_text_fallback(mut self, text: impl Into<String>) -> Self {
        self.text_fallback = Some(Completion::from_text(text));
        self
    }
}

#[async_trait]
impl GenerationClient for MockClient {
    async fn invoke(&self, request: GenerationRequest) -> Result<Completion, GenerationError> {
        if let Some(schema) = &request.schema {
            return match self.structured.get(schema) {
                Some(result) => result.clone(),
                None => Err(GenerationError::InvocationFailed(format!(
                    "no mock response for schema '{}'",
                    schema.0
                ))),
            };
        }

        let queued = self
            .text_queue
            .lock()
            .expect("mock queue poisoned")
            .pop_front();
        match queued {
            Some(result) => result,
            None => match &self.text_fallback {
                Some(completion) => Ok(completion.clone()),
                None => Err(GenerationError::InvocationFailed(
                    "mock free-text queue exhausted".to_string(),
                )),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn mock_answers_structured_requests_by_schema() {
        let client = MockClient::new()
            .with_structured(SchemaName::domain_review(), json!({"advantages": "a"}));

        let completion = client
            .invoke(GenerationRequest::structured(
                "sys",
                "user",
                SchemaName::domain_review(),
            ))
            .await
            .unwrap();
        assert_eq!(completion.structured.unwrap()["advantages"], "a");
    }

    #[tokio::test]
    async fn mock_pops_text_queue_then_falls_back() {
        let client = MockClient::new()
            .with_text("first")
            .with_text_fallback("default");

        let first = client
            .invoke(GenerationRequest::text("s", "u"))
            .await
            .unwrap();
        assert_eq!(first.text, "first");

        let second = client
            .invoke(GenerationRequest::text("s", "u"))
            .await
            .unwrap();
        assert_eq!(second.text, "default");
    }

    #[tokio::test]
    async fn mock_reports_missing_schema_as_failure() {
        let client = MockClient::new();
        let err = client
            .invoke(GenerationRequest::structured(
                "s",
                "u",
                SchemaName::integration_synthesis(),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::InvocationFailed(_)));
    }

    #[tokio::test]
    async fn mock_injects_failures() {
        let client = MockClient::new()
            .with_text_failure(GenerationError::Unavailable("down".to_string()));
        let err = client
            .invoke(GenerationRequest::text("s", "u"))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Unavailable(_)));
    }

    #[test]
    fn extract_json_parses_direct_objects() {
        let v = extract_json(r#"{"k": 1}"#).unwrap();
        assert_eq!(v["k"], 1);
    }

    #[test]
    fn extract_json_parses_fenced_blocks() {
        let text = "Here you go:\n```json\n{\"k\": 2}\n```\nDone.";
        assert_eq!(extract_json(text).unwrap()["k"], 2);
    }

    #[test]
    fn extract_json_falls_back_to_brace_span() {
        let text = "prefix {\"k\": 3} suffix";
        assert_eq!(extract_json(text).unwrap()["k"], 3);
    }

    #[test]
    fn extract_json_rejects_non_objects() {
        assert!(extract_json("[1, 2, 3]").is_none());
        assert!(extract_json("no json here").is_none());
    }

    #[test]
    fn completion_recovers_structure_from_text() {
        let completion = Completion::from_text("```json\n{\"k\": 4}\n```");
        assert_eq!(completion.structured_value().unwrap()["k"], 4);
    }
}
