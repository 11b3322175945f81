//! Folio: Citation-Grounded Proposal Pipeline
//!
//! Turns a book summary into a structured, citation-grounded one-page
//! proposal by running it through a multi-stage generation pipeline that
//! cross-references a curated, domain-partitioned knowledge base.
//!
//! # Core Concepts
//!
//! - **Knowledge index**: curated insights from four fixed domains, served
//!   through a TF-IDF similarity search with domain filtering
//! - **Anchors**: unique citation tokens every generated sentence must carry
//! - **Pipeline**: a fixed stage graph (anchor mapping → parallel domain
//!   reviews → integration → production → assembly → validation) with
//!   bounded retry when the grounding check fails
//!
//! # Example
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use folio::{
//!     BookDescriptor, Domain, KnowledgeIndex, MockClient, Mode, Orchestrator,
//!     OrchestratorConfig, ProposalFormat,
//! };
//!
//! # async fn demo() {
//! let mut sources = HashMap::new();
//! sources.insert(Domain::Business, "### Pricing\n| Insight | Work |\n".to_string());
//! let (index, _report) = KnowledgeIndex::load(&sources).unwrap();
//!
//! let orchestrator = Orchestrator::new(
//!     Arc::new(index),
//!     Arc::new(MockClient::new()),
//!     OrchestratorConfig::default(),
//! );
//! let book = BookDescriptor::new("b1", "Deep Work", "Cal Newport", "focus", "a summary…");
//! let outcome = orchestrator
//!     .run(book, Mode::Synthesis, ProposalFormat::Content)
//!     .await
//!     .unwrap();
//! # }
//! ```

pub mod generation;
pub mod knowledge;
pub mod pipeline;

pub use generation::{
    Completion, GenerationClient, GenerationError, GenerationRequest, MockClient, SchemaName,
    TokenUsage,
};
pub use knowledge::{
    Domain, IndexError, IndexResult, IndexStats, KnowledgeIndex, KnowledgeItem, LoadReport,
    ParseError, SearchHit, UniquenessReport,
};
pub use pipeline::{
    BookDescriptor, CancellationToken, Checkpoint, DomainReview, IntegrationOutcome, Mode,
    Orchestrator, OrchestratorConfig, PipelineError, PipelineState, ProgressSink, ProposalFormat,
    RunId, RunOutcome, RunStatus, StageKind, TensionAxis, ValidationReport,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
