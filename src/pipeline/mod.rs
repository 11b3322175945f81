//! The generation pipeline: stage functions, shared state, orchestration
//!
//! Stages are free functions over narrowed views of the run state; the
//! orchestrator owns the aggregate, folds stage updates into it, and
//! records a checkpoint after every stage.

mod anchor_mapper;
mod assembler;
mod cancel;
mod format;
mod integrator;
mod orchestrator;
mod producer;
mod reviewer;
mod state;
pub mod validator;

#[cfg(test)]
mod integration_tests;

pub use cancel::CancellationToken;
pub use orchestrator::{
    Checkpoint, Orchestrator, OrchestratorConfig, PipelineError, ProgressSink, RunId, RunOutcome,
    RunStatus, StageKind,
};
pub use state::{
    BookDescriptor, DomainReview, IntegrationOutcome, MergeStrategy, Mode, PipelineState,
    ProposalFormat, StageUpdate, TensionAxis, ValidationReport,
};
