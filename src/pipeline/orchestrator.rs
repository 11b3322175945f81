//! Orchestrator — drives the fixed stage graph for one run
//!
//! Stage graph: anchor mapping, four domain reviews in parallel,
//! integration, production, assembly, validation. When validation fails
//! and retries remain, the run re-enters anchor mapping with the attempt's
//! artifacts discarded.
//!
//! Error policy: `run` returns `Err` only for rejected input and
//! cancellation. A fatal stage error or retry exhaustion completes with
//! [`RunStatus::Failed`] and the reason in `state.error_message`, so the
//! partially built state stays inspectable.

use super::cancel::CancellationToken;
use super::reviewer::{self, ReviewRequest};
use super::state::{BookDescriptor, Mode, PipelineState, ProposalFormat, StageUpdate};
use super::{anchor_mapper, assembler, integrator, producer, validator};
use crate::generation::{GenerationClient, GenerationError};
use crate::knowledge::{Domain, KnowledgeIndex};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Summaries shorter than this are rejected before a run starts.
const MIN_SUMMARY_CHARS: usize = 10;

/// The stages of the pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    AnchorMapping,
    DomainReview,
    Integration,
    Production,
    Assembly,
    Validation,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::AnchorMapping => "anchor_mapping",
            StageKind::DomainReview => "domain_review",
            StageKind::Integration => "integration",
            StageKind::Production => "production",
            StageKind::Assembly => "assembly",
            StageKind::Validation => "validation",
        }
    }

    /// Reported completion percentage after this stage.
    pub fn progress_percent(&self) -> f64 {
        match self {
            StageKind::AnchorMapping => 11.1,
            StageKind::DomainReview => 33.3,
            StageKind::Integration => 55.6,
            StageKind::Production => 77.8,
            StageKind::Validation => 88.9,
            StageKind::Assembly => 100.0,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that abort a stage and fail the run.
#[derive(Debug, thiserror::Error)]
pub(crate) enum StageError {
    #[error("integration requires at least one domain review")]
    EmptyReviews,

    #[error("production requires a prior integration record")]
    MissingIntegration,

    #[error(transparent)]
    Generation(#[from] GenerationError),
}

/// Errors `run` itself returns; everything else surfaces through
/// [`RunStatus::Failed`].
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("book summary too short: {got} chars (minimum {minimum})")]
    MissingInput { got: usize, minimum: usize },

    #[error("run cancelled at stage boundary {0}")]
    Cancelled(StageKind),
}

/// Identifier of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        RunId(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// The state snapshot taken after a stage completes.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Checkpoint {
    pub stage: StageKind,
    pub status: RunStatus,
    pub state: PipelineState,
    pub at: DateTime<Utc>,
}

/// The final result of a run that was not cancelled.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: RunId,
    pub status: RunStatus,
    pub state: PipelineState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Observer notified after each stage with the run's reported progress.
pub trait ProgressSink: Send + Sync {
    fn stage_completed(&self, run_id: RunId, stage: StageKind, percent: f64);
}

/// Orchestrator tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// Validation-failure retries after the first attempt; 0 disables retry.
    pub max_retries: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

/// Drives pipeline runs against a shared index and generation client.
pub struct Orchestrator {
    index: Arc<KnowledgeIndex>,
    client: Arc<dyn GenerationClient>,
    config: OrchestratorConfig,
    checkpoints: DashMap<RunId, Checkpoint>,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl Orchestrator {
    pub fn new(
        index: Arc<KnowledgeIndex>,
        client: Arc<dyn GenerationClient>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            index,
            client,
            config,
            checkpoints: DashMap::new(),
            progress: None,
        }
    }

    /// Attach a progress observer.
    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    /// The latest checkpoint recorded for a run.
    pub fn checkpoint(&self, run_id: &RunId) -> Option<Checkpoint> {
        self.checkpoints.get(run_id).map(|entry| entry.value().clone())
    }

    /// Run the pipeline to completion.
    pub async fn run(
        &self,
        book: BookDescriptor,
        mode: Mode,
        format: ProposalFormat,
    ) -> Result<RunOutcome, PipelineError> {
        self.run_with_cancellation(book, mode, format, CancellationToken::new())
            .await
    }

    /// Run the pipeline, checking the token at every stage boundary.
    pub async fn run_with_cancellation(
        &self,
        book: BookDescriptor,
        mode: Mode,
        format: ProposalFormat,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, PipelineError> {
        let summary_chars = book.summary.trim().chars().count();
        if summary_chars < MIN_SUMMARY_CHARS {
            return Err(PipelineError::MissingInput {
                got: summary_chars,
                minimum: MIN_SUMMARY_CHARS,
            });
        }

        let run_id = RunId::new();
        let started_at = Utc::now();
        let mut state = PipelineState::new(book, mode, format);
        info!(%run_id, %mode, %format, "pipeline run started");

        loop {
            self.check_cancelled(&cancel, StageKind::AnchorMapping)?;
            let update = anchor_mapper::map_anchors(&state, &self.index, &*self.client).await;
            state.apply(update);
            self.record(run_id, StageKind::AnchorMapping, RunStatus::Running, &state);

            self.check_cancelled(&cancel, StageKind::DomainReview)?;
            let reviews = self.fan_out_reviews(&state).await;
            state.apply(StageUpdate {
                reviews,
                ..Default::default()
            });
            self.record(run_id, StageKind::DomainReview, RunStatus::Running, &state);

            self.check_cancelled(&cancel, StageKind::Integration)?;
            match integrator::integrate(&state, &*self.client).await {
                Ok(update) => state.apply(update),
                Err(err) => {
                    return Ok(self.fail(run_id, StageKind::Integration, state, err, started_at))
                }
            }
            self.record(run_id, StageKind::Integration, RunStatus::Running, &state);

            self.check_cancelled(&cancel, StageKind::Production)?;
            match producer::produce(&state, &*self.client).await {
                Ok(update) => state.apply(update),
                Err(err) => {
                    return Ok(self.fail(run_id, StageKind::Production, state, err, started_at))
                }
            }
            self.record(run_id, StageKind::Production, RunStatus::Running, &state);

            self.check_cancelled(&cancel, StageKind::Assembly)?;
            state.apply(assembler::assemble(&state));
            self.record(run_id, StageKind::Assembly, RunStatus::Running, &state);

            self.check_cancelled(&cancel, StageKind::Validation)?;
            let report = self.validate(&state);
            let passed = report.passed;
            state.apply(StageUpdate {
                validation_errors: report.errors.clone(),
                validation: Some(report),
                ..Default::default()
            });

            if passed {
                info!(%run_id, retries = state.retry_count, "pipeline run completed");
                self.record(run_id, StageKind::Validation, RunStatus::Completed, &state);
                return Ok(RunOutcome {
                    run_id,
                    status: RunStatus::Completed,
                    state,
                    started_at,
                    finished_at: Utc::now(),
                });
            }

            if state.retry_count < self.config.max_retries {
                warn!(
                    %run_id,
                    attempt = state.retry_count + 1,
                    max_retries = self.config.max_retries,
                    "validation failed, retrying"
                );
                self.record(run_id, StageKind::Validation, RunStatus::Running, &state);
                state.reset_for_retry();
                continue;
            }

            error!(%run_id, retries = state.retry_count, "validation retries exhausted");
            state.error_message = Some(format!(
                "validation failed after {} attempts",
                state.retry_count + 1
            ));
            self.record(run_id, StageKind::Validation, RunStatus::Failed, &state);
            return Ok(RunOutcome {
                run_id,
                status: RunStatus::Failed,
                state,
                started_at,
                finished_at: Utc::now(),
            });
        }
    }

    /// Run the four review branches concurrently and join them all.
    ///
    /// A panicked or aborted branch is backfilled with an error review so
    /// the barrier still yields one entry per domain.
    async fn fan_out_reviews(&self, state: &PipelineState) -> Vec<super::state::DomainReview> {
        let mut tasks = JoinSet::new();
        for domain in Domain::ALL {
            let anchor_id = state
                .anchors
                .get(&domain)
                .cloned()
                .unwrap_or_else(|| domain.sentinel_anchor());
            let request = ReviewRequest {
                domain,
                anchor_id,
                book: state.book.clone(),
            };
            let index = Arc::clone(&self.index);
            let client = Arc::clone(&self.client);
            tasks.spawn(async move { reviewer::review_domain(request, &index, &*client).await });
        }

        let mut reviews = Vec::with_capacity(Domain::ALL.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(review) => reviews.push(review),
                Err(err) => warn!(%err, "review branch did not complete"),
            }
        }

        let seen: HashSet<Domain> = reviews.iter().map(|r| r.domain).collect();
        for domain in Domain::ALL {
            if !seen.contains(&domain) {
                let anchor_id = state
                    .anchors
                    .get(&domain)
                    .cloned()
                    .unwrap_or_else(|| domain.sentinel_anchor());
                reviews.push(super::state::DomainReview::failed(
                    domain,
                    anchor_id,
                    "review branch did not complete",
                ));
            }
        }
        reviews
    }

    fn validate(&self, state: &PipelineState) -> super::state::ValidationReport {
        // Union of the index snapshot and the assigned anchors, so that
        // sentinels never count as fake.
        let universe: HashSet<String> = state
            .available_anchors
            .iter()
            .chain(state.anchors.values())
            .cloned()
            .collect();
        let document = state.document.as_deref().unwrap_or("");
        validator::validate(document, &state.unique_sentences, &universe)
    }

    fn fail(
        &self,
        run_id: RunId,
        stage: StageKind,
        mut state: PipelineState,
        err: StageError,
        started_at: DateTime<Utc>,
    ) -> RunOutcome {
        error!(%run_id, %stage, %err, "stage failed, aborting run");
        state.error_message = Some(format!("{} failed: {}", stage, err));
        self.record(run_id, stage, RunStatus::Failed, &state);
        RunOutcome {
            run_id,
            status: RunStatus::Failed,
            state,
            started_at,
            finished_at: Utc::now(),
        }
    }

    fn check_cancelled(
        &self,
        cancel: &CancellationToken,
        stage: StageKind,
    ) -> Result<(), PipelineError> {
        if cancel.is_cancelled() {
            warn!(%stage, "run cancelled");
            return Err(PipelineError::Cancelled(stage));
        }
        Ok(())
    }

    fn record(&self, run_id: RunId, stage: StageKind, status: RunStatus, state: &PipelineState) {
        self.checkpoints.insert(
            run_id,
            Checkpoint {
                stage,
                status,
                state: state.clone(),
                at: Utc::now(),
            },
        );
        if let Some(sink) = &self.progress {
            sink.stage_completed(run_id, stage, stage.progress_percent());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_percentages_are_pinned() {
        assert_eq!(StageKind::AnchorMapping.progress_percent(), 11.1);
        assert_eq!(StageKind::DomainReview.progress_percent(), 33.3);
        assert_eq!(StageKind::Integration.progress_percent(), 55.6);
        assert_eq!(StageKind::Production.progress_percent(), 77.8);
        assert_eq!(StageKind::Validation.progress_percent(), 88.9);
        assert_eq!(StageKind::Assembly.progress_percent(), 100.0);
    }

    #[test]
    fn stage_names_are_snake_case() {
        assert_eq!(StageKind::AnchorMapping.as_str(), "anchor_mapping");
        assert_eq!(StageKind::DomainReview.to_string(), "domain_review");
    }

    #[test]
    fn run_ids_are_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }

    #[test]
    fn default_config_allows_three_retries() {
        assert_eq!(OrchestratorConfig::default().max_retries, 3);
    }
}
