//! Iteration executor: one attempt at one story.
//!
//! The story is marked `in_progress` and persisted before the pipeline runs,
//! so a crash mid-attempt leaves a retryable story behind. Pipeline failures
//! of any kind become a synthetic `ERROR` result; this module only returns an
//! error when the requested story does not exist.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Result, anyhow};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::backlog::Backlog;
use crate::core::budget::BudgetPolicy;
use crate::core::context::build_story_context;
use crate::core::selector::effective_cap;
use crate::core::state_update::{apply_attempt_result, begin_attempt};
use crate::core::types::{IterationResult, PipelineResult};
use crate::io::backlog_store::BacklogStore;
use crate::io::iteration_log::{IterationMeta, write_iteration};
use crate::io::pipeline::{Pipeline, PipelineError, PipelineRequest, task_name};

/// Settings shared by every iteration of a run.
#[derive(Debug, Clone)]
pub struct IterationSettings {
    pub repo_root: PathBuf,
    /// Model the story context is budgeted for.
    pub model: String,
    pub budget: BudgetPolicy,
    /// Global attempt cap; a story's own cap wins.
    pub max_attempts: Option<u32>,
    pub use_agents: bool,
    pub auto_commit: bool,
    pub skip_tests: bool,
    /// Literal prompt passed through to the pipeline.
    pub prompt: Option<String>,
    /// Write `.ralph/iterations/` artifacts.
    pub write_logs: bool,
}

impl IterationSettings {
    pub fn new(repo_root: impl Into<PathBuf>, model: impl Into<String>) -> Self {
        Self {
            repo_root: repo_root.into(),
            model: model.into(),
            budget: BudgetPolicy::default(),
            max_attempts: None,
            use_agents: true,
            auto_commit: false,
            skip_tests: false,
            prompt: None,
            write_logs: true,
        }
    }
}

/// Run one attempt at `story_id` and persist both state transitions.
///
/// `iteration` is the cumulative iteration number used for the log directory.
#[instrument(skip_all, fields(story_id = %story_id, iteration = iteration))]
pub fn execute_iteration<P: Pipeline + ?Sized>(
    store: &BacklogStore,
    backlog: &mut Backlog,
    story_id: &str,
    pipeline: &P,
    settings: &IterationSettings,
    iteration: u64,
) -> Result<IterationResult> {
    let started = Instant::now();
    let started_at = Utc::now().to_rfc3339();

    let story = backlog
        .story_mut(story_id)
        .ok_or_else(|| anyhow!("story {story_id} not found in backlog"))?;
    begin_attempt(story, &started_at);
    let attempt = story.attempts;
    info!(attempt, "starting attempt");
    persist(store, backlog, "attempt start");

    let (context, request) = {
        let story = backlog
            .story(story_id)
            .ok_or_else(|| anyhow!("story {story_id} not found in backlog"))?;
        let context = build_story_context(story, backlog, &settings.model, &settings.budget);
        if context.truncated {
            warn!(
                budget_tokens = context.budget_tokens,
                estimated_tokens = context.estimated_tokens,
                "story context truncated to fit the model budget"
            );
        }
        let request = PipelineRequest {
            task_name: task_name(&backlog.feature_id, &story.id, &story.title),
            feature_id: backlog.feature_id.clone(),
            story_id: story.id.clone(),
            repo_root: settings.repo_root.clone(),
            use_agents: settings.use_agents,
            auto_commit: settings.auto_commit,
            prompt: settings.prompt.clone(),
            skip_tests: settings.skip_tests,
            story_context: context.text.clone(),
        };
        (context, request)
    };

    let (result, timed_out) = match pipeline.run_once(&request) {
        Ok(result) => (result, false),
        Err(err) => {
            warn!(err = %err, "pipeline failed");
            pipeline_failure(&err)
        }
    };
    debug!(decision = %result.decision, tests_ok = result.tests_ok, "pipeline returned");

    let ended_at = Utc::now().to_rfc3339();
    let story = backlog
        .story_mut(story_id)
        .ok_or_else(|| anyhow!("story {story_id} not found in backlog"))?;
    let cap = effective_cap(story, settings.max_attempts);
    let status = apply_attempt_result(story, &result, cap, &ended_at);
    // A shipped story can still carry a commit failure worth reporting.
    let error = if result.is_success() {
        result.error.clone()
    } else {
        story.last_error.clone()
    };
    info!(attempt, status = %status, decision = %result.decision, "attempt finished");
    persist(store, backlog, "attempt result");

    let outcome = IterationResult {
        story_id: story_id.to_string(),
        attempt,
        decision: result.decision,
        tests_ok: result.tests_ok,
        error,
        critic_reason: result.critic_reason,
        timed_out,
        status,
    };

    if settings.write_logs {
        let meta = IterationMeta {
            feature_id: backlog.feature_id.clone(),
            iteration,
            story_id: outcome.story_id.clone(),
            attempt,
            decision: outcome.decision,
            tests_ok: outcome.tests_ok,
            timed_out,
            status,
            error: outcome.error.clone(),
            critic_reason: outcome.critic_reason.clone(),
            context_truncated: context.truncated,
            started_at,
            ended_at,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        if let Err(err) = write_iteration(&settings.repo_root, &meta, &context.text) {
            warn!(err = %format!("{err:#}"), "failed to write iteration log");
        }
    }

    Ok(outcome)
}

/// Synthetic `ERROR` result for a failed pipeline, plus whether it timed out.
fn pipeline_failure(err: &PipelineError) -> (PipelineResult, bool) {
    match err {
        PipelineError::Timeout { stage, timeout } => (
            PipelineResult::error(format!(
                "Timeout: {stage} stage exceeded {}s",
                timeout.as_secs()
            )),
            true,
        ),
        PipelineError::CommandNotFound { stage, program } => (
            PipelineResult::error(format!("Command not found: {program} ({stage} stage)")),
            false,
        ),
        PipelineError::Other(err) => (PipelineResult::error(format!("Exception: {err:#}")), false),
    }
}

/// Save, logging instead of failing; the in-memory backlog stays authoritative.
fn persist(store: &BacklogStore, backlog: &Backlog, phase: &str) {
    if let Err(err) = store.save(backlog) {
        warn!(
            err = %format!("{err:#}"),
            path = %store.path().display(),
            phase,
            "failed to persist backlog, continuing with in-memory state"
        );
    }
}
