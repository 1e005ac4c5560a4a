//! Loop driver for `ralph run`.
//!
//! LOAD, then SELECT / EXECUTE / PERSIST until the scheduler runs dry, the
//! iteration cap is hit, or single-shot mode has run its one iteration. The
//! summary is computed from the final backlog snapshot.

use std::fmt;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use clap::ValueEnum;
use tracing::{error, info, instrument, warn};

use crate::backlog::Backlog;
use crate::core::selector::{SelectCriteria, Selection, select_story};
use crate::core::summary::{LoopStop, RunSummary, StatusCounts};
use crate::core::types::IterationResult;
use crate::io::backlog_store::BacklogStore;
use crate::io::pipeline::Pipeline;
use crate::iteration::{IterationSettings, execute_iteration};

/// Execution mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LoopMode {
    /// Exactly one iteration.
    #[default]
    Once,
    /// Iterate until done, stuck, or capped.
    Loop,
}

impl LoopMode {
    pub fn as_str(self) -> &'static str {
        match self {
            LoopMode::Once => "once",
            LoopMode::Loop => "loop",
        }
    }
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct LoopOptions {
    pub mode: LoopMode,
    /// Ignored in single-shot mode.
    pub max_iterations: Option<u32>,
    pub target_id: Option<String>,
    pub force: bool,
    /// Sleep between iterations in loop mode.
    pub pacing: Duration,
    pub iteration: IterationSettings,
}

/// Load the backlog and run the loop. Load failures yield an error summary.
pub fn run_feature<P, F>(
    store: &BacklogStore,
    feature_id: &str,
    pipeline: &P,
    options: &LoopOptions,
    on_iteration: F,
) -> RunSummary
where
    P: Pipeline + ?Sized,
    F: FnMut(&IterationResult),
{
    let mut backlog = match store.load() {
        Ok(backlog) => backlog,
        Err(err) => {
            error!(err = %format!("{err:#}"), "failed to load backlog");
            return RunSummary::init_failed(feature_id, format!("{err:#}"));
        }
    };
    if backlog.feature_id.is_empty() {
        backlog.feature_id = feature_id.to_string();
    }
    run_loop(store, &mut backlog, pipeline, options, on_iteration)
}

/// Run iterations over an already-loaded backlog.
#[instrument(skip_all, fields(feature_id = %backlog.feature_id, mode = %options.mode))]
pub fn run_loop<P, F>(
    store: &BacklogStore,
    backlog: &mut Backlog,
    pipeline: &P,
    options: &LoopOptions,
    mut on_iteration: F,
) -> RunSummary
where
    P: Pipeline + ?Sized,
    F: FnMut(&IterationResult),
{
    let criteria = SelectCriteria {
        max_attempts: options.iteration.max_attempts,
        target_id: options.target_id.as_deref(),
        force: options.force,
    };
    let mut iterations = 0u32;

    stamp_run(backlog, options.mode);
    if let Err(err) = store.save(backlog) {
        warn!(err = %format!("{err:#}"), "failed to persist run start");
    }

    let stop = loop {
        if options.mode == LoopMode::Loop
            && let Some(max_iterations) = options.max_iterations
            && iterations >= max_iterations
        {
            break LoopStop::IterationCap { max_iterations };
        }

        let story_id = match select_story(&backlog.stories, &criteria) {
            Selection::Story(story) => story.id.clone(),
            Selection::Exhausted => {
                break LoopStop::when_exhausted(&StatusCounts::from_stories(&backlog.stories));
            }
            Selection::TargetMissing => {
                warn!(story_id = ?criteria.target_id, "requested story not found");
                break LoopStop::TargetUnavailable;
            }
            Selection::TargetIneligible { story, reason } => {
                warn!(story_id = %story.id, reason = ?reason, "requested story is not eligible");
                break LoopStop::TargetUnavailable;
            }
        };

        let iteration = next_iteration(backlog);
        let result = match execute_iteration(
            store,
            backlog,
            &story_id,
            pipeline,
            &options.iteration,
            iteration,
        ) {
            Ok(result) => result,
            Err(err) => {
                error!(err = %format!("{err:#}"), "iteration could not start");
                return RunSummary {
                    stop: None,
                    error: Some(format!("{err:#}")),
                    ..RunSummary::from_stories(
                        &backlog.feature_id,
                        &backlog.stories,
                        iterations,
                        LoopStop::NoEligible,
                    )
                };
            }
        };
        iterations += 1;
        on_iteration(&result);

        if options.mode == LoopMode::Once {
            break LoopStop::SingleShot;
        }
        if !options.pacing.is_zero() {
            thread::sleep(options.pacing);
        }
    };

    info!(iterations, stop = %stop, "loop finished");
    RunSummary::from_stories(&backlog.feature_id, &backlog.stories, iterations, stop)
}

/// Record when and how the backlog was last run.
fn stamp_run(backlog: &mut Backlog, mode: LoopMode) {
    let metadata = &mut backlog.ralph_metadata;
    metadata.last_run_at = Some(Utc::now().to_rfc3339());
    metadata.last_run_mode = Some(mode.as_str().to_string());
}

/// Bump the cumulative counter; returns the new iteration number.
fn next_iteration(backlog: &mut Backlog) -> u64 {
    backlog.ralph_metadata.total_iterations += 1;
    backlog.ralph_metadata.total_iterations
}
