//! Run summary derived from a backlog snapshot.

use std::fmt;

use serde::Serialize;

use crate::backlog::{Story, StoryStatus};

/// Per-status story counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub todo: usize,
    pub in_progress: usize,
    pub fail: usize,
    pub pass: usize,
}

impl StatusCounts {
    pub fn from_stories(stories: &[Story]) -> Self {
        let mut counts = StatusCounts {
            total: stories.len(),
            ..StatusCounts::default()
        };
        for story in stories {
            match story.status {
                StoryStatus::Todo => counts.todo += 1,
                StoryStatus::InProgress => counts.in_progress += 1,
                StoryStatus::Fail => counts.fail += 1,
                StoryStatus::Pass => counts.pass += 1,
            }
        }
        counts
    }

    /// True when there is at least one story and every story is `pass`.
    pub fn all_passed(&self) -> bool {
        self.total > 0 && self.pass == self.total
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum LoopStop {
    /// Every story is `pass`.
    AllPassed,
    /// The backlog has no stories.
    EmptyBacklog,
    /// Nothing eligible, but some stories are unfinished (caps reached).
    NoEligible,
    /// The iteration cap was reached.
    IterationCap { max_iterations: u32 },
    /// Single-shot mode ran its one iteration.
    SingleShot,
    /// An explicit target story was missing or not eligible.
    TargetUnavailable,
}

impl LoopStop {
    /// Distinguish "done" from "stuck behind caps" when nothing is selectable.
    pub fn when_exhausted(counts: &StatusCounts) -> Self {
        if counts.total == 0 {
            LoopStop::EmptyBacklog
        } else if counts.all_passed() {
            LoopStop::AllPassed
        } else {
            LoopStop::NoEligible
        }
    }
}

impl fmt::Display for LoopStop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopStop::AllPassed => f.write_str("all stories passed"),
            LoopStop::EmptyBacklog => f.write_str("backlog has no stories"),
            LoopStop::NoEligible => f.write_str("no eligible stories remain"),
            LoopStop::IterationCap { max_iterations } => {
                write!(f, "iteration cap reached ({max_iterations})")
            }
            LoopStop::SingleShot => f.write_str("single iteration complete"),
            LoopStop::TargetUnavailable => f.write_str("requested story not selectable"),
        }
    }
}

/// End-of-run summary. Always printed, even after an early stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub feature_id: String,
    pub iterations: u32,
    pub counts: StatusCounts,
    pub stop: Option<LoopStop>,
    /// Set when initialization failed; counts are then zero.
    pub error: Option<String>,
}

impl RunSummary {
    pub fn from_stories(feature_id: &str, stories: &[Story], iterations: u32, stop: LoopStop) -> Self {
        Self {
            feature_id: feature_id.to_string(),
            iterations,
            counts: StatusCounts::from_stories(stories),
            stop: Some(stop),
            error: None,
        }
    }

    pub fn init_failed(feature_id: &str, error: impl Into<String>) -> Self {
        Self {
            feature_id: feature_id.to_string(),
            iterations: 0,
            counts: StatusCounts::default(),
            stop: None,
            error: Some(error.into()),
        }
    }

    /// Non-zero exit is warranted when init failed or any story failed.
    pub fn is_failure(&self) -> bool {
        self.error.is_some() || self.counts.fail > 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Ralph run summary: {} ===", self.feature_id)?;
        if let Some(error) = &self.error {
            return writeln!(f, "error: {error}");
        }
        writeln!(f, "iterations: {}", self.iterations)?;
        writeln!(
            f,
            "stories: {} total, {} pass, {} fail, {} in_progress, {} todo",
            self.counts.total,
            self.counts.pass,
            self.counts.fail,
            self.counts.in_progress,
            self.counts.todo
        )?;
        if let Some(stop) = &self.stop {
            writeln!(f, "stopped: {stop}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::story_with_status;

    #[test]
    fn counts_every_status() {
        let stories = vec![
            story_with_status("US1", StoryStatus::Pass),
            story_with_status("US2", StoryStatus::Fail),
            story_with_status("US3", StoryStatus::Todo),
            story_with_status("US4", StoryStatus::InProgress),
            story_with_status("US5", StoryStatus::Pass),
        ];
        let counts = StatusCounts::from_stories(&stories);
        assert_eq!(
            counts,
            StatusCounts {
                total: 5,
                todo: 1,
                in_progress: 1,
                fail: 1,
                pass: 2
            }
        );
        assert_eq!(LoopStop::when_exhausted(&counts), LoopStop::NoEligible);
    }

    #[test]
    fn empty_backlog_is_not_reported_as_all_passed() {
        let counts = StatusCounts::from_stories(&[]);
        assert!(!counts.all_passed());
        assert_eq!(LoopStop::when_exhausted(&counts), LoopStop::EmptyBacklog);
        assert_eq!(
            LoopStop::EmptyBacklog.to_string(),
            "backlog has no stories"
        );
    }

    #[test]
    fn failure_exit_requires_fail_or_error() {
        let ok = RunSummary::from_stories(
            "f",
            &[story_with_status("US1", StoryStatus::InProgress)],
            1,
            LoopStop::SingleShot,
        );
        assert!(!ok.is_failure());

        let failed = RunSummary::from_stories(
            "f",
            &[story_with_status("US1", StoryStatus::Fail)],
            1,
            LoopStop::NoEligible,
        );
        assert!(failed.is_failure());

        let init = RunSummary::init_failed("f", "missing prd.json");
        assert!(init.is_failure());
        assert_eq!(init.counts, StatusCounts::default());
        assert!(init.to_string().contains("missing prd.json"));
    }
}
