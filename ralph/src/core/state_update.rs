//! Loop-owned story transitions around one iteration.
//!
//! Timestamps are passed in so that these functions stay deterministic.

use crate::backlog::{Story, StoryStatus};
use crate::core::types::{Decision, PipelineResult};

/// Entry transition: mark in progress and count the attempt.
///
/// Applied before the pipeline runs, so a crash mid-iteration leaves the
/// story retryable as `in_progress`.
pub fn begin_attempt(story: &mut Story, now: &str) {
    story.status = StoryStatus::InProgress;
    story.attempts = story.attempts.saturating_add(1);
    story.last_updated_at = Some(now.to_string());
}

/// Human-readable failure text for a non-successful result.
pub fn describe_failure(result: &PipelineResult) -> String {
    if let Some(error) = result.error.as_deref().filter(|e| !e.trim().is_empty()) {
        return error.to_string();
    }
    if result.decision != Decision::Ship {
        let reason = result
            .critic_reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty());
        return match reason {
            Some(reason) => format!("Agent decision: {} - {reason}", result.decision),
            None => format!("Agent decision: {}", result.decision),
        };
    }
    if !result.tests_ok {
        return "Tests failed".to_string();
    }
    "Unknown error".to_string()
}

/// Post-execution transition.
///
/// `cap` is the effective attempt cap already resolved by the caller. The
/// attempt counter was incremented by [`begin_attempt`] and is not touched here.
pub fn apply_attempt_result(
    story: &mut Story,
    result: &PipelineResult,
    cap: Option<u32>,
    now: &str,
) -> StoryStatus {
    story.last_updated_at = Some(now.to_string());
    if result.is_success() {
        story.status = StoryStatus::Pass;
        story.last_error = None;
        return story.status;
    }

    story.last_error = Some(describe_failure(result));
    story.status = match cap {
        Some(cap) if story.attempts >= cap => StoryStatus::Fail,
        _ => StoryStatus::InProgress,
    };
    story.status
}
