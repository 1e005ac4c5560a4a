//! Story context rendering for the coding pipeline.

use crate::backlog::{Backlog, Story};
use crate::core::budget::{BudgetPolicy, TokenEstimator, fit_to_budget};

pub const STORY_SECTION_HEADER: &str = "=== CURRENT USER STORY ===";
pub const SPEC_SECTION_HEADER: &str = "=== FULL SPECIFICATION CONTEXT ===";
pub const NO_LINKED_TASKS: &str = "(No linked tasks - story context only)";

/// Rendered, budget-fitted story context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryContext {
    pub text: String,
    pub truncated: bool,
    pub budget_tokens: usize,
    pub estimated_tokens: usize,
}

/// Story-specific section: identity, description, criteria, test, tasks.
pub fn render_story_section(story: &Story) -> String {
    let mut out = String::new();
    out.push_str(STORY_SECTION_HEADER);
    out.push('\n');
    out.push_str(&format!("Story ID: {}\n", story.id));
    out.push_str(&format!("Title: {}\n", story.title));
    out.push_str(&format!("Priority: {}\n", story.priority));

    if !story.description.trim().is_empty() {
        out.push_str("\nDescription:\n");
        out.push_str(story.description.trim());
        out.push('\n');
    }

    if !story.acceptance_criteria.is_empty() {
        out.push_str("\nAcceptance Criteria:\n");
        for criterion in &story.acceptance_criteria {
            out.push_str(&format!("- {criterion}\n"));
        }
    }

    if !story.independent_test.trim().is_empty() {
        out.push_str("\nIndependent Test:\n");
        out.push_str(story.independent_test.trim());
        out.push('\n');
    }

    out.push('\n');
    if story.tasks.is_empty() {
        out.push_str(NO_LINKED_TASKS);
    } else {
        out.push_str(&format!("Linked Implementation Tasks: {}", story.tasks.join(", ")));
    }
    out.push('\n');
    out
}

/// Global section holding the concatenated specification documents.
pub fn render_spec_section(backlog: &Backlog) -> String {
    let blob = backlog.context.full_concatenation.trim();
    if blob.is_empty() {
        return String::new();
    }
    format!("\n{SPEC_SECTION_HEADER}\n{blob}\n")
}

/// Build the bounded context for `story` as sent to `model`.
pub fn build_story_context<E: TokenEstimator>(
    story: &Story,
    backlog: &Backlog,
    model: &str,
    policy: &BudgetPolicy<E>,
) -> StoryContext {
    let budget = policy.available_tokens(model);
    let fitted = fit_to_budget(
        &render_story_section(story),
        &render_spec_section(backlog),
        budget,
        &policy.estimator,
    );
    StoryContext {
        estimated_tokens: policy.estimator.estimate(&fitted.text),
        text: fitted.text,
        truncated: fitted.truncated,
        budget_tokens: budget,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::budget::{CharRatioEstimator, ModelLimits, TRUNCATION_MARKER};
    use crate::test_support::story;

    fn sample_story() -> Story {
        let mut s = story("US1", "P1");
        s.title = "Send notifications".to_string();
        s.description = "As a user I want alerts.".to_string();
        s.acceptance_criteria = vec!["Given an event, When it fires, Then I am notified".into()];
        s.independent_test = "Trigger an event and observe the alert.".to_string();
        s.tasks = vec!["T001".into(), "T004".into()];
        s
    }

    fn backlog_with_blob(blob: &str) -> Backlog {
        let mut backlog = Backlog::new("001-demo");
        backlog.context.full_concatenation = blob.to_string();
        backlog
    }

    #[test]
    fn renders_sections_in_fixed_order() {
        let text = render_story_section(&sample_story());
        let order = [
            STORY_SECTION_HEADER,
            "Story ID: US1",
            "Priority: P1",
            "Description:",
            "Acceptance Criteria:",
            "- Given an event",
            "Independent Test:",
            "Linked Implementation Tasks: T001, T004",
        ];
        let mut cursor = 0;
        for needle in order {
            let pos = text[cursor..]
                .find(needle)
                .unwrap_or_else(|| panic!("missing or out of order: {needle}"));
            cursor += pos;
        }
    }

    #[test]
    fn marks_story_without_tasks() {
        let mut s = sample_story();
        s.tasks.clear();
        assert!(render_story_section(&s).contains(NO_LINKED_TASKS));
    }

    #[test]
    fn small_context_is_not_truncated() {
        let ctx = build_story_context(
            &sample_story(),
            &backlog_with_blob("=== spec.md ===\nhello"),
            "ollama/llama3.1:8b",
            &BudgetPolicy::<CharRatioEstimator>::default(),
        );
        assert!(!ctx.truncated);
        assert!(ctx.text.contains(SPEC_SECTION_HEADER));
        assert!(ctx.text.ends_with("hello\n"));
    }

    /// Verifies an oversized blob is cut from its tail with the marker while
    /// the story header stays intact.
    #[test]
    fn oversized_blob_truncates_tail_and_fits_budget() {
        let policy = BudgetPolicy {
            limits: ModelLimits::builtin(),
            estimator: CharRatioEstimator::new(3),
            reserve_tokens: 2000,
            min_available_tokens: 500,
        };
        let blob = "spec line\n".repeat(5000);
        let s = sample_story();
        let ctx = build_story_context(&s, &backlog_with_blob(&blob), "unknown-model", &policy);

        assert!(ctx.truncated);
        assert!(ctx.text.starts_with(&render_story_section(&s)));
        assert!(ctx.text.ends_with(TRUNCATION_MARKER));
        assert!(ctx.estimated_tokens <= ctx.budget_tokens);
        assert_eq!(ctx.budget_tokens, 4096 - 2000);
    }
}
