//! Deterministic story selection over the backlog.

use crate::backlog::{Story, StoryStatus};

/// Constraints for one selection call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectCriteria<'a> {
    /// Global attempt cap; a story's own `max_attempts` wins when set.
    pub max_attempts: Option<u32>,
    /// Explicit target story id. Never falls back to auto-selection.
    pub target_id: Option<&'a str>,
    /// Allow `pass` stories to be selected again.
    pub force: bool,
}

/// Why a story cannot be selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligible {
    Passed,
    AttemptsExhausted { attempts: u32, cap: u32 },
}

/// Outcome of a selection call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Selection<'a> {
    Story(&'a Story),
    /// No eligible story remains.
    Exhausted,
    /// The explicit target id does not exist.
    TargetMissing,
    /// The explicit target exists but is not eligible.
    TargetIneligible { story: &'a Story, reason: Ineligible },
}

impl<'a> Selection<'a> {
    pub fn story(self) -> Option<&'a Story> {
        match self {
            Selection::Story(story) => Some(story),
            _ => None,
        }
    }
}

/// Effective attempt cap for `story`. A cap of zero means uncapped.
pub fn effective_cap(story: &Story, global: Option<u32>) -> Option<u32> {
    story
        .max_attempts
        .filter(|cap| *cap > 0)
        .or(global)
        .filter(|cap| *cap > 0)
}

/// Returns the reason `story` is not selectable, or `None` when eligible.
pub fn ineligibility(story: &Story, criteria: &SelectCriteria<'_>) -> Option<Ineligible> {
    if story.status == StoryStatus::Pass && !criteria.force {
        return Some(Ineligible::Passed);
    }
    match effective_cap(story, criteria.max_attempts) {
        Some(cap) if story.attempts >= cap => Some(Ineligible::AttemptsExhausted {
            attempts: story.attempts,
            cap,
        }),
        _ => None,
    }
}

pub fn is_eligible(story: &Story, criteria: &SelectCriteria<'_>) -> bool {
    ineligibility(story, criteria).is_none()
}

/// Total order key: status rank, priority rank, id number, attempts.
pub fn selection_key(story: &Story) -> (u8, u32, u32, u32) {
    (
        story.status.rank(),
        story.priority.rank(),
        story.id_number(),
        story.attempts,
    )
}

/// Select the next story to work on.
pub fn select_story<'a>(stories: &'a [Story], criteria: &SelectCriteria<'_>) -> Selection<'a> {
    if let Some(target) = criteria.target_id {
        let Some(story) = stories.iter().find(|story| story.id == target) else {
            return Selection::TargetMissing;
        };
        return match ineligibility(story, criteria) {
            None => Selection::Story(story),
            Some(reason) => Selection::TargetIneligible { story, reason },
        };
    }

    // `min_by_key` keeps the first minimum, so equal keys resolve by backlog order.
    stories
        .iter()
        .filter(|story| is_eligible(story, criteria))
        .min_by_key(|story| selection_key(story))
        .map_or(Selection::Exhausted, Selection::Story)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::story;

    fn two_story_backlog() -> Vec<Story> {
        let mut us1 = story("US1", "P1");
        us1.status = StoryStatus::Todo;
        let mut us2 = story("US2", "P2");
        us2.status = StoryStatus::Fail;
        us2.attempts = 1;
        us2.max_attempts = Some(3);
        vec![us1, us2]
    }

    fn selected_id(stories: &[Story], criteria: &SelectCriteria<'_>) -> Option<String> {
        select_story(stories, criteria)
            .story()
            .map(|story| story.id.clone())
    }

    /// Verifies the walk-through: todo first, then the failed retry, then nothing.
    #[test]
    fn selection_walks_through_status_and_caps() {
        let mut stories = two_story_backlog();
        let criteria = SelectCriteria::default();

        assert_eq!(selected_id(&stories, &criteria).as_deref(), Some("US1"));

        stories[0].status = StoryStatus::Pass;
        assert_eq!(selected_id(&stories, &criteria).as_deref(), Some("US2"));

        stories[1].attempts = 3;
        assert_eq!(
            select_story(&stories, &criteria),
            Selection::Exhausted
        );
    }

    #[test]
    fn higher_priority_wins_between_todo_stories() {
        let stories = vec![story("US1", "P2"), story("US2", "P1")];
        let criteria = SelectCriteria::default();
        for _ in 0..3 {
            assert_eq!(selected_id(&stories, &criteria).as_deref(), Some("US2"));
        }
    }

    #[test]
    fn status_rank_beats_priority() {
        let mut retry = story("US1", "P1");
        retry.status = StoryStatus::InProgress;
        retry.attempts = 1;
        let fresh = story("US2", "P3");
        let stories = vec![retry, fresh];
        assert_eq!(
            selected_id(&stories, &SelectCriteria::default()).as_deref(),
            Some("US2")
        );
    }

    #[test]
    fn in_progress_outranks_fail() {
        let mut failed = story("US1", "P1");
        failed.status = StoryStatus::Fail;
        let mut interrupted = story("US2", "P1");
        interrupted.status = StoryStatus::InProgress;
        let stories = vec![failed, interrupted];
        assert_eq!(
            selected_id(&stories, &SelectCriteria::default()).as_deref(),
            Some("US2")
        );
    }

    #[test]
    fn numeric_id_breaks_priority_ties() {
        let stories = vec![story("US10", "P1"), story("US9", "P1")];
        assert_eq!(
            selected_id(&stories, &SelectCriteria::default()).as_deref(),
            Some("US9")
        );
    }

    #[test]
    fn fewer_attempts_breaks_remaining_ties() {
        let mut a = story("A", "P1");
        a.status = StoryStatus::Fail;
        a.attempts = 2;
        let mut b = story("B", "P1");
        b.status = StoryStatus::Fail;
        b.attempts = 1;
        let stories = vec![a, b];
        assert_eq!(
            selected_id(&stories, &SelectCriteria::default()).as_deref(),
            Some("B")
        );
    }

    #[test]
    fn eligibility_boundary_at_cap() {
        let mut s = story("US1", "P1");
        s.max_attempts = Some(3);
        s.attempts = 2;
        assert!(is_eligible(&s, &SelectCriteria::default()));
        s.attempts = 3;
        assert_eq!(
            ineligibility(&s, &SelectCriteria::default()),
            Some(Ineligible::AttemptsExhausted {
                attempts: 3,
                cap: 3
            })
        );
        let forced = SelectCriteria {
            force: true,
            ..SelectCriteria::default()
        };
        assert!(!is_eligible(&s, &forced));
    }

    #[test]
    fn global_cap_applies_without_story_override() {
        let mut s = story("US1", "P1");
        s.attempts = 2;
        let criteria = SelectCriteria {
            max_attempts: Some(2),
            ..SelectCriteria::default()
        };
        assert!(!is_eligible(&s, &criteria));

        s.max_attempts = Some(5);
        assert!(is_eligible(&s, &criteria));
    }

    #[test]
    fn zero_cap_means_uncapped() {
        let mut s = story("US1", "P1");
        s.attempts = 40;
        s.max_attempts = Some(0);
        assert_eq!(effective_cap(&s, Some(0)), None);
        assert!(is_eligible(
            &s,
            &SelectCriteria {
                max_attempts: Some(0),
                ..SelectCriteria::default()
            }
        ));
        assert_eq!(effective_cap(&s, Some(4)), Some(4));
    }

    #[test]
    fn explicit_target_passed_without_force_returns_nothing() {
        let mut us1 = story("US1", "P1");
        us1.status = StoryStatus::Pass;
        let stories = vec![us1, story("US2", "P2")];
        let criteria = SelectCriteria {
            target_id: Some("US1"),
            ..SelectCriteria::default()
        };
        assert!(matches!(
            select_story(&stories, &criteria),
            Selection::TargetIneligible {
                reason: Ineligible::Passed,
                ..
            }
        ));

        let forced = SelectCriteria {
            force: true,
            ..criteria
        };
        assert_eq!(selected_id(&stories, &forced).as_deref(), Some("US1"));
    }

    #[test]
    fn explicit_target_missing_does_not_fall_back() {
        let stories = vec![story("US1", "P1")];
        let criteria = SelectCriteria {
            target_id: Some("US7"),
            ..SelectCriteria::default()
        };
        assert_eq!(select_story(&stories, &criteria), Selection::TargetMissing);
    }

    #[test]
    fn force_makes_passed_stories_selectable_last() {
        let mut passed = story("US1", "P1");
        passed.status = StoryStatus::Pass;
        let mut failed = story("US2", "P2");
        failed.status = StoryStatus::Fail;
        let stories = vec![passed, failed];
        let forced = SelectCriteria {
            force: true,
            ..SelectCriteria::default()
        };
        assert_eq!(selected_id(&stories, &forced).as_deref(), Some("US2"));
    }
}
