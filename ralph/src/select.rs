//! Selection helper for `ralph select`.

use anyhow::{Context, Result};

use crate::backlog::Backlog;
use crate::core::selector::{Ineligible, SelectCriteria, Selection, select_story};
use crate::io::backlog_store::BacklogStore;

/// Structured selection outcome for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectOutcome {
    /// Story selected.
    Selected(SelectedStory),
    /// Nothing is eligible.
    NoneEligible,
    /// The requested story does not exist.
    TargetMissing(String),
    /// The requested story exists but is not eligible.
    TargetIneligible { id: String, reason: Ineligible },
}

/// Minimal selected story metadata for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedStory {
    pub id: String,
    pub title: String,
    pub priority: String,
    pub attempts: u32,
}

/// Select from an in-memory backlog.
pub fn select_in_backlog(backlog: &Backlog, criteria: &SelectCriteria<'_>) -> SelectOutcome {
    match select_story(&backlog.stories, criteria) {
        Selection::Story(story) => SelectOutcome::Selected(SelectedStory {
            id: story.id.clone(),
            title: story.title.clone(),
            priority: story.priority.to_string(),
            attempts: story.attempts,
        }),
        Selection::Exhausted => SelectOutcome::NoneEligible,
        Selection::TargetMissing => {
            SelectOutcome::TargetMissing(criteria.target_id.unwrap_or_default().to_string())
        }
        Selection::TargetIneligible { story, reason } => SelectOutcome::TargetIneligible {
            id: story.id.clone(),
            reason,
        },
    }
}

/// Load the backlog from disk and select.
pub fn select_from_store(
    store: &BacklogStore,
    criteria: &SelectCriteria<'_>,
) -> Result<SelectOutcome> {
    let backlog = store.load().context("load backlog for selection")?;
    Ok(select_in_backlog(&backlog, criteria))
}
