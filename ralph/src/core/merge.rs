//! Merge freshly extracted story content into a persisted backlog.
//!
//! Content fields come from the extraction; runtime fields always come from
//! the persisted story. Stories the extraction no longer produces are kept.

use std::collections::{HashMap, HashSet};

use crate::backlog::{Backlog, Story};
use crate::core::extract::{Extraction, StoryContent};

/// What a merge did, by story id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    /// Persisted stories missing from the extraction, kept as-is.
    pub retained: Vec<String>,
    /// Extracted ids seen more than once; only the first occurrence is used.
    pub duplicates: Vec<String>,
}

/// Overwrite the content fields of `story`; runtime fields are untouched.
pub fn apply_content(story: &mut Story, content: StoryContent) {
    story.title = content.title;
    story.description = content.description;
    story.priority = content.priority;
    story.independent_test = content.independent_test;
    story.acceptance_criteria = content.acceptance_criteria;
    story.tasks = content.tasks;
}

/// New story from extracted content with fresh runtime state.
pub fn story_from_content(content: StoryContent) -> Story {
    let mut story = Story::new(content.id.clone(), String::new());
    apply_content(&mut story, content);
    story
}

/// Merge `extracted` into `existing`, then stable-sort by priority and id.
pub fn merge_stories(existing: Vec<Story>, extracted: Vec<StoryContent>) -> (Vec<Story>, MergeReport) {
    let mut report = MergeReport::default();
    let existing_order: Vec<String> = existing.iter().map(|story| story.id.clone()).collect();
    let mut by_id: HashMap<String, Story> = existing
        .into_iter()
        .map(|story| (story.id.clone(), story))
        .collect();

    let mut merged = Vec::with_capacity(extracted.len() + by_id.len());
    let mut seen = HashSet::new();
    for content in extracted {
        if !seen.insert(content.id.clone()) {
            report.duplicates.push(content.id);
            continue;
        }
        match by_id.remove(&content.id) {
            Some(mut story) => {
                report.updated.push(story.id.clone());
                apply_content(&mut story, content);
                merged.push(story);
            }
            None => {
                report.added.push(content.id.clone());
                merged.push(story_from_content(content));
            }
        }
    }

    for id in existing_order {
        if let Some(story) = by_id.remove(&id) {
            report.retained.push(id);
            merged.push(story);
        }
    }

    merged.sort_by_key(|story| (story.priority.rank(), story.id_number()));
    (merged, report)
}

/// Merge an extraction into the persisted backlog (or a fresh one).
///
/// Loop metadata and unknown keys of `existing` are preserved.
pub fn merge_backlog(
    existing: Option<Backlog>,
    feature_id: &str,
    extraction: Extraction,
) -> (Backlog, MergeReport) {
    let mut backlog = existing.unwrap_or_else(|| Backlog::new(feature_id));
    if backlog.feature_id.is_empty() {
        backlog.feature_id = feature_id.to_string();
    }
    backlog.title = extraction.title;
    if !extraction.description.is_empty() {
        backlog.description = extraction.description;
    }
    let context_extra = std::mem::take(&mut backlog.context.extra);
    backlog.context = extraction.context;
    backlog.context.extra = context_extra;

    let (stories, report) = merge_stories(std::mem::take(&mut backlog.stories), extraction.stories);
    backlog.stories = stories;
    (backlog, report)
}
