//! Orchestration for `ralph generate`.
//!
//! Reads a feature's spec documents, extracts stories and context, merges the
//! result into the existing backlog (keeping runtime state), and saves it.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::extract::extract_feature;
use crate::core::merge::{MergeReport, merge_backlog};
use crate::io::backlog_store::{BacklogStore, FeaturePaths};
use crate::io::spec_docs::read_feature_docs;

/// Outcome of `ralph generate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateOutcome {
    pub backlog_path: PathBuf,
    pub story_count: usize,
    pub context_files: usize,
    pub report: MergeReport,
}

/// Extract, merge and persist the backlog for `paths.feature_id`.
#[instrument(skip_all, fields(feature_id = %paths.feature_id))]
pub fn generate_backlog(paths: &FeaturePaths) -> Result<GenerateOutcome> {
    let docs = read_feature_docs(&paths.feature_dir)
        .with_context(|| format!("read spec documents for {}", paths.feature_id))?;
    let extraction = extract_feature(&paths.feature_id, &docs);
    if extraction.stories.is_empty() {
        warn!("no user stories found in spec.md");
    }

    let store = BacklogStore::new(&paths.backlog_path);
    let existing = store.load_for_merge()?;
    let (backlog, report) = merge_backlog(existing, &paths.feature_id, extraction);
    store
        .save(&backlog)
        .with_context(|| format!("save backlog for {}", paths.feature_id))?;

    info!(
        stories = backlog.stories.len(),
        added = report.added.len(),
        updated = report.updated.len(),
        retained = report.retained.len(),
        "backlog generated"
    );
    Ok(GenerateOutcome {
        backlog_path: paths.backlog_path.clone(),
        story_count: backlog.stories.len(),
        context_files: backlog.context.files.len(),
        report,
    })
}
