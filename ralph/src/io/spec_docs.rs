//! Read a feature's spec documents from disk for extraction.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::extract::{CONTRACTS_DIR, FeatureDocs, PRIMARY_DOCS, order_context_files};

const SPEC_FILE: &str = "spec.md";
const TASKS_FILE: &str = "tasks.md";

/// Collect `spec.md`, `tasks.md`, and the context documents of `feature_dir`.
///
/// A missing `spec.md` is a warning; a missing directory is an error.
#[instrument(skip_all, fields(feature_dir = %feature_dir.display()))]
pub fn read_feature_docs(feature_dir: &Path) -> Result<FeatureDocs> {
    if !feature_dir.is_dir() {
        return Err(anyhow!(
            "feature directory {} not found",
            feature_dir.display()
        ));
    }

    let spec = read_optional(&feature_dir.join(SPEC_FILE))?;
    if spec.is_none() {
        warn!("spec.md missing, no stories will be extracted");
    }
    let tasks = read_optional(&feature_dir.join(TASKS_FILE))?;

    let mut files = Vec::new();
    for name in PRIMARY_DOCS {
        if let Some(contents) = read_optional(&feature_dir.join(name))? {
            files.push((name.to_string(), contents));
        }
    }
    let contracts = feature_dir.join(CONTRACTS_DIR);
    if contracts.is_dir() {
        collect_markdown(feature_dir, &contracts, &mut files)?;
    }
    let context_files = order_context_files(files);
    debug!(
        context_files = context_files.len(),
        has_tasks = tasks.is_some(),
        "read feature documents"
    );

    Ok(FeatureDocs {
        spec,
        tasks,
        context_files,
    })
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    if !path.is_file() {
        return Ok(None);
    }
    fs::read_to_string(path)
        .map(Some)
        .with_context(|| format!("read {}", path.display()))
}

/// Recursively collect `*.md` under `dir`, keyed by forward-slash path relative to `base`.
fn collect_markdown(base: &Path, dir: &Path, out: &mut Vec<(String, String)>) -> Result<()> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("read directory {}", dir.display()))?;
    for entry in entries {
        let path = entry
            .with_context(|| format!("read entry in {}", dir.display()))?
            .path();
        if path.is_dir() {
            collect_markdown(base, &path, out)?;
            continue;
        }
        if path.extension().is_none_or(|ext| ext != "md") {
            continue;
        }
        let relative = path
            .strip_prefix(base)
            .with_context(|| format!("relativize {}", path.display()))?
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        out.push((relative, contents));
    }
    Ok(())
}
