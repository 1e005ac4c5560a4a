//! Iteration logging helpers for `.ralph/iterations/`.
//!
//! Each executed iteration leaves `meta.json` (the outcome) and `context.md`
//! (the story context sent to the pipeline) under
//! `.ralph/iterations/<feature>/<n>/`, where `n` is the backlog's cumulative
//! iteration counter.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::backlog::StoryStatus;
use crate::core::types::Decision;
use crate::io::pipeline::RALPH_DIR;

#[derive(Debug, Clone, Serialize)]
pub struct IterationMeta {
    pub feature_id: String,
    pub iteration: u64,
    pub story_id: String,
    pub attempt: u32,
    pub decision: Decision,
    pub tests_ok: bool,
    pub timed_out: bool,
    pub status: StoryStatus,
    pub error: Option<String>,
    pub critic_reason: Option<String>,
    pub context_truncated: bool,
    pub started_at: String,
    pub ended_at: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct IterationPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub context_path: PathBuf,
}

impl IterationPaths {
    pub fn new(root: &Path, feature_id: &str, iteration: u64) -> Self {
        let dir = root
            .join(RALPH_DIR)
            .join("iterations")
            .join(feature_id)
            .join(iteration.to_string());
        Self {
            meta_path: dir.join("meta.json"),
            context_path: dir.join("context.md"),
            dir,
        }
    }
}

pub fn write_iteration(root: &Path, meta: &IterationMeta, context: &str) -> Result<IterationPaths> {
    let paths = IterationPaths::new(root, &meta.feature_id, meta.iteration);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create iteration dir {}", paths.dir.display()))?;

    let mut buf = serde_json::to_string_pretty(meta).context("serialize iteration meta")?;
    buf.push('\n');
    fs::write(&paths.meta_path, buf)
        .with_context(|| format!("write {}", paths.meta_path.display()))?;
    fs::write(&paths.context_path, context)
        .with_context(|| format!("write {}", paths.context_path.display()))?;
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> IterationMeta {
        IterationMeta {
            feature_id: "001-demo".to_string(),
            iteration: 4,
            story_id: "US1".to_string(),
            attempt: 2,
            decision: Decision::Revise,
            tests_ok: true,
            timed_out: false,
            status: StoryStatus::InProgress,
            error: Some("Agent decision: REVISE".to_string()),
            critic_reason: None,
            context_truncated: false,
            started_at: "2025-01-01T00:00:00+00:00".to_string(),
            ended_at: "2025-01-01T00:01:00+00:00".to_string(),
            duration_ms: 60_000,
        }
    }

    #[test]
    fn iteration_paths_are_stable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = IterationPaths::new(temp.path(), "001-demo", 3);
        assert!(paths.dir.ends_with(Path::new(".ralph/iterations/001-demo/3")));
        assert!(paths.meta_path.ends_with("meta.json"));
        assert!(paths.context_path.ends_with("context.md"));
    }

    #[test]
    fn writes_meta_and_context() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = write_iteration(temp.path(), &meta(), "story context").expect("write");

        let raw = fs::read_to_string(&paths.meta_path).expect("read meta");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(value["decision"], "REVISE");
        assert_eq!(value["status"], "in_progress");
        assert_eq!(value["iteration"], 4);
        assert_eq!(
            fs::read_to_string(&paths.context_path).expect("read context"),
            "story context"
        );
    }
}
