//! Backlog load/save for `specs/<feature>/prd.json`.
//!
//! The store is the only writer of the backlog file. Saves are atomic
//! (temp file + rename) so an interrupted write never leaves a partial file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::backlog::Backlog;

const BACKLOG_SCHEMA: &str = include_str!("../../schemas/prd.schema.json");

/// Backlog file name inside a feature directory.
pub const BACKLOG_FILE: &str = "prd.json";

/// Canonical paths for one feature.
#[derive(Debug, Clone)]
pub struct FeaturePaths {
    pub root: PathBuf,
    pub feature_id: String,
    pub feature_dir: PathBuf,
    pub backlog_path: PathBuf,
}

impl FeaturePaths {
    pub fn new(root: &Path, specs_dir: &str, feature_id: &str) -> Self {
        let feature_dir = root.join(specs_dir).join(feature_id);
        Self {
            root: root.to_path_buf(),
            feature_id: feature_id.to_string(),
            backlog_path: feature_dir.join(BACKLOG_FILE),
            feature_dir,
        }
    }
}

/// Persistence for a single backlog file.
#[derive(Debug, Clone)]
pub struct BacklogStore {
    path: PathBuf,
}

impl BacklogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path where an unparsable backlog is copied before it is replaced.
    pub fn corrupt_path(&self) -> PathBuf {
        self.path.with_extension("json.corrupt")
    }

    /// Strict load used by the loop: the file must exist, parse, and match the schema.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn load(&self) -> Result<Backlog> {
        if !self.path.is_file() {
            return Err(anyhow!(
                "backlog {} not found (run `ralph generate` first)",
                self.path.display()
            ));
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read backlog {}", self.path.display()))?;
        let value: Value = serde_json::from_str(&contents)
            .with_context(|| format!("parse backlog {}", self.path.display()))?;
        validate_schema(&value)
            .with_context(|| format!("validate backlog {}", self.path.display()))?;
        let backlog: Backlog = serde_json::from_value(value)
            .with_context(|| format!("deserialize backlog {}", self.path.display()))?;
        debug!(stories = backlog.stories.len(), "loaded backlog");
        Ok(backlog)
    }

    /// Lenient load used before a merge.
    ///
    /// A missing file yields `None`. Missing `context` or `stories` keys are
    /// filled with empty defaults so older files keep their runtime state. A
    /// file that is not valid backlog JSON is copied aside to
    /// [`Self::corrupt_path`], logged, and also yields `None`.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn load_for_merge(&self) -> Result<Option<Backlog>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read backlog {}", self.path.display()))?;
        let parsed = serde_json::from_str::<Value>(&contents)
            .map_err(anyhow::Error::from)
            .and_then(|mut value| {
                fill_merge_defaults(&mut value);
                serde_json::from_value::<Backlog>(value).map_err(anyhow::Error::from)
            });
        match parsed {
            Ok(backlog) => Ok(Some(backlog)),
            Err(err) => {
                let backup = self.corrupt_path();
                warn!(
                    err = %err,
                    backup = %backup.display(),
                    "existing backlog is not valid, starting from an empty backlog"
                );
                if let Err(copy_err) = fs::copy(&self.path, &backup) {
                    warn!(err = %copy_err, "failed to keep a copy of the invalid backlog");
                }
                Ok(None)
            }
        }
    }

    /// Atomically write the backlog (pretty JSON, trailing newline).
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn save(&self, backlog: &Backlog) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(backlog).context("serialize backlog")?;
        buf.push('\n');
        write_atomic(&self.path, &buf)?;
        debug!(stories = backlog.stories.len(), "saved backlog");
        Ok(())
    }
}

/// Insert empty `context` / `stories` when an object lacks them.
fn fill_merge_defaults(value: &mut Value) {
    if let Value::Object(map) = value {
        map.entry("context")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        map.entry("stories")
            .or_insert_with(|| Value::Array(Vec::new()));
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("backlog path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp backlog {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace backlog {}", path.display()))?;
    Ok(())
}

fn validate_schema(backlog: &Value) -> Result<()> {
    let schema_value: Value =
        serde_json::from_str(BACKLOG_SCHEMA).context("parse embedded backlog schema")?;
    let compiled =
        validator_for(&schema_value).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(backlog) {
        let messages = compiled
            .iter_errors(backlog)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "backlog schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backlog::StoryStatus;
    use crate::test_support::{sample_backlog, story};

    fn store_in(dir: &Path) -> BacklogStore {
        BacklogStore::new(dir.join("specs/001-demo").join(BACKLOG_FILE))
    }

    /// Verifies save then strict load yields a structurally equal backlog.
    #[test]
    fn save_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(temp.path());
        let mut backlog = sample_backlog(vec![story("US1", "P1"), story("US2", "P2")]);
        backlog.stories[1].status = StoryStatus::Fail;
        backlog.stories[1].last_error = Some("Tests failed".to_string());

        store.save(&backlog).expect("save");
        let text = fs::read_to_string(store.path()).expect("read");
        assert!(text.ends_with("}\n"));
        assert!(!store.path().with_extension("json.tmp").exists());

        let loaded = store.load().expect("load");
        assert_eq!(loaded, backlog);
    }

    #[test]
    fn load_missing_file_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = store_in(temp.path()).load().expect_err("missing");
        assert!(err.to_string().contains("ralph generate"));
    }

    #[test]
    fn load_reports_missing_required_field() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(temp.path());
        fs::create_dir_all(store.path().parent().expect("parent")).expect("mkdir");
        fs::write(store.path(), r#"{"feature_id":"x","context":{}}"#).expect("write");
        let err = store.load().expect_err("invalid");
        assert!(format!("{err:#}").contains("stories"));
    }

    #[test]
    fn load_for_merge_keeps_corrupt_copy() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(temp.path());
        fs::create_dir_all(store.path().parent().expect("parent")).expect("mkdir");
        fs::write(store.path(), "{ not json").expect("write");

        assert!(store.load_for_merge().expect("lenient load").is_none());
        assert_eq!(
            fs::read_to_string(store.corrupt_path()).expect("backup"),
            "{ not json"
        );
    }

    #[test]
    fn load_for_merge_keeps_runtime_state_without_context() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(temp.path());
        fs::create_dir_all(store.path().parent().expect("parent")).expect("mkdir");
        fs::write(
            store.path(),
            r#"{"feature_id":"001-demo","stories":[{"id":"US1","title":"Old","priority":"P1","status":"pass","attempts":2}]}"#,
        )
        .expect("write");

        let backlog = store
            .load_for_merge()
            .expect("lenient load")
            .expect("backlog kept");
        assert_eq!(backlog.stories[0].status, StoryStatus::Pass);
        assert_eq!(backlog.stories[0].attempts, 2);
        assert!(backlog.context.files.is_empty());
        assert!(!store.corrupt_path().exists());
    }

    #[test]
    fn load_for_merge_without_stories_is_empty_not_corrupt() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(temp.path());
        fs::create_dir_all(store.path().parent().expect("parent")).expect("mkdir");
        fs::write(store.path(), r#"{"feature_id":"001-demo"}"#).expect("write");

        let backlog = store
            .load_for_merge()
            .expect("lenient load")
            .expect("backlog kept");
        assert!(backlog.stories.is_empty());
        assert!(!store.corrupt_path().exists());
    }

    #[test]
    fn load_for_merge_wrong_shape_is_corrupt() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(temp.path());
        fs::create_dir_all(store.path().parent().expect("parent")).expect("mkdir");
        fs::write(store.path(), r#"{"stories":"US1"}"#).expect("write");

        assert!(store.load_for_merge().expect("lenient load").is_none());
        assert!(store.corrupt_path().exists());
    }

    #[test]
    fn load_for_merge_missing_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(store_in(temp.path()).load_for_merge().expect("load").is_none());
    }
}
