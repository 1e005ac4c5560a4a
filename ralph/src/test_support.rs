//! Test-only helpers: story builders, a scratch git repository, a scripted
//! pipeline, and a small feature spec fixture.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::backlog::{Backlog, Priority, Story, StoryStatus};
use crate::core::types::PipelineResult;
use crate::io::pipeline::{Pipeline, PipelineError, PipelineRequest};

/// Deterministic `todo` story with the given priority label.
pub fn story(id: &str, priority: &str) -> Story {
    let mut story = Story::new(id, format!("{id} title"));
    story.priority = Priority::new(priority);
    story.description = format!("{id} description");
    story.acceptance_criteria = vec![format!("{id} works")];
    story
}

/// Deterministic P1 story with an explicit status.
pub fn story_with_status(id: &str, status: StoryStatus) -> Story {
    let mut story = story(id, "P1");
    story.status = status;
    story
}

/// Backlog for feature `001-demo` holding `stories` and a small spec context.
pub fn sample_backlog(stories: Vec<Story>) -> Backlog {
    let mut backlog = Backlog::new("001-demo");
    backlog.title = "Demo feature".to_string();
    backlog.description = "A feature used in tests.".to_string();
    backlog
        .context
        .files
        .insert("spec.md", "# Feature Specification: Demo\n");
    backlog.context.full_concatenation =
        "=== spec.md ===\n# Feature Specification: Demo".to_string();
    backlog.stories = stories;
    backlog
}

/// Temporary git repository with one commit (`README.md`).
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp repo dir")?;
        let root = dir.path();
        git(root, &["init", "--quiet"])?;
        git(root, &["config", "user.email", "test@example.com"])?;
        git(root, &["config", "user.name", "test"])?;
        git(root, &["config", "commit.gpgsign", "false"])?;
        fs::write(root.join("README.md"), "hi\n").context("write README.md")?;
        git(root, &["add", "README.md"])?;
        git(root, &["commit", "--quiet", "-m", "init"])?;
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

fn git(root: &Path, args: &[&str]) -> Result<()> {
    let status = Command::new("git")
        .args(args)
        .current_dir(root)
        .status()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !status.success() {
        return Err(anyhow!("git {} failed", args.join(" ")));
    }
    Ok(())
}

/// Pipeline returning queued results in order and recording each request.
pub struct ScriptedPipeline {
    results: RefCell<VecDeque<Result<PipelineResult, PipelineError>>>,
    requests: RefCell<Vec<PipelineRequest>>,
}

impl ScriptedPipeline {
    pub fn new(results: Vec<Result<PipelineResult, PipelineError>>) -> Self {
        Self {
            results: RefCell::new(results.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<PipelineRequest> {
        self.requests.borrow().clone()
    }
}

impl Pipeline for ScriptedPipeline {
    fn run_once(&self, request: &PipelineRequest) -> Result<PipelineResult, PipelineError> {
        self.requests.borrow_mut().push(request.clone());
        self.results
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("scripted pipeline has no results left").into()))
    }
}

pub const FIXTURE_SPEC: &str = "\
# Feature Specification: Event Notifications

**Feature Branch**: `001-demo`

Users want to hear about events as they happen.

### User Story 1 - Receive alerts (Priority: P1)

As a user I want alerts.

**Independent Test**: Trigger an event and observe the alert.

**Acceptance Scenarios**:

1. **Given** an event, **When** it fires, **Then** I am notified

### User Story 2 - Configure channels (Priority: P2)

Pick email or SMS.

**Acceptance Scenarios**:

1. Given settings, When I save, Then channels persist
";

pub const FIXTURE_TASKS: &str = "\
# Tasks

- [ ] T001 [P] [US1] Create alert model
- [ ] T002 [US1] Dispatch alerts
- [ ] T003 [US2] Channel settings form
";

/// Write `spec.md`, `tasks.md` and `plan.md` into `feature_dir`.
pub fn write_feature_fixture(feature_dir: &Path) -> Result<()> {
    fs::create_dir_all(feature_dir)
        .with_context(|| format!("create {}", feature_dir.display()))?;
    for (name, contents) in [
        ("spec.md", FIXTURE_SPEC),
        ("tasks.md", FIXTURE_TASKS),
        ("plan.md", "# Plan\n\nUse a queue.\n"),
    ] {
        let path = feature_dir.join(name);
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
    }
    Ok(())
}
