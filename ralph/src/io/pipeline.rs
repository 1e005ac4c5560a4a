//! One-shot refactor pipeline: plan, code, test, diff, review, commit.
//!
//! The [`Pipeline`] trait is the seam between the iteration executor and the
//! external tools. Tests use scripted pipelines that return predetermined
//! results without spawning processes.

use std::fmt;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::anyhow;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::lenient_json::{Lenient, parse_or_raw};
use crate::core::types::{CriticVerdict, Decision, PipelineResult};
use crate::io::config::RalphConfig;
use crate::io::git::Git;
use crate::io::process::{CommandOutput, is_not_found, run_command_with_timeout};
use crate::io::prompt::{CriticInput, PromptEngine};

/// Directory (relative to the repository root) holding loop bookkeeping.
pub const RALPH_DIR: &str = ".ralph";

/// Env var carrying the planner model to planner/critic commands.
pub const MODEL_ENV: &str = "RALPH_MODEL";

const CODE_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "jsx", "ts", "tsx", "go", "java", "kt", "rb", "c", "h", "cc", "cpp", "hpp",
    "cs", "swift", "php", "scala", "sh", "sql", "html", "css", "toml", "yaml", "yml", "json",
];

/// Pipeline stage, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Plan,
    Code,
    Test,
    Review,
    Commit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Plan => "plan",
            Stage::Code => "code",
            Stage::Test => "test",
            Stage::Review => "review",
            Stage::Commit => "commit",
        })
    }
}

/// Failure of the pipeline as a whole.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{stage} stage timed out after {}s", timeout.as_secs())]
    Timeout { stage: Stage, timeout: Duration },
    #[error("{stage} stage command not found: {program}")]
    CommandNotFound { stage: Stage, program: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Parameters for one pipeline invocation.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub task_name: String,
    pub feature_id: String,
    pub story_id: String,
    pub repo_root: PathBuf,
    /// Use the planner and critic commands when configured.
    pub use_agents: bool,
    pub auto_commit: bool,
    /// Literal prompt; bypasses planning.
    pub prompt: Option<String>,
    pub skip_tests: bool,
    pub story_context: String,
}

/// Abstraction over the plan/code/test/review backend.
pub trait Pipeline {
    fn run_once(&self, request: &PipelineRequest) -> Result<PipelineResult, PipelineError>;
}

/// Task name `<feature>-<story>-<title>` restricted to `[A-Za-z0-9_-]`.
pub fn task_name(feature_id: &str, story_id: &str, title: &str) -> String {
    format!("{feature_id}-{story_id}-{title}")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct PlanOutput {
    #[serde(default)]
    aider_prompt: String,
    #[serde(default)]
    target_files: Vec<String>,
}

/// Prompt and files handed to the coding tool.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CodePlan {
    prompt: String,
    target_files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TestRun {
    ok: bool,
    log: String,
}

impl TestRun {
    fn skipped(reason: &str) -> Self {
        Self {
            ok: true,
            log: format!("[tests skipped: {reason}]"),
        }
    }
}

/// Pipeline backed by subprocesses (coding tool, test shell, git, agents).
pub struct CommandPipeline {
    config: RalphConfig,
    prompts: PromptEngine,
}

impl CommandPipeline {
    pub fn new(config: RalphConfig) -> anyhow::Result<Self> {
        Ok(Self {
            config,
            prompts: PromptEngine::new()?,
        })
    }

    fn excluded_dirs(&self) -> [&str; 2] {
        [self.config.specs_dir.as_str(), RALPH_DIR]
    }

    #[instrument(skip_all, fields(stage = %Stage::Plan))]
    fn plan(&self, request: &PipelineRequest, git: &Git) -> Result<CodePlan, PipelineError> {
        if let Some(prompt) = request.prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            debug!("using literal prompt");
            return Ok(CodePlan {
                prompt: prompt.to_string(),
                target_files: Vec::new(),
            });
        }

        if request.use_agents && !self.config.agents.planner_command.is_empty() {
            match self.run_planner(request, git) {
                Ok(plan) => return Ok(plan),
                Err(err) => warn!(err = %err, "planner failed, using the coder template"),
            }
        }

        let prompt = self
            .prompts
            .render_coder(&request.task_name, &request.story_context, None)?;
        Ok(CodePlan {
            prompt,
            target_files: Vec::new(),
        })
    }

    fn run_planner(&self, request: &PipelineRequest, git: &Git) -> Result<CodePlan, PipelineError> {
        let repo_files = git.tracked_files().unwrap_or_else(|err| {
            warn!(err = %err, "could not list repository files for the planner");
            Vec::new()
        });
        let planner_prompt = self
            .prompts
            .render_planner(&request.story_context, &repo_files)?;
        let output = self.run_agent(
            Stage::Plan,
            &self.config.agents.planner_command,
            &planner_prompt,
            request,
        )?;

        let (notes, target_files) = match parse_or_raw::<PlanOutput>(&output) {
            Lenient::Parsed(plan) if !plan.aider_prompt.trim().is_empty() => {
                (plan.aider_prompt, self.filter_target_files(plan.target_files))
            }
            Lenient::Parsed(_) => return Err(anyhow!("planner returned an empty aider_prompt").into()),
            Lenient::Unparsed(raw) => {
                warn!("planner output was not JSON, using it as plain instructions");
                (raw, Vec::new())
            }
        };
        if notes.trim().is_empty() {
            return Err(anyhow!("planner returned no output").into());
        }
        debug!(target_files = target_files.len(), "planner produced a plan");
        let prompt =
            self.prompts
                .render_coder(&request.task_name, &request.story_context, Some(&notes))?;
        Ok(CodePlan {
            prompt,
            target_files,
        })
    }

    fn filter_target_files(&self, files: Vec<String>) -> Vec<String> {
        let specs_dir = self.config.specs_dir.trim_end_matches('/');
        files
            .into_iter()
            .map(|file| file.trim().trim_start_matches("./").to_string())
            .filter(|file| !file.is_empty() && !file.starts_with('/') && !file.contains(".."))
            .filter(|file| {
                file != specs_dir && !file.starts_with(&format!("{specs_dir}/"))
            })
            .filter(|file| {
                file.rsplit_once('.')
                    .is_some_and(|(_, ext)| CODE_EXTENSIONS.contains(&ext))
            })
            .collect()
    }

    #[instrument(skip_all, fields(stage = %Stage::Code))]
    fn code(&self, request: &PipelineRequest, plan: &CodePlan) -> Result<(), PipelineError> {
        let argv = &self.config.coder.command;
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .arg("--model")
            .arg(&self.config.models.coder)
            .arg("--message")
            .arg(&plan.prompt)
            .args(&plan.target_files)
            .current_dir(&request.repo_root);

        let timeout = Duration::from_secs(self.config.coder.timeout_secs);
        info!(timeout_secs = timeout.as_secs(), "running coding tool");
        let output = self.run_stage(Stage::Code, cmd, None, timeout)?;
        if !output.success() {
            warn!(
                exit_code = ?output.status.code(),
                stderr = %output.stderr_text().trim(),
                "coding tool exited non-zero, continuing"
            );
        }
        Ok(())
    }

    #[instrument(skip_all, fields(stage = %Stage::Test))]
    fn test(&self, request: &PipelineRequest) -> Result<TestRun, PipelineError> {
        if request.skip_tests {
            return Ok(TestRun::skipped("disabled for this run"));
        }
        let Some(command) = self.config.resolve_test_command(&request.repo_root) else {
            debug!("no test command configured or detected");
            return Ok(TestRun::skipped("no test command"));
        };

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&command).current_dir(&request.repo_root);
        let timeout = Duration::from_secs(self.config.test_timeout_secs);
        info!(command = %command, timeout_secs = timeout.as_secs(), "running tests");
        let output = run_command_with_timeout(cmd, None, timeout, self.config.output_limit_bytes)?;

        if output.timed_out {
            warn!(timeout_secs = timeout.as_secs(), "tests timed out");
            let mut log = output.combined_text();
            log.push_str(&format!("\n[tests timed out after {}s]", timeout.as_secs()));
            return Ok(TestRun { ok: false, log });
        }
        if output.command_not_found() {
            warn!(command = %command, "test command not found, treating tests as skipped");
            return Ok(TestRun::skipped("test command not found"));
        }
        let ok = output.success();
        debug!(ok, exit_code = ?output.status.code(), "tests finished");
        Ok(TestRun {
            ok,
            log: output.combined_text(),
        })
    }

    fn collect_changes(&self, git: &Git) -> Result<String, PipelineError> {
        let excluded = self.excluded_dirs();
        let mut changes = git.diff_head(&excluded)?;
        let untracked = git.untracked_files(&excluded)?;
        if !untracked.is_empty() {
            if !changes.is_empty() && !changes.ends_with('\n') {
                changes.push('\n');
            }
            changes.push_str("# untracked files\n");
            for path in untracked {
                changes.push_str(&format!("+++ {path}\n"));
            }
        }
        Ok(changes)
    }

    #[instrument(skip_all, fields(stage = %Stage::Review))]
    fn review(
        &self,
        request: &PipelineRequest,
        tests: &TestRun,
        diff: &str,
    ) -> Result<CriticVerdict, PipelineError> {
        if !request.use_agents || self.config.agents.critic_command.is_empty() {
            return Ok(CriticVerdict::ship());
        }
        let prompt = self.prompts.render_critic(&CriticInput {
            task_name: &request.task_name,
            story_context: &request.story_context,
            tests_ok: tests.ok,
            test_log: &tests.log,
            diff,
        })?;
        match self.run_agent(
            Stage::Review,
            &self.config.agents.critic_command,
            &prompt,
            request,
        ) {
            Ok(text) => {
                let verdict = CriticVerdict::parse(&text);
                debug!(decision = %verdict.decision, "critic verdict");
                Ok(verdict)
            }
            Err(err) => {
                warn!(err = %err, "critic failed, defaulting to SHIP");
                Ok(CriticVerdict::ship())
            }
        }
    }

    #[instrument(skip_all, fields(stage = %Stage::Commit))]
    fn commit(&self, git: &Git, task_name: &str) -> anyhow::Result<bool> {
        git.add_all()?;
        let committed = git.commit_staged(&format!("refactor: {task_name}"))?;
        info!(committed, "auto-commit finished");
        Ok(committed)
    }

    fn run_agent(
        &self,
        stage: Stage,
        argv: &[String],
        prompt: &str,
        request: &PipelineRequest,
    ) -> Result<String, PipelineError> {
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .env(MODEL_ENV, &self.config.models.planner)
            .current_dir(&request.repo_root);
        let timeout = Duration::from_secs(self.config.agents.timeout_secs);
        let output = self.run_stage(stage, cmd, Some(prompt.as_bytes()), timeout)?;
        if !output.success() {
            return Err(anyhow!(
                "{stage} command exited with status {:?}: {}",
                output.status.code(),
                output.stderr_text().trim()
            )
            .into());
        }
        Ok(output.stdout_text())
    }

    /// Run a stage command, mapping timeouts and missing programs to typed errors.
    fn run_stage(
        &self,
        stage: Stage,
        cmd: Command,
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<CommandOutput, PipelineError> {
        let program = cmd.get_program().to_string_lossy().into_owned();
        let output = run_command_with_timeout(cmd, stdin, timeout, self.config.output_limit_bytes)
            .map_err(|err| {
                if is_not_found(&err) {
                    PipelineError::CommandNotFound {
                        stage,
                        program: program.clone(),
                    }
                } else {
                    PipelineError::Other(err.context(format!("run {stage} command")))
                }
            })?;
        if output.timed_out {
            return Err(PipelineError::Timeout { stage, timeout });
        }
        if output.command_not_found() {
            return Err(PipelineError::CommandNotFound { stage, program });
        }
        Ok(output)
    }
}

impl Pipeline for CommandPipeline {
    #[instrument(skip_all, fields(task = %request.task_name, story_id = %request.story_id))]
    fn run_once(&self, request: &PipelineRequest) -> Result<PipelineResult, PipelineError> {
        let git = Git::new(&request.repo_root);

        let plan = self.plan(request, &git)?;
        self.code(request, &plan)?;
        let tests = self.test(request)?;

        let changes = self.collect_changes(&git)?;
        if changes.trim().is_empty() {
            info!(tests_ok = tests.ok, "coding tool made no changes");
            return Ok(PipelineResult::new(Decision::NoChanges, tests.ok));
        }

        let verdict = self.review(request, &tests, &changes)?;
        let mut result = PipelineResult {
            decision: verdict.decision,
            tests_ok: tests.ok,
            error: None,
            critic_reason: verdict.reason,
        };

        if request.auto_commit && result.is_success() {
            if let Err(err) = self.commit(&git, &request.task_name) {
                warn!(err = %format!("{err:#}"), "auto-commit failed");
                result.error = Some(format!("Commit failed: {err:#}"));
            }
        }
        info!(decision = %result.decision, tests_ok = result.tests_ok, "pipeline finished");
        Ok(result)
    }
}
