//! Loop configuration stored in `.ai-refactor.toml` at the repository root.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::budget::{BudgetPolicy, CharRatioEstimator, ModelLimits};

/// Config file name, relative to the repository root.
pub const CONFIG_FILE: &str = ".ai-refactor.toml";

/// Loop configuration (TOML).
///
/// Every field is optional in the file; missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RalphConfig {
    /// Directory holding `<feature_id>/` spec folders.
    pub specs_dir: String,
    /// Shell test command. `None` means auto-detect from project files.
    pub tests: Option<String>,
    /// Global attempt cap per story; 0 means uncapped.
    pub max_attempts_per_story: u32,
    /// Sleep between loop iterations.
    pub pacing_ms: u64,
    pub test_timeout_secs: u64,
    /// Captured stdout/stderr bound per subprocess.
    pub output_limit_bytes: usize,
    pub models: ModelsConfig,
    pub context: ContextConfig,
    pub coder: CoderConfig,
    pub agents: AgentsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelsConfig {
    pub coder: String,
    pub planner: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContextConfig {
    pub reserve_tokens: usize,
    pub chars_per_token: usize,
    pub min_available_tokens: usize,
    /// Per-model context limits merged over the built-in table.
    pub limits: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CoderConfig {
    /// Coding tool argv prefix.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct AgentsConfig {
    /// Planner command: prompt on stdin, answer on stdout. Empty disables planning.
    pub planner_command: Vec<String>,
    /// Critic command: prompt on stdin, verdict on stdout. Empty disables review.
    pub critic_command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            coder: "ollama/qwen2.5-coder:14b".to_string(),
            planner: "ollama/llama3.1:8b".to_string(),
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            reserve_tokens: 2000,
            chars_per_token: 3,
            min_available_tokens: 500,
            limits: BTreeMap::new(),
        }
    }
}

impl Default for CoderConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "aider".to_string(),
                "--no-auto-commits".to_string(),
                "--yes-always".to_string(),
            ],
            timeout_secs: 5 * 60,
        }
    }
}

impl Default for RalphConfig {
    fn default() -> Self {
        Self {
            specs_dir: "specs".to_string(),
            tests: None,
            max_attempts_per_story: 3,
            pacing_ms: 1000,
            test_timeout_secs: 30 * 60,
            output_limit_bytes: 100_000,
            models: ModelsConfig::default(),
            context: ContextConfig::default(),
            coder: CoderConfig::default(),
            agents: AgentsConfig {
                timeout_secs: 5 * 60,
                ..AgentsConfig::default()
            },
        }
    }
}

impl RalphConfig {
    pub fn validate(&self) -> Result<()> {
        if self.specs_dir.trim().is_empty() {
            return Err(anyhow!("specs_dir must be non-empty"));
        }
        if self.test_timeout_secs == 0 {
            return Err(anyhow!("test_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.coder.timeout_secs == 0 {
            return Err(anyhow!("coder.timeout_secs must be > 0"));
        }
        if self.agents.timeout_secs == 0 {
            return Err(anyhow!("agents.timeout_secs must be > 0"));
        }
        if self.context.chars_per_token == 0 {
            return Err(anyhow!("context.chars_per_token must be > 0"));
        }
        if self.coder.command.is_empty() || self.coder.command[0].trim().is_empty() {
            return Err(anyhow!("coder.command must be a non-empty array"));
        }
        for (name, command) in [
            ("agents.planner_command", &self.agents.planner_command),
            ("agents.critic_command", &self.agents.critic_command),
        ] {
            if command.first().is_some_and(|program| program.trim().is_empty()) {
                return Err(anyhow!("{name} must not start with an empty program"));
            }
        }
        Ok(())
    }

    /// Attempt cap as an option; 0 is uncapped.
    pub fn attempt_cap(&self) -> Option<u32> {
        Some(self.max_attempts_per_story).filter(|cap| *cap > 0)
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    /// Budget policy derived from the `[context]` section.
    pub fn budget_policy(&self) -> BudgetPolicy<CharRatioEstimator> {
        BudgetPolicy {
            limits: ModelLimits::builtin().with_overrides(&self.context.limits),
            estimator: CharRatioEstimator::new(self.context.chars_per_token),
            reserve_tokens: self.context.reserve_tokens,
            min_available_tokens: self.context.min_available_tokens,
        }
    }

    /// Configured test command, or one detected from files in `root`.
    pub fn resolve_test_command(&self, root: &Path) -> Option<String> {
        match self.tests.as_deref().map(str::trim) {
            Some("") => None,
            Some(command) => Some(command.to_string()),
            None => detect_test_command(root),
        }
    }
}

/// Guess the test command from well-known project files.
pub fn detect_test_command(root: &Path) -> Option<String> {
    let candidates: [(&[&str], &str); 4] = [
        (&["Cargo.toml"], "cargo test"),
        (&["pyproject.toml", "pytest.ini"], "pytest"),
        (&["setup.py"], "python -m unittest"),
        (&["package.json"], "npm test"),
    ];
    candidates
        .iter()
        .find(|(markers, _)| markers.iter().any(|marker| root.join(marker).is_file()))
        .map(|(_, command)| (*command).to_string())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RalphConfig::default()`.
pub fn load_config(path: &Path) -> Result<RalphConfig> {
    if !path.exists() {
        let cfg = RalphConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RalphConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}
