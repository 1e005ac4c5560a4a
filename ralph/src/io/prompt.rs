//! Prompt templates for the coder, planner and critic.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

const CODER_TEMPLATE: &str = include_str!("prompts/coder.md");
const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const CRITIC_TEMPLATE: &str = include_str!("prompts/critic.md");

/// Repository files listed to the planner before the rest are elided.
pub const PLANNER_FILE_LIMIT: usize = 200;
/// Characters of test output (from the end) shown to the critic.
pub const CRITIC_TEST_LOG_CHARS: usize = 2000;
/// Characters of diff (from the start) shown to the critic.
pub const CRITIC_DIFF_CHARS: usize = 5000;

/// Inputs for the critic prompt.
#[derive(Debug, Clone, Copy)]
pub struct CriticInput<'a> {
    pub task_name: &'a str,
    pub story_context: &'a str,
    pub tests_ok: bool,
    pub test_log: &'a str,
    pub diff: &'a str,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("coder", CODER_TEMPLATE)
            .context("load coder template")?;
        env.add_template("planner", PLANNER_TEMPLATE)
            .context("load planner template")?;
        env.add_template("critic", CRITIC_TEMPLATE)
            .context("load critic template")?;
        Ok(Self { env })
    }

    /// Prompt for the coding tool; `plan` is optional planner guidance.
    pub fn render_coder(&self, task_name: &str, story_context: &str, plan: Option<&str>) -> Result<String> {
        let template = self.env.get_template("coder")?;
        let rendered = template.render(context! {
            task_name => task_name,
            story_context => story_context.trim(),
            plan => plan.map(str::trim).filter(|p| !p.is_empty()),
        })?;
        Ok(rendered)
    }

    pub fn render_planner(&self, story_context: &str, repo_files: &[String]) -> Result<String> {
        let shown = &repo_files[..repo_files.len().min(PLANNER_FILE_LIMIT)];
        let template = self.env.get_template("planner")?;
        let rendered = template.render(context! {
            story_context => story_context.trim(),
            repo_files => shown,
            repo_files_omitted => repo_files.len() - shown.len(),
        })?;
        Ok(rendered)
    }

    pub fn render_critic(&self, input: &CriticInput<'_>) -> Result<String> {
        let template = self.env.get_template("critic")?;
        let rendered = template.render(context! {
            task_name => input.task_name,
            story_context => input.story_context.trim(),
            tests_ok => input.tests_ok,
            test_log => tail_chars(input.test_log.trim(), CRITIC_TEST_LOG_CHARS),
            diff => head_chars(input.diff.trim_end(), CRITIC_DIFF_CHARS),
        })?;
        Ok(rendered)
    }
}

/// First `max` characters of `text`.
pub fn head_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Last `max` characters of `text`.
pub fn tail_chars(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    match text.char_indices().nth(count - max) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coder_prompt_includes_context_and_optional_plan() {
        let engine = PromptEngine::new().expect("engine");
        let without = engine
            .render_coder("demo-US1-x", "=== CURRENT USER STORY ===", None)
            .expect("render");
        assert!(without.contains("Task: demo-US1-x"));
        assert!(without.contains("=== CURRENT USER STORY ==="));
        assert!(!without.contains("## Plan"));

        let with = engine
            .render_coder("demo-US1-x", "ctx", Some("edit src/lib.rs"))
            .expect("render");
        assert!(with.contains("## Plan"));
        assert!(with.contains("edit src/lib.rs"));
    }

    #[test]
    fn planner_prompt_bounds_file_list() {
        let engine = PromptEngine::new().expect("engine");
        let files: Vec<String> = (0..PLANNER_FILE_LIMIT + 5)
            .map(|i| format!("src/f{i}.rs"))
            .collect();
        let rendered = engine.render_planner("ctx", &files).expect("render");
        assert!(rendered.contains("- src/f0.rs"));
        assert!(!rendered.contains(&format!("src/f{}.rs", PLANNER_FILE_LIMIT)));
        assert!(rendered.contains("5 more files omitted"));
        assert!(rendered.contains("aider_prompt"));
    }

    #[test]
    fn critic_prompt_bounds_log_and_diff() {
        let engine = PromptEngine::new().expect("engine");
        let log = format!("{}END", "x".repeat(5000));
        let diff = format!("START{}", "y".repeat(10_000));
        let rendered = engine
            .render_critic(&CriticInput {
                task_name: "t",
                story_context: "ctx",
                tests_ok: false,
                test_log: &log,
                diff: &diff,
            })
            .expect("render");
        assert!(rendered.contains("Tests failed."));
        assert!(rendered.contains("END"));
        assert!(rendered.contains("START"));
        assert!(rendered.len() < 8_500);
    }

    #[test]
    fn char_slicing_respects_boundaries() {
        assert_eq!(head_chars("héllo", 2), "hé");
        assert_eq!(tail_chars("héllo", 4), "éllo");
        assert_eq!(tail_chars("ab", 5), "ab");
    }
}
