//! Shared deterministic types for the iteration state machine.
//!
//! These types define the contract between the iteration executor and the
//! one-shot pipeline. They carry no I/O and serialize stably.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backlog::StoryStatus;
use crate::core::lenient_json::parse_lenient;

/// Pipeline verdict on one iteration's changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Ship,
    Revise,
    NoChanges,
    Error,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Ship => "SHIP",
            Decision::Revise => "REVISE",
            Decision::NoChanges => "NO_CHANGES",
            Decision::Error => "ERROR",
        }
    }

    /// Parse a verdict keyword, tolerating case, spaces and dashes.
    pub fn from_keyword(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "SHIP" => Some(Decision::Ship),
            "REVISE" => Some(Decision::Revise),
            "NO_CHANGES" => Some(Decision::NoChanges),
            "ERROR" => Some(Decision::Error),
            _ => None,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result record returned by the one-shot pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub decision: Decision,
    #[serde(default)]
    pub tests_ok: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub critic_reason: Option<String>,
}

impl PipelineResult {
    pub fn new(decision: Decision, tests_ok: bool) -> Self {
        Self {
            decision,
            tests_ok,
            error: None,
            critic_reason: None,
        }
    }

    /// Synthetic `ERROR` result used when the pipeline itself failed.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            decision: Decision::Error,
            tests_ok: false,
            error: Some(message.into()),
            critic_reason: None,
        }
    }

    pub fn with_critic_reason(mut self, reason: impl Into<String>) -> Self {
        self.critic_reason = Some(reason.into());
        self
    }

    /// True when the story should be marked `pass`.
    pub fn is_success(&self) -> bool {
        self.decision == Decision::Ship && self.tests_ok
    }
}

/// Reviewer verdict on a diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CriticVerdict {
    pub decision: Decision,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
struct RawVerdict {
    decision: String,
    #[serde(default)]
    reason: Option<String>,
}

impl CriticVerdict {
    pub fn ship() -> Self {
        Self {
            decision: Decision::Ship,
            reason: None,
        }
    }

    /// Parse reviewer output leniently.
    ///
    /// Accepts `{"decision", "reason"}` JSON (fenced or embedded), or text whose
    /// first line names a verdict. Anything else is `REVISE` with the text as reason.
    pub fn parse(text: &str) -> Self {
        if let Some(raw) = parse_lenient::<RawVerdict>(text)
            && let Some(decision) = Decision::from_keyword(&raw.decision)
        {
            return Self {
                decision,
                reason: non_empty(raw.reason.as_deref()),
            };
        }

        let trimmed = text.trim();
        let (first, rest) = trimmed.split_once('\n').unwrap_or((trimmed, ""));
        let upper = first.to_ascii_uppercase();
        let keywords = [
            ("NO_CHANGES", Decision::NoChanges),
            ("REVISE", Decision::Revise),
            ("SHIP", Decision::Ship),
        ];
        for (keyword, decision) in keywords {
            if let Some(pos) = find_word(&upper, keyword) {
                let inline = first[pos + keyword.len()..].trim_start_matches([':', '-', ' ', '*']);
                let reason = non_empty(Some(rest)).or_else(|| non_empty(Some(inline)));
                return Self { decision, reason };
            }
        }

        Self {
            decision: Decision::Revise,
            reason: non_empty(Some(trimmed)),
        }
    }
}

/// Byte offset of `word` in `haystack` where it is not part of a longer identifier.
fn find_word(haystack: &str, word: &str) -> Option<usize> {
    let is_ident = |c: char| c.is_ascii_alphanumeric() || c == '_';
    haystack.match_indices(word).map(|(pos, _)| pos).find(|&pos| {
        let before = haystack[..pos].chars().next_back();
        let after = haystack[pos + word.len()..].chars().next();
        !before.is_some_and(is_ident) && !after.is_some_and(is_ident)
    })
}

fn non_empty(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Outcome of one iteration, as reported to the loop driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IterationResult {
    pub story_id: String,
    pub attempt: u32,
    pub decision: Decision,
    pub tests_ok: bool,
    pub error: Option<String>,
    pub critic_reason: Option<String>,
    /// True when the pipeline hit its hard wall-clock ceiling.
    pub timed_out: bool,
    /// Story status after the post-execution transition.
    pub status: StoryStatus,
}

impl fmt::Display for IterationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] attempt {}: {} (tests {}) -> {}",
            self.story_id,
            self.attempt,
            self.decision,
            if self.tests_ok { "ok" } else { "failed" },
            self.status
        )?;
        if self.timed_out {
            f.write_str(" [timed out]")?;
        }
        if let Some(error) = &self.error {
            write!(f, ": {error}")?;
        } else if let Some(reason) = &self.critic_reason {
            write!(f, ": {reason}")?;
        }
        Ok(())
    }
}
