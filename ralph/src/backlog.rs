//! Backlog data model for `specs/<feature>/prd.json`.
//!
//! The backlog mixes two independently owned kinds of fields:
//!
//! - **Content** (`title`, `description`, `priority`, `independent_test`,
//!   `acceptance_criteria`, `tasks`): re-derived from the spec documents on
//!   every `ralph generate`.
//! - **Runtime** (`status`, `attempts`, `last_error`, `last_updated_at`,
//!   `max_attempts`): owned by the loop and never touched by extraction.
//!
//! Keys this crate does not model are kept in `extra` maps so that a
//! load/save cycle never drops data written by other tools.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Priority rank used when a priority label is not of the form `P<n>`.
pub const UNRANKED_PRIORITY: u32 = 99;
/// Id rank used when a story id carries no number.
pub const UNNUMBERED_ID: u32 = 9999;

/// Lifecycle status of a story.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    #[default]
    Todo,
    InProgress,
    Fail,
    Pass,
}

impl StoryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StoryStatus::Todo => "todo",
            StoryStatus::InProgress => "in_progress",
            StoryStatus::Fail => "fail",
            StoryStatus::Pass => "pass",
        }
    }

    /// Scheduling rank: fresh work first, then retries, then passed stories.
    pub fn rank(self) -> u8 {
        match self {
            StoryStatus::Todo => 0,
            StoryStatus::InProgress => 1,
            StoryStatus::Fail => 2,
            StoryStatus::Pass => 3,
        }
    }
}

impl fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority label such as `P1`. Lower number means higher priority.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(String);

impl Priority {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric rank (`P3` -> 3); anything unrecognized ranks last.
    pub fn rank(&self) -> u32 {
        self.0
            .trim()
            .strip_prefix(['P', 'p'])
            .and_then(|digits| digits.parse().ok())
            .unwrap_or(UNRANKED_PRIORITY)
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self("P9".to_string())
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub independent_test: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub tasks: Vec<String>,

    #[serde(default)]
    pub status: StoryStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_updated_at: Option<String>,
    #[serde(default)]
    pub max_attempts: Option<u32>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Story {
    /// Create a story with content defaults and fresh runtime state.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            priority: Priority::default(),
            independent_test: String::new(),
            acceptance_criteria: Vec::new(),
            tasks: Vec::new(),
            status: StoryStatus::Todo,
            attempts: 0,
            last_error: None,
            last_updated_at: None,
            max_attempts: None,
            extra: Map::new(),
        }
    }

    /// Number embedded in the id (`US12` -> 12), used as an ordering key.
    pub fn id_number(&self) -> u32 {
        id_number(&self.id)
    }
}

/// First run of ASCII digits in `id`, or [`UNNUMBERED_ID`].
pub fn id_number(id: &str) -> u32 {
    let digits: String = id
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().unwrap_or(UNNUMBERED_ID)
}

/// Ordered mapping of relative spec path to file contents.
///
/// Serialized as a JSON object whose key order follows insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecFiles(Vec<(String, String)>);

impl SpecFiles {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Insert or replace `path`, keeping the original position on replace.
    pub fn insert(&mut self, path: impl Into<String>, contents: impl Into<String>) {
        let path = path.into();
        let contents = contents.into();
        match self.0.iter_mut().find(|(existing, _)| *existing == path) {
            Some(entry) => entry.1 = contents,
            None => self.0.push((path, contents)),
        }
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(existing, _)| existing == path)
            .map(|(_, contents)| contents.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(path, contents)| (path.as_str(), contents.as_str()))
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(path, _)| path.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for SpecFiles {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut files = SpecFiles::new();
        for (path, contents) in iter {
            files.insert(path, contents);
        }
        files
    }
}

impl Serialize for SpecFiles {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (path, contents) in &self.0 {
            map.serialize_entry(path, contents)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for SpecFiles {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SpecFilesVisitor;

        impl<'de> Visitor<'de> for SpecFilesVisitor {
            type Value = SpecFiles;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of relative path to file contents")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<SpecFiles, A::Error> {
                let mut files = SpecFiles::new();
                while let Some((path, contents)) = access.next_entry::<String, String>()? {
                    files.insert(path, contents);
                }
                Ok(files)
            }
        }

        deserializer.deserialize_map(SpecFilesVisitor)
    }
}

/// Specification context captured at extraction time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecContext {
    #[serde(default)]
    pub files: SpecFiles,
    #[serde(default)]
    pub full_concatenation: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Loop bookkeeping stored alongside the stories.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RalphMetadata {
    #[serde(default)]
    pub last_run_at: Option<String>,
    #[serde(default)]
    pub last_run_mode: Option<String>,
    #[serde(default)]
    pub total_iterations: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The persisted unit for one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backlog {
    #[serde(default)]
    pub feature_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub context: SpecContext,
    pub stories: Vec<Story>,
    #[serde(default)]
    pub ralph_metadata: RalphMetadata,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Backlog {
    /// Empty backlog for `feature_id`.
    pub fn new(feature_id: impl Into<String>) -> Self {
        Self {
            feature_id: feature_id.into(),
            title: String::new(),
            description: String::new(),
            context: SpecContext::default(),
            stories: Vec::new(),
            ralph_metadata: RalphMetadata::default(),
            extra: Map::new(),
        }
    }

    pub fn story(&self, id: &str) -> Option<&Story> {
        self.stories.iter().find(|story| story.id == id)
    }

    pub fn story_mut(&mut self, id: &str) -> Option<&mut Story> {
        self.stories.iter_mut().find(|story| story.id == id)
    }
}
