//! Pure parsing of feature spec documents into backlog content.
//!
//! Recognized markers:
//!
//! - `### User Story <n> - <title> (Priority: P<k>)` starts a story `US<n>`.
//! - `**Independent Test**:` and `**Acceptance Scenarios**:` split the story body.
//! - `- [ ] T001 [P] [US1] description` lines in `tasks.md` link tasks to stories.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::backlog::{Priority, SpecContext, SpecFiles};

/// Documents included in the context blob, in order, before any contracts.
pub const PRIMARY_DOCS: [&str; 5] = [
    "spec.md",
    "plan.md",
    "data-model.md",
    "research.md",
    "quickstart.md",
];

/// Directory whose markdown files are appended after the primary documents.
pub const CONTRACTS_DIR: &str = "contracts";

const DESCRIPTION_MAX_LINES: usize = 6;
const METADATA_KEYS: [&str; 4] = ["Feature Branch", "Created", "Status", "Input"];

static STORY_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^###\s+User Story\s+(\d+)\s*[-–—:]\s*(.+?)\s*\(\s*Priority:\s*P(\d+)\s*\)",
    )
    .expect("story header regex")
});

static SECTION_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\*\*(Independent Test|Acceptance Scenarios)\s*:?\s*\*\*\s*:?\s*(.*)$")
        .expect("section marker regex")
});

static NUMBERED_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+[.)]\s+(.+)$").expect("numbered item regex"));

static TASK_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[-*]\s*\[([ xX])\]\s*(T\d+)\b\s*(.*)$").expect("task line regex")
});

static TASK_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[([^\]]+)\]\s*").expect("task tag regex"));

static STORY_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^US\d+$").expect("story tag regex"));

/// Raw inputs read from a feature directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureDocs {
    pub spec: Option<String>,
    pub tasks: Option<String>,
    /// Context documents in inclusion order, keyed by relative path.
    pub context_files: Vec<(String, String)>,
}

/// Content fields of one story as extracted from `spec.md` and `tasks.md`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryContent {
    pub id: String,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub independent_test: String,
    pub acceptance_criteria: Vec<String>,
    pub tasks: Vec<String>,
}

/// One line of `tasks.md`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskItem {
    pub id: String,
    pub description: String,
    pub done: bool,
    pub parallel: bool,
    pub story_ids: Vec<String>,
}

/// Feature title and short description from the top of `spec.md`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureHeader {
    pub title: Option<String>,
    pub description: String,
}

/// Everything extracted for one feature.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub title: String,
    pub description: String,
    pub stories: Vec<StoryContent>,
    pub context: SpecContext,
}

/// Run every parser over `docs`.
pub fn extract_feature(feature_id: &str, docs: &FeatureDocs) -> Extraction {
    let spec = docs.spec.as_deref().unwrap_or_default();
    let header = parse_feature_header(spec);
    let mut stories = parse_user_stories(spec);

    if let Some(tasks_md) = docs.tasks.as_deref() {
        let by_story = index_tasks_by_story(&parse_tasks(tasks_md));
        for story in &mut stories {
            if let Some(task_ids) = by_story.get(&story.id) {
                story.tasks.clone_from(task_ids);
            }
        }
    }

    Extraction {
        title: header
            .title
            .unwrap_or_else(|| format!("Feature {feature_id}")),
        description: header.description,
        stories,
        context: build_spec_context(docs.context_files.iter().cloned()),
    }
}

/// Feature title (first `# ` heading) and the leading description lines.
pub fn parse_feature_header(spec: &str) -> FeatureHeader {
    let mut header = FeatureHeader::default();
    let mut lines = Vec::new();
    for line in spec.lines() {
        let trimmed = line.trim();
        if header.title.is_none()
            && let Some(title) = trimmed.strip_prefix("# ")
        {
            let title = strip_prefix_ignore_case(title.trim(), "Feature Specification:");
            header.title = Some(title.trim().to_string()).filter(|t| !t.is_empty());
            continue;
        }
        if trimmed.is_empty()
            || trimmed.starts_with('#')
            || trimmed == "---"
            || is_metadata_line(trimmed)
        {
            continue;
        }
        lines.push(trimmed);
        if lines.len() >= DESCRIPTION_MAX_LINES {
            break;
        }
    }
    header.description = lines.join(" ");
    header
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> &'a str {
    match text.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(prefix) => &text[prefix.len()..],
        _ => text,
    }
}

fn is_metadata_line(line: &str) -> bool {
    METADATA_KEYS
        .iter()
        .any(|key| line.starts_with(&format!("**{key}**")))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum StoryBlock {
    Description,
    IndependentTest,
    Acceptance,
}

struct StoryBuilder {
    id: String,
    title: String,
    priority: Priority,
    block: StoryBlock,
    description: Vec<String>,
    independent_test: Vec<String>,
    acceptance: Vec<String>,
}

impl StoryBuilder {
    fn new(number: &str, title: &str, priority: &str) -> Self {
        Self {
            id: format!("US{number}"),
            title: title.trim().to_string(),
            priority: Priority::new(format!("P{priority}")),
            block: StoryBlock::Description,
            description: Vec::new(),
            independent_test: Vec::new(),
            acceptance: Vec::new(),
        }
    }

    fn push_line(&mut self, line: &str) {
        let trimmed = line.trim();
        if let Some(caps) = SECTION_MARKER.captures(trimmed) {
            let rest = caps.get(2).map_or("", |m| m.as_str().trim());
            if &caps[1] == "Independent Test" {
                self.block = StoryBlock::IndependentTest;
                if !rest.is_empty() {
                    self.independent_test.push(rest.to_string());
                }
            } else {
                self.block = StoryBlock::Acceptance;
            }
            return;
        }

        match self.block {
            StoryBlock::Description => self.description.push(line.trim_end().to_string()),
            StoryBlock::IndependentTest => {
                if !trimmed.is_empty() {
                    self.independent_test.push(trimmed.to_string());
                }
            }
            StoryBlock::Acceptance => {
                if let Some(caps) = NUMBERED_ITEM.captures(trimmed) {
                    self.acceptance.push(clean_scenario(&caps[1]));
                } else if !trimmed.is_empty()
                    && let Some(last) = self.acceptance.last_mut()
                {
                    // Wrapped scenario line.
                    let joined = format!("{last} {trimmed}");
                    *last = clean_scenario(&joined);
                }
            }
        }
    }

    fn finish(self) -> StoryContent {
        StoryContent {
            id: self.id,
            title: self.title,
            description: self.description.join("\n").trim().to_string(),
            priority: self.priority,
            independent_test: self.independent_test.join(" "),
            acceptance_criteria: self.acceptance,
            tasks: Vec::new(),
        }
    }
}

fn clean_scenario(text: &str) -> String {
    text.replace("**", "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse every `### User Story` section of `spec.md`.
pub fn parse_user_stories(spec: &str) -> Vec<StoryContent> {
    let mut stories = Vec::new();
    let mut current: Option<StoryBuilder> = None;

    for line in spec.lines() {
        if let Some(caps) = STORY_HEADER.captures(line.trim_start()) {
            if let Some(done) = current.take() {
                stories.push(done.finish());
            }
            current = Some(StoryBuilder::new(&caps[1], &caps[2], &caps[3]));
            continue;
        }
        let trimmed = line.trim();
        if trimmed.starts_with('#') || trimmed == "---" {
            if let Some(done) = current.take() {
                stories.push(done.finish());
            }
            continue;
        }
        if let Some(builder) = current.as_mut() {
            builder.push_line(line);
        }
    }
    if let Some(done) = current {
        stories.push(done.finish());
    }
    stories
}

/// Parse checkbox task lines from `tasks.md`; other lines are ignored.
pub fn parse_tasks(tasks_md: &str) -> Vec<TaskItem> {
    tasks_md.lines().filter_map(parse_task_line).collect()
}

fn parse_task_line(line: &str) -> Option<TaskItem> {
    let caps = TASK_LINE.captures(line)?;
    let mut item = TaskItem {
        id: caps[2].to_string(),
        description: String::new(),
        done: !caps[1].trim().is_empty(),
        parallel: false,
        story_ids: Vec::new(),
    };

    let mut rest = caps.get(3).map_or("", |m| m.as_str());
    while let Some(tag) = TASK_TAG.captures(rest) {
        let label = tag[1].trim();
        if label == "P" {
            item.parallel = true;
        } else if STORY_TAG.is_match(label) && !item.story_ids.iter().any(|id| id == label) {
            item.story_ids.push(label.to_string());
        }
        rest = &rest[tag[0].len()..];
    }
    item.description = rest.trim().to_string();
    Some(item)
}

/// Task ids per story id, in file order and de-duplicated.
pub fn index_tasks_by_story(tasks: &[TaskItem]) -> BTreeMap<String, Vec<String>> {
    let mut index: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut seen: HashSet<(String, String)> = HashSet::new();
    for task in tasks {
        for story_id in &task.story_ids {
            if seen.insert((story_id.clone(), task.id.clone())) {
                index
                    .entry(story_id.clone())
                    .or_default()
                    .push(task.id.clone());
            }
        }
    }
    index
}

/// Inclusion rank for a context document path, or `None` when excluded.
pub fn context_rank(relative_path: &str) -> Option<(usize, String)> {
    if let Some(idx) = PRIMARY_DOCS.iter().position(|doc| *doc == relative_path) {
        return Some((idx, String::new()));
    }
    let is_contract = relative_path
        .strip_prefix(CONTRACTS_DIR)
        .is_some_and(|rest| rest.starts_with('/'))
        && relative_path.ends_with(".md");
    is_contract.then(|| (PRIMARY_DOCS.len(), relative_path.to_string()))
}

/// Order context documents, dropping paths that are not context documents.
pub fn order_context_files(files: Vec<(String, String)>) -> Vec<(String, String)> {
    let mut ranked: Vec<((usize, String), (String, String))> = files
        .into_iter()
        .filter_map(|(path, contents)| context_rank(&path).map(|rank| (rank, (path, contents))))
        .collect();
    ranked.sort_by(|a, b| a.0.cmp(&b.0));
    ranked.into_iter().map(|(_, entry)| entry).collect()
}

/// Build the context blob: an ordered file map plus `=== path ===` blocks.
pub fn build_spec_context(files: impl IntoIterator<Item = (String, String)>) -> SpecContext {
    let files: SpecFiles = files.into_iter().collect();
    let full_concatenation = files
        .iter()
        .map(|(path, contents)| format!("=== {path} ===\n{}", contents.trim_end()))
        .collect::<Vec<_>>()
        .join("\n\n");
    SpecContext {
        files,
        full_concatenation,
        ..SpecContext::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: &str = "\
# Feature Specification: Event Notifications

**Feature Branch**: `001-event-notifications`
**Created**: 2025-01-01

Users want to hear about events
as they happen.

## User Scenarios & Testing

### User Story 1 - Receive alerts (Priority: P1)

As a user I want alerts so that I react quickly.

**Why this priority**: core value.

**Independent Test**: Trigger an event
and observe the alert.

**Acceptance Scenarios**:

1. **Given** an event, **When** it fires,
   **Then** I am notified
2. **Given** muted alerts, **When** an event fires, **Then** nothing happens

---

### User Story 2 – Configure channels (Priority: P2) 🎯

Pick email or SMS.

**Acceptance Scenarios**:

1. Given settings, When I save, Then channels persist

## Requirements

- FR-001 something
";

    const TASKS: &str = "\
# Tasks

- [ ] T001 [P] [US1] Create alert model
- [x] T002 Setup project
- [X] T003 [US2] Channel settings form
- [ ] T004 [US1] [US2] Shared dispatcher
- [ ] T004 [US1] duplicate line
not a task
";

    #[test]
    fn parses_feature_header() {
        let header = parse_feature_header(SPEC);
        assert_eq!(header.title.as_deref(), Some("Event Notifications"));
        assert_eq!(
            header.description,
            "Users want to hear about events as they happen. \
             As a user I want alerts so that I react quickly. \
             **Why this priority**: core value. \
             **Independent Test**: Trigger an event and observe the alert."
        );
    }

    #[test]
    fn feature_description_skips_headings_between_lines() {
        let spec = "# Feature Specification: Demo\n\n## Summary\n\nFirst line.\n\n## Context\n\nSecond line.\n";
        let header = parse_feature_header(spec);
        assert_eq!(header.title.as_deref(), Some("Demo"));
        assert_eq!(header.description, "First line. Second line.");
    }

    #[test]
    fn parses_user_stories_with_sections() {
        let stories = parse_user_stories(SPEC);
        assert_eq!(stories.len(), 2);

        let us1 = &stories[0];
        assert_eq!(us1.id, "US1");
        assert_eq!(us1.title, "Receive alerts");
        assert_eq!(us1.priority, Priority::new("P1"));
        assert!(us1.description.starts_with("As a user I want alerts"));
        assert!(us1.description.contains("**Why this priority**"));
        assert_eq!(
            us1.independent_test,
            "Trigger an event and observe the alert."
        );
        assert_eq!(
            us1.acceptance_criteria,
            vec![
                "Given an event, When it fires, Then I am notified".to_string(),
                "Given muted alerts, When an event fires, Then nothing happens".to_string(),
            ]
        );

        let us2 = &stories[1];
        assert_eq!(us2.id, "US2");
        assert_eq!(us2.title, "Configure channels");
        assert_eq!(us2.priority, Priority::new("P2"));
        assert_eq!(us2.description, "Pick email or SMS.");
        assert_eq!(us2.acceptance_criteria.len(), 1);
    }

    #[test]
    fn parses_task_tags() {
        let tasks = parse_tasks(TASKS);
        assert_eq!(tasks.len(), 5);
        assert!(tasks[0].parallel);
        assert_eq!(tasks[0].story_ids, vec!["US1".to_string()]);
        assert_eq!(tasks[0].description, "Create alert model");
        assert!(tasks[1].done);
        assert!(tasks[1].story_ids.is_empty());
        assert_eq!(tasks[3].story_ids, vec!["US1".to_string(), "US2".to_string()]);
    }

    #[test]
    fn indexes_tasks_by_story_without_duplicates() {
        let index = index_tasks_by_story(&parse_tasks(TASKS));
        assert_eq!(index["US1"], vec!["T001".to_string(), "T004".to_string()]);
        assert_eq!(index["US2"], vec!["T003".to_string(), "T004".to_string()]);
    }

    #[test]
    fn orders_context_files_deterministically() {
        let files = vec![
            ("contracts/b.md".to_string(), "b".to_string()),
            ("plan.md".to_string(), "p".to_string()),
            ("notes.txt".to_string(), "ignored".to_string()),
            ("contracts/a.md".to_string(), "a".to_string()),
            ("spec.md".to_string(), "s".to_string()),
        ];
        let ordered: Vec<String> = order_context_files(files)
            .into_iter()
            .map(|(path, _)| path)
            .collect();
        assert_eq!(
            ordered,
            vec!["spec.md", "plan.md", "contracts/a.md", "contracts/b.md"]
        );
    }

    #[test]
    fn builds_concatenation_with_headers() {
        let ctx = build_spec_context(vec![
            ("spec.md".to_string(), "S\n".to_string()),
            ("plan.md".to_string(), "P".to_string()),
        ]);
        assert_eq!(ctx.full_concatenation, "=== spec.md ===\nS\n\n=== plan.md ===\nP");
        assert_eq!(ctx.files.get("plan.md"), Some("P"));
    }

    #[test]
    fn extract_feature_links_tasks_and_falls_back_title() {
        let docs = FeatureDocs {
            spec: Some(SPEC.to_string()),
            tasks: Some(TASKS.to_string()),
            context_files: vec![("spec.md".to_string(), SPEC.to_string())],
        };
        let extraction = extract_feature("001-event-notifications", &docs);
        assert_eq!(extraction.title, "Event Notifications");
        assert_eq!(extraction.stories[0].tasks, vec!["T001", "T004"]);
        assert_eq!(extraction.stories[1].tasks, vec!["T003", "T004"]);

        let empty = extract_feature("002-x", &FeatureDocs::default());
        assert_eq!(empty.title, "Feature 002-x");
        assert!(empty.stories.is_empty());
    }
}
