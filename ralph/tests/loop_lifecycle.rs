//! Loop-level lifecycle tests.
//!
//! These tests generate a backlog from spec documents and drive `run_feature`
//! through several iterations with a scripted pipeline to verify selection
//! order, retries, persisted state, iteration logs and loop termination.

use std::fs;
use std::time::Duration;

use ralph::backlog::StoryStatus;
use ralph::core::summary::LoopStop;
use ralph::core::types::{Decision, PipelineResult};
use ralph::generate::generate_backlog;
use ralph::io::backlog_store::{BacklogStore, FeaturePaths};
use ralph::io::pipeline::{PipelineError, Stage};
use ralph::iteration::IterationSettings;
use ralph::looping::{LoopMode, LoopOptions, run_feature};
use ralph::test_support::{ScriptedPipeline, write_feature_fixture};

fn options(root: &std::path::Path, mode: LoopMode) -> LoopOptions {
    let mut iteration = IterationSettings::new(root, "ollama/qwen2.5-coder:14b");
    iteration.max_attempts = Some(3);
    LoopOptions {
        mode,
        max_iterations: None,
        target_id: None,
        force: false,
        pacing: Duration::ZERO,
        iteration,
    }
}

/// Full lifecycle: generate, retry US1 once, pass both stories, stop.
///
/// Execution sequence:
/// 1. Iter 1: US1 → REVISE (attempts=1, in_progress)
/// 2. Iter 2: US2 (todo outranks in_progress) → SHIP + tests ok (pass)
/// 3. Iter 3: US1 → SHIP + tests ok (pass)
/// 4. Scheduler returns nothing → all passed
#[test]
fn full_lifecycle_passes_all_stories_with_retry() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    let paths = FeaturePaths::new(root, "specs", "001-demo");
    write_feature_fixture(&paths.feature_dir).expect("fixture");
    generate_backlog(&paths).expect("generate");

    let pipeline = ScriptedPipeline::new(vec![
        Ok(PipelineResult::new(Decision::Revise, true).with_critic_reason("missing edge case")),
        Ok(PipelineResult::new(Decision::Ship, true)),
        Ok(PipelineResult::new(Decision::Ship, true)),
    ]);
    let store = BacklogStore::new(&paths.backlog_path);

    let mut seen = Vec::new();
    let summary = run_feature(
        &store,
        "001-demo",
        &pipeline,
        &options(root, LoopMode::Loop),
        |result| seen.push((result.story_id.clone(), result.status)),
    );

    assert_eq!(
        seen,
        vec![
            ("US1".to_string(), StoryStatus::InProgress),
            ("US2".to_string(), StoryStatus::Pass),
            ("US1".to_string(), StoryStatus::Pass),
        ]
    );
    assert_eq!(summary.stop, Some(LoopStop::AllPassed));
    assert_eq!(summary.iterations, 3);
    assert!(!summary.is_failure());

    let backlog = store.load().expect("reload");
    assert_eq!(backlog.ralph_metadata.total_iterations, 3);
    assert_eq!(backlog.ralph_metadata.last_run_mode.as_deref(), Some("loop"));
    let us1 = backlog.story("US1").expect("US1");
    assert_eq!(us1.attempts, 2);
    assert!(us1.last_error.is_none());
    assert_eq!(us1.tasks, vec!["T001", "T002"]);

    let requests = pipeline.requests();
    assert!(requests[0].story_context.contains("Linked Implementation Tasks: T001, T002"));
    assert!(requests[0].story_context.contains("=== FULL SPECIFICATION CONTEXT ==="));

    let meta = fs::read_to_string(root.join(".ralph/iterations/001-demo/1/meta.json"))
        .expect("iteration 1 meta");
    assert!(meta.contains("\"REVISE\""));
    assert!(root.join(".ralph/iterations/001-demo/3/context.md").is_file());

    // A later run finds nothing to do and keeps the cumulative counter.
    let idle = ScriptedPipeline::new(Vec::new());
    let summary = run_feature(&store, "001-demo", &idle, &options(root, LoopMode::Once), |_| {});
    assert_eq!(summary.stop, Some(LoopStop::AllPassed));
    assert_eq!(summary.iterations, 0);
    assert_eq!(
        store.load().expect("reload").ralph_metadata.total_iterations,
        3
    );
}

/// Timeouts exhaust US1's cap while the loop keeps serving US2; the run is
/// reported as a failure.
///
/// Execution sequence:
/// 1. US1 → timeout (attempts=1)
/// 2. US2 → SHIP, tests failed (attempts=1)
/// 3. US1 → timeout (attempts=2, P1 wins among in_progress)
/// 4. US1 → timeout (attempts=3, fail)
/// 5. US2 → SHIP + tests ok (pass)
#[test]
fn failing_story_does_not_abort_loop() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    let paths = FeaturePaths::new(root, "specs", "001-demo");
    write_feature_fixture(&paths.feature_dir).expect("fixture");
    generate_backlog(&paths).expect("generate");

    let timeout = || {
        Err(PipelineError::Timeout {
            stage: Stage::Code,
            timeout: Duration::from_secs(300),
        })
    };
    let pipeline = ScriptedPipeline::new(vec![
        timeout(),
        Ok(PipelineResult::new(Decision::Ship, false)),
        timeout(),
        timeout(),
        Ok(PipelineResult::new(Decision::Ship, true)),
    ]);
    let store = BacklogStore::new(&paths.backlog_path);

    let mut timed_out = 0;
    let summary = run_feature(
        &store,
        "001-demo",
        &pipeline,
        &options(root, LoopMode::Loop),
        |result| timed_out += usize::from(result.timed_out),
    );

    assert_eq!(timed_out, 3);
    assert_eq!(summary.iterations, 5);
    assert_eq!(summary.stop, Some(LoopStop::NoEligible));
    assert_eq!(summary.counts.fail, 1);
    assert_eq!(summary.counts.pass, 1);
    assert!(summary.is_failure());

    let backlog = store.load().expect("reload");
    let us1 = backlog.story("US1").expect("US1");
    assert_eq!(us1.status, StoryStatus::Fail);
    assert_eq!(us1.attempts, 3);
    assert_eq!(
        us1.last_error.as_deref(),
        Some("Timeout: code stage exceeded 300s")
    );
}
