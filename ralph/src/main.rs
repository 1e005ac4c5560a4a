//! Story-driven refactor loop.
//!
//! `ralph generate` turns a feature's spec documents into
//! `<specs_dir>/<feature>/prd.json`; `ralph run` attempts stories from it
//! through the coding pipeline; `ralph select` prints the story the
//! scheduler would pick next.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ralph::core::selector::SelectCriteria;
use ralph::core::summary::RunSummary;
use ralph::exit_codes;
use ralph::generate::generate_backlog;
use ralph::io::backlog_store::{BacklogStore, FeaturePaths};
use ralph::io::config::{CONFIG_FILE, RalphConfig, load_config};
use ralph::io::git::Git;
use ralph::io::pipeline::CommandPipeline;
use ralph::iteration::IterationSettings;
use ralph::logging;
use ralph::looping::{LoopMode, LoopOptions, run_feature};
use ralph::select::{SelectOutcome, select_from_store};

#[derive(Parser)]
#[command(name = "ralph", version, about = "Story-driven refactor loop")]
struct Cli {
    /// Debug logging for ralph (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct FeatureArgs {
    /// Feature directory name under the specs dir (e.g. `001-notifications`).
    #[arg(long)]
    feature_id: String,
    /// Repository root; defaults to the enclosing git repository.
    #[arg(long)]
    repo_root: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    feature: FeatureArgs,
    #[arg(long, value_enum, default_value_t = LoopMode::Once)]
    mode: LoopMode,
    /// Stop after this many iterations (loop mode only).
    #[arg(long)]
    max_iterations: Option<u32>,
    /// Override the configured attempt cap (0 = uncapped).
    #[arg(long)]
    max_attempts_per_story: Option<u32>,
    /// Attempt this story only (once mode only).
    #[arg(long)]
    story_id: Option<String>,
    /// Allow selecting stories that already passed.
    #[arg(long)]
    force: bool,
    /// Commit changes after a successful iteration.
    #[arg(long)]
    auto_commit: bool,
    /// Skip the test stage.
    #[arg(long)]
    no_tests: bool,
    /// Skip the planner and critic.
    #[arg(long)]
    no_agents: bool,
    /// Literal coder prompt; bypasses planning.
    #[arg(long)]
    prompt: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Attempt stories from the backlog.
    Run(RunArgs),
    /// Extract stories from spec documents and merge them into the backlog.
    Generate {
        #[command(flatten)]
        feature: FeatureArgs,
    },
    /// Print the id of the story the scheduler would pick next.
    Select {
        #[command(flatten)]
        feature: FeatureArgs,
        #[arg(long)]
        max_attempts_per_story: Option<u32>,
        #[arg(long)]
        story_id: Option<String>,
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let code = match cli.command {
        Command::Run(args) => cmd_run(args),
        Command::Generate { feature } => report(cmd_generate(&feature)),
        Command::Select {
            feature,
            max_attempts_per_story,
            story_id,
            force,
        } => report(cmd_select(
            &feature,
            max_attempts_per_story,
            story_id.as_deref(),
            force,
        )),
    };
    std::process::exit(code);
}

fn report(result: Result<i32>) -> i32 {
    result.unwrap_or_else(|err| {
        eprintln!("error: {err:#}");
        exit_codes::FAILURE
    })
}

/// Repository root and config for a feature command.
fn prepare(feature: &FeatureArgs) -> Result<(PathBuf, RalphConfig)> {
    let root = match &feature.repo_root {
        Some(root) => root.clone(),
        None => {
            let cwd = env::current_dir().context("read current directory")?;
            Git::new(cwd)
                .toplevel()
                .context("resolve repository root (pass --repo-root)")?
        }
    };
    let config = load_config(&root.join(CONFIG_FILE))?;
    Ok((root, config))
}

/// CLI cap wins over config; zero means uncapped either way.
fn attempt_cap(cli: Option<u32>, config: &RalphConfig) -> Option<u32> {
    match cli {
        Some(cap) => Some(cap).filter(|cap| *cap > 0),
        None => config.attempt_cap(),
    }
}

fn cmd_run(args: RunArgs) -> i32 {
    if args.story_id.is_some() && args.mode == LoopMode::Loop {
        eprintln!("error: --story-id is only valid with --mode once");
        return exit_codes::FAILURE;
    }
    let feature_id = args.feature.feature_id.clone();

    let prepared = prepare(&args.feature).and_then(|(root, config)| {
        let pipeline = CommandPipeline::new(config.clone())?;
        Ok((root, config, pipeline))
    });
    let (root, config, pipeline) = match prepared {
        Ok(prepared) => prepared,
        Err(err) => {
            eprintln!("error: {err:#}");
            print!("{}", RunSummary::init_failed(&feature_id, format!("{err:#}")));
            return exit_codes::FAILURE;
        }
    };

    let iteration = IterationSettings {
        budget: config.budget_policy(),
        max_attempts: attempt_cap(args.max_attempts_per_story, &config),
        use_agents: !args.no_agents,
        auto_commit: args.auto_commit,
        skip_tests: args.no_tests,
        prompt: args.prompt,
        ..IterationSettings::new(&root, &config.models.coder)
    };
    let options = LoopOptions {
        mode: args.mode,
        max_iterations: args.max_iterations,
        target_id: args.story_id,
        force: args.force,
        pacing: config.pacing(),
        iteration,
    };
    let paths = FeaturePaths::new(&root, &config.specs_dir, &feature_id);
    let store = BacklogStore::new(&paths.backlog_path);

    let summary = run_feature(&store, &feature_id, &pipeline, &options, |result| {
        println!("{result}");
    });
    if let Some(error) = &summary.error {
        eprintln!("error: {error}");
    }
    print!("{summary}");
    if summary.is_failure() {
        exit_codes::FAILURE
    } else {
        exit_codes::OK
    }
}

fn cmd_generate(feature: &FeatureArgs) -> Result<i32> {
    let (root, config) = prepare(feature)?;
    let paths = FeaturePaths::new(&root, &config.specs_dir, &feature.feature_id);
    let outcome = generate_backlog(&paths)?;
    println!(
        "Generated {} stories ({} added, {} updated, {} retained) from {} context files -> {}",
        outcome.story_count,
        outcome.report.added.len(),
        outcome.report.updated.len(),
        outcome.report.retained.len(),
        outcome.context_files,
        outcome.backlog_path.display()
    );
    Ok(exit_codes::OK)
}

fn cmd_select(
    feature: &FeatureArgs,
    max_attempts_per_story: Option<u32>,
    story_id: Option<&str>,
    force: bool,
) -> Result<i32> {
    let (root, config) = prepare(feature)?;
    let paths = FeaturePaths::new(&root, &config.specs_dir, &feature.feature_id);
    let criteria = SelectCriteria {
        max_attempts: attempt_cap(max_attempts_per_story, &config),
        target_id: story_id,
        force,
    };
    let code = match select_from_store(&BacklogStore::new(&paths.backlog_path), &criteria)? {
        SelectOutcome::Selected(story) => {
            println!("{}", story.id);
            exit_codes::OK
        }
        SelectOutcome::NoneEligible => {
            eprintln!("no eligible story");
            exit_codes::NONE_ELIGIBLE
        }
        SelectOutcome::TargetIneligible { id, reason } => {
            eprintln!("story {id} is not eligible: {reason:?}");
            exit_codes::NONE_ELIGIBLE
        }
        SelectOutcome::TargetMissing(id) => {
            eprintln!("error: story {id} not found");
            exit_codes::FAILURE
        }
    };
    Ok(code)
}
