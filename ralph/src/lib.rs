//! Ralph: a story-driven refactor loop over a per-feature backlog.
//!
//! Stories are extracted from a feature's markdown spec into `prd.json`, then
//! attempted one at a time by an external code-generation pipeline until each
//! passes or exhausts its attempt cap. The architecture enforces a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (extraction, merge, selection,
//!   context budgeting, state transitions, summaries). No I/O.
//! - **[`io`]**: Side-effecting operations (backlog persistence, spec documents,
//!   git, subprocesses, prompts, the pipeline itself).
//!
//! Orchestration modules ([`generate`], [`select`], [`iteration`], [`looping`])
//! coordinate core logic with I/O to implement CLI commands.

pub mod backlog;
pub mod core;
pub mod exit_codes;
pub mod generate;
pub mod io;
pub mod iteration;
pub mod logging;
pub mod looping;
pub mod select;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
