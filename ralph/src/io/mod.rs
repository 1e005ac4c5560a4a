//! I/O helpers for ralph commands.

pub mod backlog_store;
pub mod config;
pub mod git;
pub mod iteration_log;
pub mod pipeline;
pub mod process;
pub mod prompt;
pub mod spec_docs;
