//! Deterministic, pure logic shared by the loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod context;
pub mod extract;
pub mod lenient_json;
pub mod merge;
pub mod selector;
pub mod state_update;
pub mod summary;
pub mod types;
