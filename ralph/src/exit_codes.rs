//! Stable exit codes for ralph CLI commands.

/// Command succeeded, or `ralph select` selected a story.
pub const OK: i32 = 0;
/// Initialization failed, a story ended in `fail`, or invalid arguments.
pub const FAILURE: i32 = 1;
/// `ralph select` found no eligible story.
pub const NONE_ELIGIBLE: i32 = 2;
