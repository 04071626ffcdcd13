//! Stable exit codes for codegate CLI commands.

/// Command succeeded or the episode solved its task.
pub const OK: i32 = 0;
/// Command failed due to invalid config, input files or other errors.
pub const INVALID: i32 = 1;
/// `codegate run` finished without solving the task.
pub const UNSOLVED: i32 = 2;
