//! Side-effecting operations: subprocesses, git, config, search and patching.

pub mod config;
pub mod git;
pub mod patch;
pub mod process;
pub mod prompt;
pub mod search;
pub mod suggest;
pub mod test_runner;
