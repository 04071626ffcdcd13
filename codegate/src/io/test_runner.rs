//! Test command adapter.
//!
//! The executor talks to a [`TestRunner`] so round-loop tests can script
//! pass/fail outcomes without spawning a real test suite.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument, warn};

use crate::io::process::run_command_with_timeout;

pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1_000_000;

#[derive(Debug, Clone)]
pub struct TestRequest {
    pub workdir: PathBuf,
    /// argv; the first element is the program.
    pub command: Vec<String>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// Result of one test command run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRun {
    pub passed: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

pub trait TestRunner {
    fn run(&self, request: &TestRequest) -> Result<TestRun>;
}

/// Runs the requested argv as a subprocess in the working tree.
pub struct CommandTestRunner;

impl TestRunner for CommandTestRunner {
    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs()))]
    fn run(&self, request: &TestRequest) -> Result<TestRun> {
        let (program, args) = request
            .command
            .split_first()
            .ok_or_else(|| anyhow!("test command is empty"))?;
        info!(command = %request.command.join(" "), "running tests");

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&request.workdir);
        let output = run_command_with_timeout(cmd, None, request.timeout, request.output_limit_bytes)
            .with_context(|| format!("run test command {program}"))?;

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "test command timed out");
        }
        Ok(TestRun {
            passed: output.success(),
            exit_code: output.status.code(),
            stdout: output.stdout_lossy(),
            stderr: output.stderr_lossy(),
            timed_out: output.timed_out,
        })
    }
}
