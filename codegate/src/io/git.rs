//! Git adapter for the patch engine.
//!
//! Patches are streamed to `git apply` on stdin so no patch file ever lands in
//! the working tree. Every call runs under the configured git timeout.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument};

use crate::io::process::{CommandOutput, run_command_with_timeout};

const GIT_OUTPUT_LIMIT_BYTES: usize = 64 * 1024;

/// Outcome of one `git apply` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub applied: bool,
    pub stderr: String,
}

impl ApplyOutcome {
    fn from_output(output: &CommandOutput) -> Self {
        let mut stderr = output.stderr_lossy();
        if output.timed_out {
            stderr.push_str("\ngit apply timed out");
        }
        Self {
            applied: output.success(),
            stderr,
        }
    }
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    timeout: Duration,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            workdir: workdir.into(),
            timeout,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// `git apply --check`: would the patch apply cleanly?
    #[instrument(skip_all)]
    pub fn apply_check(&self, patch: &str) -> Result<ApplyOutcome> {
        self.apply_with(&["apply", "--check", "-"], patch)
    }

    #[instrument(skip_all)]
    pub fn apply(&self, patch: &str) -> Result<ApplyOutcome> {
        self.apply_with(&["apply", "-"], patch)
    }

    /// `git apply --3way`, falling back to a merge against the index blobs.
    #[instrument(skip_all)]
    pub fn apply_three_way(&self, patch: &str) -> Result<ApplyOutcome> {
        self.apply_with(&["apply", "--3way", "-"], patch)
    }

    /// Initialize a repository with a fixed identity (used for scratch trees).
    pub fn init(&self) -> Result<()> {
        self.run_checked(&["init", "-q"])?;
        self.run_checked(&["config", "user.email", "codegate@localhost"])?;
        self.run_checked(&["config", "user.name", "codegate"])?;
        Ok(())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    pub fn commit(&self, message: &str) -> Result<()> {
        debug!("committing staged changes");
        self.run_checked(&["commit", "-q", "-m", message])?;
        Ok(())
    }

    fn apply_with(&self, args: &[&str], patch: &str) -> Result<ApplyOutcome> {
        let output = self.run(args, Some(patch.as_bytes()))?;
        let outcome = ApplyOutcome::from_output(&output);
        debug!(args = %args.join(" "), applied = outcome.applied, "git apply finished");
        Ok(outcome)
    }

    fn run_checked(&self, args: &[&str]) -> Result<CommandOutput> {
        let output = self.run(args, None)?;
        if !output.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                output.stderr_lossy().trim()
            ));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<CommandOutput> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.workdir);
        run_command_with_timeout(cmd, stdin, self.timeout, GIT_OUTPUT_LIMIT_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const PATCH: &str = "diff --git a/calc.py b/calc.py\n--- a/calc.py\n+++ b/calc.py\n@@ -1,2 +1,2 @@\n def f(x):\n-    return x + 1\n+    return x * 2\n";

    fn repo_with(content: &str) -> (tempfile::TempDir, Git) {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = Git::new(temp.path(), Duration::from_secs(30));
        git.init().expect("init");
        fs::write(temp.path().join("calc.py"), content).expect("write");
        git.add_all().expect("add");
        git.commit("init").expect("commit");
        (temp, git)
    }

    #[test]
    fn check_then_apply_rewrites_file() {
        let (temp, git) = repo_with("def f(x):\n    return x + 1\n");
        assert!(git.apply_check(PATCH).expect("check").applied);
        assert!(git.apply(PATCH).expect("apply").applied);
        let content = fs::read_to_string(temp.path().join("calc.py")).expect("read");
        assert_eq!(content, "def f(x):\n    return x * 2\n");
    }

    #[test]
    fn check_fails_for_mismatched_content() {
        let (temp, git) = repo_with("def f(x):\n    return x - 1\n");
        let outcome = git.apply_check(PATCH).expect("check");
        assert!(!outcome.applied);
        assert!(!outcome.stderr.is_empty());
        let content = fs::read_to_string(temp.path().join("calc.py")).expect("read");
        assert_eq!(content, "def f(x):\n    return x - 1\n");
    }
}
