//! Suggestion backends.
//!
//! The [`Suggester`] trait decouples proposal generation from whatever model
//! produces suggestions. [`CommandSuggester`] pipes the rendered context to an
//! external command; tests use scripted suggesters that return canned JSON.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::io::process::{head, run_command_with_timeout};

/// Environment variable carrying the sampling temperature to the command.
pub const TEMPERATURE_ENV: &str = "CODEGATE_TEMPERATURE";

/// Source of raw suggestions for one round.
pub trait Suggester {
    /// Return the raw JSON suggestion for `context`.
    fn suggest(&self, context: &str, temperature: f32) -> Result<Value>;
}

/// Suggester that always fails, leaving every round to the heuristics.
pub struct NoSuggester;

impl Suggester for NoSuggester {
    fn suggest(&self, _context: &str, _temperature: f32) -> Result<Value> {
        Err(anyhow!("no suggester configured"))
    }
}

/// Runs a command with the context on stdin and reads one JSON object from stdout.
#[derive(Debug, Clone)]
pub struct CommandSuggester {
    pub command: Vec<String>,
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl Suggester for CommandSuggester {
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs(), context_len = context.len()))]
    fn suggest(&self, context: &str, temperature: f32) -> Result<Value> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("suggester command is empty"))?;
        info!(program = %program, "requesting suggestion");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&self.workdir)
            .env(TEMPERATURE_ENV, temperature.to_string());
        let output = run_command_with_timeout(
            cmd,
            Some(context.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run suggester {program}"))?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "suggester timed out");
            bail!("suggester timed out after {:?}", self.timeout);
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "suggester failed");
            bail!(
                "suggester failed with status {:?}: {}",
                output.status.code(),
                head(output.stderr_lossy().trim(), 200)
            );
        }

        let value = extract_json_object(&output.stdout_lossy())?;
        debug!("parsed suggester output");
        Ok(value)
    }
}

/// Parse stdout as JSON, or failing that the outermost `{...}` span in it.
///
/// Models often wrap their answer in prose or code fences.
pub fn extract_json_object(stdout: &str) -> Result<Value> {
    let trimmed = stdout.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }
    let start = trimmed
        .find('{')
        .ok_or_else(|| anyhow!("no JSON object in suggester output"))?;
    let end = trimmed
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| anyhow!("unterminated JSON object in suggester output"))?;
    serde_json::from_str(&trimmed[start..=end]).context("parse suggester output")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sh(script: &str) -> CommandSuggester {
        CommandSuggester {
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            workdir: std::env::temp_dir(),
            timeout: Duration::from_secs(10),
            output_limit_bytes: 10_000,
        }
    }

    #[test]
    fn extracts_wrapped_json() {
        let value = extract_json_object("Sure!\n```json\n{\"mode\": \"patch\", \"diff\": \"x\"}\n```")
            .expect("extract");
        assert_eq!(value, json!({"mode": "patch", "diff": "x"}));
        assert!(extract_json_object("no braces here").is_err());
    }

    #[test]
    fn command_suggester_reads_context_and_temperature() {
        let suggester = sh(
            r#"ctx=$(cat); printf '{"mode":"tool_request","why":"%s %s"}' "$ctx" "$CODEGATE_TEMPERATURE""#,
        );
        let value = suggester.suggest("ctx", 0.5).expect("suggest");
        assert_eq!(value["why"], "ctx 0.5");
    }

    #[test]
    fn failing_command_is_an_error() {
        let err = sh("echo nope >&2; exit 3").suggest("ctx", 0.0).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn no_suggester_always_errors() {
        assert!(NoSuggester.suggest("ctx", 0.0).is_err());
    }
}
