//! Multi-strategy patch application.
//!
//! A diff is validated and repaired first, then offered to each
//! [`PatchStrategy`] in order until one applies. A strategy either rewrites
//! its target files completely or leaves them as they were, so a failed edit
//! never leaves a half-applied change behind.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::diff::{ParsedDiff, header_files, last_header_file, repair_patch, validate_patch};
use crate::core::path::resolve_in_tree;
use crate::core::textual::apply_textual;
use crate::core::types::{AgentState, ExecResult};
use crate::io::git::Git;
use crate::io::process::head;

const DIFF_PREVIEW_BYTES: usize = 500;
const DIFF_DIAGNOSTIC_BYTES: usize = 1000;
const STDERR_SUMMARY_BYTES: usize = 200;

/// What a strategy sees of the edit being applied.
pub struct PatchInput<'a> {
    pub workdir: &'a Path,
    pub git: &'a Git,
    /// Repaired diff text.
    pub diff: &'a str,
    pub parsed: &'a ParsedDiff,
    /// Files listed explicitly by the proposal.
    pub explicit_files: &'a [String],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyOutcome {
    Applied {
        summary: String,
        artifacts: Vec<String>,
    },
    /// Nothing was changed. `detail` explains why.
    Skipped { detail: String },
}

impl StrategyOutcome {
    fn skipped(detail: impl Into<String>) -> Self {
        Self::Skipped {
            detail: detail.into(),
        }
    }
}

pub trait PatchStrategy {
    fn name(&self) -> &'static str;
    fn apply(&self, input: &PatchInput<'_>) -> Result<StrategyOutcome>;
}

/// `git apply --check` + `git apply`, then `git apply --3way`.
pub struct StructuredApply;

/// Textual rewrite of the first header file the diff can be placed in.
pub struct DirectEdit;

/// Block or per-line replacement on one inferred target file.
pub struct SearchReplace;

impl PatchStrategy for StructuredApply {
    fn name(&self) -> &'static str {
        "structured_apply"
    }

    fn apply(&self, input: &PatchInput<'_>) -> Result<StrategyOutcome> {
        let files = header_files(input.diff);
        let applied = |files: Vec<String>| StrategyOutcome::Applied {
            summary: format!("Patch applied successfully ({} files)", files.len()),
            artifacts: files,
        };

        let check = input.git.apply_check(input.diff)?;
        if check.applied {
            let outcome = input.git.apply(input.diff)?;
            if outcome.applied {
                return Ok(applied(files));
            }
            return Ok(StrategyOutcome::skipped(outcome.stderr));
        }

        let snapshots = snapshot_files(input.workdir, &files)?;
        let three_way = input.git.apply_three_way(input.diff)?;
        if three_way.applied {
            return Ok(applied(files));
        }
        restore_files(&snapshots)?;
        debug!(stderr = %three_way.stderr.trim(), "3-way apply failed");
        Ok(StrategyOutcome::skipped(check.stderr))
    }
}

impl PatchStrategy for DirectEdit {
    fn name(&self) -> &'static str {
        "direct_edit"
    }

    fn apply(&self, input: &PatchInput<'_>) -> Result<StrategyOutcome> {
        for file in header_files(input.diff) {
            let Some(path) = resolve_in_tree(input.workdir, &file) else {
                continue;
            };
            if !path.is_file() {
                continue;
            }
            let Ok(content) = fs::read_to_string(&path) else {
                debug!(file = %file, "skipping unreadable or non-UTF-8 file");
                continue;
            };
            if let Some(modified) = apply_textual(&content, input.parsed, true) {
                write_in_place(&path, modified.as_bytes())?;
                return Ok(StrategyOutcome::Applied {
                    summary: format!("Applied direct edit to {file}"),
                    artifacts: vec![file],
                });
            }
        }
        Ok(StrategyOutcome::skipped("no header file matched the diff text"))
    }
}

impl PatchStrategy for SearchReplace {
    fn name(&self) -> &'static str {
        "search_replace"
    }

    fn apply(&self, input: &PatchInput<'_>) -> Result<StrategyOutcome> {
        let Some(file) = input
            .explicit_files
            .first()
            .cloned()
            .or_else(|| last_header_file(input.diff))
        else {
            return Ok(StrategyOutcome::skipped("no target file"));
        };
        let Some(path) = resolve_in_tree(input.workdir, &file).filter(|path| path.is_file()) else {
            return Ok(StrategyOutcome::skipped(format!("target {file} not found")));
        };

        let Ok(content) = fs::read_to_string(&path) else {
            return Ok(StrategyOutcome::skipped(format!("target {file} is not UTF-8 text")));
        };
        match apply_textual(&content, input.parsed, false) {
            Some(modified) => {
                write_in_place(&path, modified.as_bytes())?;
                Ok(StrategyOutcome::Applied {
                    summary: format!("Applied structured edit to {file}"),
                    artifacts: vec![file],
                })
            }
            None => Ok(StrategyOutcome::skipped(format!("no replacement in {file}"))),
        }
    }
}

/// Overwrite `path` through its existing inode so mode bits, symlinks and
/// hardlinks survive the edit. Content is computed in full beforehand.
fn write_in_place(path: &Path, contents: &[u8]) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

/// Bytes of each file before a risky write. `None` marks a file that did not exist.
fn snapshot_files(workdir: &Path, files: &[String]) -> Result<Vec<(PathBuf, Option<Vec<u8>>)>> {
    let mut snapshots = Vec::new();
    for file in files {
        let Some(path) = resolve_in_tree(workdir, file) else {
            continue;
        };
        let content = if path.is_file() {
            Some(fs::read(&path).with_context(|| format!("snapshot {}", path.display()))?)
        } else {
            None
        };
        snapshots.push((path, content));
    }
    Ok(snapshots)
}

fn restore_files(snapshots: &[(PathBuf, Option<Vec<u8>>)]) -> Result<()> {
    for (path, content) in snapshots {
        match content {
            Some(content) => write_in_place(path, content)?,
            None if path.exists() => {
                fs::remove_file(path).with_context(|| format!("remove {}", path.display()))?;
            }
            None => {}
        }
    }
    Ok(())
}

/// Ordered strategy list applied to every edit.
pub struct PatchEngine {
    strategies: Vec<Box<dyn PatchStrategy>>,
    git_timeout: Duration,
}

impl PatchEngine {
    pub fn new(git_timeout: Duration) -> Self {
        Self {
            strategies: vec![
                Box::new(StructuredApply),
                Box::new(DirectEdit),
                Box::new(SearchReplace),
            ],
            git_timeout,
        }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Validate, repair and apply `diff` to the working tree.
    ///
    /// On success `patch_attempts` grows by one. Failures leave the tree and
    /// the budget untouched.
    #[instrument(skip_all, fields(diff_len = diff.len()))]
    pub fn apply_edit(&self, state: &mut AgentState, diff: &str, files: &[String]) -> ExecResult {
        let parsed = match validate_patch(diff) {
            Ok(parsed) => parsed,
            Err(reason) => {
                info!(reason = %reason, "rejected invalid patch");
                return ExecResult::fail(format!("Invalid patch: {reason}"))
                    .with_metric("validation_error", reason)
                    .with_metric("diff_preview", head(diff, DIFF_PREVIEW_BYTES));
            }
        };
        let repaired = repair_patch(diff);
        let git = Git::new(&state.workdir, self.git_timeout);
        let input = PatchInput {
            workdir: &state.workdir,
            git: &git,
            diff: &repaired,
            parsed: &parsed,
            explicit_files: files,
        };

        let mut diagnostic: Option<String> = None;
        for strategy in &self.strategies {
            match strategy.apply(&input) {
                Ok(StrategyOutcome::Applied { summary, artifacts }) => {
                    info!(strategy = strategy.name(), files = ?artifacts, "patch applied");
                    state.budget.patch_attempts += 1;
                    return ExecResult::ok(summary)
                        .with_artifacts(artifacts)
                        .with_metric("strategy", strategy.name());
                }
                Ok(StrategyOutcome::Skipped { detail }) => {
                    debug!(strategy = strategy.name(), detail = %detail, "strategy did not apply");
                    diagnostic.get_or_insert(detail);
                }
                Err(err) => {
                    warn!(strategy = strategy.name(), err = %format!("{err:#}"), "strategy errored");
                    diagnostic.get_or_insert_with(|| format!("{err:#}"));
                }
            }
        }

        let stderr = diagnostic.unwrap_or_default();
        ExecResult::fail(format!(
            "Patch check failed: {}",
            head(stderr.trim(), STDERR_SUMMARY_BYTES)
        ))
        .with_metric("stderr", stderr.clone())
        .with_metric("diff", head(&repaired, DIFF_DIAGNOSTIC_BYTES))
    }
}
