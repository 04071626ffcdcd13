//! Fixed-string code search over the working tree.
//!
//! Tries ripgrep, then grep, then an in-process walk. A tool that is missing,
//! times out or errors hands over to the next one; "no matches" from a tool
//! that ran is a real answer and stops the chain.

use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument, warn};
use walkdir::{DirEntry, WalkDir};

use crate::io::process::{is_program_missing, run_command_with_timeout};

pub const MAX_SEARCH_RESULTS: usize = 20;
const SEARCH_OUTPUT_LIMIT_BYTES: usize = 256 * 1024;

/// Directories never searched.
pub const SKIPPED_DIRS: &[&str] = &[
    ".git",
    "__pycache__",
    "node_modules",
    "venv",
    ".venv",
    "build",
    "dist",
    "target",
    "vendor",
];

/// Extensions considered source code by the grep and walk fallbacks.
pub const SOURCE_EXTENSIONS: &[&str] = &[
    "py", "rs", "js", "ts", "jsx", "tsx", "go", "java", "c", "h", "cc", "cpp", "hpp", "rb", "php",
    "cs", "kt", "swift", "scala", "sh", "toml", "cfg", "ini", "yaml", "yml", "json",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchBackend {
    Ripgrep,
    Grep,
    Walk,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOutcome {
    /// Matching files relative to the root, sorted, at most [`MAX_SEARCH_RESULTS`].
    pub files: Vec<String>,
    pub backend: SearchBackend,
}

/// Find files under `root` containing `query` verbatim.
#[instrument(skip_all, fields(query = %query))]
pub fn search_files(root: &Path, query: &str, timeout: Duration) -> Result<SearchOutcome> {
    if query.is_empty() {
        return Err(anyhow!("empty search query"));
    }

    match ripgrep(root, query, timeout) {
        Ok(files) => return Ok(outcome(files, SearchBackend::Ripgrep)),
        Err(err) => log_fallthrough("rg", &err),
    }
    match grep(root, query, timeout) {
        Ok(files) => return Ok(outcome(files, SearchBackend::Grep)),
        Err(err) => log_fallthrough("grep", &err),
    }
    let files = walk(root, query);
    Ok(outcome(files, SearchBackend::Walk))
}

fn outcome(mut files: Vec<String>, backend: SearchBackend) -> SearchOutcome {
    files.sort();
    files.dedup();
    files.truncate(MAX_SEARCH_RESULTS);
    debug!(backend = ?backend, matches = files.len(), "search finished");
    SearchOutcome { files, backend }
}

fn log_fallthrough(tool: &str, err: &anyhow::Error) {
    if is_program_missing(err) {
        debug!(tool, "search tool not installed");
    } else {
        warn!(tool, err = %format!("{err:#}"), "search tool failed, falling back");
    }
}

/// Run a list-files search tool. Exit status 1 means "no matches".
fn run_lister(mut cmd: Command, root: &Path, timeout: Duration) -> Result<Vec<String>> {
    cmd.current_dir(root);
    let output = run_command_with_timeout(cmd, None, timeout, SEARCH_OUTPUT_LIMIT_BYTES)?;
    if output.timed_out {
        return Err(anyhow!("timed out after {timeout:?}"));
    }
    match output.status.code() {
        Some(0) => Ok(output
            .stdout_lossy()
            .lines()
            .map(|line| line.trim().trim_start_matches("./").to_string())
            .filter(|line| !line.is_empty())
            .collect()),
        Some(1) => Ok(Vec::new()),
        code => Err(anyhow!(
            "exit {code:?}: {}",
            output.stderr_lossy().trim()
        )),
    }
}

fn ripgrep(root: &Path, query: &str, timeout: Duration) -> Result<Vec<String>> {
    let mut cmd = Command::new("rg");
    cmd.args(["-l", "-F", "--no-messages", "--sort", "path"]);
    for dir in SKIPPED_DIRS {
        cmd.arg("-g").arg(format!("!{dir}/"));
    }
    cmd.arg("--").arg(query).arg(".");
    run_lister(cmd, root, timeout)
}

fn grep(root: &Path, query: &str, timeout: Duration) -> Result<Vec<String>> {
    let mut cmd = Command::new("grep");
    cmd.args(["-r", "-l", "-I", "-F", "-s"]);
    for dir in SKIPPED_DIRS {
        cmd.arg(format!("--exclude-dir={dir}"));
    }
    for ext in SOURCE_EXTENSIONS {
        cmd.arg(format!("--include=*.{ext}"));
    }
    cmd.arg("-e").arg(query).arg(".");
    run_lister(cmd, root, timeout)
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref())
}

fn has_source_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext))
}

/// In-process search over source files, in path order.
fn walk(root: &Path, query: &str) -> Vec<String> {
    let mut files = Vec::new();
    let entries = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_skipped_dir(entry))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && has_source_extension(entry.path()));

    for entry in entries {
        let Ok(content) = fs::read_to_string(entry.path()) else {
            continue;
        };
        if !content.contains(query) {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(root) {
            files.push(rel.to_string_lossy().replace('\\', "/"));
        }
        if files.len() >= MAX_SEARCH_RESULTS {
            break;
        }
    }
    files
}
