//! Execution of admitted proposals.
//!
//! Every handler returns an [`ExecResult`]; I/O errors become fail results
//! here so the round loop never has to unwind.

use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;

use serde_json::json;
use tracing::{info, instrument, warn};

use crate::core::path::resolve_in_tree;
use crate::core::test_output::parse_failures;
use crate::core::types::{
    AgentState, ExecResult, FileSnapshot, HitKind, InspectTarget, LocalizationHit, Proposal,
    ProposalInputs,
};
use crate::io::config::AgentConfig;
use crate::io::patch::PatchEngine;
use crate::io::process::{head, tail};
use crate::io::search::search_files;
use crate::io::test_runner::{TestRequest, TestRunner};

const PROBLEM_PREVIEW_CHARS: usize = 200;
const STDOUT_TAIL_BYTES: usize = 1000;
const FILE_NOT_FOUND: &str = "File not found";

/// Executor knobs taken from the agent config.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub test_command: Vec<String>,
    pub inspect_limit_bytes: usize,
    pub search_timeout: Duration,
    pub test_timeout: Duration,
    pub git_timeout: Duration,
    pub output_limit_bytes: usize,
}

impl ExecutorSettings {
    pub fn from_config(cfg: &AgentConfig) -> Self {
        Self {
            test_command: cfg.tests.command.clone(),
            inspect_limit_bytes: cfg.inspect_limit_bytes,
            search_timeout: cfg.timeouts.search(),
            test_timeout: cfg.timeouts.tests(),
            git_timeout: cfg.timeouts.git(),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from_config(&AgentConfig::default())
    }
}

pub struct ActionExecutor<T: TestRunner> {
    runner: T,
    settings: ExecutorSettings,
    patch: PatchEngine,
}

impl<T: TestRunner> ActionExecutor<T> {
    pub fn new(runner: T, settings: ExecutorSettings) -> Self {
        let patch = PatchEngine::new(settings.git_timeout);
        Self {
            runner,
            settings,
            patch,
        }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Carry out an admitted proposal against the working tree and state.
    #[instrument(skip_all, fields(kind = %proposal.kind()))]
    pub fn execute(&self, state: &mut AgentState, proposal: &Proposal) -> ExecResult {
        info!("executing proposal");
        match &proposal.inputs {
            ProposalInputs::Inspect { target } => self.inspect(state, target),
            ProposalInputs::Search { query } => self.search(state, query),
            ProposalInputs::Edit { diff, files } => self.patch.apply_edit(state, diff, files),
            ProposalInputs::RunTests { command } => self.run_tests(state, command.as_deref()),
            ProposalInputs::Finalize { summary, status } => finalize(state, summary, status),
        }
    }

    fn inspect(&self, state: &mut AgentState, target: &InspectTarget) -> ExecResult {
        let files = match target {
            InspectTarget::ProblemStatement => {
                let content = &state.notes.problem_statement;
                let preview: String = content.chars().take(PROBLEM_PREVIEW_CHARS).collect();
                return ExecResult::ok(format!("Problem statement: {preview}..."))
                    .with_metric("content", content.clone());
            }
            InspectTarget::Files(files) if files.is_empty() => {
                return ExecResult::ok("No files to inspect");
            }
            InspectTarget::Files(files) => files,
        };

        let mut contents: BTreeMap<String, String> = BTreeMap::new();
        let mut snapshots: Vec<FileSnapshot> = Vec::new();
        for file in files {
            let Some(content) = self.read_capped(state, file) else {
                contents.insert(file.clone(), FILE_NOT_FOUND.to_string());
                continue;
            };
            if !state.notes.files_read.contains(file) {
                state.notes.files_read.push(file.clone());
            }
            state.localization_hits.push(LocalizationHit {
                file: file.clone(),
                reason: "file read".to_string(),
                kind: HitKind::Read,
            });
            contents.insert(file.clone(), content.clone());
            snapshots.push(FileSnapshot {
                path: file.clone(),
                content,
            });
        }

        let read = snapshots.len();
        state.notes.last_file_contents = snapshots;
        ExecResult::ok(format!("Read {read} of {} files: [{}]", files.len(), files.join(", ")))
            .with_artifacts(files.clone())
            .with_metric("contents", json!(contents))
    }

    fn read_capped(&self, state: &AgentState, file: &str) -> Option<String> {
        let path = resolve_in_tree(&state.workdir, file)?;
        if !path.is_file() {
            return None;
        }
        match fs::read(&path) {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                Some(head(&text, self.settings.inspect_limit_bytes).to_string())
            }
            Err(err) => {
                warn!(path = %path.display(), err = %err, "read failed");
                None
            }
        }
    }

    fn search(&self, state: &mut AgentState, query: &str) -> ExecResult {
        if query.is_empty() {
            return ExecResult::fail("No search query provided");
        }
        let found = match search_files(&state.workdir, query, self.settings.search_timeout) {
            Ok(found) => found,
            Err(err) => return ExecResult::fail(format!("Search failed: {err:#}")),
        };

        for file in &found.files {
            state.localization_hits.push(LocalizationHit {
                file: file.clone(),
                reason: format!("match for '{query}'"),
                kind: HitKind::Search,
            });
        }

        let summary = if found.files.is_empty() {
            format!("No files found matching '{query}'")
        } else {
            let preview: Vec<&str> = found.files.iter().take(5).map(String::as_str).collect();
            format!(
                "Found {} files matching '{query}': [{}]",
                found.files.len(),
                preview.join(", ")
            )
        };
        ExecResult::ok(summary)
            .with_artifacts(found.files.clone())
            .with_metric("query", query)
            .with_metric("matches", found.files)
    }

    fn run_tests(&self, state: &mut AgentState, command: Option<&str>) -> ExecResult {
        let command: Vec<String> = match command.map(str::trim).filter(|c| !c.is_empty()) {
            Some(line) => line.split_whitespace().map(str::to_string).collect(),
            None => self.settings.test_command.clone(),
        };
        let request = TestRequest {
            workdir: state.workdir.clone(),
            command,
            timeout: self.settings.test_timeout,
            output_limit_bytes: self.settings.output_limit_bytes,
        };

        state.budget.test_runs += 1;
        let run = match self.runner.run(&request) {
            Ok(run) => run,
            Err(err) => return ExecResult::fail(format!("Test run failed: {err:#}")),
        };
        if run.timed_out {
            state.last_failures.clear();
            return ExecResult::fail(format!(
                "Test run timed out ({}s)",
                self.settings.test_timeout.as_secs()
            ));
        }

        state.last_failures = if run.passed {
            Vec::new()
        } else {
            parse_failures(&run.stdout)
        };
        let metrics = json!({
            "passed": run.passed,
            "returncode": run.exit_code,
            "stdout_tail": tail(&run.stdout, STDOUT_TAIL_BYTES),
        });
        let result = if run.passed {
            ExecResult::ok("Tests passed")
        } else {
            ExecResult::fail(format!("Tests failed ({} failures parsed)", state.last_failures.len()))
        };
        result.with_metric("test_result", metrics)
    }
}

fn finalize(state: &mut AgentState, summary: &str, status: &str) -> ExecResult {
    state.notes.solved = status == "complete";
    state.notes.final_summary = Some(summary.to_string());
    state.notes.completion_status = Some(status.to_string());
    ExecResult::ok(format!("Task finalized: {status}"))
        .with_metric("final_summary", summary)
        .with_metric("completion_status", status)
}
