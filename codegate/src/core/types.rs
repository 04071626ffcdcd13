//! Shared deterministic types for the proposal → gate → execute core.
//!
//! These types define stable contracts between the generator, gate, executor
//! and patch engine. They carry no I/O and serialize to stable JSON so round
//! records and episode outcomes can be printed or stored by callers.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::diff::header_files;

/// Lifecycle phase of a repair task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Ingest,
    Localize,
    Plan,
    PatchCandidates,
    TestStage,
    Diagnose,
    Minimize,
    Finalize,
    Done,
}

impl Phase {
    pub const ALL: [Phase; 9] = [
        Phase::Ingest,
        Phase::Localize,
        Phase::Plan,
        Phase::PatchCandidates,
        Phase::TestStage,
        Phase::Diagnose,
        Phase::Minimize,
        Phase::Finalize,
        Phase::Done,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Ingest => "ingest",
            Phase::Localize => "localize",
            Phase::Plan => "plan",
            Phase::PatchCandidates => "patch_candidates",
            Phase::TestStage => "test_stage",
            Phase::Diagnose => "diagnose",
            Phase::Minimize => "minimize",
            Phase::Finalize => "finalize",
            Phase::Done => "done",
        }
    }

    /// Parse a phase name (case-insensitive). Unknown names return `None`.
    pub fn parse(name: &str) -> Option<Phase> {
        let name = name.trim().to_ascii_lowercase();
        Phase::ALL.into_iter().find(|phase| phase.as_str() == name)
    }

    pub fn is_terminal(self) -> bool {
        self == Phase::Done
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of action a proposal asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalKind {
    Inspect,
    Search,
    Edit,
    RunTests,
    Finalize,
}

impl ProposalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProposalKind::Inspect => "inspect",
            ProposalKind::Search => "search",
            ProposalKind::Edit => "edit",
            ProposalKind::RunTests => "run_tests",
            ProposalKind::Finalize => "finalize",
        }
    }
}

impl fmt::Display for ProposalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an inspect proposal reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectTarget {
    /// The cached problem statement held in [`Notes`].
    ProblemStatement,
    /// Paths relative to the working tree.
    Files(Vec<String>),
}

/// Kind-specific proposal inputs. The variant determines the proposal kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProposalInputs {
    Inspect {
        target: InspectTarget,
    },
    Search {
        query: String,
    },
    Edit {
        diff: String,
        files: Vec<String>,
    },
    RunTests {
        /// Whitespace-separated command overriding the configured test command.
        command: Option<String>,
    },
    Finalize {
        summary: String,
        status: String,
    },
}

/// A candidate next action. Built fresh every round and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub rationale: String,
    pub inputs: ProposalInputs,
    /// Provenance only; no core logic reads it.
    #[serde(default)]
    pub evidence: Vec<String>,
}

impl Proposal {
    pub fn new(rationale: impl Into<String>, inputs: ProposalInputs) -> Self {
        Self {
            rationale: rationale.into(),
            inputs,
            evidence: Vec::new(),
        }
    }

    pub fn inspect_files(rationale: impl Into<String>, files: Vec<String>) -> Self {
        Self::new(
            rationale,
            ProposalInputs::Inspect {
                target: InspectTarget::Files(files),
            },
        )
    }

    pub fn inspect_problem_statement(rationale: impl Into<String>) -> Self {
        Self::new(
            rationale,
            ProposalInputs::Inspect {
                target: InspectTarget::ProblemStatement,
            },
        )
    }

    pub fn search(rationale: impl Into<String>, query: impl Into<String>) -> Self {
        Self::new(
            rationale,
            ProposalInputs::Search {
                query: query.into(),
            },
        )
    }

    pub fn edit(rationale: impl Into<String>, diff: impl Into<String>, files: Vec<String>) -> Self {
        Self::new(
            rationale,
            ProposalInputs::Edit {
                diff: diff.into(),
                files,
            },
        )
    }

    pub fn run_tests(rationale: impl Into<String>, command: Option<String>) -> Self {
        Self::new(rationale, ProposalInputs::RunTests { command })
    }

    pub fn finalize(
        rationale: impl Into<String>,
        summary: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Self::new(
            rationale,
            ProposalInputs::Finalize {
                summary: summary.into(),
                status: status.into(),
            },
        )
    }

    pub fn kind(&self) -> ProposalKind {
        match self.inputs {
            ProposalInputs::Inspect { .. } => ProposalKind::Inspect,
            ProposalInputs::Search { .. } => ProposalKind::Search,
            ProposalInputs::Edit { .. } => ProposalKind::Edit,
            ProposalInputs::RunTests { .. } => ProposalKind::RunTests,
            ProposalInputs::Finalize { .. } => ProposalKind::Finalize,
        }
    }

    /// Paths an edit would touch: explicit files followed by any additional
    /// files named in the diff headers, deduplicated in order.
    ///
    /// Non-edit proposals touch nothing.
    pub fn edit_targets(&self) -> Vec<String> {
        let ProposalInputs::Edit { diff, files } = &self.inputs else {
            return Vec::new();
        };
        let mut targets: Vec<String> = Vec::new();
        for path in files.iter().cloned().chain(header_files(diff)) {
            if !path.is_empty() && !targets.contains(&path) {
                targets.push(path);
            }
        }
        targets
    }
}

pub const CONSTRAINTS_SATISFIED: &str = "constraints satisfied";

/// Admission decision for a proposal. `reason` is always populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    pub accept: bool,
    pub reason: String,
}

impl GateDecision {
    pub fn accept() -> Self {
        Self {
            accept: true,
            reason: CONSTRAINTS_SATISFIED.to_string(),
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            accept: false,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecStatus {
    Ok,
    Fail,
}

/// Outcome of executing one admitted proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecResult {
    pub status: ExecStatus,
    pub summary: String,
    #[serde(default)]
    pub artifacts: Vec<String>,
    /// Open diagnostic payload; keys are handler-specific.
    #[serde(default)]
    pub metrics: Map<String, Value>,
}

impl ExecResult {
    pub fn ok(summary: impl Into<String>) -> Self {
        Self {
            status: ExecStatus::Ok,
            summary: summary.into(),
            artifacts: Vec::new(),
            metrics: Map::new(),
        }
    }

    pub fn fail(summary: impl Into<String>) -> Self {
        Self {
            status: ExecStatus::Fail,
            summary: summary.into(),
            artifacts: Vec::new(),
            metrics: Map::new(),
        }
    }

    pub fn with_artifacts(mut self, artifacts: Vec<String>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn with_metric(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metrics.insert(key.to_string(), value.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == ExecStatus::Ok
    }
}

/// Per-task counters. Only the executor and the round loop move them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    pub round_idx: u32,
    pub patch_attempts: u32,
    pub test_runs: u32,
}

/// Static per-task policy applied by the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub max_rounds: u32,
    pub max_patch_attempts: u32,
    pub max_test_runs: u32,
    pub max_files_touched: usize,
    pub max_diff_lines: usize,
    pub forbid_test_modifications: bool,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            max_rounds: 50,
            max_patch_attempts: 20,
            max_test_runs: 10,
            max_files_touched: 5,
            max_diff_lines: 200,
            forbid_test_modifications: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HitKind {
    Read,
    Search,
}

/// A file-level clue about where a fix may belong.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizationHit {
    pub file: String,
    pub reason: String,
    #[serde(rename = "type")]
    pub kind: HitKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFailure {
    pub nodeid: String,
    pub message: String,
}

/// Where a search proposal came from. Rendered into the history line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchOrigin {
    Requested,
    Inferred,
    Fallback,
    Generic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadOrigin {
    Requested,
    Inferred,
}

/// One line of action history, appended for every generated proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionRecord {
    Patch { files: Vec<String> },
    Search { query: String, origin: SearchOrigin },
    Read { path: String, origin: ReadOrigin },
    ReadProblemStatement,
    RunTests { command: String },
    Finalize,
    ForcedEdit { file: String },
    ForcedFinalize,
}

impl ActionRecord {
    /// The query string if this record is a search of any origin.
    pub fn searched_query(&self) -> Option<&str> {
        match self {
            ActionRecord::Search { query, .. } => Some(query),
            _ => None,
        }
    }
}

impl fmt::Display for ActionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionRecord::Patch { files } => write!(f, "Generated patch for [{}]", files.join(", ")),
            ActionRecord::Search { query, origin } => {
                let label = match origin {
                    SearchOrigin::Requested => "Search",
                    SearchOrigin::Inferred => "Inferred search",
                    SearchOrigin::Fallback => "Fallback search",
                    SearchOrigin::Generic => "Generic search",
                };
                write!(f, "{label}: {query}")
            }
            ActionRecord::Read { path, origin } => match origin {
                ReadOrigin::Requested => write!(f, "Read: {path}"),
                ReadOrigin::Inferred => write!(f, "Inferred read: {path}"),
            },
            ActionRecord::ReadProblemStatement => f.write_str("Read problem_statement"),
            ActionRecord::RunTests { command } => write!(f, "Run: {command}"),
            ActionRecord::Finalize => f.write_str("Finalize"),
            ActionRecord::ForcedEdit { file } => write!(f, "Forcing edit for: {file}"),
            ActionRecord::ForcedFinalize => f.write_str("Force finalize - no more actions"),
        }
    }
}

/// Contents captured by the most recent inspect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub path: String,
    pub content: String,
}

/// Typed scratch memory carried between rounds of one task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notes {
    pub problem_statement: String,
    pub action_history: Vec<ActionRecord>,
    /// Files successfully read, in first-read order.
    pub files_read: Vec<String>,
    /// Files from the latest inspect, in request order.
    pub last_file_contents: Vec<FileSnapshot>,
    pub last_gate_reject: Option<String>,
    pub solved: bool,
    pub final_summary: Option<String>,
    pub completion_status: Option<String>,
}

impl Notes {
    pub fn has_searched(&self, query: &str) -> bool {
        self.action_history
            .iter()
            .any(|record| record.searched_query() == Some(query))
    }

    pub fn problem_statement_reads(&self) -> usize {
        self.action_history
            .iter()
            .filter(|record| matches!(record, ActionRecord::ReadProblemStatement))
            .count()
    }
}

/// The single mutable aggregate of one task, owned by its round loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    /// Root of the working tree; every proposal path is relative to it.
    pub workdir: PathBuf,
    pub phase: Phase,
    pub budget: Budget,
    pub notes: Notes,
    /// Append-only.
    pub localization_hits: Vec<LocalizationHit>,
    /// Replaced wholesale after every test run.
    pub last_failures: Vec<TestFailure>,
}

impl AgentState {
    pub fn new(workdir: impl Into<PathBuf>, problem_statement: impl Into<String>) -> Self {
        Self {
            workdir: workdir.into(),
            phase: Phase::Ingest,
            budget: Budget::default(),
            notes: Notes {
                problem_statement: problem_statement.into(),
                ..Notes::default()
            },
            localization_hits: Vec::new(),
            last_failures: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_parse_is_case_insensitive() {
        assert_eq!(Phase::parse("PATCH_CANDIDATES"), Some(Phase::PatchCandidates));
        assert_eq!(Phase::parse(" finalize "), Some(Phase::Finalize));
        assert_eq!(Phase::parse("triage"), None);
    }

    #[test]
    fn proposal_kind_follows_inputs() {
        assert_eq!(Proposal::search("r", "q").kind(), ProposalKind::Search);
        assert_eq!(
            Proposal::run_tests("r", None).kind(),
            ProposalKind::RunTests
        );
        assert_eq!(
            Proposal::inspect_problem_statement("r").kind(),
            ProposalKind::Inspect
        );
    }

    #[test]
    fn edit_targets_merge_explicit_and_header_files() {
        let diff = "--- a/src/lib.py\n+++ b/src/lib.py\n@@ -1 +1 @@\n-a\n+b\n\
                    --- a/vendor/x.py\n+++ b/vendor/x.py\n@@ -1 +1 @@\n-a\n+b\n";
        let proposal = Proposal::edit("r", diff, vec!["src/lib.py".to_string()]);
        assert_eq!(
            proposal.edit_targets(),
            vec!["src/lib.py".to_string(), "vendor/x.py".to_string()]
        );
        assert!(Proposal::search("r", "q").edit_targets().is_empty());
    }

    #[test]
    fn action_records_render_one_line() {
        let record = ActionRecord::Search {
            query: "def ".to_string(),
            origin: SearchOrigin::Fallback,
        };
        assert_eq!(record.to_string(), "Fallback search: def ");
        assert_eq!(
            ActionRecord::Patch {
                files: vec!["a.py".to_string(), "b.py".to_string()]
            }
            .to_string(),
            "Generated patch for [a.py, b.py]"
        );
    }

    #[test]
    fn notes_track_searches_and_problem_statement_reads() {
        let mut notes = Notes::default();
        notes.action_history.push(ActionRecord::Search {
            query: "parse_config".to_string(),
            origin: SearchOrigin::Inferred,
        });
        notes.action_history.push(ActionRecord::ReadProblemStatement);
        assert!(notes.has_searched("parse_config"));
        assert!(!notes.has_searched("parse"));
        assert_eq!(notes.problem_statement_reads(), 1);
    }

    #[test]
    fn agent_state_starts_in_ingest_with_empty_budget() {
        let state = AgentState::new("/tmp/repo", "it breaks");
        assert_eq!(state.phase, Phase::Ingest);
        assert_eq!(state.budget, Budget::default());
        assert_eq!(state.notes.problem_statement, "it breaks");
    }
}
