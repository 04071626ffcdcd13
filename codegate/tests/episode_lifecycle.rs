//! End-to-end episodes driven by scripted suggestions and test runs.
//!
//! Each test builds a throwaway git repository, runs the full round loop and
//! checks the final tree, budget and phase trail.

use codegate::core::types::{ActionRecord, ExecStatus, Phase, Profile, ProposalKind};
use codegate::episode::{EpisodeLimits, StopReason, run_episode};
use codegate::execute::{ActionExecutor, ExecutorSettings};
use codegate::io::prompt::ContextBuilder;
use codegate::io::suggest::NoSuggester;
use codegate::propose::ProposalGenerator;
use codegate::test_support::{ScriptedSuggester, ScriptedTestRunner, TestRepo};
use serde_json::json;
use std::time::Duration;

const LIMITS: EpisodeLimits = EpisodeLimits {
    wall_clock: Duration::from_secs(600),
};

const FIX: &str = "--- a/src/calc.py\n+++ b/src/calc.py\n@@ -1,2 +1,2 @@\n def double(x):\n-    return x + 1\n+    return x * 2\n";

/// Full lifecycle: a failing first patch attempt, diagnosis and a retry.
///
/// Round trail:
/// ```text
/// ingest    search "def double"   -> localize
/// localize  read src/calc.py      -> plan
/// plan      edit (wrong context)  -> patch_candidates (fail)
/// patch_c.  edit (correct)        -> test_stage
/// test_st.  run_tests (fail)      -> diagnose
/// diagnose  edit tests/ (reject)  -> diagnose
/// diagnose  inspect               -> diagnose
/// ```
/// then the round budget stops the episode unsolved.
#[test]
fn failing_tests_lead_to_diagnosis_and_gate_rejections() {
    let repo = TestRepo::new();
    repo.commit_file("src/calc.py", "def double(x):\n    return x + 1\n");
    let mut state = repo.state("double(x) returns x + 1 instead of twice x");

    let wrong = FIX.replace("return x + 1", "return x - 1");
    let test_edit = "--- a/tests/test_calc.py\n+++ b/tests/test_calc.py\n-assert double(2) == 4\n+assert double(2) == 3\n";
    let generator = ProposalGenerator::new(
        ScriptedSuggester::new(vec![
            json!({"mode": "tool_request", "requests": [{"tool": "search", "args": {"query": "def double"}}]}),
            json!({"mode": "tool_request", "requests": [{"tool": "cat", "args": {"file": "src/calc.py"}}]}),
            json!({"mode": "patch", "diff": wrong}),
            json!({"mode": "patch", "diff": FIX}),
            json!({"mode": "tool_request", "requests": [{"tool": "pytest", "args": {}}]}),
            json!({"mode": "patch", "diff": test_edit}),
            json!({"mode": "tool_request", "requests": [{"tool": "view", "args": {"path": "tests/test_calc.py"}}]}),
        ]),
        ContextBuilder::default(),
        0.0,
    );
    let executor = ActionExecutor::new(
        ScriptedTestRunner::new(vec![ScriptedTestRunner::failing(
            "FAILED tests/test_calc.py::test_double - assert 5 == 4\n",
        )]),
        ExecutorSettings::default(),
    );
    let profile = Profile {
        max_rounds: 7,
        ..Profile::default()
    };

    let outcome = run_episode(&profile, &mut state, &generator, &executor, LIMITS, |_| {});

    assert_eq!(outcome.stop, StopReason::MaxRounds);
    assert!(!outcome.solved);
    let phases: Vec<Phase> = outcome.records.iter().map(|r| r.phase).collect();
    assert_eq!(
        phases,
        vec![
            Phase::Ingest,
            Phase::Localize,
            Phase::Plan,
            Phase::PatchCandidates,
            Phase::TestStage,
            Phase::Diagnose,
            Phase::Diagnose,
        ]
    );
    assert_eq!(outcome.records[2].status, Some(ExecStatus::Fail));
    assert_eq!(outcome.records[3].status, Some(ExecStatus::Ok));
    assert!(!outcome.records[5].accepted);
    assert!(outcome.records[5].reason.contains("Test modification forbidden"));
    assert_eq!(outcome.records[6].kind, ProposalKind::Inspect);

    assert_eq!(outcome.budget.patch_attempts, 1);
    assert_eq!(outcome.budget.test_runs, 1);
    assert_eq!(state.last_failures[0].nodeid, "tests/test_calc.py::test_double");
    assert_eq!(state.notes.last_gate_reject, None);
    assert_eq!(repo.read("src/calc.py"), "def double(x):\n    return x * 2\n");
}

#[test]
fn heuristics_alone_localize_and_read_the_named_file() {
    let repo = TestRepo::new();
    repo.commit_file("pkg/totals.py", "def compute_total(items):\n    return sum(items)\n");
    repo.commit_file("pkg/other.py", "x = 1\n");
    let mut state = repo.state("`compute_total` ignores discounts");

    let generator = ProposalGenerator::new(NoSuggester, ContextBuilder::default(), 0.0);
    let executor = ActionExecutor::new(ScriptedTestRunner::new(vec![]), ExecutorSettings::default());
    let profile = Profile {
        max_rounds: 3,
        ..Profile::default()
    };

    let outcome = run_episode(&profile, &mut state, &generator, &executor, LIMITS, |_| {});

    assert_eq!(
        state.notes.action_history,
        vec![
            ActionRecord::ReadProblemStatement,
            ActionRecord::Search {
                query: "compute_total".to_string(),
                origin: codegate::core::types::SearchOrigin::Inferred,
            },
            ActionRecord::Read {
                path: "pkg/totals.py".to_string(),
                origin: codegate::core::types::ReadOrigin::Inferred,
            },
        ]
    );
    assert_eq!(outcome.phase, Phase::Plan);
    assert_eq!(state.notes.files_read, vec!["pkg/totals.py".to_string()]);
    assert!(outcome.records.iter().all(|record| record.accepted));
}

#[test]
fn exhausted_patch_budget_rejects_edits() {
    let repo = TestRepo::new();
    repo.commit_file("src/calc.py", "def double(x):\n    return x + 1\n");
    let mut state = repo.state("double is wrong");
    state.phase = Phase::PatchCandidates;

    let generator = ProposalGenerator::new(
        ScriptedSuggester::new(vec![json!({"mode": "patch", "diff": FIX})]),
        ContextBuilder::default(),
        0.0,
    );
    let executor = ActionExecutor::new(ScriptedTestRunner::new(vec![]), ExecutorSettings::default());
    let profile = Profile {
        max_rounds: 1,
        max_patch_attempts: 0,
        ..Profile::default()
    };

    let outcome = run_episode(&profile, &mut state, &generator, &executor, LIMITS, |_| {});

    assert_eq!(outcome.records[0].reason, "Patch budget exhausted (0/0)");
    assert_eq!(repo.read("src/calc.py"), "def double(x):\n    return x + 1\n");
}
