//! Round loop for one task: propose, gate, execute, advance.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::core::gate::gate;
use crate::core::phase::{RoundSignal, next_phase};
use crate::core::types::{AgentState, Budget, ExecStatus, Phase, Profile, ProposalKind};
use crate::execute::ActionExecutor;
use crate::io::suggest::Suggester;
use crate::io::test_runner::TestRunner;
use crate::propose::ProposalGenerator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpisodeLimits {
    pub wall_clock: Duration,
}

/// Why `run_episode` stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The phase machine reached Done.
    Done,
    /// `round_idx` reached `max_rounds`.
    MaxRounds,
    /// The wall-clock deadline passed.
    WallClock,
}

/// What happened in one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundRecord {
    pub round: u32,
    pub phase: Phase,
    pub kind: ProposalKind,
    pub accepted: bool,
    /// Gate reason, empty on acceptance.
    pub reason: String,
    /// `None` when the gate rejected the proposal.
    pub status: Option<ExecStatus>,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeOutcome {
    pub stop: StopReason,
    pub rounds: u32,
    pub solved: bool,
    pub final_summary: Option<String>,
    pub completion_status: Option<String>,
    pub budget: Budget,
    pub phase: Phase,
    pub records: Vec<RoundRecord>,
}

/// Run rounds until Done, the round budget runs out, or the deadline passes.
///
/// `on_round` sees each record as soon as its round finishes.
#[instrument(skip_all, fields(max_rounds = profile.max_rounds))]
pub fn run_episode<S: Suggester, T: TestRunner, F: FnMut(&RoundRecord)>(
    profile: &Profile,
    state: &mut AgentState,
    generator: &ProposalGenerator<S>,
    executor: &ActionExecutor<T>,
    limits: EpisodeLimits,
    mut on_round: F,
) -> EpisodeOutcome {
    let started = Instant::now();
    let mut records = Vec::new();

    let stop = loop {
        if state.phase.is_terminal() {
            break StopReason::Done;
        }
        if state.budget.round_idx >= profile.max_rounds {
            break StopReason::MaxRounds;
        }
        if started.elapsed() >= limits.wall_clock {
            warn!(elapsed_secs = started.elapsed().as_secs(), "wall-clock budget exhausted");
            break StopReason::WallClock;
        }

        state.budget.round_idx += 1;
        let record = run_round(profile, state, generator, executor);
        on_round(&record);
        records.push(record);
    };

    info!(stop = ?stop, rounds = state.budget.round_idx, solved = state.notes.solved, "episode finished");
    EpisodeOutcome {
        stop,
        rounds: state.budget.round_idx,
        solved: state.notes.solved,
        final_summary: state.notes.final_summary.clone(),
        completion_status: state.notes.completion_status.clone(),
        budget: state.budget,
        phase: state.phase,
        records,
    }
}

fn run_round<S: Suggester, T: TestRunner>(
    profile: &Profile,
    state: &mut AgentState,
    generator: &ProposalGenerator<S>,
    executor: &ActionExecutor<T>,
) -> RoundRecord {
    let round = state.budget.round_idx;
    let phase = state.phase;
    let proposal = generator.propose(profile, state);
    let kind = proposal.kind();

    let decision = gate(profile, state, &proposal);
    if !decision.accept {
        info!(round, kind = %kind, reason = %decision.reason, "proposal rejected");
        state.notes.last_gate_reject = Some(decision.reason.clone());
        return RoundRecord {
            round,
            phase,
            kind,
            accepted: false,
            reason: decision.reason,
            status: None,
            summary: String::new(),
        };
    }
    state.notes.last_gate_reject = None;

    let result = executor.execute(state, &proposal);
    state.phase = next_phase(
        phase,
        RoundSignal {
            kind,
            status: result.status,
            has_read_files: !state.notes.files_read.is_empty(),
        },
    );
    info!(round, kind = %kind, status = ?result.status, next = %state.phase.as_str(), "round executed");

    RoundRecord {
        round,
        phase,
        kind,
        accepted: true,
        reason: String::new(),
        status: Some(result.status),
        summary: result.summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execute::ExecutorSettings;
    use crate::io::prompt::ContextBuilder;
    use crate::test_support::{ScriptedSuggester, ScriptedTestRunner, TestRepo};
    use serde_json::{Value, json};

    const LIMITS: EpisodeLimits = EpisodeLimits {
        wall_clock: Duration::from_secs(600),
    };

    fn parts(
        responses: Vec<Value>,
        runs: Vec<crate::io::test_runner::TestRun>,
    ) -> (ProposalGenerator<ScriptedSuggester>, ActionExecutor<ScriptedTestRunner>) {
        (
            ProposalGenerator::new(ScriptedSuggester::new(responses), ContextBuilder::default(), 0.0),
            ActionExecutor::new(ScriptedTestRunner::new(runs), ExecutorSettings::default()),
        )
    }

    #[test]
    fn rejected_round_keeps_phase_and_records_reason() {
        let repo = TestRepo::new();
        let mut state = repo.state("problem");
        let profile = Profile {
            max_rounds: 1,
            ..Profile::default()
        };
        let (generator, executor) = parts(vec![json!({"mode": "feature_summary", "summary": "x"})], vec![]);

        let outcome = run_episode(&profile, &mut state, &generator, &executor, LIMITS, |_| {});

        assert_eq!(outcome.stop, StopReason::MaxRounds);
        assert_eq!(outcome.phase, Phase::Ingest);
        assert!(!outcome.records[0].accepted);
        assert!(
            state
                .notes
                .last_gate_reject
                .as_deref()
                .is_some_and(|reason| reason.starts_with("Action 'finalize' not allowed in phase ingest"))
        );
    }

    #[test]
    fn accepted_round_clears_last_reject() {
        let repo = TestRepo::new();
        let mut state = repo.state("problem");
        state.notes.last_gate_reject = Some("earlier".to_string());
        let profile = Profile {
            max_rounds: 1,
            ..Profile::default()
        };
        let (generator, executor) = parts(vec![], vec![]);

        let outcome = run_episode(&profile, &mut state, &generator, &executor, LIMITS, |_| {});

        assert!(outcome.records[0].accepted);
        assert_eq!(state.notes.last_gate_reject, None);
        assert_eq!(state.phase, Phase::Localize);
    }

    #[test]
    fn zero_wall_clock_stops_before_any_round() {
        let repo = TestRepo::new();
        let mut state = repo.state("problem");
        let (generator, executor) = parts(vec![], vec![]);
        let limits = EpisodeLimits {
            wall_clock: Duration::ZERO,
        };

        let outcome = run_episode(&Profile::default(), &mut state, &generator, &executor, limits, |_| {});

        assert_eq!(outcome.stop, StopReason::WallClock);
        assert_eq!(outcome.rounds, 0);
        assert!(outcome.records.is_empty());
    }

    #[test]
    fn scripted_fix_reaches_done() {
        let repo = TestRepo::new();
        repo.commit_file("src/calc.py", "def f(x):\n    return x + 1\n");
        let mut state = repo.state("f should double its input");
        let diff = "--- a/src/calc.py\n+++ b/src/calc.py\n@@ -1,2 +1,2 @@\n def f(x):\n-    return x + 1\n+    return x * 2\n";
        let (generator, executor) = parts(
            vec![
                json!({"mode": "tool_request", "requests": [{"tool": "grep", "args": {"query": "def f"}}]}),
                json!({"mode": "tool_request", "requests": [{"tool": "read", "args": {"path": "src/calc.py"}}]}),
                json!({"mode": "patch", "diff": diff, "why": "double"}),
                json!({"mode": "tool_request", "requests": [{"tool": "run_tests", "args": {}}]}),
                json!({"mode": "feature_summary", "summary": "f doubles", "completion_status": "complete"}),
            ],
            vec![ScriptedTestRunner::passing()],
        );

        let mut seen = Vec::new();
        let outcome = run_episode(&Profile::default(), &mut state, &generator, &executor, LIMITS, |record| {
            seen.push(record.phase);
        });

        assert_eq!(outcome.stop, StopReason::Done);
        assert!(outcome.solved);
        assert_eq!(outcome.rounds, 5);
        assert_eq!(
            seen,
            vec![Phase::Ingest, Phase::Localize, Phase::Plan, Phase::TestStage, Phase::Finalize]
        );
        assert_eq!(outcome.budget.patch_attempts, 1);
        assert_eq!(outcome.budget.test_runs, 1);
        assert_eq!(repo.read("src/calc.py"), "def f(x):\n    return x * 2\n");
    }
}
