//! Static phase policy: which proposal kinds are legal in each phase, and how
//! the round loop moves between phases.

use crate::core::types::{ExecStatus, Phase, ProposalKind};

use ProposalKind::{Edit, Finalize, Inspect, RunTests, Search};

/// Fallback set for phase names that do not parse.
pub const CONSERVATIVE_KINDS: &[ProposalKind] = &[Inspect];

/// Kinds a proposal may have while the task is in `phase`.
pub fn allowed_kinds(phase: Phase) -> &'static [ProposalKind] {
    match phase {
        Phase::Ingest | Phase::Localize => &[Inspect, Search],
        Phase::Plan => &[Inspect, Search, Edit],
        Phase::PatchCandidates => &[Edit, Inspect, Search],
        Phase::TestStage => &[RunTests, Inspect],
        Phase::Diagnose => &[Inspect, Search, Edit],
        Phase::Minimize => &[Edit, Inspect, RunTests],
        Phase::Finalize => &[Finalize, RunTests],
        Phase::Done => &[],
    }
}

/// Like [`allowed_kinds`], keyed by phase name. Unknown names get [`CONSERVATIVE_KINDS`].
pub fn allowed_kinds_for_name(name: &str) -> &'static [ProposalKind] {
    Phase::parse(name).map_or(CONSERVATIVE_KINDS, allowed_kinds)
}

pub fn is_allowed(phase: Phase, kind: ProposalKind) -> bool {
    allowed_kinds(phase).contains(&kind)
}

/// Render a kind set as `[a, b]`.
pub fn format_kinds(kinds: &[ProposalKind]) -> String {
    let names: Vec<&str> = kinds.iter().map(|kind| kind.as_str()).collect();
    format!("[{}]", names.join(", "))
}

/// What the round loop knows after executing an admitted proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundSignal {
    pub kind: ProposalKind,
    pub status: ExecStatus,
    /// True once any file has been read successfully during the task.
    pub has_read_files: bool,
}

/// Phase to enter after an executed round. Rejected rounds keep their phase.
pub fn next_phase(phase: Phase, signal: RoundSignal) -> Phase {
    let ok = signal.status == ExecStatus::Ok;
    match (phase, signal.kind) {
        (Phase::Done, _) => Phase::Done,
        (Phase::Ingest, _) => Phase::Localize,
        (Phase::Localize, _) if signal.has_read_files => Phase::Plan,
        (Phase::Localize, _) => Phase::Localize,
        (Phase::Plan | Phase::PatchCandidates | Phase::Diagnose | Phase::Minimize, Edit) if ok => {
            Phase::TestStage
        }
        (Phase::Plan, _) => Phase::PatchCandidates,
        (Phase::TestStage | Phase::Minimize, RunTests) if ok => Phase::Finalize,
        (Phase::TestStage | Phase::Minimize | Phase::Finalize, RunTests) => Phase::Diagnose,
        (Phase::Finalize, Finalize) => Phase::Done,
        (other, _) => other,
    }
}
