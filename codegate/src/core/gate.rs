//! Admission control for proposals.
//!
//! `gate` is pure: it reads the profile, state and proposal and returns a
//! decision. It never touches the budget, so calling it repeatedly with the
//! same inputs yields the same decision.

use crate::core::diff::parse_diff;
use crate::core::phase::{allowed_kinds, format_kinds};
use crate::core::types::{AgentState, GateDecision, Profile, Proposal, ProposalInputs, ProposalKind};

/// Directory prefixes an edit may never touch.
pub const FORBIDDEN_DIRS: &[&str] = &[
    "vendor/",
    "node_modules/",
    ".venv/",
    "dist/",
    "build/",
    "target/",
    ".git/",
];

/// Check a proposal against phase, budget, file and test-modification rules,
/// in that order. The first violation wins.
pub fn gate(profile: &Profile, state: &AgentState, proposal: &Proposal) -> GateDecision {
    let kind = proposal.kind();

    let allowed = allowed_kinds(state.phase);
    if !allowed.contains(&kind) {
        return GateDecision::reject(format!(
            "Action '{kind}' not allowed in phase {}. Allowed: {}",
            state.phase,
            format_kinds(allowed)
        ));
    }

    if let Some(reason) = budget_violation(profile, state, kind) {
        return GateDecision::reject(reason);
    }

    if let ProposalInputs::Edit { diff, .. } = &proposal.inputs {
        let targets = proposal.edit_targets();
        if let Some(reason) = file_violation(profile, &targets, diff) {
            return GateDecision::reject(reason);
        }
        if profile.forbid_test_modifications
            && let Some(path) = targets.iter().find(|path| looks_like_test_path(path))
        {
            return GateDecision::reject(format!("Test modification forbidden by profile: {path}"));
        }
    }

    GateDecision::accept()
}

fn budget_violation(profile: &Profile, state: &AgentState, kind: ProposalKind) -> Option<String> {
    let budget = &state.budget;
    match kind {
        ProposalKind::RunTests if budget.test_runs >= profile.max_test_runs => Some(format!(
            "Test budget exhausted ({}/{})",
            budget.test_runs, profile.max_test_runs
        )),
        ProposalKind::Edit if budget.patch_attempts >= profile.max_patch_attempts => Some(format!(
            "Patch budget exhausted ({}/{})",
            budget.patch_attempts, profile.max_patch_attempts
        )),
        _ => None,
    }
}

fn file_violation(profile: &Profile, targets: &[String], diff: &str) -> Option<String> {
    if targets.len() > profile.max_files_touched {
        return Some(format!(
            "Too many files ({} > {})",
            targets.len(),
            profile.max_files_touched
        ));
    }

    for path in targets {
        if let Some(forbidden) = forbidden_prefix(path) {
            return Some(format!("Cannot edit forbidden directory: {forbidden} ({path})"));
        }
    }

    let changed = parse_diff(diff).changed_lines();
    if changed > profile.max_diff_lines {
        return Some(format!(
            "Diff too large ({changed} > {} lines)",
            profile.max_diff_lines
        ));
    }

    None
}

/// The denylisted prefix `path` falls under, matched at the start of the path
/// or after any `/`.
pub fn forbidden_prefix(path: &str) -> Option<&'static str> {
    let path = path.trim_start_matches("./");
    FORBIDDEN_DIRS
        .iter()
        .copied()
        .find(|dir| path.starts_with(dir) || path.contains(&format!("/{dir}")))
}

/// True for paths that look like tests: "test" anywhere (any case) or a `tests/` directory.
pub fn looks_like_test_path(path: &str) -> bool {
    let path = path.trim_start_matches("./");
    path.to_ascii_lowercase().contains("test") || path.starts_with("tests/")
}
