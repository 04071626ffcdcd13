//! Deterministic proposals for rounds where no usable suggestion exists.
//!
//! The rules only look at the state, so the same state always yields the same
//! proposal. The caller appends the returned record to the action history,
//! which is what moves the heuristics forward from round to round.

use crate::core::identifiers::extract_code_identifiers;
use crate::core::types::{ActionRecord, AgentState, Phase, Proposal, ReadOrigin, SearchOrigin};

/// Broad searches tried once code identifiers run out.
pub const FALLBACK_TERMS: [&str; 3] = ["def ", "class ", "import "];
pub const GENERIC_TERM: &str = "error";

fn or_default(why: &str, default: impl FnOnce() -> String) -> String {
    if why.trim().is_empty() {
        default()
    } else {
        why.to_string()
    }
}

/// Pick the next action from phase and notes alone.
///
/// `why` becomes the rationale when it is non-empty, except for the forced
/// edit, fallback searches and forced finalize, whose rationales are fixed.
pub fn infer_proposal(state: &AgentState, why: &str) -> (Proposal, ActionRecord) {
    let notes = &state.notes;
    let phase = state.phase;

    if phase == Phase::PatchCandidates
        && !notes.files_read.is_empty()
        && let Some(snapshot) = notes.last_file_contents.first()
    {
        let file = snapshot.path.clone();
        return (
            Proposal::edit(
                "Generating patch based on analyzed file contents",
                "",
                vec![file.clone()],
            ),
            ActionRecord::ForcedEdit { file },
        );
    }

    if matches!(phase, Phase::Localize | Phase::Plan)
        && let Some(term) = extract_code_identifiers(&notes.problem_statement)
            .into_iter()
            .find(|term| !notes.has_searched(term))
    {
        return (
            Proposal::search(or_default(why, || format!("Search for code term: {term}")), &term),
            ActionRecord::Search {
                query: term,
                origin: SearchOrigin::Inferred,
            },
        );
    }

    if let Some(hit) = state
        .localization_hits
        .iter()
        .rev()
        .find(|hit| !hit.file.is_empty() && !notes.files_read.contains(&hit.file))
    {
        let file = hit.file.clone();
        return (
            Proposal::inspect_files(
                or_default(why, || format!("Read localized file: {file}")),
                vec![file.clone()],
            ),
            ActionRecord::Read {
                path: file,
                origin: ReadOrigin::Inferred,
            },
        );
    }

    if matches!(phase, Phase::Localize | Phase::Plan | Phase::PatchCandidates)
        && let Some(term) = FALLBACK_TERMS.iter().find(|term| !notes.has_searched(term))
    {
        return (
            Proposal::search(format!("Searching for {} patterns", term.trim()), *term),
            ActionRecord::Search {
                query: (*term).to_string(),
                origin: SearchOrigin::Fallback,
            },
        );
    }

    if notes.problem_statement_reads() < 1 {
        return (
            Proposal::inspect_problem_statement(or_default(why, || {
                "Review problem statement".to_string()
            })),
            ActionRecord::ReadProblemStatement,
        );
    }

    if matches!(phase, Phase::PatchCandidates | Phase::Plan) {
        return (
            Proposal::finalize(
                "Exhausted search options",
                "Could not generate a valid patch",
                "incomplete",
            ),
            ActionRecord::ForcedFinalize,
        );
    }

    (
        Proposal::search("Searching for error patterns", GENERIC_TERM),
        ActionRecord::Search {
            query: GENERIC_TERM.to_string(),
            origin: SearchOrigin::Generic,
        },
    )
}
