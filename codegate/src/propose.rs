//! Proposal generation: suggestion first, heuristics when it is unusable.

use tracing::{debug, info, instrument, warn};

use crate::core::diff::header_files;
use crate::core::fallback::infer_proposal;
use crate::core::suggestion::{Suggestion, ToolRequest, parse_suggestion};
use crate::core::types::{ActionRecord, AgentState, Profile, Proposal, ReadOrigin, SearchOrigin};
use crate::io::prompt::ContextBuilder;
use crate::io::suggest::Suggester;

const SEARCH_TOOLS: &[&str] = &["grep", "search", "find", "rg"];
const READ_TOOLS: &[&str] = &["read", "cat", "view"];
const TEST_TOOLS: &[&str] = &["test", "pytest", "run"];
const DEFAULT_TEST_LABEL: &str = "configured test command";

pub struct ProposalGenerator<S: Suggester> {
    suggester: S,
    context: ContextBuilder,
    temperature: f32,
}

impl<S: Suggester> ProposalGenerator<S> {
    pub fn new(suggester: S, context: ContextBuilder, temperature: f32) -> Self {
        Self {
            suggester,
            context,
            temperature,
        }
    }

    /// Produce exactly one proposal and append its record to the history.
    ///
    /// Never fails: any problem with the suggestion path yields a heuristic proposal.
    #[instrument(skip_all, fields(phase = %state.phase.as_str(), round = state.budget.round_idx))]
    pub fn propose(&self, profile: &Profile, state: &mut AgentState) -> Proposal {
        let (proposal, record) = match self.suggest(profile, state) {
            Ok(suggestion) => from_suggestion(state, suggestion),
            Err(reason) => {
                warn!(reason = %reason, "suggestion unusable, using heuristics");
                infer_proposal(state, "")
            }
        };
        debug!(record = %record, "proposal generated");
        state.notes.action_history.push(record);
        proposal
    }

    fn suggest(&self, profile: &Profile, state: &AgentState) -> Result<Suggestion, String> {
        let context = self
            .context
            .render(profile, state)
            .map_err(|err| format!("render context: {err:#}"))?;
        let raw = self
            .suggester
            .suggest(&context, self.temperature)
            .map_err(|err| format!("suggest: {err:#}"))?;
        parse_suggestion(raw)
    }
}

fn or_default(why: String, default: &str) -> String {
    if why.trim().is_empty() {
        default.to_string()
    } else {
        why
    }
}

fn from_suggestion(state: &AgentState, suggestion: Suggestion) -> (Proposal, ActionRecord) {
    match suggestion {
        Suggestion::Patch { diff, why } => {
            let files = header_files(&diff);
            info!(files = files.len(), "suggested patch");
            (
                Proposal::edit(or_default(why, "Generated patch"), diff, files.clone()),
                ActionRecord::Patch { files },
            )
        }
        Suggestion::ToolRequest { requests, why } => match requests.first() {
            Some(request) => from_tool_request(state, request, why),
            None => infer_proposal(state, &why),
        },
        Suggestion::FeatureSummary {
            summary,
            completion_status,
            why,
        } => (
            Proposal::finalize(or_default(why, "Task complete"), summary, completion_status),
            ActionRecord::Finalize,
        ),
    }
}

fn from_tool_request(
    state: &AgentState,
    request: &ToolRequest,
    why: String,
) -> (Proposal, ActionRecord) {
    if request.tool_matches(SEARCH_TOOLS) {
        let Some(query) = request.arg(&["query", "pattern"]).filter(|q| !q.is_empty()) else {
            return infer_proposal(state, &why);
        };
        return (
            Proposal::search(or_default(why, "Search requested"), query),
            ActionRecord::Search {
                query: query.to_string(),
                origin: SearchOrigin::Requested,
            },
        );
    }

    if request.tool_matches(READ_TOOLS) {
        return read_request(state, request, why);
    }

    if request.tool_matches(TEST_TOOLS) {
        let command = request
            .arg(&["command", "cmd"])
            .filter(|c| !c.trim().is_empty())
            .map(str::to_string);
        let label = command.clone().unwrap_or_else(|| DEFAULT_TEST_LABEL.to_string());
        return (
            Proposal::run_tests(or_default(why, "Run tests"), command),
            ActionRecord::RunTests { command: label },
        );
    }

    if request.arg(&["path"]).is_some() {
        return read_request(state, request, why);
    }
    debug!(tool = %request.tool, "unrecognized tool");
    infer_proposal(state, &why)
}

fn read_request(state: &AgentState, request: &ToolRequest, why: String) -> (Proposal, ActionRecord) {
    let Some(path) = request.arg(&["path", "file"]).filter(|p| !p.is_empty()) else {
        return infer_proposal(state, &why);
    };
    if state.notes.files_read.iter().any(|read| read == path) {
        return infer_proposal(state, &format!("Already read {path}, trying search"));
    }
    (
        Proposal::inspect_files(or_default(why, "Read requested file"), vec![path.to_string()]),
        ActionRecord::Read {
            path: path.to_string(),
            origin: ReadOrigin::Requested,
        },
    )
}
