//! Context bundle rendered for the suggestion backend each round.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::types::{AgentState, LocalizationHit, Phase, Profile, TestFailure};

const CONTEXT_TEMPLATE: &str = include_str!("prompts/context.md");

pub const DEFAULT_CONTEXT_BUDGET_BYTES: usize = 60_000;

const MAX_FILES_SHOWN: usize = 3;
const MAX_LINES_PER_FILE: usize = 150;
const MAX_HISTORY_SHOWN: usize = 8;
const MAX_HITS_SHOWN: usize = 10;
const MAX_FILES_READ_SHOWN: usize = 10;
const MAX_FAILURES_SHOWN: usize = 3;
const MAX_FAILURE_MESSAGE_CHARS: usize = 100;

const INGEST_INSTRUCTION: &str = "INSTRUCTION: Parse the problem statement carefully.
- Identify the bug or feature request
- Note any file paths, function names or class names it mentions
- Output: tool_request to read the most relevant file";

const LOCALIZE_INSTRUCTION: &str = "INSTRUCTION: Find the exact code location that needs to change.
- Search for the functions, classes or patterns named in the problem
- Read specific source files to understand the code structure
- Do not settle for README files; find the actual code
- Output: tool_request with a search for specific terms from the problem";

const PLAN_INSTRUCTION: &str = "INSTRUCTION: Plan the minimal fix.
- Based on localization, identify exactly what needs to change
- Consider edge cases
- Output: keep inspecting if needed, or move on to a patch";

const PATCH_INSTRUCTION: &str = r#"YOU MUST NOW GENERATE A PATCH. Output exactly this JSON shape:

{"mode": "patch", "diff": "--- a/filename.py\n+++ b/filename.py\n@@ -line,count +line,count @@\n context line\n-removed line\n+added line\n context line", "why": "explanation"}

Rules:
1. Edit source files only, never test files. Fix the implementation under test.
2. Output mode "patch"; no other mode is accepted in this phase.
3. Removed lines must differ from added lines.
4. Use \n for newlines inside the JSON string.
5. Match the exact whitespace of the file contents shown above.

Example:
{"mode": "patch", "diff": "--- a/src/utils.py\n+++ b/src/utils.py\n@@ -10,3 +10,3 @@\n def foo():\n-    return x + 1\n+    return x * 2\n", "why": "Fixed operator"}"#;

const TEST_INSTRUCTION: &str = "INSTRUCTION: Run tests to verify the fix.
- Run the specific test named in the problem if there is one
- Otherwise run the relevant test suite
- Output: tool_request with a run_tests tool";

const DIAGNOSE_INSTRUCTION: &str = "INSTRUCTION: Work out why the tests fail.
- Review the failures listed below
- Identify what went wrong with the patch
- Output: tool_request to read the failing test or the patched code, or a new patch";

const MINIMIZE_INSTRUCTION: &str = "INSTRUCTION: Make sure the patch is minimal.
- Remove unnecessary changes
- Verify the tests still pass
- Output: a final patch or a tool_request to run tests";

const FINALIZE_INSTRUCTION: &str = r#"INSTRUCTION: Finalize the solution.
- Confirm the tests pass
- Output: {"mode": "feature_summary", "summary": "...", "completion_status": "complete"}"#;

/// Per-phase guidance shown to the suggestion backend.
pub fn phase_instruction(phase: Phase) -> &'static str {
    match phase {
        Phase::Ingest => INGEST_INSTRUCTION,
        Phase::Localize => LOCALIZE_INSTRUCTION,
        Phase::Plan => PLAN_INSTRUCTION,
        Phase::PatchCandidates => PATCH_INSTRUCTION,
        Phase::TestStage => TEST_INSTRUCTION,
        Phase::Diagnose => DIAGNOSE_INSTRUCTION,
        Phase::Minimize => MINIMIZE_INSTRUCTION,
        Phase::Finalize => FINALIZE_INSTRUCTION,
        Phase::Done => "Proceed with the task.",
    }
}

#[derive(Debug, Clone, Serialize)]
struct NumberedFile {
    path: String,
    numbered: String,
}

fn number_lines(content: &str) -> String {
    content
        .split('\n')
        .take(MAX_LINES_PER_FILE)
        .enumerate()
        .map(|(idx, line)| format!("{:4}: {line}", idx + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn build_environment() -> Result<Environment<'static>> {
    let mut env = Environment::new();
    env.add_template("context", CONTEXT_TEMPLATE)
        .context("load context template")?;
    Ok(env)
}

/// A section of rendered output, delimited by `<!-- section:KEY required|droppable -->`.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    use std::sync::LazyLock;
    static SECTION_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
        regex::Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
            .expect("section marker regex")
    });

    let markers: Vec<(usize, usize, String, bool)> = SECTION_RE
        .captures_iter(rendered)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some((
                whole.start(),
                whole.end(),
                caps.get(1)?.as_str().to_string(),
                caps.get(2)?.as_str() == "required",
            ))
        })
        .collect();

    let mut sections = Vec::new();
    for (idx, (_, body_start, key, required)) in markers.iter().enumerate() {
        let body_end = markers
            .get(idx + 1)
            .map_or(rendered.len(), |(next_start, ..)| *next_start);
        let content = rendered[*body_start..body_end].trim().to_string();
        if !content.is_empty() || *required {
            sections.push(ParsedSection {
                key: key.clone(),
                required: *required,
                content,
            });
        }
    }
    sections
}

/// Drop droppable sections, least useful first, until the bundle fits.
///
/// Required sections always stay even if the result is still over budget.
fn apply_budget(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total = |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in ["read", "hits", "history", "failures", "reject", "files"] {
        if total(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped context section for budget"
            );
            sections.remove(idx);
        }
    }
}

/// Renders the per-round context bundle within a byte budget.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    budget_bytes: usize,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_BUDGET_BYTES)
    }
}

impl ContextBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn render(&self, profile: &Profile, state: &AgentState) -> Result<String> {
        let notes = &state.notes;
        let files: Vec<NumberedFile> = notes
            .last_file_contents
            .iter()
            .take(MAX_FILES_SHOWN)
            .map(|snapshot| NumberedFile {
                path: snapshot.path.clone(),
                numbered: number_lines(&snapshot.content),
            })
            .collect();
        let history: Vec<String> = notes
            .action_history
            .iter()
            .skip(notes.action_history.len().saturating_sub(MAX_HISTORY_SHOWN))
            .map(ToString::to_string)
            .collect();
        let hits: Vec<&LocalizationHit> =
            state.localization_hits.iter().take(MAX_HITS_SHOWN).collect();
        let files_read: Vec<&String> = notes
            .files_read
            .iter()
            .skip(notes.files_read.len().saturating_sub(MAX_FILES_READ_SHOWN))
            .collect();
        let failures: Vec<TestFailure> = state
            .last_failures
            .iter()
            .take(MAX_FAILURES_SHOWN)
            .map(|failure| TestFailure {
                nodeid: failure.nodeid.clone(),
                message: truncate_chars(&failure.message, MAX_FAILURE_MESSAGE_CHARS),
            })
            .collect();

        let env = build_environment()?;
        let template = env.get_template("context").context("get context template")?;
        let rendered = template
            .render(context! {
                problem => notes.problem_statement.trim(),
                files => files,
                phase => state.phase.as_str(),
                instruction => phase_instruction(state.phase),
                budget => state.budget,
                profile => profile,
                history => history,
                hits => hits,
                files_read => files_read,
                failures => failures,
                last_gate_reject => notes.last_gate_reject.as_deref(),
            })
            .context("render context template")?;

        let mut sections = parse_sections(&rendered);
        apply_budget(&mut sections, self.budget_bytes);
        Ok(sections
            .iter()
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ActionRecord, FileSnapshot, HitKind, SearchOrigin};

    fn rich_state() -> AgentState {
        let mut state = AgentState::new("/repo", "calc doubles wrong");
        state.phase = Phase::PatchCandidates;
        state.budget.round_idx = 4;
        state.notes.last_file_contents.push(FileSnapshot {
            path: "src/calc.py".to_string(),
            content: "def f(x):\n    return x + 1\n".to_string(),
        });
        state.notes.files_read.push("src/calc.py".to_string());
        state.notes.last_gate_reject = Some("Diff too large (300 > 200 lines)".to_string());
        for idx in 0..12 {
            state.notes.action_history.push(ActionRecord::Search {
                query: format!("term{idx}"),
                origin: SearchOrigin::Requested,
            });
        }
        state.localization_hits.push(LocalizationHit {
            file: "src/calc.py".to_string(),
            reason: "match for 'calc'".to_string(),
            kind: HitKind::Search,
        });
        state.last_failures.push(TestFailure {
            nodeid: "tests/test_calc.py::test_f".to_string(),
            message: "x".repeat(300),
        });
        state
    }

    #[test]
    fn renders_sections_in_order() {
        let rendered = ContextBuilder::default()
            .render(&Profile::default(), &rich_state())
            .expect("render");

        let task = rendered.find("# TASK").expect("task");
        let files = rendered.find("## src/calc.py").expect("files");
        let phase = rendered.find("# CURRENT PHASE: patch_candidates").expect("phase");
        let budget = rendered.find("- Round: 4/50").expect("budget");
        let history = rendered.find("# ACTIONS ALREADY TAKEN").expect("history");
        let reject = rendered.find("# LAST GATE REJECTION: Diff too large").expect("reject");
        assert!(task < files && files < phase && phase < budget && budget < history);
        assert!(history < reject);
        assert!(rendered.contains("   2:     return x + 1"));
    }

    #[test]
    fn windows_history_and_truncates_failures() {
        let rendered = ContextBuilder::default()
            .render(&Profile::default(), &rich_state())
            .expect("render");
        assert!(!rendered.contains("Search: term3\n"));
        assert!(rendered.contains("- Search: term4"));
        assert!(rendered.contains("- Search: term11"));
        assert!(rendered.contains(&format!("test_f: {}", "x".repeat(100))));
        assert!(!rendered.contains(&"x".repeat(101)));
    }

    #[test]
    fn empty_sections_are_omitted() {
        let state = AgentState::new("/repo", "problem");
        let rendered = ContextBuilder::default()
            .render(&Profile::default(), &state)
            .expect("render");
        assert!(rendered.starts_with("# TASK\nproblem"));
        assert!(!rendered.contains("FILE CONTENTS"));
        assert!(!rendered.contains("LAST GATE REJECTION"));
        assert!(rendered.contains("# CURRENT PHASE: ingest"));
    }

    #[test]
    fn budget_drops_droppable_sections_first() {
        let rendered = ContextBuilder::new(200)
            .render(&Profile::default(), &rich_state())
            .expect("render");
        assert!(rendered.contains("# TASK"));
        assert!(rendered.contains("# BUDGET STATUS"));
        assert!(!rendered.contains("# ACTIONS ALREADY TAKEN"));
        assert!(!rendered.contains("FILE CONTENTS"));
    }

    #[test]
    fn every_phase_has_an_instruction() {
        for phase in Phase::ALL {
            assert!(!phase_instruction(phase).is_empty());
        }
        assert!(phase_instruction(Phase::PatchCandidates).contains("\"mode\": \"patch\""));
    }
}
