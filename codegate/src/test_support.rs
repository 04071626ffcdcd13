//! Test-only fixtures: state builders, scripted backends and scratch git repos.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde_json::Value;
use tempfile::TempDir;

use crate::core::types::{AgentState, Phase};
use crate::io::git::Git;
use crate::io::suggest::Suggester;
use crate::io::test_runner::{TestRequest, TestRun, TestRunner};

/// A state in `phase` for a problem with no code identifiers.
pub fn state_in(phase: Phase) -> AgentState {
    let mut state = AgentState::new("/repo", "the calculator returns the wrong value");
    state.phase = phase;
    state
}

/// Suggester returning queued responses in order, then erroring.
pub struct ScriptedSuggester {
    responses: RefCell<VecDeque<Value>>,
    contexts: RefCell<Vec<String>>,
}

impl ScriptedSuggester {
    pub fn new(responses: Vec<Value>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            contexts: RefCell::new(Vec::new()),
        }
    }

    /// Contexts received so far.
    pub fn contexts(&self) -> Vec<String> {
        self.contexts.borrow().clone()
    }
}

impl Suggester for ScriptedSuggester {
    fn suggest(&self, context: &str, _temperature: f32) -> Result<Value> {
        self.contexts.borrow_mut().push(context.to_string());
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted suggester exhausted"))
    }
}

/// Test runner returning queued runs in order, then erroring.
pub struct ScriptedTestRunner {
    runs: RefCell<VecDeque<TestRun>>,
    commands: RefCell<Vec<Vec<String>>>,
}

impl ScriptedTestRunner {
    pub fn new(runs: Vec<TestRun>) -> Self {
        Self {
            runs: RefCell::new(runs.into()),
            commands: RefCell::new(Vec::new()),
        }
    }

    /// argv of every request seen so far.
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.commands.borrow().clone()
    }

    pub fn passing() -> TestRun {
        TestRun {
            passed: true,
            exit_code: Some(0),
            stdout: "1 passed\n".to_string(),
            stderr: String::new(),
            timed_out: false,
        }
    }

    pub fn failing(stdout: &str) -> TestRun {
        TestRun {
            passed: false,
            exit_code: Some(1),
            stdout: stdout.to_string(),
            stderr: String::new(),
            timed_out: false,
        }
    }

    pub fn timed_out() -> TestRun {
        TestRun {
            passed: false,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: true,
        }
    }
}

impl TestRunner for ScriptedTestRunner {
    fn run(&self, request: &TestRequest) -> Result<TestRun> {
        self.commands.borrow_mut().push(request.command.clone());
        self.runs
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted test runner exhausted"))
    }
}

/// Scratch git repository in a temp dir. Panics on setup failure.
pub struct TestRepo {
    temp: TempDir,
    git: Git,
}

impl TestRepo {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = Git::new(temp.path(), Duration::from_secs(30));
        git.init().expect("git init");
        Self { temp, git }
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn write_file(&self, rel: &str, content: &str) {
        let path = self.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, content).expect("write file");
    }

    /// Write and commit one file.
    pub fn commit_file(&self, rel: &str, content: &str) {
        self.write_file(rel, content);
        self.git.add_all().expect("git add");
        self.git.commit(&format!("add {rel}")).expect("git commit");
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.path().join(rel)).expect("read file")
    }

    pub fn state(&self, problem: &str) -> AgentState {
        AgentState::new(self.path(), problem)
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}
