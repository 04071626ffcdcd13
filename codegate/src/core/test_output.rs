//! Failure extraction from test-runner stdout.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::TestFailure;

pub const MAX_FAILURES: usize = 5;

static FAILED_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"FAILED\s+(\S+)(?:\s+-\s+(.*))?").expect("failed line regex"));

/// Collect up to [`MAX_FAILURES`] failures from lines containing `FAILED`.
///
/// pytest summary lines (`FAILED tests/x.py::test_a - AssertionError`) yield
/// the node id and message separately; any other line is kept whole for both.
pub fn parse_failures(stdout: &str) -> Vec<TestFailure> {
    stdout
        .lines()
        .filter(|line| line.contains("FAILED"))
        .take(MAX_FAILURES)
        .map(|line| {
            let line = line.trim();
            match FAILED_LINE.captures(line) {
                Some(caps) => TestFailure {
                    nodeid: caps[1].to_string(),
                    message: caps
                        .get(2)
                        .map_or_else(|| line.to_string(), |m| m.as_str().trim().to_string()),
                },
                None => TestFailure {
                    nodeid: line.to_string(),
                    message: line.to_string(),
                },
            }
        })
        .collect()
}
