//! Proposal-gate-execute core of a code-repair agent.
//!
//! Each round the agent proposes one action, a policy gate admits or rejects
//! it, and admitted actions run against a working tree:
//!
//! - **[`core`]**: Pure, deterministic logic (phases, gate, diff validation,
//!   textual edit strategies, fallback heuristics). No I/O.
//! - **[`io`]**: Side-effecting operations (processes, git, search, config,
//!   suggestion backends). Isolated behind traits so tests can script them.
//!
//! Orchestration modules ([`propose`], [`execute`], [`episode`]) combine the two
//! into a task episode.

pub mod core;
pub mod episode;
pub mod execute;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod propose;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
