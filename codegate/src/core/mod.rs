//! Deterministic, pure logic shared by the agent core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod diff;
pub mod fallback;
pub mod gate;
pub mod identifiers;
pub mod path;
pub mod phase;
pub mod suggestion;
pub mod test_output;
pub mod textual;
pub mod types;
