//! Checklist-driven agent pipeline.
//!
//! Pending `- [ ]` entries of a Markdown checklist are handed, one at a time,
//! to a coding agent. Each successful task is marked `- [x]` in the checklist
//! and committed before the next one starts.
//!
//! - **[`core`]**: Pure, deterministic logic (extraction, failure
//!   classification, backoff schedule, commit subjects). No I/O.
//! - **[`io`]**: Side-effecting operations (checklist file, git, agent
//!   processes, config). Exposed through traits so tests can substitute fakes.
//!
//! [`retry`] and [`pipeline`] coordinate the two and own the only async
//! suspension point: the cancellable backoff wait.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod report;
pub mod retry;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
