//! Deterministic, pure logic shared by the runner.
//!
//! Core modules must be free of filesystem, process and clock side effects.
//! They operate on in-memory data (or a caller-provided reader) and return
//! deterministic outputs suitable for tests; backoff jitter takes its RNG as a
//! parameter.

pub mod backoff;
pub mod checklist;
pub mod classifier;
pub mod summary;
pub mod types;
