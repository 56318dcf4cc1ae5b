//! Stable exit codes for runner CLI commands.

/// Every pending task completed (or there were none).
pub const OK: i32 = 0;
/// Invalid invocation, config, checklist or repository state.
pub const INVALID: i32 = 1;
/// A task failed and the run stopped; earlier tasks stay committed.
pub const HALTED: i32 = 2;
/// The run was interrupted while waiting to retry.
pub const CANCELLED: i32 = 3;
