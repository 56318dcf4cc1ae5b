//! I/O helpers for runner commands.

pub mod agent;
pub mod checklist;
pub mod config;
pub mod git;
pub mod process;
pub mod prompt;
