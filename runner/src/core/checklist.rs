//! Checklist parsing: pending tasks and marker counts.
//!
//! A checklist is plain text. Pending tasks start with `- [ ] `, completed ones
//! with `- [x] ` or `- [X] `. Indented lines directly below a pending task are
//! continuation lines of that task.

use std::io::BufRead;

use anyhow::{Context, Result};

use crate::core::types::{ChecklistStats, Task};

pub const PENDING_MARKER: &str = "- [ ] ";
pub const COMPLETED_MARKERS: [&str; 2] = ["- [x] ", "- [X] "];

/// Classification of a single checklist line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Line<'a> {
    Pending(&'a str),
    Completed,
    Continuation(&'a str),
    Other,
}

fn classify_line(line: &str) -> Line<'_> {
    if let Some(rest) = line.strip_prefix(PENDING_MARKER) {
        return Line::Pending(rest);
    }
    if COMPLETED_MARKERS.iter().any(|m| line.starts_with(m)) {
        return Line::Completed;
    }
    if line.starts_with([' ', '\t']) {
        return Line::Continuation(line.trim_start());
    }
    Line::Other
}

/// Extract pending tasks in document order.
///
/// An empty document yields an empty list. Read failures (including invalid
/// UTF-8) are returned as errors; no partial result is produced.
pub fn extract_tasks<R: BufRead>(reader: R) -> Result<Vec<Task>> {
    let mut tasks = Vec::new();
    let mut current: Option<Task> = None;

    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("read checklist line {}", idx + 1))?;
        match classify_line(&line) {
            Line::Pending(rest) => {
                tasks.extend(current.take());
                current = Some(Task::new(rest, idx + 1));
            }
            Line::Continuation(text) if current.is_some() => {
                if let Some(task) = current.as_mut() {
                    task.description.push('\n');
                    task.description.push_str(text);
                }
            }
            Line::Completed | Line::Continuation(_) | Line::Other => {
                tasks.extend(current.take());
            }
        }
    }
    tasks.extend(current);

    Ok(tasks)
}

/// Count pending and completed marker lines.
pub fn checklist_stats<R: BufRead>(reader: R) -> Result<ChecklistStats> {
    let mut stats = ChecklistStats::default();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("read checklist line {}", idx + 1))?;
        match classify_line(&line) {
            Line::Pending(_) => stats.pending += 1,
            Line::Completed => stats.completed += 1,
            Line::Continuation(_) | Line::Other => {}
        }
    }
    Ok(stats)
}
