//! Checklist file access: loading tasks and flipping completion markers.
//!
//! The checklist on disk is the only durable task state. Marking a task only
//! rewrites the byte inside `[ ]`, so line numbers recorded at load time stay
//! valid for the whole run.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

use crate::core::checklist::{PENDING_MARKER, checklist_stats, extract_tasks};
use crate::core::types::{ChecklistStats, Task};

/// Load pending tasks from the checklist at `path`.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_tasks(path: &Path) -> Result<Vec<Task>> {
    let file = File::open(path).with_context(|| format!("open checklist {}", path.display()))?;
    let tasks = extract_tasks(BufReader::new(file))
        .with_context(|| format!("parse checklist {}", path.display()))?;
    debug!(pending = tasks.len(), "loaded checklist");
    Ok(tasks)
}

/// Count pending and completed tasks in the checklist at `path`.
pub fn load_stats(path: &Path) -> Result<ChecklistStats> {
    let file = File::open(path).with_context(|| format!("open checklist {}", path.display()))?;
    checklist_stats(BufReader::new(file))
        .with_context(|| format!("parse checklist {}", path.display()))
}

/// Why a completion marker could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarkerError {
    #[error("invalid position")]
    InvalidPosition,
    #[error("document is empty")]
    DocumentEmpty,
    #[error("position exceeds document length (line {position}, document has {lines})")]
    PositionOutOfRange { position: usize, lines: usize },
    #[error("not a pending task (line {position})")]
    NotPending { position: usize },
}

/// Flips a pending task to completed in the checklist document.
pub trait CompletionMarker {
    fn mark_complete(&self, path: &Path, position: usize) -> Result<()>;
}

impl<T: CompletionMarker + ?Sized> CompletionMarker for &T {
    fn mark_complete(&self, path: &Path, position: usize) -> Result<()> {
        (**self).mark_complete(path, position)
    }
}

/// [`CompletionMarker`] that edits the checklist file in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChecklistMarker;

impl CompletionMarker for ChecklistMarker {
    #[instrument(skip_all, fields(path = %path.display(), position))]
    fn mark_complete(&self, path: &Path, position: usize) -> Result<()> {
        let mut bytes =
            fs::read(path).with_context(|| format!("read checklist {}", path.display()))?;
        mark_line_complete(&mut bytes, position)?;
        write_atomic(path, &bytes)?;
        debug!("marked task complete");
        Ok(())
    }
}

/// Set the bracket interior of the 1-based line `position` from ` ` to `x`.
///
/// Everything else, including line endings and trailing whitespace, is left
/// byte-for-byte intact.
pub fn mark_line_complete(bytes: &mut [u8], position: usize) -> Result<(), MarkerError> {
    if position == 0 {
        return Err(MarkerError::InvalidPosition);
    }
    if bytes.is_empty() {
        return Err(MarkerError::DocumentEmpty);
    }

    let mut line_starts = vec![0usize];
    line_starts.extend(
        bytes
            .iter()
            .enumerate()
            .filter(|(_, b)| **b == b'\n')
            .map(|(idx, _)| idx + 1)
            .filter(|start| *start < bytes.len()),
    );
    let lines = line_starts.len();
    if position > lines {
        return Err(MarkerError::PositionOutOfRange { position, lines });
    }

    let start = line_starts[position - 1];
    if !bytes[start..].starts_with(PENDING_MARKER.as_bytes()) {
        return Err(MarkerError::NotPending { position });
    }
    // "- [ ] " -> the space inside the brackets is at offset 3.
    bytes[start + 3] = b'x';
    Ok(())
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("checklist path has no file name: {}", path.display()))?;
    let tmp_path = parent.join(format!(".{}.tmp", file_name.to_string_lossy()));
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp checklist {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace checklist {}", path.display()))?;
    Ok(())
}
