//! Append-only progress log for resumable runs.
//!
//! One JSON object per line, `{"unitId", "pairSummaries", "counters"}`.
//! On open the log is replayed:
//!
//! - a trailing line without a final newline (interrupted write) is
//!   truncated away before anything is appended;
//! - a complete line that fails to parse is logged and skipped, so its
//!   unit is recomputed;
//! - when a unit appears twice the last record wins.
//!
//! Every append is flushed and synced to disk before it returns.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use glyphsim_pipeline::UnitResult;

use crate::error::RunError;

/// Completed units, backed by a JSON Lines file.
#[derive(Debug)]
pub struct ProgressLog {
    path: PathBuf,
    file: File,
    lines: usize,
    completed: HashMap<String, UnitResult>,
}

impl ProgressLog {
    /// Open (creating if needed) and replay the log at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Io`] if the file cannot be opened, read, or
    /// truncated.
    pub fn open(path: &Path) -> Result<Self, RunError> {
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .map_err(RunError::io(path))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).map_err(RunError::io(path))?;

        let valid_len = bytes.iter().rposition(|&b| b == b'\n').map_or(0, |i| i + 1);
        if valid_len < bytes.len() {
            log::warn!(
                "{}: dropping {} bytes of interrupted checkpoint record",
                path.display(),
                bytes.len() - valid_len
            );
            file.set_len(valid_len as u64).map_err(RunError::io(path))?;
        }

        let mut completed = HashMap::new();
        let mut lines = 0;
        for (number, line) in bytes[..valid_len].split(|&b| b == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            lines = number + 1;
            match serde_json::from_slice::<UnitResult>(line) {
                Ok(result) => {
                    completed.insert(result.unit_id.clone(), result);
                }
                Err(err) => log::warn!(
                    "{}:{}: skipping malformed checkpoint record: {err}",
                    path.display(),
                    number + 1
                ),
            }
        }
        log::info!(
            "{}: {} completed units in checkpoint",
            path.display(),
            completed.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            file,
            lines,
            completed,
        })
    }

    /// The checkpointed result of `unit_id`, if any.
    #[must_use]
    pub fn get(&self, unit_id: &str) -> Option<&UnitResult> {
        self.completed.get(unit_id)
    }

    /// Number of completed units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.completed.len()
    }

    /// Whether no unit has completed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }

    /// Durably record a completed unit.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Io`] if the write, flush, or sync fails.
    pub fn append(&mut self, result: &UnitResult) -> Result<(), RunError> {
        let line_number = self.lines + 1;
        let mut line =
            serde_json::to_vec(result).map_err(RunError::json(&self.path, line_number))?;
        line.push(b'\n');
        self.file.write_all(&line).map_err(RunError::io(&self.path))?;
        self.file.flush().map_err(RunError::io(&self.path))?;
        self.file.sync_data().map_err(RunError::io(&self.path))?;
        self.lines = line_number;
        self.completed.insert(result.unit_id.clone(), result.clone());
        Ok(())
    }
}
