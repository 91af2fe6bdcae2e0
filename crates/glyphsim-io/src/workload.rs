//! Workload and text-list files.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::RunError;

/// What to compare: every source against every target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    /// Name recorded in the output metadata.
    pub name: String,
    /// Source units, processed in this order.
    pub sources: Vec<String>,
    /// Target units.
    #[serde(default)]
    pub targets: Vec<String>,
    /// Metadata index of a large target side; its prefilter survivors
    /// are appended to `targets`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large_index: Option<PathBuf>,
}

impl Workload {
    /// Read a workload file. A relative `largeIndex` is resolved against
    /// the workload's directory.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Io`] or [`RunError::Json`].
    pub fn load(path: &Path) -> Result<Self, RunError> {
        let text = std::fs::read_to_string(path).map_err(RunError::io(path))?;
        let mut workload: Self = serde_json::from_str(&text).map_err(RunError::json(path, 1))?;
        if let (Some(index), Some(dir)) = (&workload.large_index, path.parent())
            && index.is_relative()
        {
            workload.large_index = Some(dir.join(index));
        }
        Ok(workload)
    }

    /// Sources followed by targets, without duplicates, in first-seen
    /// order.
    #[must_use]
    pub fn texts(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.sources
            .iter()
            .chain(&self.targets)
            .filter(|text| seen.insert(text.as_str()))
            .cloned()
            .collect()
    }
}

/// Read one text unit per line; blank lines are skipped and trailing
/// line terminators stripped.
///
/// # Errors
///
/// Returns [`RunError::Io`] if the file cannot be read.
pub fn read_texts(path: &Path) -> Result<Vec<String>, RunError> {
    let text = std::fs::read_to_string(path).map_err(RunError::io(path))?;
    Ok(text
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
