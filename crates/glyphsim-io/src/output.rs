//! Streaming, compressed result document.
//!
//! The document is a single gzip-compressed JSON object:
//!
//! ```text
//! {"metadata": {...}, "pairs": [PairSummary, ...],
//!  "distribution": {...}, "incompleteUnits": [...]}
//! ```
//!
//! Pair summaries are streamed as they are produced, so memory stays
//! bounded by one unit, and flushed at unit boundaries with
//! [`ResultWriter::flush`]. Bytes go to `<path>.partial`, which is renamed
//! to `<path>` only by [`ResultWriter::finish`]; an interrupted run never
//! leaves a truncated document at the final path.

use std::ffi::OsString;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use glyphsim_pipeline::{Distribution, PairSummary, ScoringConfig};
use serde::{Deserialize, Serialize};

use crate::error::RunError;

/// Run description written at the head of the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    /// Workload name.
    pub workload: String,
    /// Source units in the workload.
    pub sources: usize,
    /// Target units compared against.
    pub targets: usize,
    /// Font contexts known to the registry.
    pub contexts: Vec<String>,
    /// Scoring configuration in effect.
    pub config: ScoringConfig,
}

/// Writes the result document incrementally.
pub struct ResultWriter {
    path: PathBuf,
    partial: PathBuf,
    encoder: GzEncoder<BufWriter<File>>,
    pairs: usize,
    distribution: Distribution,
}

impl ResultWriter {
    /// Create `<path>.partial` and write the document head.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Io`] if the file cannot be created or written.
    pub fn create(path: &Path, metadata: &RunMetadata) -> Result<Self, RunError> {
        let partial = partial_path(path);
        let file = File::create(&partial).map_err(RunError::io(&partial))?;
        let mut writer = Self {
            path: path.to_path_buf(),
            encoder: GzEncoder::new(BufWriter::new(file), Compression::default()),
            pairs: 0,
            distribution: Distribution::new(metadata.config.high_ssim),
            partial,
        };
        writer.raw(b"{\"metadata\":")?;
        writer.json(metadata)?;
        writer.raw(b",\"pairs\":[")?;
        Ok(writer)
    }

    /// Append one pair summary and count it in the distribution.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Io`] if writing fails.
    pub fn write_summary(&mut self, summary: &PairSummary) -> Result<(), RunError> {
        if self.pairs > 0 {
            self.raw(b",")?;
        }
        self.json(summary)?;
        self.pairs += 1;
        self.distribution.add(summary);
        Ok(())
    }

    /// Push everything written so far through the compressor to disk, so
    /// the partial file covers every finished unit.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Io`] if flushing fails.
    pub fn flush(&mut self) -> Result<(), RunError> {
        self.encoder.flush().map_err(RunError::io(&self.partial))
    }

    /// Number of summaries written so far.
    #[must_use]
    pub const fn pairs(&self) -> usize {
        self.pairs
    }

    /// Write the distribution and trailer, sync, and move the document
    /// to its final path.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Io`] if writing, syncing, or renaming fails.
    pub fn finish(mut self, incomplete_units: &[String]) -> Result<Distribution, RunError> {
        let distribution = self.distribution.clone();
        self.raw(b"],\"distribution\":")?;
        self.json(&distribution)?;
        self.raw(b",\"incompleteUnits\":")?;
        self.json(&incomplete_units)?;
        self.raw(b"}")?;

        let buffered = self.encoder.finish().map_err(RunError::io(&self.partial))?;
        let file = buffered
            .into_inner()
            .map_err(|err| RunError::io(&self.partial)(err.into_error()))?;
        file.sync_all().map_err(RunError::io(&self.partial))?;
        drop(file);
        std::fs::rename(&self.partial, &self.path).map_err(RunError::io(&self.path))?;
        log::info!("wrote {} pair summaries to {}", self.pairs, self.path.display());
        Ok(distribution)
    }

    fn raw(&mut self, bytes: &[u8]) -> Result<(), RunError> {
        self.encoder
            .write_all(bytes)
            .map_err(RunError::io(&self.partial))
    }

    fn json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), RunError> {
        serde_json::to_writer(&mut self.encoder, value).map_err(RunError::json(&self.partial, 1))
    }
}

/// `<path>.partial`.
#[must_use]
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".partial");
    PathBuf::from(name)
}
