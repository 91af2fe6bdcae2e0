//! Errors that abort a run.
//!
//! Per-comparison problems never surface here: they degrade to null
//! scores or missing renders inside the pipeline.

use std::path::{Path, PathBuf};

use glyphsim_pipeline::PipelineError;

/// Structural failure of a run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Reading or writing a file failed.
    #[error("{}: {source}", path.display())]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A JSON document or JSON Lines record could not be parsed or
    /// written.
    #[error("{}:{line}: {source}", path.display())]
    Json {
        /// File involved.
        path: PathBuf,
        /// One-based line number (1 for whole-file documents).
        line: usize,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// An image could not be decoded.
    #[error("{}: {source}", path.display())]
    Image {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        source: image::ImageError,
    },

    /// Invalid configuration or an internal consistency failure.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// The worker pool could not be started.
    #[error("failed to start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl RunError {
    /// `map_err` adapter for I/O failures on `path`.
    pub(crate) fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// `map_err` adapter for JSON failures at `line` of `path`.
    pub(crate) fn json(path: &Path, line: usize) -> impl FnOnce(serde_json::Error) -> Self + '_ {
        move |source| Self::Json {
            path: path.to_path_buf(),
            line,
            source,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn io_error_names_the_file() {
        let err = RunError::io(Path::new("progress.jsonl"))(std::io::Error::other("disk full"));
        assert_eq!(err.to_string(), "progress.jsonl: disk full");
    }

    #[test]
    fn json_error_names_the_line() {
        let source = serde_json::from_str::<u32>("x").unwrap_err();
        let err = RunError::json(Path::new("index.jsonl"), 7)(source);
        assert!(err.to_string().starts_with("index.jsonl:7: "));
    }

    #[test]
    fn pipeline_errors_convert() {
        let err: RunError = PipelineError::InvalidConfig("bad".to_string()).into();
        assert_eq!(err.to_string(), "invalid scoring configuration: bad");
    }
}
