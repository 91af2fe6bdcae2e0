//! glyphsim-io: File-backed, checkpointed execution of glyphsim runs.
//!
//! Loads pre-rendered rasters and font coverage from disk, scores
//! workloads on a rayon worker pool, appends finished units to a
//! progress log so interrupted runs resume, and streams pair summaries
//! into a gzip-compressed JSON document.

pub mod checkpoint;
pub mod directory;
pub mod error;
pub mod index;
pub mod output;
pub mod runner;
pub mod workload;

pub use checkpoint::ProgressLog;
pub use directory::{CheckedRasterizer, ContextCoverage, DirectoryRasterizer, FontManifest};
pub use error::RunError;
pub use index::{build_index, read_index, write_index};
pub use output::{ResultWriter, RunMetadata, partial_path};
pub use runner::{
    RunConfig, RunPaths, RunReport, WorkerFailure, WorkerPool, default_workers, render_parallel,
    run,
};
pub use workload::{Workload, read_texts};
