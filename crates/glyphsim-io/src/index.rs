//! Pixel-free metadata index of a large text set (JSON Lines).

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use glyphsim_pipeline::{
    FontRegistry, GlyphMetadata, Rasterizer, ReferenceRenders, ScoringConfig, render_text,
};
use rayon::prelude::*;

use crate::error::RunError;
use crate::runner::WorkerPool;

/// Render every text in parallel and keep only metadata of usable
/// renders. Fallback references are built per text, and pixels are dropped
/// as soon as each text is summarized.
pub fn build_index<R, F>(
    texts: &[String],
    rasterizer: &R,
    registry: &F,
    config: &ScoringConfig,
    pool: &WorkerPool,
) -> Vec<GlyphMetadata>
where
    R: Rasterizer + Sync + ?Sized,
    F: FontRegistry + Sync + ?Sized,
{
    let base = ReferenceRenders::build(
        rasterizer,
        registry.contexts(),
        std::iter::empty::<&str>(),
        &config.fallback_contexts,
    );
    let entries: Vec<GlyphMetadata> = pool.install(|| {
        texts
            .par_iter()
            .flat_map_iter(|text| {
                let references = base.for_text(rasterizer, text);
                let set = render_text(text, rasterizer, registry, &references, config);
                GlyphMetadata::from_set(text, &set).collect::<Vec<_>>()
            })
            .collect()
    });
    log::info!(
        "indexed {} usable renders of {} texts",
        entries.len(),
        texts.len()
    );
    entries
}

/// Write entries as JSON Lines.
///
/// # Errors
///
/// Returns [`RunError::Io`] if the file cannot be written.
pub fn write_index(path: &Path, entries: &[GlyphMetadata]) -> Result<(), RunError> {
    let file = File::create(path).map_err(RunError::io(path))?;
    let mut writer = BufWriter::new(file);
    for (i, entry) in entries.iter().enumerate() {
        serde_json::to_writer(&mut writer, entry).map_err(RunError::json(path, i + 1))?;
        writer.write_all(b"\n").map_err(RunError::io(path))?;
    }
    writer.flush().map_err(RunError::io(path))
}

/// Read a JSON Lines index.
///
/// # Errors
///
/// Returns [`RunError::Io`] if the file cannot be read, or
/// [`RunError::Json`] naming the first malformed line.
pub fn read_index(path: &Path) -> Result<Vec<GlyphMetadata>, RunError> {
    let file = File::open(path).map_err(RunError::io(path))?;
    let mut entries = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(RunError::io(path))?;
        if line.trim().is_empty() {
            continue;
        }
        entries.push(serde_json::from_str(&line).map_err(RunError::json(path, i + 1))?);
    }
    Ok(entries)
}
