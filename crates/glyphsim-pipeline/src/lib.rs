//! glyphsim-pipeline: Pure glyph similarity scoring (sans-IO).
//!
//! Scores how easily one rendered text unit can be mistaken for another
//! across many font contexts:
//! raster -> ink bounds -> canonical image -> fingerprint gate ->
//! pair normalization -> structural similarity -> per-pair summary.
//!
//! This crate has **no I/O dependencies** -- rasterization and font
//! discovery come in through the [`Rasterizer`] and [`FontRegistry`]
//! traits, and results are returned as plain data. Threads, checkpoint
//! files, and compressed output live in `glyphsim-io`.

pub mod aggregate;
pub mod ink;
pub mod normalize;
pub mod orchestrate;
pub mod phash;
pub mod prefilter;
pub mod provenance;
pub mod render;
pub mod resample;
pub mod ssim;
pub mod types;

pub use aggregate::{Distribution, PairAccumulator, PairSummary, ProvenanceCounts};
pub use orchestrate::{
    ComparisonJob, JobOutcome, UnitPlan, UnitResult, finish_unit, plan_unit, score_job,
    score_unit_serial,
};
pub use phash::Fingerprint;
pub use prefilter::{GlyphMetadata, load_candidates, select_candidates};
pub use provenance::ReferenceRenders;
pub use render::{FontRegistry, Glyph, Rasterizer, Render, RenderCache, RenderSet, render_text};
pub use types::{
    CanonicalImage, ComparisonMode, ComparisonRecord, GrayImage, InkBounds, PipelineError,
    Provenance, REPLACEMENT_CHARACTER, Raster, ScoringConfig, UnitCounters, unit_id,
};

/// Structural similarity of two rasters after pair normalization.
///
/// Convenience for one-off comparisons outside a scoring run. No gates
/// are applied.
///
/// # Steps
///
/// 1. Detect ink bounds of both rasters
/// 2. Normalize them together (shared scale, midline-aligned)
/// 3. Compute SSIM of the two canonical images
#[must_use]
pub fn compare_rasters(a: &Raster, b: &Raster, config: &ScoringConfig) -> f64 {
    let a = normalize::Inked::detect(a, config.ink_threshold);
    let b = normalize::Inked::detect(b, config.ink_threshold);
    let (a, b) = normalize::normalize_pair(a, b, config.canonical_size);
    ssim::compute(&a, &b)
}
