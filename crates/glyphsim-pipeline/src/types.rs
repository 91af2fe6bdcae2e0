//! Shared types for the glyphsim scoring pipeline.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// Re-export `GrayImage` so downstream crates can build rasters
/// without depending on `image` directly.
pub use image::GrayImage;

/// Intensity of an untouched background pixel.
pub const BACKGROUND: u8 = 255;

/// Replacement character rendered once per font context to recognise
/// "unknown code point" output.
pub const REPLACEMENT_CHARACTER: char = '\u{FFFD}';

/// A rendered text unit in one font context.
///
/// Single-channel intensities where 0 is the darkest ink and 255 is the
/// background. `midline` is the vertical reference row every raster of a
/// run was rendered against; pair normalization aligns on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    image: GrayImage,
    midline: u32,
}

impl Raster {
    /// Create a raster with an explicit reference row.
    #[must_use]
    pub const fn new(image: GrayImage, midline: u32) -> Self {
        Self { image, midline }
    }

    /// Create a raster whose reference row is the vertical center of the
    /// canvas.
    #[must_use]
    pub fn centered(image: GrayImage) -> Self {
        let midline = image.height() / 2;
        Self { image, midline }
    }

    /// The pixel buffer.
    #[must_use]
    pub const fn image(&self) -> &GrayImage {
        &self.image
    }

    /// The vertical reference row.
    #[must_use]
    pub const fn midline(&self) -> u32 {
        self.midline
    }

    /// Canvas dimensions as `(width, height)`.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Tight bounding rectangle of the ink in a raster.
///
/// `right` and `bottom` are exclusive, so a non-empty box always has a
/// width and height of at least one pixel. An empty raster has no
/// bounds at all (`Option::None`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InkBounds {
    /// First ink column.
    pub left: u32,
    /// First ink row.
    pub top: u32,
    /// One past the last ink column.
    pub right: u32,
    /// One past the last ink row.
    pub bottom: u32,
}

impl InkBounds {
    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.right - self.left
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.bottom - self.top
    }
}

/// A fixed-size square image produced by the normalizer.
///
/// Any two canonical images built with the same configuration are
/// directly comparable pixel by pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalImage(GrayImage);

impl CanonicalImage {
    /// An all-background canonical image.
    #[must_use]
    pub fn blank(size: u32) -> Self {
        Self(GrayImage::from_pixel(size, size, image::Luma([BACKGROUND])))
    }

    pub(crate) const fn from_image(image: GrayImage) -> Self {
        Self(image)
    }

    /// The underlying pixels.
    #[must_use]
    pub const fn image(&self) -> &GrayImage {
        &self.0
    }

    /// Side length in pixels.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.0.width()
    }

    /// Fraction of pixels that count as ink under `threshold`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ink_coverage(&self, threshold: u8) -> f64 {
        let total = self.0.as_raw().len();
        if total == 0 {
            return 0.0;
        }
        let inked = self
            .0
            .as_raw()
            .iter()
            .filter(|&&v| crate::ink::is_ink(v, threshold))
            .count();
        inked as f64 / total as f64
    }
}

/// How a render came to exist.
///
/// Ordered from most to least trustworthy so that the provenance of a
/// comparison is the maximum of its two sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// The requested font context contains the glyph.
    Native,
    /// The rendering system substituted another font.
    Fallback,
    /// Nothing usable was drawn: no glyph, a blank canvas, a
    /// replacement character, or an unknown-code-point placeholder box.
    Missing,
}

/// Whether both sides of a comparison were rendered in one font context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonMode {
    /// Source and target rendered in the same context.
    Same,
    /// Target render picked from another context by fingerprint.
    Cross,
}

/// Persisted result of one comparison.
///
/// Scores are `None` when either side is [`Provenance::Missing`]; such
/// records carry provenance only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonRecord {
    /// Font context of the source render.
    pub source_context: String,
    /// Font context of the target render.
    pub target_context: String,
    /// Same-context or cross-context.
    pub mode: ComparisonMode,
    /// Structural similarity of the normalized pair.
    pub ssim: Option<f64>,
    /// Fingerprint similarity of the two renders.
    pub phash: Option<f64>,
    /// Provenance of the source render.
    pub source_provenance: Provenance,
    /// Provenance of the target render.
    pub target_provenance: Provenance,
}

impl ComparisonRecord {
    /// Combined provenance: the less trustworthy of the two sides.
    #[must_use]
    pub fn provenance(&self) -> Provenance {
        self.source_provenance.max(self.target_provenance)
    }
}

/// Per-unit bookkeeping written with every checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UnitCounters {
    /// Comparison jobs handed to workers.
    pub jobs: u64,
    /// Jobs that produced a structural similarity score.
    pub scored: u64,
    /// Comparisons skipped by the fingerprint gate.
    pub phash_gated: u64,
    /// Comparisons skipped by the ink-width-ratio gate.
    pub width_gated: u64,
    /// Jobs rejected by the ink-coverage floor after normalization.
    pub coverage_gated: u64,
    /// Cross-context best-match selections.
    pub cross_selected: u64,
    /// Same-context records written without scores because a side was missing.
    pub missing_records: u64,
}

impl UnitCounters {
    /// Add every counter of `other` into `self`.
    pub const fn accumulate(&mut self, other: &Self) {
        self.jobs += other.jobs;
        self.scored += other.scored;
        self.phash_gated += other.phash_gated;
        self.width_gated += other.width_gated;
        self.coverage_gated += other.coverage_gated;
        self.cross_selected += other.cross_selected;
        self.missing_records += other.missing_records;
    }
}

/// Errors raised by the pure pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Scoring configuration is invalid.
    #[error("invalid scoring configuration: {0}")]
    InvalidConfig(String),

    /// A raster was produced with a different canvas than the rest of
    /// the run.
    #[error("raster canvas {actual:?} does not match run canvas {expected:?}")]
    RenderConfigMismatch {
        /// Canvas `(width, height)` of the first raster of the run.
        expected: (u32, u32),
        /// Canvas of the offending raster.
        actual: (u32, u32),
    },

    /// A batch returned fewer outcomes than it was given jobs.
    #[error("batch returned {actual} outcomes for {expected} jobs")]
    IncompleteBatch {
        /// Jobs dispatched.
        expected: usize,
        /// Outcomes received.
        actual: usize,
    },
}

/// Configuration for normalization, gating, and aggregation.
///
/// The gate thresholds are empirically tuned defaults and should be
/// revalidated for unfamiliar font sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoringConfig {
    /// Side length of canonical images.
    pub canonical_size: u32,

    /// A pixel is ink when its intensity is below `255 - ink_threshold`.
    pub ink_threshold: u8,

    /// Minimum fingerprint similarity when both units are one character.
    pub phash_gate_single: f64,

    /// Minimum fingerprint similarity when either unit is a sequence.
    pub phash_gate_multi: f64,

    /// Maximum ratio between the raw ink widths of the two sides.
    pub max_width_ratio: f64,

    /// Minimum non-background fraction of each normalized side.
    pub min_ink_coverage: f64,

    /// Same-context SSIM at or above which a pair counts as high-risk in
    /// the output distribution.
    pub high_ssim: f64,

    /// Font contexts the rendering system falls back to; renders
    /// pixel-identical to these are classified as fallback.
    pub fallback_contexts: Vec<String>,
}

impl ScoringConfig {
    /// Default canonical image side length.
    pub const DEFAULT_CANONICAL_SIZE: u32 = 48;
    /// Default ink threshold.
    pub const DEFAULT_INK_THRESHOLD: u8 = 10;
    /// Default single-character fingerprint gate.
    pub const DEFAULT_PHASH_GATE_SINGLE: f64 = 0.5;
    /// Default multi-character fingerprint gate.
    pub const DEFAULT_PHASH_GATE_MULTI: f64 = 0.4;
    /// Default maximum ink-width ratio.
    pub const DEFAULT_MAX_WIDTH_RATIO: f64 = 2.0;
    /// Default ink-coverage floor.
    pub const DEFAULT_MIN_INK_COVERAGE: f64 = 0.03;
    /// Default high-risk SSIM cutoff.
    pub const DEFAULT_HIGH_SSIM: f64 = 0.7;

    /// Fingerprint gate for a (source, target) pair: the tighter single
    /// threshold applies only when both sides are one character.
    #[must_use]
    pub fn phash_gate(&self, source: &str, target: &str) -> f64 {
        if is_single_char(source) && is_single_char(target) {
            self.phash_gate_single
        } else {
            self.phash_gate_multi
        }
    }

    /// Whether two raw ink widths are within `max_width_ratio` of each
    /// other. A zero width never passes.
    #[must_use]
    pub fn width_ratio_passes(&self, a: u32, b: u32) -> bool {
        let (narrow, wide) = (a.min(b), a.max(b));
        narrow > 0 && f64::from(wide) / f64::from(narrow) <= self.max_width_ratio
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] naming the first field
    /// that is out of range.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(8..=512).contains(&self.canonical_size) {
            return Err(PipelineError::InvalidConfig(format!(
                "canonical_size must be in 8..=512, got {}",
                self.canonical_size
            )));
        }
        for (name, value) in [
            ("phash_gate_single", self.phash_gate_single),
            ("phash_gate_multi", self.phash_gate_multi),
            ("min_ink_coverage", self.min_ink_coverage),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PipelineError::InvalidConfig(format!(
                    "{name} must be in [0, 1], got {value}"
                )));
            }
        }
        if self.max_width_ratio.is_nan() || self.max_width_ratio < 1.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "max_width_ratio must be at least 1, got {}",
                self.max_width_ratio
            )));
        }
        if !(-1.0..=1.0).contains(&self.high_ssim) {
            return Err(PipelineError::InvalidConfig(format!(
                "high_ssim must be in [-1, 1], got {}",
                self.high_ssim
            )));
        }
        Ok(())
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            canonical_size: Self::DEFAULT_CANONICAL_SIZE,
            ink_threshold: Self::DEFAULT_INK_THRESHOLD,
            phash_gate_single: Self::DEFAULT_PHASH_GATE_SINGLE,
            phash_gate_multi: Self::DEFAULT_PHASH_GATE_MULTI,
            max_width_ratio: Self::DEFAULT_MAX_WIDTH_RATIO,
            min_ink_coverage: Self::DEFAULT_MIN_INK_COVERAGE,
            high_ssim: Self::DEFAULT_HIGH_SSIM,
            fallback_contexts: Vec::new(),
        }
    }
}

fn is_single_char(text: &str) -> bool {
    let mut chars = text.chars();
    chars.next().is_some() && chars.next().is_none()
}

/// Stable identifier for a text unit: its code points as `U+XXXX`
/// joined by `_`.
///
/// Used as the checkpoint key and as the file stem of pre-rendered
/// rasters.
///
/// ```
/// use glyphsim_pipeline::types::unit_id;
///
/// assert_eq!(unit_id("a"), "U+0061");
/// assert_eq!(unit_id("rn"), "U+0072_U+006E");
/// ```
#[must_use]
pub fn unit_id(text: &str) -> String {
    let mut id = String::with_capacity(text.len() * 7);
    for (i, c) in text.chars().enumerate() {
        if i > 0 {
            id.push('_');
        }
        let _ = write!(id, "U+{:04X}", u32::from(c));
    }
    id
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // --- Raster tests ---

    #[test]
    fn centered_raster_uses_half_height() {
        let raster = Raster::centered(GrayImage::new(10, 21));
        assert_eq!(raster.midline(), 10);
        assert_eq!(raster.dimensions(), (10, 21));
    }

    // --- InkBounds tests ---

    #[test]
    fn bounds_are_exclusive() {
        let b = InkBounds {
            left: 3,
            top: 4,
            right: 4,
            bottom: 9,
        };
        assert_eq!(b.width(), 1);
        assert_eq!(b.height(), 5);
    }

    // --- CanonicalImage tests ---

    #[test]
    fn blank_canonical_has_no_ink() {
        let blank = CanonicalImage::blank(48);
        assert_eq!(blank.size(), 48);
        assert!(blank.ink_coverage(10).abs() < f64::EPSILON);
    }

    #[test]
    fn ink_coverage_counts_dark_pixels() {
        let img = GrayImage::from_fn(10, 10, |x, _| {
            if x < 2 {
                image::Luma([0])
            } else {
                image::Luma([BACKGROUND])
            }
        });
        let canonical = CanonicalImage::from_image(img);
        assert!((canonical.ink_coverage(10) - 0.2).abs() < 1e-12);
    }

    // --- Provenance tests ---

    #[test]
    fn record_provenance_is_worst_side() {
        let record = ComparisonRecord {
            source_context: "A".to_string(),
            target_context: "A".to_string(),
            mode: ComparisonMode::Same,
            ssim: Some(0.9),
            phash: Some(0.9),
            source_provenance: Provenance::Native,
            target_provenance: Provenance::Fallback,
        };
        assert_eq!(record.provenance(), Provenance::Fallback);
    }

    #[test]
    fn provenance_serializes_lowercase() {
        let json = serde_json::to_string(&Provenance::Fallback).unwrap();
        assert_eq!(json, "\"fallback\"");
    }

    // --- ScoringConfig tests ---

    #[test]
    fn config_defaults() {
        let config = ScoringConfig::default();
        assert_eq!(config.canonical_size, 48);
        assert!((config.max_width_ratio - 2.0).abs() < f64::EPSILON);
        assert!((config.min_ink_coverage - 0.03).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn phash_gate_tighter_for_single_characters() {
        let config = ScoringConfig::default();
        assert!((config.phash_gate("l", "I") - 0.5).abs() < f64::EPSILON);
        assert!((config.phash_gate("rn", "m") - 0.4).abs() < f64::EPSILON);
    }

    #[test]
    fn width_ratio_gate() {
        let config = ScoringConfig::default();
        assert!(config.width_ratio_passes(10, 20));
        assert!(config.width_ratio_passes(20, 10));
        assert!(!config.width_ratio_passes(10, 30));
        assert!(!config.width_ratio_passes(0, 5));
    }

    #[test]
    fn validate_rejects_small_ratio() {
        let config = ScoringConfig {
            max_width_ratio: 0.5,
            ..ScoringConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_width_ratio"));
    }

    #[test]
    fn validate_rejects_nan_ratio() {
        let config = ScoringConfig {
            max_width_ratio: f64::NAN,
            ..ScoringConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_config_json_fills_defaults() {
        let config: ScoringConfig = serde_json::from_str(r#"{"maxWidthRatio": 1.5}"#).unwrap();
        assert!((config.max_width_ratio - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.canonical_size, ScoringConfig::DEFAULT_CANONICAL_SIZE);
    }

    // --- unit_id tests ---

    #[test]
    fn unit_id_formats_supplementary_planes() {
        assert_eq!(unit_id("\u{1D5BA}"), "U+1D5BA");
    }
}
