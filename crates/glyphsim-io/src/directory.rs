//! File-backed rasterizer and font registry.
//!
//! Pre-rendered rasters live at `<root>/<context>/<unit-id>.png`, where
//! the unit id is the text's code points as `U+XXXX` joined by `_`.
//! Coverage comes from a JSON manifest:
//!
//! ```json
//! {"contexts": [{"name": "Serif", "ranges": [[32, 126], [160, 255]]}]}
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use glyphsim_pipeline::{
    FontRegistry, PipelineError, REPLACEMENT_CHARACTER, Raster, Rasterizer, unit_id,
};
use serde::{Deserialize, Serialize};

use crate::error::RunError;

/// Loads pre-rendered PNG rasters from a directory tree.
#[derive(Debug, Clone)]
pub struct DirectoryRasterizer {
    root: PathBuf,
    midline: Option<u32>,
}

impl DirectoryRasterizer {
    /// Rasters under `root`, with the midline at half the canvas height.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            midline: None,
        }
    }

    /// Use a fixed midline row for every raster.
    #[must_use]
    pub const fn with_midline(mut self, midline: u32) -> Self {
        self.midline = Some(midline);
        self
    }

    /// Path of the raster for `text` in `context`.
    #[must_use]
    pub fn raster_path(&self, text: &str, context: &str) -> PathBuf {
        self.root.join(context).join(format!("{}.png", unit_id(text)))
    }

    /// Decode the raster for `text` in `context`.
    ///
    /// Returns `Ok(None)` when no file exists.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Image`] if the file exists but cannot be
    /// decoded.
    pub fn load(&self, text: &str, context: &str) -> Result<Option<Raster>, RunError> {
        let path = self.raster_path(text, context);
        if !path.is_file() {
            return Ok(None);
        }
        let image = image::open(&path)
            .map_err(|source| RunError::Image {
                path: path.clone(),
                source,
            })?
            .to_luma8();
        let raster = match self.midline {
            Some(midline) => Raster::new(image, midline),
            None => Raster::centered(image),
        };
        Ok(Some(raster))
    }
}

impl Rasterizer for DirectoryRasterizer {
    fn rasterize(&self, text: &str, context: &str) -> Option<Raster> {
        match self.load(text, context) {
            Ok(raster) => raster,
            Err(err) => {
                log::warn!("{err}");
                None
            }
        }
    }
}

/// Coverage of one font context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextCoverage {
    /// Context name (also its directory name).
    pub name: String,
    /// Inclusive code point ranges.
    pub ranges: Vec<[u32; 2]>,
}

impl ContextCoverage {
    fn covers(&self, ch: char) -> bool {
        let cp = u32::from(ch);
        self.ranges.iter().any(|&[lo, hi]| (lo..=hi).contains(&cp))
    }
}

#[derive(Deserialize)]
struct ManifestFile {
    contexts: Vec<ContextCoverage>,
}

/// Font registry read from a coverage manifest.
#[derive(Debug, Clone, Default)]
pub struct FontManifest {
    names: Vec<String>,
    coverage: HashMap<String, ContextCoverage>,
}

impl FontManifest {
    /// Build from coverage entries; later duplicates of a name replace
    /// earlier ones but keep the first position.
    #[must_use]
    pub fn new(contexts: Vec<ContextCoverage>) -> Self {
        let mut manifest = Self::default();
        for context in contexts {
            if !manifest.coverage.contains_key(&context.name) {
                manifest.names.push(context.name.clone());
            }
            manifest.coverage.insert(context.name.clone(), context);
        }
        manifest
    }

    /// Read a manifest file.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Io`] if the file cannot be read, or
    /// [`RunError::Json`] if it is not a valid manifest.
    pub fn load(path: &Path) -> Result<Self, RunError> {
        let text = std::fs::read_to_string(path).map_err(RunError::io(path))?;
        let file: ManifestFile = serde_json::from_str(&text).map_err(RunError::json(path, 1))?;
        Ok(Self::new(file.contexts))
    }
}

impl FontRegistry for FontManifest {
    fn contexts(&self) -> &[String] {
        &self.names
    }

    fn covers(&self, context: &str, ch: char) -> bool {
        self.coverage.get(context).is_some_and(|c| c.covers(ch))
    }
}

/// Rejects rasters whose canvas differs from the expected one.
///
/// The expected canvas is fixed by [`CheckedRasterizer::seed`], or else by
/// the first raster seen. A mismatching raster is logged and treated as
/// missing.
#[derive(Debug)]
pub struct CheckedRasterizer<R> {
    inner: R,
    canvas: OnceLock<(u32, u32)>,
}

impl<R> CheckedRasterizer<R> {
    /// Wrap `inner`.
    pub const fn new(inner: R) -> Self {
        Self {
            inner,
            canvas: OnceLock::new(),
        }
    }

    /// Canvas of the first raster produced, once there is one.
    pub fn canvas(&self) -> Option<(u32, u32)> {
        self.canvas.get().copied()
    }

    /// Fix the expected canvas before any parallel rendering starts.
    ///
    /// Tries the replacement character, then each of `texts`, in every
    /// context in order; the first raster found sets the canvas. Does
    /// nothing if the canvas is already fixed.
    pub fn seed<I, S>(&self, texts: I, contexts: &[String]) -> Option<(u32, u32)>
    where
        R: Rasterizer,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if let Some(canvas) = self.canvas() {
            return Some(canvas);
        }
        let replacement = REPLACEMENT_CHARACTER.to_string();
        self.seed_from(&replacement, contexts).or_else(|| {
            texts
                .into_iter()
                .find_map(|text| self.seed_from(text.as_ref(), contexts))
        })
    }

    fn seed_from(&self, text: &str, contexts: &[String]) -> Option<(u32, u32)>
    where
        R: Rasterizer,
    {
        let (context, raster) = contexts.iter().find_map(|context| {
            self.inner
                .rasterize(text, context)
                .map(|raster| (context, raster))
        })?;
        let (width, height) = *self.canvas.get_or_init(|| raster.dimensions());
        log::info!("canvas {width}x{height} fixed by {text:?} in {context}");
        Some((width, height))
    }
}

impl<R: Rasterizer> Rasterizer for CheckedRasterizer<R> {
    fn rasterize(&self, text: &str, context: &str) -> Option<Raster> {
        let raster = self.inner.rasterize(text, context)?;
        let actual = raster.dimensions();
        let expected = *self.canvas.get_or_init(|| actual);
        if actual == expected {
            Some(raster)
        } else {
            log::warn!(
                "{text:?} in {context}: {}",
                PipelineError::RenderConfigMismatch { expected, actual }
            );
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use glyphsim_pipeline::GrayImage;

    use super::*;

    fn save(root: &Path, context: &str, text: &str, width: u32, height: u32) {
        let dir = root.join(context);
        std::fs::create_dir_all(&dir).unwrap();
        let img = GrayImage::from_fn(width, height, |x, _| {
            image::Luma([if x < 2 { 0 } else { 255 }])
        });
        img.save(dir.join(format!("{}.png", unit_id(text)))).unwrap();
    }

    #[test]
    fn loads_png_by_unit_id() {
        let dir = tempfile::tempdir().unwrap();
        save(dir.path(), "Serif", "rn", 16, 20);
        let rasterizer = DirectoryRasterizer::new(dir.path());
        assert!(rasterizer.raster_path("rn", "Serif").ends_with("Serif/U+0072_U+006E.png"));
        let raster = rasterizer.rasterize("rn", "Serif").unwrap();
        assert_eq!(raster.dimensions(), (16, 20));
        assert_eq!(raster.midline(), 10);
        assert_eq!(raster.image().get_pixel(0, 0).0[0], 0);
    }

    #[test]
    fn fixed_midline_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        save(dir.path(), "Serif", "a", 8, 8);
        let raster = DirectoryRasterizer::new(dir.path())
            .with_midline(6)
            .rasterize("a", "Serif")
            .unwrap();
        assert_eq!(raster.midline(), 6);
    }

    #[test]
    fn absent_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let rasterizer = DirectoryRasterizer::new(dir.path());
        assert!(rasterizer.load("a", "Serif").unwrap().is_none());
    }

    #[test]
    fn corrupt_file_is_an_error_but_rasterizes_to_none() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Serif")).unwrap();
        std::fs::write(dir.path().join("Serif/U+0061.png"), b"not a png").unwrap();
        let rasterizer = DirectoryRasterizer::new(dir.path());
        assert!(matches!(
            rasterizer.load("a", "Serif"),
            Err(RunError::Image { .. })
        ));
        assert!(rasterizer.rasterize("a", "Serif").is_none());
    }

    #[test]
    fn manifest_coverage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fonts.json");
        std::fs::write(
            &path,
            r#"{"contexts": [
                {"name": "Serif", "ranges": [[97, 122]]},
                {"name": "Cyrillic", "ranges": [[1024, 1279], [97, 97]]}
            ]}"#,
        )
        .unwrap();
        let manifest = FontManifest::load(&path).unwrap();
        assert_eq!(manifest.contexts(), ["Serif", "Cyrillic"]);
        assert!(manifest.covers("Serif", 'z'));
        assert!(!manifest.covers("Serif", '\u{430}'));
        assert!(!manifest.covers("Sans", 'a'));
        assert_eq!(manifest.covering_contexts("a\u{430}"), vec!["Cyrillic"]);
        assert_eq!(manifest.covering_contexts("a"), vec!["Serif", "Cyrillic"]);
    }

    #[test]
    fn malformed_manifest_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fonts.json");
        std::fs::write(&path, "{").unwrap();
        assert!(matches!(
            FontManifest::load(&path),
            Err(RunError::Json { line: 1, .. })
        ));
    }

    #[test]
    fn checked_rasterizer_rejects_other_canvases() {
        let dir = tempfile::tempdir().unwrap();
        save(dir.path(), "Serif", "a", 16, 16);
        save(dir.path(), "Serif", "b", 16, 16);
        save(dir.path(), "Serif", "c", 24, 16);
        let checked = CheckedRasterizer::new(DirectoryRasterizer::new(dir.path()));
        assert!(checked.rasterize("a", "Serif").is_some());
        assert_eq!(checked.canvas(), Some((16, 16)));
        assert!(checked.rasterize("b", "Serif").is_some());
        assert!(checked.rasterize("c", "Serif").is_none());
    }

    #[test]
    fn seeded_canvas_wins_over_first_raster() {
        let dir = tempfile::tempdir().unwrap();
        save(dir.path(), "Serif", "\u{FFFD}", 16, 16);
        save(dir.path(), "Serif", "a", 16, 16);
        save(dir.path(), "Serif", "c", 24, 16);
        let contexts = vec!["Sans".to_string(), "Serif".to_string()];

        let checked = CheckedRasterizer::new(DirectoryRasterizer::new(dir.path()));
        assert_eq!(checked.seed(["c"], &contexts), Some((16, 16)));
        // The odd canvas is rejected even though it is requested first.
        assert!(checked.rasterize("c", "Serif").is_none());
        assert!(checked.rasterize("a", "Serif").is_some());
        // Reseeding keeps the fixed canvas.
        assert_eq!(checked.seed(["c"], &contexts), Some((16, 16)));
    }

    #[test]
    fn seed_falls_back_to_texts_in_order() {
        let dir = tempfile::tempdir().unwrap();
        save(dir.path(), "Serif", "b", 24, 16);
        save(dir.path(), "Serif", "c", 16, 16);
        let contexts = vec!["Serif".to_string()];

        let checked = CheckedRasterizer::new(DirectoryRasterizer::new(dir.path()));
        assert_eq!(checked.seed(["a", "b", "c"], &contexts), Some((24, 16)));
        assert!(checked.rasterize("c", "Serif").is_none());

        let empty = CheckedRasterizer::new(DirectoryRasterizer::new(dir.path()));
        assert_eq!(empty.seed(["a"], &contexts), None);
        assert_eq!(empty.canvas(), None);
    }
}
