//! Render provenance: native, fallback, or missing.
//!
//! Font stacks silently substitute glyphs. A render is classified by
//! comparing it against reference renders built once per run:
//!
//! 1. no raster at all -> missing
//! 2. blank canvas (no ink) -> missing
//! 3. pixel-identical to a replacement-character render -> missing
//! 4. looks like an unknown-code-point placeholder box -> missing
//! 5. pixel-identical to the same text in a known fallback context -> fallback
//! 6. otherwise -> native
//!
//! [`ReferenceRenders`] is an explicit read-only table; nothing here
//! caches behind the caller's back.

use std::collections::HashMap;
use std::sync::Arc;

use image::GrayImage;

use crate::ink::is_ink;
use crate::render::Rasterizer;
use crate::types::{InkBounds, Provenance, REPLACEMENT_CHARACTER, Raster};

/// Minimum placeholder box width as a fraction of the canvas width.
pub const PLACEHOLDER_MIN_WIDTH: f64 = 0.3;

/// Minimum placeholder box height as a fraction of the canvas height.
pub const PLACEHOLDER_MIN_HEIGHT: f64 = 0.4;

/// Minimum ink fraction along each of the four box edges.
pub const PLACEHOLDER_EDGE_INK: f64 = 0.9;

/// Maximum ink fraction inside the box border.
pub const PLACEHOLDER_MAX_INTERIOR_INK: f64 = 0.5;

/// Reference renders used to classify provenance.
#[derive(Debug, Clone, Default)]
pub struct ReferenceRenders {
    replacement: Arc<[GrayImage]>,
    fallback: HashMap<String, Vec<(String, GrayImage)>>,
    fallback_contexts: Vec<String>,
}

impl ReferenceRenders {
    /// Render the replacement character in every context and each text
    /// in every fallback context.
    pub fn build<R, I, S>(
        rasterizer: &R,
        contexts: &[String],
        texts: I,
        fallback_contexts: &[String],
    ) -> Self
    where
        R: Rasterizer + ?Sized,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let replacement_text = REPLACEMENT_CHARACTER.to_string();
        let mut replacement: Vec<GrayImage> = Vec::new();
        for context in contexts {
            if let Some(raster) = rasterizer.rasterize(&replacement_text, context) {
                let image = raster.image();
                if !replacement.iter().any(|known| known == image) {
                    replacement.push(image.clone());
                }
            }
        }

        let mut references = Self {
            replacement: replacement.into(),
            fallback: HashMap::new(),
            fallback_contexts: fallback_contexts.to_vec(),
        };
        references.add_texts(rasterizer, texts);
        log::debug!(
            "reference renders: {} replacement, {} texts x {} fallback contexts",
            references.replacement.len(),
            references.fallback.len(),
            references.fallback_contexts.len(),
        );
        references
    }

    /// Add fallback references for more texts (e.g. large-side
    /// candidates that survived the prefilter).
    pub fn add_texts<R, I, S>(&mut self, rasterizer: &R, texts: I)
    where
        R: Rasterizer + ?Sized,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for text in texts {
            let text = text.as_ref();
            if self.fallback.contains_key(text) {
                continue;
            }
            let renders = self
                .fallback_contexts
                .iter()
                .filter_map(|context| {
                    rasterizer
                        .rasterize(text, context)
                        .map(|raster| (context.clone(), raster.image().clone()))
                })
                .collect();
            self.fallback.insert(text.to_string(), renders);
        }
    }

    /// References for a single text: the replacement table is shared with
    /// `self`, the fallback renders cover `text` alone. Dropping the result
    /// releases that text's fallback pixels.
    #[must_use]
    pub fn for_text<R>(&self, rasterizer: &R, text: &str) -> Self
    where
        R: Rasterizer + ?Sized,
    {
        let mut references = Self {
            replacement: Arc::clone(&self.replacement),
            fallback: HashMap::new(),
            fallback_contexts: self.fallback_contexts.clone(),
        };
        if let Some(renders) = self.fallback.get(text) {
            references.fallback.insert(text.to_string(), renders.clone());
        } else {
            references.add_texts(rasterizer, [text]);
        }
        references
    }

    /// Classify one render of `text` in `context`.
    #[must_use]
    pub fn classify(
        &self,
        text: &str,
        context: &str,
        raster: Option<&Raster>,
        bounds: Option<InkBounds>,
        ink_threshold: u8,
    ) -> Provenance {
        let Some(raster) = raster else {
            return Provenance::Missing;
        };
        let Some(bounds) = bounds else {
            return Provenance::Missing;
        };
        let image = raster.image();
        if self.replacement.iter().any(|known| known == image) {
            return Provenance::Missing;
        }
        if is_placeholder_box(image, bounds, ink_threshold) {
            return Provenance::Missing;
        }
        let substituted = self.fallback.get(text).is_some_and(|renders| {
            renders
                .iter()
                .any(|(fallback, known)| fallback != context && known == image)
        });
        if substituted {
            Provenance::Fallback
        } else {
            Provenance::Native
        }
    }
}

/// Whether the ink looks like a generic "unknown code point" box: large,
/// with a continuous dark border on all four edges and a mostly empty
/// interior.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn is_placeholder_box(image: &GrayImage, bounds: InkBounds, ink_threshold: u8) -> bool {
    let (canvas_w, canvas_h) = image.dimensions();
    if f64::from(bounds.width()) < PLACEHOLDER_MIN_WIDTH * f64::from(canvas_w)
        || f64::from(bounds.height()) < PLACEHOLDER_MIN_HEIGHT * f64::from(canvas_h)
    {
        return false;
    }

    let ink = |x: u32, y: u32| is_ink(image.get_pixel(x, y).0[0], ink_threshold);
    let fraction = |count: usize, total: u32| count as f64 / f64::from(total.max(1));

    let columns = bounds.left..bounds.right;
    let rows = bounds.top..bounds.bottom;
    let edges = [
        fraction(columns.clone().filter(|&x| ink(x, bounds.top)).count(), bounds.width()),
        fraction(columns.clone().filter(|&x| ink(x, bounds.bottom - 1)).count(), bounds.width()),
        fraction(rows.clone().filter(|&y| ink(bounds.left, y)).count(), bounds.height()),
        fraction(rows.filter(|&y| ink(bounds.right - 1, y)).count(), bounds.height()),
    ];
    if edges.iter().any(|&f| f < PLACEHOLDER_EDGE_INK) {
        return false;
    }

    // Interior excludes a two-pixel border to skip stroke thickness.
    let (Some(inner_w), Some(inner_h)) = (
        bounds.width().checked_sub(4),
        bounds.height().checked_sub(4),
    ) else {
        return false;
    };
    if inner_w == 0 || inner_h == 0 {
        return false;
    }
    let interior = (bounds.top + 2..bounds.bottom - 2)
        .flat_map(|y| (bounds.left + 2..bounds.right - 2).map(move |x| (x, y)))
        .filter(|&(x, y)| ink(x, y))
        .count();
    fraction(interior, inner_w * inner_h) <= PLACEHOLDER_MAX_INTERIOR_INK
}
