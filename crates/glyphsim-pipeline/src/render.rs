//! Rasterizer and font-registry seams, and prepared renders.
//!
//! Rasterization and font discovery live outside this crate. The
//! pipeline only sees them through [`Rasterizer`] and [`FontRegistry`];
//! everything downstream works on [`Render`]s prepared once per run.

use std::collections::HashMap;

use crate::ink::detect_ink_bounds;
use crate::normalize::{Inked, normalize_single};
use crate::phash::Fingerprint;
use crate::provenance::ReferenceRenders;
use crate::types::{InkBounds, Provenance, Raster, ScoringConfig};

/// Produces rasters for a text unit in a font context.
///
/// Implementations must render every unit of a run with the same canvas
/// size and midline convention.
pub trait Rasterizer {
    /// Rasterize `text` in `context`, or `None` when nothing could be
    /// drawn.
    fn rasterize(&self, text: &str, context: &str) -> Option<Raster>;
}

/// Pure lookup of which font contexts exist and what they cover.
pub trait FontRegistry {
    /// Every known context, in a stable order.
    fn contexts(&self) -> &[String];

    /// Whether `context` claims to contain `ch`.
    fn covers(&self, context: &str, ch: char) -> bool;

    /// Contexts that cover every character of `text`.
    fn covering_contexts(&self, text: &str) -> Vec<String> {
        self.contexts()
            .iter()
            .filter(|context| text.chars().all(|ch| self.covers(context, ch)))
            .cloned()
            .collect()
    }
}

/// A raster with its ink bounds and fingerprint cached.
#[derive(Debug, Clone)]
pub struct Glyph {
    raster: Raster,
    bounds: Option<InkBounds>,
    fingerprint: Fingerprint,
}

impl Glyph {
    /// Detect ink bounds and compute the fingerprint of the
    /// single-normalized raster.
    #[must_use]
    pub fn prepare(raster: Raster, config: &ScoringConfig) -> Self {
        let bounds = detect_ink_bounds(raster.image(), config.ink_threshold);
        let canonical = normalize_single(
            Inked {
                raster: &raster,
                bounds,
            },
            config.canonical_size,
        );
        let fingerprint = Fingerprint::compute(&canonical);
        Self {
            raster,
            bounds,
            fingerprint,
        }
    }

    /// The raw raster.
    #[must_use]
    pub const fn raster(&self) -> &Raster {
        &self.raster
    }

    /// Cached ink bounds.
    #[must_use]
    pub const fn bounds(&self) -> Option<InkBounds> {
        self.bounds
    }

    /// Cached fingerprint.
    #[must_use]
    pub const fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Raw ink width, zero for a blank raster.
    #[must_use]
    pub fn ink_width(&self) -> u32 {
        self.bounds.map_or(0, |b| b.width())
    }

    /// Borrow as normalizer input.
    #[must_use]
    pub const fn inked(&self) -> Inked<'_> {
        Inked {
            raster: &self.raster,
            bounds: self.bounds,
        }
    }
}

/// One text unit in one font context.
#[derive(Debug, Clone)]
pub struct Render {
    /// Font context name.
    pub context: String,
    /// How the render came to exist.
    pub provenance: Provenance,
    /// The prepared glyph, `None` when the rasterizer produced nothing.
    pub glyph: Option<Glyph>,
}

impl Render {
    /// Prepare a raster (if any) and classify its provenance.
    #[must_use]
    pub fn prepare(
        text: &str,
        context: &str,
        raster: Option<Raster>,
        references: &ReferenceRenders,
        config: &ScoringConfig,
    ) -> Self {
        let glyph = raster.map(|raster| Glyph::prepare(raster, config));
        let provenance = references.classify(
            text,
            context,
            glyph.as_ref().map(Glyph::raster),
            glyph.as_ref().and_then(Glyph::bounds),
            config.ink_threshold,
        );
        Self {
            context: context.to_string(),
            provenance,
            glyph,
        }
    }

    /// The glyph, unless the render is missing.
    #[must_use]
    pub fn usable(&self) -> Option<&Glyph> {
        if self.provenance == Provenance::Missing {
            None
        } else {
            self.glyph.as_ref()
        }
    }
}

/// Every render of one text unit, ordered by context name.
#[derive(Debug, Clone, Default)]
pub struct RenderSet {
    renders: Vec<Render>,
}

impl RenderSet {
    /// A unit rendered nowhere.
    pub const EMPTY: Self = Self {
        renders: Vec::new(),
    };

    /// Sort by context; later duplicates of a context are dropped.
    #[must_use]
    pub fn new(mut renders: Vec<Render>) -> Self {
        renders.sort_by(|a, b| a.context.cmp(&b.context));
        renders.dedup_by(|later, earlier| later.context == earlier.context);
        Self { renders }
    }

    /// The render in `context`, if the unit was rendered there.
    #[must_use]
    pub fn get(&self, context: &str) -> Option<&Render> {
        self.renders
            .binary_search_by(|r| r.context.as_str().cmp(context))
            .ok()
            .map(|i| &self.renders[i])
    }

    /// All renders in context order.
    pub fn iter(&self) -> std::slice::Iter<'_, Render> {
        self.renders.iter()
    }

    /// Renders with a usable glyph, in context order.
    pub fn usable(&self) -> impl Iterator<Item = (&Render, &Glyph)> {
        self.renders
            .iter()
            .filter_map(|render| render.usable().map(|glyph| (render, glyph)))
    }

    /// Number of contexts rendered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.renders.len()
    }

    /// Whether no context rendered the unit.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.renders.is_empty()
    }
}

impl<'a> IntoIterator for &'a RenderSet {
    type Item = &'a Render;
    type IntoIter = std::slice::Iter<'a, Render>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Prepared renders keyed by text, shared read-only across a run.
#[derive(Debug, Clone, Default)]
pub struct RenderCache {
    sets: HashMap<String, RenderSet>,
}

impl RenderCache {
    /// Render every text serially.
    pub fn render_all<R, F, I, S>(
        texts: I,
        rasterizer: &R,
        registry: &F,
        references: &ReferenceRenders,
        config: &ScoringConfig,
    ) -> Self
    where
        R: Rasterizer + ?Sized,
        F: FontRegistry + ?Sized,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut cache = Self::default();
        for text in texts {
            let text = text.as_ref();
            if !cache.contains(text) {
                let set = render_text(text, rasterizer, registry, references, config);
                cache.insert(text.to_string(), set);
            }
        }
        cache
    }

    /// Add or replace the renders of `text`.
    pub fn insert(&mut self, text: String, set: RenderSet) {
        self.sets.insert(text, set);
    }

    /// Renders of `text`.
    #[must_use]
    pub fn get(&self, text: &str) -> Option<&RenderSet> {
        self.sets.get(text)
    }

    /// Whether `text` has been rendered.
    #[must_use]
    pub fn contains(&self, text: &str) -> bool {
        self.sets.contains_key(text)
    }

    /// Number of texts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// Whether no text has been rendered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

impl FromIterator<(String, RenderSet)> for RenderCache {
    fn from_iter<T: IntoIterator<Item = (String, RenderSet)>>(iter: T) -> Self {
        Self {
            sets: iter.into_iter().collect(),
        }
    }
}

/// Render `text` in every context that covers it.
pub fn render_text<R, F>(
    text: &str,
    rasterizer: &R,
    registry: &F,
    references: &ReferenceRenders,
    config: &ScoringConfig,
) -> RenderSet
where
    R: Rasterizer + ?Sized,
    F: FontRegistry + ?Sized,
{
    let renders = registry
        .covering_contexts(text)
        .into_iter()
        .map(|context| {
            let raster = rasterizer.rasterize(text, &context);
            if raster.is_none() {
                log::debug!("no raster for {text:?} in {context}");
            }
            Render::prepare(text, &context, raster, references, config)
        })
        .collect();
    RenderSet::new(renders)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::GrayImage;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    use super::*;
    use crate::types::BACKGROUND;

    struct Registry {
        contexts: Vec<String>,
    }

    impl FontRegistry for Registry {
        fn contexts(&self) -> &[String] {
            &self.contexts
        }

        fn covers(&self, context: &str, ch: char) -> bool {
            context != "Latin Only" || ch.is_ascii()
        }
    }

    /// Draws a bar whose width is the text length; nothing in "Empty".
    struct Bars;

    impl Rasterizer for Bars {
        fn rasterize(&self, text: &str, context: &str) -> Option<Raster> {
            if context == "Empty" {
                return None;
            }
            let width = u32::try_from(text.chars().count()).unwrap() * 6;
            let mut img = GrayImage::from_pixel(64, 64, image::Luma([BACKGROUND]));
            draw_filled_rect_mut(&mut img, Rect::at(4, 10).of_size(width, 30), image::Luma([0]));
            Some(Raster::centered(img))
        }
    }

    fn registry() -> Registry {
        Registry {
            contexts: vec![
                "Serif".to_string(),
                "Latin Only".to_string(),
                "Empty".to_string(),
            ],
        }
    }

    #[test]
    fn covering_contexts_require_every_character() {
        let reg = registry();
        assert_eq!(reg.covering_contexts("ab").len(), 3);
        assert_eq!(reg.covering_contexts("a\u{430}"), vec!["Serif", "Empty"]);
    }

    #[test]
    fn glyph_caches_bounds_and_width() {
        let raster = Bars.rasterize("abc", "Serif").unwrap();
        let glyph = Glyph::prepare(raster, &ScoringConfig::default());
        assert_eq!(glyph.ink_width(), 18);
        assert_eq!(glyph.bounds().unwrap().height(), 30);
    }

    #[test]
    fn render_text_sorts_and_classifies() {
        let config = ScoringConfig::default();
        let refs = ReferenceRenders::default();
        let set = render_text("a", &Bars, &registry(), &refs, &config);
        let contexts: Vec<&str> = set.iter().map(|r| r.context.as_str()).collect();
        assert_eq!(contexts, vec!["Empty", "Latin Only", "Serif"]);
        assert_eq!(set.get("Empty").unwrap().provenance, Provenance::Missing);
        assert_eq!(set.get("Serif").unwrap().provenance, Provenance::Native);
        assert_eq!(set.usable().count(), 2);
        assert!(set.get("Sans").is_none());
    }

    #[test]
    fn render_set_drops_duplicate_contexts() {
        let make = |context: &str, provenance| Render {
            context: context.to_string(),
            provenance,
            glyph: None,
        };
        let set = RenderSet::new(vec![
            make("B", Provenance::Native),
            make("A", Provenance::Native),
            make("B", Provenance::Missing),
        ]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn render_all_skips_repeated_texts() {
        let config = ScoringConfig::default();
        let cache = RenderCache::render_all(
            ["a", "b", "a"],
            &Bars,
            &registry(),
            &ReferenceRenders::default(),
            &config,
        );
        assert_eq!(cache.len(), 2);
        assert!(cache.contains("b"));
    }
}
