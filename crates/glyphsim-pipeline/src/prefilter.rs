//! Two-phase candidate selection for very large target sets.
//!
//! Phase one keeps only [`GlyphMetadata`] (fingerprint and raw ink
//! width) for every large-side render. Phase two runs both cheap gates
//! against the small side and loads pixels only for the survivors.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::phash::Fingerprint;
use crate::provenance::ReferenceRenders;
use crate::render::{Rasterizer, Render, RenderCache, RenderSet};
use crate::types::ScoringConfig;

/// Pixel-free summary of one usable render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlyphMetadata {
    /// Text unit.
    pub text: String,
    /// Font context.
    pub context: String,
    /// Fingerprint of the single-normalized raster.
    pub fingerprint: Fingerprint,
    /// Raw ink width in pixels.
    pub ink_width: u32,
}

impl GlyphMetadata {
    /// Metadata for a usable render, `None` for a missing one.
    #[must_use]
    pub fn from_render(text: &str, render: &Render) -> Option<Self> {
        render.usable().map(|glyph| Self {
            text: text.to_string(),
            context: render.context.clone(),
            fingerprint: glyph.fingerprint(),
            ink_width: glyph.ink_width(),
        })
    }

    /// Metadata for every usable render in `set`.
    pub fn from_set<'a>(text: &'a str, set: &'a RenderSet) -> impl Iterator<Item = Self> + 'a {
        set.iter().filter_map(move |render| Self::from_render(text, render))
    }

    fn passes(&self, other: &Self, config: &ScoringConfig) -> bool {
        self.fingerprint.similarity(other.fingerprint) >= config.phash_gate(&other.text, &self.text)
            && config.width_ratio_passes(self.ink_width, other.ink_width)
    }
}

/// Indices into `index` of entries that pass both gates against at
/// least one `small` entry, in ascending order.
#[must_use]
pub fn select_candidates(
    index: &[GlyphMetadata],
    small: &[GlyphMetadata],
    config: &ScoringConfig,
) -> Vec<usize> {
    let selected: Vec<usize> = index
        .iter()
        .enumerate()
        .filter(|(_, entry)| small.iter().any(|probe| entry.passes(probe, config)))
        .map(|(i, _)| i)
        .collect();
    log::info!(
        "prefilter kept {} of {} large-side renders",
        selected.len(),
        index.len()
    );
    selected
}

/// Rasterize and prepare only the selected entries.
///
/// Fallback references are extended for the surviving texts first, so
/// provenance is classified exactly as for fully loaded renders.
pub fn load_candidates<R>(
    index: &[GlyphMetadata],
    selected: &[usize],
    rasterizer: &R,
    references: &mut ReferenceRenders,
    config: &ScoringConfig,
) -> RenderCache
where
    R: Rasterizer + ?Sized,
{
    let entries: Vec<&GlyphMetadata> = selected.iter().filter_map(|&i| index.get(i)).collect();
    let texts: BTreeSet<&str> = entries.iter().map(|e| e.text.as_str()).collect();
    references.add_texts(rasterizer, texts.iter().copied());

    let mut grouped: BTreeMap<&str, Vec<Render>> = BTreeMap::new();
    for entry in entries {
        let raster = rasterizer.rasterize(&entry.text, &entry.context);
        let render = Render::prepare(&entry.text, &entry.context, raster, references, config);
        grouped.entry(entry.text.as_str()).or_default().push(render);
    }
    grouped
        .into_iter()
        .map(|(text, renders)| (text.to_string(), RenderSet::new(renders)))
        .collect()
}
