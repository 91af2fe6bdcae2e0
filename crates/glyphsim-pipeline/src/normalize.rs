//! Raster-to-canonical-image normalization.
//!
//! Two modes:
//!
//! - [`normalize_single`] crops a raster to its ink, scales it to fit
//!   the canonical square, and centers it. Used for fingerprints.
//! - [`normalize_pair`] normalizes two rasters *together*. Vertical
//!   cropping uses the union of both ink ranges measured from each
//!   side's midline, and one scale factor is shared, so a wide sequence
//!   stays wider than a narrow character and a descender stays below
//!   the baseline. Every scored comparison goes through this mode.
//!
//! The pair transform, for sides `a` and `b` with ink boxes and
//! midlines `m`:
//!
//! ```text
//! top    = min(a.top - a.m, b.top - b.m)
//! bottom = max(a.bottom - a.m, b.bottom - b.m)
//! crop_a = columns [a.left, a.right) x rows [a.m + top, a.m + bottom)
//! scale  = min(size / max(a.width, b.width), size / (bottom - top))
//! ```
//!
//! Crop rows falling outside a canvas read as background.

use image::GrayImage;

use crate::ink::detect_ink_bounds;
use crate::resample::{ResizeFn, resize_cubic};
use crate::types::{BACKGROUND, CanonicalImage, InkBounds, Raster};

/// A raster together with its (cached) ink bounds.
#[derive(Debug, Clone, Copy)]
pub struct Inked<'a> {
    /// The raw raster.
    pub raster: &'a Raster,
    /// Its ink bounds, `None` when the raster is blank.
    pub bounds: Option<InkBounds>,
}

impl<'a> Inked<'a> {
    /// Detect the ink bounds of `raster`.
    #[must_use]
    pub fn detect(raster: &'a Raster, threshold: u8) -> Self {
        Self {
            raster,
            bounds: detect_ink_bounds(raster.image(), threshold),
        }
    }
}

/// Normalize one raster on its own.
///
/// A blank raster yields an all-background image.
#[must_use]
pub fn normalize_single(side: Inked<'_>, size: u32) -> CanonicalImage {
    normalize_single_with(side, size, resize_cubic)
}

/// Normalize two rasters with a shared scale and baseline alignment.
///
/// A blank side becomes an all-background image and the other side is
/// normalized on its own. Swapping the arguments swaps the outputs.
#[must_use]
pub fn normalize_pair(a: Inked<'_>, b: Inked<'_>, size: u32) -> (CanonicalImage, CanonicalImage) {
    normalize_pair_with(a, b, size, resize_cubic)
}

/// [`normalize_single`] with a caller-supplied resampler.
#[must_use]
pub fn normalize_single_with(side: Inked<'_>, size: u32, resize: ResizeFn) -> CanonicalImage {
    let Some(bounds) = side.bounds else {
        return CanonicalImage::blank(size);
    };

    let crop = crop_with_background(
        side.raster.image(),
        i64::from(bounds.left),
        i64::from(bounds.top),
        bounds.width(),
        bounds.height(),
    );
    let scale = fit_scale(size, bounds.width(), bounds.height());
    let resized = resize(
        &crop,
        scaled_len(bounds.width(), scale, size),
        scaled_len(bounds.height(), scale, size),
    );
    center_pad(&resized, size)
}

/// [`normalize_pair`] with a caller-supplied resampler.
///
/// Production paths use [`normalize_pair`]; this exists so a reference
/// kernel can be checked against the shared one.
#[must_use]
pub fn normalize_pair_with(
    a: Inked<'_>,
    b: Inked<'_>,
    size: u32,
    resize: ResizeFn,
) -> (CanonicalImage, CanonicalImage) {
    let (bounds_a, bounds_b) = match (a.bounds, b.bounds) {
        (None, None) => return (CanonicalImage::blank(size), CanonicalImage::blank(size)),
        (None, Some(_)) => {
            return (
                CanonicalImage::blank(size),
                normalize_single_with(b, size, resize),
            );
        }
        (Some(_), None) => {
            return (
                normalize_single_with(a, size, resize),
                CanonicalImage::blank(size),
            );
        }
        (Some(bounds_a), Some(bounds_b)) => (bounds_a, bounds_b),
    };

    let mid_a = i64::from(a.raster.midline());
    let mid_b = i64::from(b.raster.midline());

    // Union of the vertical ink ranges relative to each midline.
    let top = (i64::from(bounds_a.top) - mid_a).min(i64::from(bounds_b.top) - mid_b);
    let bottom = (i64::from(bounds_a.bottom) - mid_a).max(i64::from(bounds_b.bottom) - mid_b);
    let shared_height = u32::try_from(bottom - top).unwrap_or(u32::MAX);

    let crop_a = crop_with_background(
        a.raster.image(),
        i64::from(bounds_a.left),
        mid_a + top,
        bounds_a.width(),
        shared_height,
    );
    let crop_b = crop_with_background(
        b.raster.image(),
        i64::from(bounds_b.left),
        mid_b + top,
        bounds_b.width(),
        shared_height,
    );

    let widest = bounds_a.width().max(bounds_b.width());
    let scale = fit_scale(size, widest, shared_height);
    let height = scaled_len(shared_height, scale, size);

    let resized_a = resize(&crop_a, scaled_len(bounds_a.width(), scale, size), height);
    let resized_b = resize(&crop_b, scaled_len(bounds_b.width(), scale, size), height);

    (center_pad(&resized_a, size), center_pad(&resized_b, size))
}

/// Largest scale at which a `width x height` box fits in `size x size`.
fn fit_scale(size: u32, width: u32, height: u32) -> f64 {
    let size = f64::from(size);
    (size / f64::from(width.max(1))).min(size / f64::from(height.max(1)))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scaled_len(len: u32, scale: f64, size: u32) -> u32 {
    ((f64::from(len) * scale).round() as u32).clamp(1, size)
}

/// Copy a `width x height` window starting at `(left, top)`; pixels
/// outside the source read as background.
fn crop_with_background(
    image: &GrayImage,
    left: i64,
    top: i64,
    width: u32,
    height: u32,
) -> GrayImage {
    let (src_w, src_h) = image.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        let sx = left + i64::from(x);
        let sy = top + i64::from(y);
        match (u32::try_from(sx), u32::try_from(sy)) {
            (Ok(sx), Ok(sy)) if sx < src_w && sy < src_h => *image.get_pixel(sx, sy),
            _ => image::Luma([BACKGROUND]),
        }
    })
}

/// Center `image` on a background square of side `size`.
fn center_pad(image: &GrayImage, size: u32) -> CanonicalImage {
    let mut canvas = GrayImage::from_pixel(size, size, image::Luma([BACKGROUND]));
    let x = i64::from(size.saturating_sub(image.width()) / 2);
    let y = i64::from(size.saturating_sub(image.height()) / 2);
    image::imageops::replace(&mut canvas, image, x, y);
    CanonicalImage::from_image(canvas)
}
