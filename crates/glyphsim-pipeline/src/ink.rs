//! Ink detection on raw rasters.
//!
//! A pixel is ink when its intensity is below `255 - threshold`. The
//! tight box around all ink pixels drives every crop in the normalizer
//! and the width-ratio gate in the orchestrator.

use image::GrayImage;

use crate::types::{BACKGROUND, InkBounds};

/// Whether an intensity counts as ink under `threshold`.
#[must_use]
#[inline]
pub const fn is_ink(value: u8, threshold: u8) -> bool {
    value < BACKGROUND.saturating_sub(threshold)
}

/// Tight bounding box of all ink pixels, or `None` when the image has
/// no ink.
#[must_use]
pub fn detect_ink_bounds(image: &GrayImage, threshold: u8) -> Option<InkBounds> {
    let (width, height) = image.dimensions();
    let mut left = width;
    let mut top = height;
    let mut right = 0;
    let mut bottom = 0;
    let mut found = false;

    for (x, y, pixel) in image.enumerate_pixels() {
        if is_ink(pixel.0[0], threshold) {
            found = true;
            left = left.min(x);
            top = top.min(y);
            right = right.max(x + 1);
            bottom = bottom.max(y + 1);
        }
    }

    found.then_some(InkBounds {
        left,
        top,
        right,
        bottom,
    })
}
