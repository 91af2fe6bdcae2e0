//! Cubic-convolution resampling shared by every normalization call site.
//!
//! Scores are sensitive to the exact interpolation, so the coordinator
//! and all workers resize through this one routine. The kernel is the
//! Keys cubic with `a = -0.5` (Catmull-Rom), applied as two separable
//! 1-D passes, horizontal then vertical:
//!
//! ```text
//! src = (i + 0.5) * src_len / dst_len - 0.5
//! out = sum(w(src - j) * in[clamp(j)])   for the 4 taps around src
//! ```
//!
//! The intermediate pass is kept in `f64`; only the final output is
//! rounded and clamped to `[0, 255]`. There is no support widening when
//! shrinking: every output sample reads exactly four source samples.

use image::GrayImage;

use crate::types::BACKGROUND;

/// Kernel parameter `a`.
pub const CUBIC_A: f64 = -0.5;

/// Signature of a resize routine, used to swap in a reference kernel.
pub type ResizeFn = fn(&GrayImage, u32, u32) -> GrayImage;

/// Keys cubic convolution weight at distance `x`.
#[must_use]
pub fn cubic_weight(x: f64) -> f64 {
    let x = x.abs();
    if x <= 1.0 {
        ((CUBIC_A + 2.0) * x - (CUBIC_A + 3.0)) * x * x + 1.0
    } else if x < 2.0 {
        ((CUBIC_A * x - 5.0 * CUBIC_A) * x + 8.0 * CUBIC_A) * x - 4.0 * CUBIC_A
    } else {
        0.0
    }
}

/// The four source indices and weights feeding one output sample.
#[derive(Debug, Clone, Copy)]
struct Taps {
    index: [usize; 4],
    weight: [f64; 4],
}

/// Source coordinate of output sample `i`.
#[must_use]
pub fn source_coordinate(i: u32, src_len: u32, dst_len: u32) -> f64 {
    (f64::from(i) + 0.5) * f64::from(src_len) / f64::from(dst_len) - 0.5
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn taps(src_len: u32, dst_len: u32) -> Vec<Taps> {
    let last = i64::from(src_len) - 1;
    (0..dst_len)
        .map(|i| {
            let center = source_coordinate(i, src_len, dst_len);
            let base = center.floor();
            let t = center - base;
            let base = base as i64;
            let mut index = [0; 4];
            let mut weight = [0.0; 4];
            for k in 0..4 {
                let offset = k as i64 - 1;
                index[k] = (base + offset).clamp(0, last) as usize;
                weight[k] = cubic_weight(t - offset as f64);
            }
            Taps { index, weight }
        })
        .collect()
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_pixel(value: f64) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Resize `image` to `width x height` with the shared cubic kernel.
///
/// Requesting the source dimensions returns an identical image. An
/// empty source or target yields an all-background image of the
/// requested size.
#[must_use = "returns the resized image"]
pub fn resize_cubic(image: &GrayImage, width: u32, height: u32) -> GrayImage {
    let (src_w, src_h) = image.dimensions();
    if src_w == 0 || src_h == 0 || width == 0 || height == 0 {
        return GrayImage::from_pixel(width, height, image::Luma([BACKGROUND]));
    }

    let src = image.as_raw();
    let row_len = src_w as usize;
    let out_w = width as usize;

    // Horizontal pass: src_h rows of `width` samples.
    let h_taps = taps(src_w, width);
    let mut horizontal = vec![0.0_f64; out_w * src_h as usize];
    for (row, out_row) in src
        .chunks_exact(row_len)
        .zip(horizontal.chunks_exact_mut(out_w))
    {
        for (out, tap) in out_row.iter_mut().zip(&h_taps) {
            *out = tap
                .index
                .iter()
                .zip(&tap.weight)
                .map(|(&i, &w)| f64::from(row[i]) * w)
                .sum();
        }
    }

    // Vertical pass.
    let v_taps = taps(src_h, height);
    let mut out = Vec::with_capacity(out_w * height as usize);
    for tap in &v_taps {
        for x in 0..out_w {
            let value: f64 = tap
                .index
                .iter()
                .zip(&tap.weight)
                .map(|(&y, &w)| horizontal[y * out_w + x] * w)
                .sum();
            out.push(to_pixel(value));
        }
    }

    // Length is exactly width * height by construction.
    GrayImage::from_raw(width, height, out)
        .unwrap_or_else(|| GrayImage::from_pixel(width, height, image::Luma([BACKGROUND])))
}
