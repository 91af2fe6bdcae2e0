//! Integration test: the shared separable resampler against a direct
//! 2-D cubic convolution, measured where it matters (final SSIM).

#![allow(
    clippy::unwrap_used,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

use glyphsim_pipeline::normalize::{Inked, normalize_pair, normalize_pair_with};
use glyphsim_pipeline::resample::{cubic_weight, source_coordinate};
use glyphsim_pipeline::{GrayImage, Raster, ScoringConfig, ssim};
use image::Luma;
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_circle_mut, draw_hollow_rect_mut,
    draw_line_segment_mut,
};
use imageproc::rect::Rect;

const INK: Luma<u8> = Luma([0]);

/// Non-separable reference: every output pixel sums its 4x4 source
/// neighborhood directly.
fn reference_resize(image: &GrayImage, width: u32, height: u32) -> GrayImage {
    let (src_w, src_h) = image.dimensions();
    if src_w == 0 || src_h == 0 || width == 0 || height == 0 {
        return GrayImage::from_pixel(width, height, Luma([255]));
    }
    GrayImage::from_fn(width, height, |ox, oy| {
        let sx = source_coordinate(ox, src_w, width);
        let sy = source_coordinate(oy, src_h, height);
        let (bx, by) = (sx.floor(), sy.floor());
        let mut acc = 0.0;
        for j in -1..=2_i32 {
            for i in -1..=2_i32 {
                let px = (bx as i64 + i64::from(i)).clamp(0, i64::from(src_w) - 1) as u32;
                let py = (by as i64 + i64::from(j)).clamp(0, i64::from(src_h) - 1) as u32;
                let w = cubic_weight(sx - (bx + f64::from(i)))
                    * cubic_weight(sy - (by + f64::from(j)));
                acc += w * f64::from(image.get_pixel(px, py).0[0]);
            }
        }
        Luma([acc.round().clamp(0.0, 255.0) as u8])
    })
}

fn canvas() -> GrayImage {
    GrayImage::from_pixel(64, 64, Luma([255]))
}

/// Synthetic glyph-like shapes of varied width, height, and position.
fn probes() -> Vec<Raster> {
    let mut shapes = Vec::new();
    for k in 0..8_i32 {
        let mut img = canvas();
        draw_filled_rect_mut(&mut img, Rect::at(10 + k, 8).of_size(4 + k as u32, 40), INK);
        shapes.push(img);

        let mut img = canvas();
        draw_hollow_circle_mut(&mut img, (32, 30 + k), 8 + k, INK);
        draw_hollow_circle_mut(&mut img, (32, 30 + k), 7 + k, INK);
        shapes.push(img);

        let mut img = canvas();
        draw_line_segment_mut(&mut img, (8.0, 50.0), (20.0 + 3.0 * k as f32, 10.0), INK);
        draw_line_segment_mut(&mut img, (9.0, 50.0), (21.0 + 3.0 * k as f32, 10.0), INK);
        draw_filled_circle_mut(&mut img, (40, 40), 3 + k / 2, INK);
        shapes.push(img);
    }
    let mut img = canvas();
    draw_hollow_rect_mut(&mut img, Rect::at(12, 12).of_size(30, 36), INK);
    shapes.push(img);
    shapes.into_iter().map(Raster::centered).collect()
}

#[test]
fn reference_kernel_agrees_within_tolerance() {
    let config = ScoringConfig::default();
    let probes = probes();
    let mut pairs = 0;
    for (i, a) in probes.iter().enumerate() {
        for b in probes.iter().skip(i + 1).step_by(4) {
            let ia = Inked::detect(a, config.ink_threshold);
            let ib = Inked::detect(b, config.ink_threshold);

            let (fa, fb) = normalize_pair(ia, ib, config.canonical_size);
            let (ra, rb) = normalize_pair_with(ia, ib, config.canonical_size, reference_resize);

            let fast = ssim::compute(&fa, &fb);
            let slow = ssim::compute(&ra, &rb);
            assert!(
                (fast - slow).abs() <= 0.02,
                "pair ({i}): shared {fast:.4} vs reference {slow:.4}"
            );
            pairs += 1;
        }
    }
    assert!(pairs >= 20, "only {pairs} probe pairs");
}

#[test]
fn reference_kernel_pixels_differ_by_at_most_one_level() {
    let config = ScoringConfig::default();
    for raster in probes() {
        let inked = Inked::detect(&raster, config.ink_threshold);
        let (fast, _) = normalize_pair(inked, inked, config.canonical_size);
        let (slow, _) = normalize_pair_with(inked, inked, config.canonical_size, reference_resize);
        for (p, q) in fast.image().pixels().zip(slow.image().pixels()) {
            assert!(p.0[0].abs_diff(q.0[0]) <= 1);
        }
    }
}
