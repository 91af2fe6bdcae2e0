//! Structural similarity (SSIM) between canonical images.
//!
//! Single-channel SSIM with a 7x7 uniform window, sample covariance,
//! `K1 = 0.01`, `K2 = 0.03`, and a data range of 255. The score is the
//! mean of the per-window index over every window that lies entirely
//! inside the image:
//!
//! ```text
//! ssim = ((2 mu_a mu_b + C1) (2 cov + C2))
//!      / ((mu_a^2 + mu_b^2 + C1) (var_a + var_b + C2))
//! ```
//!
//! Window sums come from summed-area tables, so the cost is linear in
//! the pixel count regardless of window size. Identical inputs score
//! exactly 1.0 and the measure is symmetric in its arguments.

use image::GrayImage;

use crate::types::CanonicalImage;

/// Side length of the sliding window.
pub const WINDOW: u32 = 7;

/// Luminance stabilizer constant.
pub const K1: f64 = 0.01;

/// Contrast stabilizer constant.
pub const K2: f64 = 0.03;

/// Dynamic range of 8-bit intensities.
pub const DATA_RANGE: f64 = 255.0;

/// Structural similarity of two canonical images, roughly in `[-1, 1]`.
#[must_use]
pub fn compute(a: &CanonicalImage, b: &CanonicalImage) -> f64 {
    compute_gray(a.image(), b.image())
}

/// Structural similarity of two equally sized grayscale images.
///
/// Mismatched sizes compare the overlapping top-left region. Images
/// smaller than [`WINDOW`] use a single window of their smaller side.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn compute_gray(a: &GrayImage, b: &GrayImage) -> f64 {
    debug_assert_eq!(a.dimensions(), b.dimensions(), "ssim inputs differ in size");
    let width = a.width().min(b.width());
    let height = a.height().min(b.height());
    let window = WINDOW.min(width).min(height);
    if window == 0 {
        return 1.0;
    }

    let tables = Tables::build(a, b, width, height);
    let n = f64::from(window * window);
    let cov_norm = if n > 1.0 { n / (n - 1.0) } else { 1.0 };
    let c1 = (K1 * DATA_RANGE).powi(2);
    let c2 = (K2 * DATA_RANGE).powi(2);

    let mut total = 0.0;
    let mut count = 0_u64;
    for y in 0..=(height - window) {
        for x in 0..=(width - window) {
            let s = tables.window_sums(x, y, window);
            let mu_a = s.a / n;
            let mu_b = s.b / n;
            let var_a = cov_norm * (s.aa / n - mu_a * mu_a);
            let var_b = cov_norm * (s.bb / n - mu_b * mu_b);
            let cov = cov_norm * (s.ab / n - mu_a * mu_b);

            let numerator = (2.0 * mu_a * mu_b + c1) * (2.0 * cov + c2);
            let denominator = (mu_a * mu_a + mu_b * mu_b + c1) * (var_a + var_b + c2);
            total += numerator / denominator;
            count += 1;
        }
    }
    total / count as f64
}

/// Sums over one window.
struct WindowSums {
    a: f64,
    b: f64,
    aa: f64,
    bb: f64,
    ab: f64,
}

/// Summed-area tables of `a`, `b`, `a^2`, `b^2`, and `a*b`, each
/// `(width + 1) x (height + 1)` with a zero first row and column.
struct Tables {
    stride: usize,
    a: Vec<u64>,
    b: Vec<u64>,
    aa: Vec<u64>,
    bb: Vec<u64>,
    ab: Vec<u64>,
}

impl Tables {
    fn build(a: &GrayImage, b: &GrayImage, width: u32, height: u32) -> Self {
        let stride = width as usize + 1;
        let len = stride * (height as usize + 1);
        let mut tables = Self {
            stride,
            a: vec![0; len],
            b: vec![0; len],
            aa: vec![0; len],
            bb: vec![0; len],
            ab: vec![0; len],
        };
        for y in 0..height {
            let mut row = [0_u64; 5];
            for x in 0..width {
                let va = u64::from(a.get_pixel(x, y).0[0]);
                let vb = u64::from(b.get_pixel(x, y).0[0]);
                row[0] += va;
                row[1] += vb;
                row[2] += va * va;
                row[3] += vb * vb;
                row[4] += va * vb;

                let here = (y as usize + 1) * stride + x as usize + 1;
                let above = here - stride;
                tables.a[here] = tables.a[above] + row[0];
                tables.b[here] = tables.b[above] + row[1];
                tables.aa[here] = tables.aa[above] + row[2];
                tables.bb[here] = tables.bb[above] + row[3];
                tables.ab[here] = tables.ab[above] + row[4];
            }
        }
        tables
    }

    #[allow(clippy::cast_precision_loss)]
    fn window_sums(&self, x: u32, y: u32, window: u32) -> WindowSums {
        let top_left = y as usize * self.stride + x as usize;
        let top_right = top_left + window as usize;
        let bottom_left = top_left + window as usize * self.stride;
        let bottom_right = bottom_left + window as usize;
        let sum = |t: &[u64]| {
            (t[bottom_right] + t[top_left] - t[top_right] - t[bottom_left]) as f64
        };
        WindowSums {
            a: sum(&self.a),
            b: sum(&self.b),
            aa: sum(&self.aa),
            bb: sum(&self.bb),
            ab: sum(&self.ab),
        }
    }
}
