//! 64-bit perceptual fingerprint (average hash).
//!
//! The canonical image is area-averaged down to 8x8, and each bit
//! records whether a cell is brighter than the mean of all 64 cells.
//! Bits are packed MSB-first in row-major order, so cell `(0, 0)` is
//! bit 63.
//!
//! Fingerprints are only a cheap pre-filter. The persisted score is
//! always the structural similarity.

use serde::{Deserialize, Serialize};

use crate::types::CanonicalImage;

/// Cells per fingerprint side.
pub const GRID: usize = 8;

/// Number of bits in a fingerprint.
pub const BITS: u32 = 64;

/// A 64-bit perceptual fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Wrap raw bits.
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// The raw bits.
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Fingerprint a canonical image.
    #[must_use]
    pub fn compute(image: &CanonicalImage) -> Self {
        let cells = area_average(image);
        #[allow(clippy::cast_precision_loss)]
        let mean = cells.iter().sum::<f64>() / cells.len() as f64;
        let bits = cells
            .iter()
            .fold(0_u64, |acc, &cell| (acc << 1) | u64::from(cell > mean));
        Self(bits)
    }

    /// Number of differing bits.
    ///
    /// Sums the population counts of the two 32-bit halves of the XOR;
    /// this sits on the innermost loop of cross-context selection.
    #[must_use]
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn hamming_distance(self, other: Self) -> u32 {
        let diff = self.0 ^ other.0;
        (diff as u32).count_ones() + ((diff >> 32) as u32).count_ones()
    }

    /// Similarity in `[0, 1]`: `1 - hamming / 64`.
    #[must_use]
    #[inline]
    pub fn similarity(self, other: Self) -> f64 {
        1.0 - f64::from(self.hamming_distance(other)) / f64::from(BITS)
    }
}

/// Mean-preserving resize to `GRID x GRID`.
///
/// Each cell is the exact area-weighted mean of the source pixels it
/// covers, including fractional coverage at cell borders.
fn area_average(image: &CanonicalImage) -> [f64; GRID * GRID] {
    let img = image.image();
    let (width, height) = img.dimensions();
    let mut cells = [0.0; GRID * GRID];
    if width == 0 || height == 0 {
        return cells;
    }

    let columns = coverage(width);
    let rows = coverage(height);
    for (cy, row_weights) in rows.iter().enumerate() {
        for (cx, column_weights) in columns.iter().enumerate() {
            let mut sum = 0.0;
            let mut area = 0.0;
            for &(y, wy) in row_weights {
                for &(x, wx) in column_weights {
                    let w = wx * wy;
                    sum += w * f64::from(img.get_pixel(x, y).0[0]);
                    area += w;
                }
            }
            cells[cy * GRID + cx] = sum / area;
        }
    }
    cells
}

/// For each of the `GRID` output cells along an axis, the source
/// indices it overlaps and the overlap length.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn coverage(src_len: u32) -> Vec<Vec<(u32, f64)>> {
    let step = f64::from(src_len) / GRID as f64;
    (0..GRID)
        .map(|cell| {
            #[allow(clippy::cast_precision_loss)]
            let start = cell as f64 * step;
            let end = start + step;
            let first = start.floor() as u32;
            let last = (end.ceil() as u32).min(src_len);
            (first..last)
                .filter_map(|i| {
                    let lo = f64::from(i).max(start);
                    let hi = f64::from(i + 1).min(end);
                    (hi > lo).then_some((i, hi - lo))
                })
                .collect()
        })
        .collect()
}
