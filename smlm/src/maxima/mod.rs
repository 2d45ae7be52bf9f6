//! Block-wise non-maximum suppression (Neubeck & Van Gool).
//!
//! The region is tiled into blocks of side `n + 1`. Each block's brightest pixel
//! is a candidate and survives only if no pixel of its `(2n + 1)²` neighborhood
//! outside the block is as bright. Each pixel is visited a bounded number of
//! times, so the cost is O(W·H) regardless of emitter density.

mod filter;
#[cfg(test)]
mod tests;

pub use filter::{gaussian_blur, gaussian_kernel_1d};

use common::{Buffer2, Roi};

use crate::config::{FitConfig, PreFilter};

/// A local maximum in full-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Maximum {
    pub x: usize,
    pub y: usize,
    /// Pixel value in the (possibly pre-filtered) detection image.
    pub value: f64,
}

/// Finds local maxima of `buffer` with block half-size `n`, keeping values above `threshold`.
///
/// Maxima closer than `n` pixels to the image border are dropped so a fit
/// window of side `2n` always fits.
pub fn detect_maxima(buffer: &Buffer2<f64>, n: usize, threshold: f64) -> Vec<Maximum> {
    detect_maxima_in(buffer, buffer.bounds(), n, threshold)
}

/// Like [`detect_maxima`] restricted to `roi`. Neighborhoods are clipped to `roi`.
pub fn detect_maxima_in(buffer: &Buffer2<f64>, roi: Roi, n: usize, threshold: f64) -> Vec<Maximum> {
    assert!(n > 0, "block half-size must be positive");

    let roi = roi.clamp_to(buffer.width(), buffer.height());
    let mut maxima = Vec::new();
    if roi.is_empty() {
        return maxima;
    }

    let step = n + 1;
    for block_y in (roi.y..roi.bottom()).step_by(step) {
        for block_x in (roi.x..roi.right()).step_by(step) {
            let block = Roi::new(block_x, block_y, step, step).clamp_to(roi.right(), roi.bottom());
            let (mx, my, value) = block_max(buffer, block);

            if value <= threshold || !is_clear_of_border(buffer, mx, my, n) {
                continue;
            }
            if dominates_neighborhood(buffer, roi, block, mx, my, n) {
                maxima.push(Maximum { x: mx, y: my, value });
            }
        }
    }
    maxima
}

fn block_max(buffer: &Buffer2<f64>, block: Roi) -> (usize, usize, f64) {
    let mut best = (block.x, block.y, buffer.pixel(block.x, block.y));
    for y in block.y..block.bottom() {
        for x in block.x..block.right() {
            let v = buffer.pixel(x, y);
            if v > best.2 {
                best = (x, y, v);
            }
        }
    }
    best
}

#[inline]
fn is_clear_of_border(buffer: &Buffer2<f64>, x: usize, y: usize, n: usize) -> bool {
    x >= n && y >= n && x + n <= buffer.width() && y + n <= buffer.height()
}

/// No pixel within `n` of the candidate but outside its own block reaches its value.
fn dominates_neighborhood(
    buffer: &Buffer2<f64>,
    roi: Roi,
    block: Roi,
    x: usize,
    y: usize,
    n: usize,
) -> bool {
    let value = buffer.pixel(x, y);
    let x0 = x.saturating_sub(n).max(roi.x);
    let y0 = y.saturating_sub(n).max(roi.y);
    let x1 = (x + n + 1).min(roi.right());
    let y1 = (y + n + 1).min(roi.bottom());

    for ny in y0..y1 {
        for nx in x0..x1 {
            if block.contains(nx, ny) {
                continue;
            }
            if buffer.pixel(nx, ny) >= value {
                return false;
            }
        }
    }
    true
}

/// Maxima detection with an optional smoothing pass, configured from [`FitConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaximaDetector {
    pub half_size: usize,
    pub threshold: f64,
    pub pre_filter: PreFilter,
}

impl MaximaDetector {
    pub fn new(half_size: usize, threshold: f64) -> Self {
        Self {
            half_size,
            threshold,
            pre_filter: PreFilter::None,
        }
    }

    pub fn from_config(config: &FitConfig) -> Self {
        Self {
            half_size: config.box_half_size,
            threshold: config.noise_threshold,
            pre_filter: config.pre_filter,
        }
    }

    pub fn with_pre_filter(mut self, pre_filter: PreFilter) -> Self {
        self.pre_filter = pre_filter;
        self
    }

    /// Detects maxima in `roi` (or the whole buffer). Pre-filtering never modifies `buffer`.
    pub fn detect(&self, buffer: &Buffer2<f64>, roi: Option<Roi>) -> Vec<Maximum> {
        let roi = roi.unwrap_or_else(|| buffer.bounds());
        match self.pre_filter {
            PreFilter::None => detect_maxima_in(buffer, roi, self.half_size, self.threshold),
            PreFilter::Gaussian { sigma } => {
                let smoothed = gaussian_blur(buffer, sigma);
                detect_maxima_in(&smoothed, roi, self.half_size, self.threshold)
            }
        }
    }
}
