//! Phase correlation of scattergram images with sub-pixel peak refinement.

use std::sync::Arc;

use common::{Buffer2, Roi};
use glam::DVec2;
use rustfft::{Fft, FftPlanner, num_complex::Complex};

use crate::config::{DriftConfig, FitMethod, PsfShape};
use crate::error::DriftError;
use crate::fit::Fitter;

const PEAK_FIT_ITERATIONS: usize = 100;

/// Estimates the translation of test images relative to a fixed reference.
///
/// The reference spectrum is computed once and reused for every test image.
pub struct DriftDetector {
    size: usize,
    forward_fft: Arc<dyn Fft<f64>>,
    inverse_fft: Arc<dyn Fft<f64>>,
    /// Complex conjugate of the reference spectrum.
    reference: Vec<Complex<f64>>,
    search_radius: usize,
    fit_half_size: usize,
    normalize: bool,
    fitter: Fitter,
}

impl std::fmt::Debug for DriftDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriftDetector")
            .field("size", &self.size)
            .field("search_radius", &self.search_radius)
            .field("fit_half_size", &self.fit_half_size)
            .field("normalize", &self.normalize)
            .finish()
    }
}

impl DriftDetector {
    /// `reference` must be a power-of-two square larger than the peak fit window.
    pub fn new(reference: &Buffer2<f64>, config: &DriftConfig) -> Result<Self, DriftError> {
        let size = reference.width();
        if size != reference.height()
            || !size.is_power_of_two()
            || size < 4
            || size <= 2 * config.fit_half_size
        {
            return Err(DriftError::InvalidImageSize {
                width: reference.width(),
                height: reference.height(),
            });
        }

        let mut planner = FftPlanner::new();
        let mut detector = Self {
            size,
            forward_fft: planner.plan_fft_forward(size),
            inverse_fft: planner.plan_fft_inverse(size),
            reference: Vec::new(),
            search_radius: config.search_radius,
            fit_half_size: config.fit_half_size,
            normalize: config.normalize_spectrum,
            fitter: Fitter::new(PsfShape::Symmetric, FitMethod::LevenbergMarquardt, PEAK_FIT_ITERATIONS),
        };

        let mut spectrum = detector.fft_2d(reference);
        for c in &mut spectrum {
            *c = c.conj();
        }
        detector.reference = spectrum;
        Ok(detector)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Displacement `d` such that `test` ≈ reference shifted by `d`, in image pixels.
    pub fn estimate(&self, test: &Buffer2<f64>) -> Result<DVec2, DriftError> {
        let correlation = self.correlate(test)?;
        let (px, py, peak) = self.find_peak(&correlation);
        if peak <= 0.0 || !peak.is_finite() {
            return Err(DriftError::InsufficientData);
        }

        let center = (self.size / 2) as f64;
        let refined = self.refine_peak(&correlation, px, py).unwrap_or_else(|| {
            tracing::debug!(px, py, "Correlation peak fit failed, using integer peak");
            DVec2::new(px as f64, py as f64)
        });
        Ok(refined - DVec2::splat(center))
    }

    /// Cross-correlation surface with zero lag at `(size/2, size/2)`.
    pub fn correlate(&self, test: &Buffer2<f64>) -> Result<Buffer2<f64>, DriftError> {
        if test.width() != self.size || test.height() != self.size {
            return Err(DriftError::DimensionMismatch);
        }

        let mut spectrum = self.fft_2d(test);
        for (t, r) in spectrum.iter_mut().zip(&self.reference) {
            let product = *t * *r;
            *t = if self.normalize {
                let magnitude = product.norm();
                if magnitude > 1e-12 {
                    product / magnitude
                } else {
                    Complex::new(0.0, 0.0)
                }
            } else {
                product
            };
        }

        let raw = self.ifft_2d(spectrum);
        let n = self.size;
        let half = n / 2;
        let mut shifted = Buffer2::new_default(n, n);
        for y in 0..n {
            for x in 0..n {
                shifted[((x + half) % n, (y + half) % n)] = raw[y * n + x];
            }
        }
        Ok(shifted)
    }

    fn find_peak(&self, correlation: &Buffer2<f64>) -> (usize, usize, f64) {
        let n = self.size;
        let center = n / 2;
        let lo = center.saturating_sub(self.search_radius);
        let hi = (center + self.search_radius).min(n - 1);

        let mut best = (center, center, f64::NEG_INFINITY);
        for y in lo..=hi {
            for x in lo..=hi {
                let value = correlation.pixel(x, y);
                if value > best.2 {
                    best = (x, y, value);
                }
            }
        }
        best
    }

    /// Gaussian fit of the `(2h+1)²` window centered on the integer peak.
    fn refine_peak(&self, correlation: &Buffer2<f64>, px: usize, py: usize) -> Option<DVec2> {
        let h = self.fit_half_size;
        if px < h || py < h {
            return None;
        }
        let window = correlation.crop(Roi::new(px - h, py - h, 2 * h + 1, 2 * h + 1))?;
        let fit = self.fitter.fit(&window).ok()?;

        let refined = DVec2::new((px - h) as f64 + fit.x, (py - h) as f64 + fit.y);
        let integer = DVec2::new(px as f64, py as f64);
        (refined.distance(integer) <= 1.0).then_some(refined)
    }

    fn fft_2d(&self, image: &Buffer2<f64>) -> Vec<Complex<f64>> {
        let n = self.size;
        let mut data: Vec<Complex<f64>> = image.pixels().iter().map(|&v| Complex::new(v, 0.0)).collect();

        for row in data.chunks_exact_mut(n) {
            self.forward_fft.process(row);
        }
        transpose_inplace(&mut data, n);
        for row in data.chunks_exact_mut(n) {
            self.forward_fft.process(row);
        }
        transpose_inplace(&mut data, n);
        data
    }

    fn ifft_2d(&self, mut data: Vec<Complex<f64>>) -> Vec<f64> {
        let n = self.size;
        for row in data.chunks_exact_mut(n) {
            self.inverse_fft.process(row);
        }
        transpose_inplace(&mut data, n);
        for row in data.chunks_exact_mut(n) {
            self.inverse_fft.process(row);
        }
        transpose_inplace(&mut data, n);

        let norm = 1.0 / (n * n) as f64;
        data.iter().map(|c| c.re * norm).collect()
    }
}

fn transpose_inplace<T>(data: &mut [T], n: usize) {
    for y in 0..n {
        for x in (y + 1)..n {
            data.swap(y * n + x, x * n + y);
        }
    }
}

/// Translation of `test` relative to `reference` with default drift settings.
///
/// Both images must be the same power-of-two square.
pub fn estimate_drift(reference: &Buffer2<f64>, test: &Buffer2<f64>) -> Result<DVec2, DriftError> {
    DriftDetector::new(reference, &DriftConfig::default())?.estimate(test)
}
