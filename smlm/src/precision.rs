//! Localization precision from fitted PSF parameters (Mortensen et al. 2010, Thompson et al. 2002).

use std::f64::consts::PI;

/// Camera and optics parameters needed to turn counts into photons.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrecisionEstimator {
    pub pixel_size_nm: f64,
    pub photon_conversion: f64,
    pub em_gain: f64,
    pub camera_offset: f64,
}

impl PrecisionEstimator {
    pub fn from_config(config: &crate::config::FitConfig) -> Self {
        Self {
            pixel_size_nm: config.pixel_size_nm,
            photon_conversion: config.photon_conversion,
            em_gain: config.em_gain,
            camera_offset: config.camera_offset,
        }
    }

    /// Photons per camera count.
    #[inline]
    pub fn photons_per_count(&self) -> f64 {
        self.photon_conversion / self.em_gain
    }

    /// Total photons `N = c·A·2π·σ²` for amplitude `A` (counts) and width `σ` (pixels).
    #[inline]
    pub fn total_photons(&self, amplitude: f64, sigma_px: f64) -> f64 {
        self.photons_per_count() * amplitude * 2.0 * PI * sigma_px * sigma_px
    }

    /// Background photons per pixel with the camera offset removed.
    #[inline]
    pub fn background_photons(&self, background: f64) -> f64 {
        (background - self.camera_offset) * self.photons_per_count()
    }

    /// Precision in nm for a fit with amplitude and background in counts, width in pixels.
    pub fn estimate(&self, amplitude: f64, sigma_px: f64, background: f64) -> f64 {
        localization_precision(
            sigma_px * self.pixel_size_nm,
            self.pixel_size_nm,
            self.total_photons(amplitude, sigma_px),
            self.background_photons(background),
        )
    }
}

/// `σ_loc = sqrt((s² + a²/12) / N + 8π·s⁴·b² / (a²·N²))`.
///
/// `s` is the PSF width and `a` the pixel size (both nm), `n` the photon count
/// and `b` the background in photons per pixel.
pub fn localization_precision(s: f64, a: f64, n: f64, b: f64) -> f64 {
    let s2 = s * s;
    let a2 = a * a;
    let variance = (s2 + a2 / 12.0) / n + 8.0 * PI * s2 * s2 * b * b / (a2 * n * n);
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_closed_form() {
        let (s, a, n, b): (f64, f64, f64, f64) = (150.0, 107.0, 1000.0, 5.0);
        let expected = ((s * s + a * a / 12.0) / n + 8.0 * PI * s.powi(4) * b * b / (a * a * n * n)).sqrt();
        assert!((localization_precision(s, a, n, b) - expected).abs() < 1e-12);
    }

    #[test]
    fn no_background_reduces_to_shot_noise() {
        let sigma = localization_precision(120.0, 100.0, 400.0, 0.0);
        let expected = ((120.0f64.powi(2) + 100.0f64.powi(2) / 12.0) / 400.0).sqrt();
        assert!((sigma - expected).abs() < 1e-12);
    }

    #[test]
    fn more_photons_improve_precision() {
        let dim = localization_precision(150.0, 107.0, 500.0, 10.0);
        let bright = localization_precision(150.0, 107.0, 5000.0, 10.0);
        assert!(bright < dim);
    }

    #[test]
    fn estimator_converts_counts() {
        let est = PrecisionEstimator {
            pixel_size_nm: 100.0,
            photon_conversion: 10.0,
            em_gain: 50.0,
            camera_offset: 100.0,
        };
        assert!((est.photons_per_count() - 0.2).abs() < 1e-15);
        assert!((est.total_photons(1000.0, 1.5) - 0.2 * 1000.0 * 2.0 * PI * 2.25).abs() < 1e-9);
        assert!((est.background_photons(125.0) - 5.0).abs() < 1e-12);

        let direct = localization_precision(150.0, 100.0, est.total_photons(1000.0, 1.5), 5.0);
        assert!((est.estimate(1000.0, 1.5, 125.0) - direct).abs() < 1e-12);
    }
}
