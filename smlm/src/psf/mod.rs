//! Parametric Gaussian PSF models with analytic derivatives.
//!
//! Every model shares the leading parameter layout
//! `[amplitude, background, x0, y0, ...]` and works in window-local pixel
//! coordinates (origin at the window's top-left pixel center).

#[cfg(test)]
mod tests;

use common::Buffer2;

use crate::config::PsfShape;
use crate::localization::PsfWidth;

pub const AMPLITUDE: usize = 0;
pub const BACKGROUND: usize = 1;
pub const X0: usize = 2;
pub const Y0: usize = 3;

/// Smallest width (pixels) a model may take.
pub const MIN_SIGMA: f64 = 0.25;

/// Lower bound on the fitted amplitude; a fit resting here found no spot.
pub const MIN_AMPLITUDE: f64 = 1e-6;

/// A model that can be fitted to a pixel window.
pub trait PsfModel<const N: usize> {
    /// Model value at a pixel.
    fn evaluate(&self, x: f64, y: f64, params: &[f64; N]) -> f64;

    /// Partial derivatives with respect to every parameter at a pixel.
    fn jacobian_row(&self, x: f64, y: f64, params: &[f64; N]) -> [f64; N];

    /// Pull parameters back into their valid domain after an update.
    fn constrain(&self, params: &mut [f64; N]);

    /// Starting point derived from the window's moments.
    fn initial_guess(&self, window: &Buffer2<f64>) -> [f64; N];

    /// Widths in pixels for the given parameters.
    fn widths(&self, params: &[f64; N]) -> PsfWidth;
}

/// Fit-independent summary of a window used to seed every model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Moments {
    pub background: f64,
    pub amplitude: f64,
    pub x: f64,
    pub y: f64,
    pub sigma_x: f64,
    pub sigma_y: f64,
}

impl Moments {
    /// Background from the border mean; center and widths from background-subtracted moments.
    pub fn of(window: &Buffer2<f64>) -> Moments {
        let w = window.width();
        let h = window.height();
        let max_sigma = (w.min(h) as f64 / 2.0).max(MIN_SIGMA);

        let mut border_sum = 0.0;
        let mut border_count = 0usize;
        let mut peak = f64::NEG_INFINITY;
        for y in 0..h {
            for x in 0..w {
                let v = window.pixel(x, y);
                peak = peak.max(v);
                if x == 0 || y == 0 || x + 1 == w || y + 1 == h {
                    border_sum += v;
                    border_count += 1;
                }
            }
        }
        let background = if border_count > 0 {
            border_sum / border_count as f64
        } else {
            0.0
        };

        let mut sum = 0.0;
        let mut sx = 0.0;
        let mut sy = 0.0;
        for y in 0..h {
            for x in 0..w {
                let v = (window.pixel(x, y) - background).max(0.0);
                sum += v;
                sx += v * x as f64;
                sy += v * y as f64;
            }
        }

        let center_x = (w as f64 - 1.0) / 2.0;
        let center_y = (h as f64 - 1.0) / 2.0;
        if sum <= 0.0 {
            return Moments {
                background,
                amplitude: (peak - background).max(1.0),
                x: center_x,
                y: center_y,
                sigma_x: 1.0,
                sigma_y: 1.0,
            };
        }

        let cx = sx / sum;
        let cy = sy / sum;
        let mut sxx = 0.0;
        let mut syy = 0.0;
        for y in 0..h {
            for x in 0..w {
                let v = (window.pixel(x, y) - background).max(0.0);
                let dx = x as f64 - cx;
                let dy = y as f64 - cy;
                sxx += v * dx * dx;
                syy += v * dy * dy;
            }
        }

        Moments {
            background,
            amplitude: (peak - background).max(1.0),
            x: cx,
            y: cy,
            sigma_x: (sxx / sum).sqrt().clamp(0.5, max_sigma),
            sigma_y: (syy / sum).sqrt().clamp(0.5, max_sigma),
        }
    }

    pub fn sigma(&self) -> f64 {
        (self.sigma_x * self.sigma_y).sqrt()
    }
}

#[inline]
fn constrain_common<const N: usize>(params: &mut [f64; N]) {
    params[AMPLITUDE] = params[AMPLITUDE].max(MIN_AMPLITUDE);
}

// ============================================================================
// Symmetric
// ============================================================================

/// `A·exp(-(dx² + dy²) / 2σ²) + B`. Parameters `[A, B, x0, y0, σ]`.
#[derive(Debug, Clone, Copy)]
pub struct SymmetricGaussian {
    pub max_sigma: f64,
}

impl PsfModel<5> for SymmetricGaussian {
    #[inline]
    fn evaluate(&self, x: f64, y: f64, params: &[f64; 5]) -> f64 {
        let [amp, bg, x0, y0, sigma] = *params;
        let dx = x - x0;
        let dy = y - y0;
        amp * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp() + bg
    }

    #[inline]
    fn jacobian_row(&self, x: f64, y: f64, params: &[f64; 5]) -> [f64; 5] {
        let [amp, _bg, x0, y0, sigma] = *params;
        let sigma2 = sigma * sigma;
        let dx = x - x0;
        let dy = y - y0;
        let r2 = dx * dx + dy * dy;
        let e = (-r2 / (2.0 * sigma2)).exp();
        let amp_e = amp * e;
        [
            e,
            1.0,
            amp_e * dx / sigma2,
            amp_e * dy / sigma2,
            amp_e * r2 / (sigma2 * sigma),
        ]
    }

    fn constrain(&self, params: &mut [f64; 5]) {
        constrain_common(params);
        params[4] = params[4].clamp(MIN_SIGMA, self.max_sigma);
    }

    fn initial_guess(&self, window: &Buffer2<f64>) -> [f64; 5] {
        let m = Moments::of(window);
        [m.amplitude, m.background, m.x, m.y, m.sigma()]
    }

    fn widths(&self, params: &[f64; 5]) -> PsfWidth {
        PsfWidth::Symmetric { sigma: params[4] }
    }
}

// ============================================================================
// Fixed width
// ============================================================================

/// Symmetric Gaussian with σ held constant. Parameters `[A, B, x0, y0]`.
#[derive(Debug, Clone, Copy)]
pub struct FixedWidthGaussian {
    pub sigma: f64,
}

impl PsfModel<4> for FixedWidthGaussian {
    #[inline]
    fn evaluate(&self, x: f64, y: f64, params: &[f64; 4]) -> f64 {
        let [amp, bg, x0, y0] = *params;
        let dx = x - x0;
        let dy = y - y0;
        amp * (-(dx * dx + dy * dy) / (2.0 * self.sigma * self.sigma)).exp() + bg
    }

    #[inline]
    fn jacobian_row(&self, x: f64, y: f64, params: &[f64; 4]) -> [f64; 4] {
        let [amp, _bg, x0, y0] = *params;
        let sigma2 = self.sigma * self.sigma;
        let dx = x - x0;
        let dy = y - y0;
        let e = (-(dx * dx + dy * dy) / (2.0 * sigma2)).exp();
        [e, 1.0, amp * e * dx / sigma2, amp * e * dy / sigma2]
    }

    fn constrain(&self, params: &mut [f64; 4]) {
        constrain_common(params);
    }

    fn initial_guess(&self, window: &Buffer2<f64>) -> [f64; 4] {
        let m = Moments::of(window);
        [m.amplitude, m.background, m.x, m.y]
    }

    fn widths(&self, _params: &[f64; 4]) -> PsfWidth {
        PsfWidth::Symmetric { sigma: self.sigma }
    }
}

// ============================================================================
// Elongated
// ============================================================================

/// Independent widths along x and y. Parameters `[A, B, x0, y0, σx, σy]`.
#[derive(Debug, Clone, Copy)]
pub struct ElongatedGaussian {
    pub max_sigma: f64,
}

impl PsfModel<6> for ElongatedGaussian {
    #[inline]
    fn evaluate(&self, x: f64, y: f64, params: &[f64; 6]) -> f64 {
        let [amp, bg, x0, y0, sx, sy] = *params;
        let dx = x - x0;
        let dy = y - y0;
        amp * (-0.5 * (dx * dx / (sx * sx) + dy * dy / (sy * sy))).exp() + bg
    }

    #[inline]
    fn jacobian_row(&self, x: f64, y: f64, params: &[f64; 6]) -> [f64; 6] {
        let [amp, _bg, x0, y0, sx, sy] = *params;
        let sx2 = sx * sx;
        let sy2 = sy * sy;
        let dx = x - x0;
        let dy = y - y0;
        let e = (-0.5 * (dx * dx / sx2 + dy * dy / sy2)).exp();
        let amp_e = amp * e;
        [
            e,
            1.0,
            amp_e * dx / sx2,
            amp_e * dy / sy2,
            amp_e * dx * dx / (sx2 * sx),
            amp_e * dy * dy / (sy2 * sy),
        ]
    }

    fn constrain(&self, params: &mut [f64; 6]) {
        constrain_common(params);
        params[4] = params[4].clamp(MIN_SIGMA, self.max_sigma);
        params[5] = params[5].clamp(MIN_SIGMA, self.max_sigma);
    }

    fn initial_guess(&self, window: &Buffer2<f64>) -> [f64; 6] {
        let m = Moments::of(window);
        [m.amplitude, m.background, m.x, m.y, m.sigma_x, m.sigma_y]
    }

    fn widths(&self, params: &[f64; 6]) -> PsfWidth {
        PsfWidth::Elongated {
            sigma_x: params[4],
            sigma_y: params[5],
        }
    }
}

// ============================================================================
// Rotated
// ============================================================================

/// Elliptical Gaussian `A·exp(-(a·dx² + 2b·dx·dy + c·dy²) / 2) + B`.
/// Parameters `[A, B, x0, y0, a, b, c]`.
#[derive(Debug, Clone, Copy)]
pub struct RotatedGaussian {
    pub max_sigma: f64,
}

impl PsfModel<7> for RotatedGaussian {
    #[inline]
    fn evaluate(&self, x: f64, y: f64, params: &[f64; 7]) -> f64 {
        let [amp, bg, x0, y0, a, b, c] = *params;
        let dx = x - x0;
        let dy = y - y0;
        amp * (-0.5 * (a * dx * dx + 2.0 * b * dx * dy + c * dy * dy)).exp() + bg
    }

    #[inline]
    fn jacobian_row(&self, x: f64, y: f64, params: &[f64; 7]) -> [f64; 7] {
        let [amp, _bg, x0, y0, a, b, c] = *params;
        let dx = x - x0;
        let dy = y - y0;
        let e = (-0.5 * (a * dx * dx + 2.0 * b * dx * dy + c * dy * dy)).exp();
        let amp_e = amp * e;
        [
            e,
            1.0,
            amp_e * (a * dx + b * dy),
            amp_e * (b * dx + c * dy),
            -0.5 * amp_e * dx * dx,
            -amp_e * dx * dy,
            -0.5 * amp_e * dy * dy,
        ]
    }

    fn constrain(&self, params: &mut [f64; 7]) {
        constrain_common(params);
        let min_coef = 1.0 / (self.max_sigma * self.max_sigma);
        let max_coef = 1.0 / (MIN_SIGMA * MIN_SIGMA);
        params[4] = params[4].clamp(min_coef, max_coef);
        params[6] = params[6].clamp(min_coef, max_coef);
        // Keep the quadratic form positive definite.
        let limit = 0.99 * (params[4] * params[6]).sqrt();
        params[5] = params[5].clamp(-limit, limit);
    }

    fn initial_guess(&self, window: &Buffer2<f64>) -> [f64; 7] {
        let m = Moments::of(window);
        [
            m.amplitude,
            m.background,
            m.x,
            m.y,
            1.0 / (m.sigma_x * m.sigma_x),
            0.0,
            1.0 / (m.sigma_y * m.sigma_y),
        ]
    }

    fn widths(&self, params: &[f64; 7]) -> PsfWidth {
        let (theta, sigma_major, sigma_minor) = ellipse_axes(params[4], params[5], params[6]);
        PsfWidth::Rotated {
            sigma_major,
            sigma_minor,
            theta,
        }
    }
}

/// Converts ellipse coefficients `(a, b, c)` to `(θ, σ_major, σ_minor)`.
///
/// `θ = atan(m)` with `m` the positive root of `m² + u·m − 1 = 0`, `u = (a − c) / b`.
/// Each σ is `1/√λ` of the quadratic form along θ and across it. `b = 0` gives θ = 0.
pub fn ellipse_axes(a: f64, b: f64, c: f64) -> (f64, f64, f64) {
    let theta = if b.abs() < 1e-12 {
        0.0
    } else {
        let u = (a - c) / b;
        let m = (-u + (u * u + 4.0).sqrt()) / 2.0;
        m.atan()
    };

    let (sin, cos) = theta.sin_cos();
    let along = a * cos * cos + 2.0 * b * sin * cos + c * sin * sin;
    let across = a * sin * sin - 2.0 * b * sin * cos + c * cos * cos;
    let s_along = 1.0 / along.sqrt();
    let s_across = 1.0 / across.sqrt();
    (theta, s_along.max(s_across), s_along.min(s_across))
}

/// Largest width a model may take for a window of side `window_size`.
pub fn max_sigma_for(window_size: usize) -> f64 {
    (window_size as f64).max(1.0)
}

/// Number of free parameters of a shape.
pub fn param_count(shape: PsfShape, fixed_width: bool) -> usize {
    if fixed_width {
        return 4;
    }
    match shape {
        PsfShape::Symmetric => 5,
        PsfShape::Elongated => 6,
        PsfShape::Rotated => 7,
    }
}
