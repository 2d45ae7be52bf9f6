//! Per-window PSF fitting.
//!
//! [`Fitter`] picks the PSF model and optimizer from configuration, fits one
//! pixel window and validates the result. All coordinates are window-local
//! pixels; [`PsfFit::localize`] converts to a nm-space [`Localization`].

mod linear_solver;
pub mod lm_optimizer;
pub mod simplex;
#[cfg(test)]
mod tests;

use common::Buffer2;

use crate::config::{FitConfig, FitMethod, PsfShape};
use crate::error::FitError;
use crate::localization::{Candidate, Localization, PsfWidth};
use crate::precision::PrecisionEstimator;
use crate::psf::{
    ElongatedGaussian, FixedWidthGaussian, MIN_AMPLITUDE, MIN_SIGMA, PsfModel,
    RotatedGaussian, SymmetricGaussian, max_sigma_for, param_count,
};
use lm_optimizer::{FitData, LMConfig, Termination};
use simplex::SimplexConfig;

/// Fitted PSF in window-local pixel units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PsfFit {
    pub amplitude: f64,
    pub background: f64,
    pub x: f64,
    pub y: f64,
    pub width: PsfWidth,
    pub chi2: f64,
    pub iterations: usize,
}

impl PsfFit {
    /// Builds the localization for `candidate`: nm coordinates, photon counts and precision.
    pub fn localize(&self, candidate: &Candidate, config: &FitConfig) -> Localization {
        let estimator = PrecisionEstimator::from_config(config);
        let pixel = config.pixel_size_nm;
        let sigma_px = self.width.width();

        Localization {
            index: candidate.index,
            seed_x: candidate.seed_x,
            seed_y: candidate.seed_y,
            x_center: (candidate.origin_x as f64 + self.x) * pixel,
            y_center: (candidate.origin_y as f64 + self.y) * pixel,
            z_center: None,
            intensity: estimator.total_photons(self.amplitude, sigma_px),
            background: estimator.background_photons(self.background),
            psf: self.width.scaled(pixel),
            precision: estimator.estimate(self.amplitude, sigma_px, self.background),
        }
    }
}

/// Fits one window with the configured PSF shape and optimizer.
///
/// Holds no mutable state, so each worker can own a copy.
#[derive(Debug, Clone)]
pub struct Fitter {
    shape: PsfShape,
    method: FitMethod,
    max_iterations: usize,
    /// Fixed width in pixels; overrides `shape`.
    fixed_sigma: Option<f64>,
}

impl Fitter {
    pub fn new(shape: PsfShape, method: FitMethod, max_iterations: usize) -> Self {
        Self {
            shape,
            method,
            max_iterations,
            fixed_sigma: None,
        }
    }

    pub fn from_config(config: &FitConfig) -> Self {
        Self {
            shape: config.shape,
            method: config.method,
            max_iterations: config.max_iterations,
            fixed_sigma: config.fixed_width_nm.map(|nm| nm / config.pixel_size_nm),
        }
    }

    /// Holds the width at `sigma` pixels.
    pub fn with_fixed_sigma(mut self, sigma: f64) -> Self {
        self.fixed_sigma = Some(sigma);
        self
    }

    pub fn fit(&self, window: &Buffer2<f64>) -> Result<PsfFit, FitError> {
        let params = param_count(self.shape, self.fixed_sigma.is_some());
        if window.width() < 3 || window.height() < 3 || window.len() <= params {
            return Err(FitError::WindowTooSmall {
                width: window.width(),
                height: window.height(),
                params,
            });
        }

        let max_sigma = max_sigma_for(window.width().min(window.height()));
        if let Some(sigma) = self.fixed_sigma {
            return self.run(&FixedWidthGaussian { sigma }, window, max_sigma);
        }
        match self.shape {
            PsfShape::Symmetric => self.run(&SymmetricGaussian { max_sigma }, window, max_sigma),
            PsfShape::Elongated => self.run(&ElongatedGaussian { max_sigma }, window, max_sigma),
            PsfShape::Rotated => self.run(&RotatedGaussian { max_sigma }, window, max_sigma),
        }
    }

    fn run<const N: usize, M: PsfModel<N>>(
        &self,
        model: &M,
        window: &Buffer2<f64>,
        max_sigma: f64,
    ) -> Result<PsfFit, FitError> {
        let data = FitData::from_window(window);
        let initial = model.initial_guess(window);

        let (params, chi2, termination, iterations) = match self.method {
            FitMethod::LevenbergMarquardt => {
                let config = LMConfig {
                    max_iterations: self.max_iterations,
                    ..Default::default()
                };
                let r = lm_optimizer::optimize(model, &data, initial, &config);
                (r.params, r.chi2, r.termination, r.iterations)
            }
            FitMethod::Simplex => {
                let config = SimplexConfig {
                    max_iterations: self.max_iterations,
                    ..Default::default()
                };
                let r = simplex::minimize(model, &data, initial, &config);
                (r.params, r.chi2, r.termination, r.iterations)
            }
        };

        match termination {
            Termination::Converged => {}
            Termination::Singular => return Err(FitError::SingularSystem),
            Termination::MaxIterations => return Err(FitError::NotConverged { iterations }),
        }

        let fit = PsfFit {
            amplitude: params[0],
            background: params[1],
            x: params[2],
            y: params[3],
            width: model.widths(&params),
            chi2,
            iterations,
        };
        validate(&fit, window, max_sigma)?;
        Ok(fit)
    }
}

/// Rejects fits that wandered off the window or onto a parameter bound.
fn validate(fit: &PsfFit, window: &Buffer2<f64>, max_sigma: f64) -> Result<(), FitError> {
    let (lo, hi) = match fit.width {
        PsfWidth::Symmetric { sigma } => (sigma, sigma),
        PsfWidth::Elongated { sigma_x, sigma_y } => (sigma_x.min(sigma_y), sigma_x.max(sigma_y)),
        PsfWidth::Rotated {
            sigma_major,
            sigma_minor,
            ..
        } => (sigma_minor, sigma_major),
    };
    let values = [fit.amplitude, fit.background, fit.x, fit.y, lo, hi, fit.chi2];
    if values.iter().any(|v| !v.is_finite()) {
        return Err(FitError::NonFinite);
    }

    if fit.amplitude <= MIN_AMPLITUDE * 1.0001 {
        return Err(FitError::OutOfRange {
            parameter: "amplitude",
            value: fit.amplitude,
        });
    }
    if fit.x < -0.5 || fit.x > window.width() as f64 - 0.5 {
        return Err(FitError::OutOfRange {
            parameter: "x",
            value: fit.x,
        });
    }
    if fit.y < -0.5 || fit.y > window.height() as f64 - 0.5 {
        return Err(FitError::OutOfRange {
            parameter: "y",
            value: fit.y,
        });
    }
    if lo <= MIN_SIGMA * 1.0001 {
        return Err(FitError::OutOfRange {
            parameter: "sigma",
            value: lo,
        });
    }
    if hi >= max_sigma * 0.9999 {
        return Err(FitError::OutOfRange {
            parameter: "sigma",
            value: hi,
        });
    }
    Ok(())
}

/// Fits `window` with `shape` using Levenberg-Marquardt.
pub fn fit(window: &Buffer2<f64>, shape: PsfShape, max_iterations: usize) -> Result<PsfFit, FitError> {
    Fitter::new(shape, FitMethod::LevenbergMarquardt, max_iterations).fit(window)
}
