//! Levenberg-Marquardt optimizer for PSF fitting.
//!
//! Generic over the parameter count so every PSF model shares one
//! implementation. Uses f64 throughout.

use super::linear_solver::solve;
use crate::psf::PsfModel;

/// Configuration for Levenberg-Marquardt optimization.
#[derive(Debug, Clone)]
pub struct LMConfig {
    pub max_iterations: usize,
    /// Largest accepted parameter step that counts as converged.
    pub convergence_threshold: f64,
    /// Relative chi² improvement that counts as converged.
    pub chi2_tolerance: f64,
    pub initial_lambda: f64,
    /// Factor applied to lambda after a rejected step.
    pub lambda_up: f64,
    /// Factor applied to lambda after an accepted step.
    pub lambda_down: f64,
    /// Lambda above which no downhill step exists and the fit is at its minimum.
    pub max_lambda: f64,
}

impl Default for LMConfig {
    fn default() -> Self {
        Self {
            max_iterations: 250,
            convergence_threshold: 1e-8,
            chi2_tolerance: 1e-12,
            initial_lambda: 0.001,
            lambda_up: 10.0,
            lambda_down: 0.1,
            max_lambda: 1e10,
        }
    }
}

/// How an optimization run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Converged,
    /// Normal equations became singular before any progress was possible.
    Singular,
    MaxIterations,
}

/// Result of L-M optimization.
#[derive(Debug, Clone, Copy)]
pub struct LMResult<const N: usize> {
    pub params: [f64; N],
    pub chi2: f64,
    pub termination: Termination,
    pub iterations: usize,
}

/// Sample coordinates and values of a fit window, flattened once per fit.
#[derive(Debug, Clone, Default)]
pub struct FitData {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
}

impl FitData {
    pub fn from_window(window: &common::Buffer2<f64>) -> Self {
        let n = window.len();
        let mut data = FitData {
            x: Vec::with_capacity(n),
            y: Vec::with_capacity(n),
            z: Vec::with_capacity(n),
        };
        for y in 0..window.height() {
            for (x, &v) in window.row(y).iter().enumerate() {
                data.x.push(x as f64);
                data.y.push(y as f64);
                data.z.push(v);
            }
        }
        data
    }

    pub fn len(&self) -> usize {
        self.z.len()
    }

    pub fn is_empty(&self) -> bool {
        self.z.is_empty()
    }
}

/// Sum of squared residuals of `params` over `data`.
pub fn compute_chi2<const N: usize, M: PsfModel<N>>(model: &M, data: &FitData, params: &[f64; N]) -> f64 {
    data.x
        .iter()
        .zip(&data.y)
        .zip(&data.z)
        .map(|((&x, &y), &z)| {
            let residual = z - model.evaluate(x, y, params);
            residual * residual
        })
        .sum()
}

/// Run L-M optimization for an N-parameter model.
pub fn optimize<const N: usize, M: PsfModel<N>>(
    model: &M,
    data: &FitData,
    initial_params: [f64; N],
    config: &LMConfig,
) -> LMResult<N> {
    let mut params = initial_params;
    model.constrain(&mut params);
    let mut lambda = config.initial_lambda;
    let mut prev_chi2 = compute_chi2(model, data, &params);
    let mut termination = Termination::MaxIterations;
    let mut iterations = 0;
    let mut accepted_any = false;

    let mut jacobian = Vec::with_capacity(data.len());
    let mut residuals = Vec::with_capacity(data.len());

    for iter in 0..config.max_iterations {
        iterations = iter + 1;

        fill_jacobian_residuals(model, data, &params, &mut jacobian, &mut residuals);
        let (hessian, gradient) = compute_hessian_gradient(&jacobian, &residuals);

        let mut damped_hessian = hessian;
        for (i, row) in damped_hessian.iter_mut().enumerate() {
            row[i] *= 1.0 + lambda;
        }

        let Some(delta) = solve(&damped_hessian, &gradient) else {
            termination = if accepted_any {
                Termination::Converged
            } else {
                Termination::Singular
            };
            break;
        };

        let mut new_params = params;
        for (p, d) in new_params.iter_mut().zip(delta.iter()) {
            *p += d;
        }
        model.constrain(&mut new_params);

        let new_chi2 = compute_chi2(model, data, &new_params);

        if new_chi2 < prev_chi2 {
            let improvement = (prev_chi2 - new_chi2) / prev_chi2.max(f64::MIN_POSITIVE);
            params = new_params;
            lambda *= config.lambda_down;
            prev_chi2 = new_chi2;
            accepted_any = true;

            let max_delta = delta.iter().fold(0.0f64, |a, d| a.max(d.abs()));
            if max_delta < config.convergence_threshold || improvement < config.chi2_tolerance {
                termination = Termination::Converged;
                break;
            }
        } else {
            lambda *= config.lambda_up;
            if lambda > config.max_lambda {
                termination = Termination::Converged;
                break;
            }
        }
    }

    LMResult {
        params,
        chi2: prev_chi2,
        termination,
        iterations,
    }
}

fn fill_jacobian_residuals<const N: usize, M: PsfModel<N>>(
    model: &M,
    data: &FitData,
    params: &[f64; N],
    jacobian: &mut Vec<[f64; N]>,
    residuals: &mut Vec<f64>,
) {
    jacobian.clear();
    residuals.clear();

    for ((&x, &y), &z) in data.x.iter().zip(&data.y).zip(&data.z) {
        jacobian.push(model.jacobian_row(x, y, params));
        residuals.push(z - model.evaluate(x, y, params));
    }
}

/// Hessian approximation `JᵀJ` and gradient `Jᵀr`. Only the upper triangle is accumulated.
#[allow(clippy::needless_range_loop)]
pub fn compute_hessian_gradient<const N: usize>(
    jacobian: &[[f64; N]],
    residuals: &[f64],
) -> ([[f64; N]; N], [f64; N]) {
    let mut hessian = [[0.0f64; N]; N];
    let mut gradient = [0.0f64; N];

    for (row, &r) in jacobian.iter().zip(residuals.iter()) {
        for i in 0..N {
            gradient[i] += row[i] * r;
            for j in i..N {
                hessian[i][j] += row[i] * row[j];
            }
        }
    }

    for i in 1..N {
        for j in 0..i {
            hessian[i][j] = hessian[j][i];
        }
    }

    (hessian, gradient)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psf::SymmetricGaussian;
    use common::Buffer2;

    fn window(params: [f64; 5]) -> Buffer2<f64> {
        let model = SymmetricGaussian { max_sigma: 8.0 };
        let mut w = Buffer2::new_default(9, 9);
        for y in 0..9 {
            for x in 0..9 {
                w[(x, y)] = model.evaluate(x as f64, y as f64, &params);
            }
        }
        w
    }

    #[test]
    fn hessian_is_symmetric() {
        let jacobian = [[1.0, 2.0, 3.0], [0.5, -1.0, 2.0]];
        let residuals = [1.0, 2.0];
        let (h, g) = compute_hessian_gradient(&jacobian, &residuals);
        assert_eq!(h[0][1], h[1][0]);
        assert_eq!(h[0][0], 1.25);
        assert_eq!(g, [2.0, 0.0, 7.0]);
    }

    #[test]
    fn converges_on_exact_data() {
        let truth = [700.0, 30.0, 4.2, 3.6, 1.3];
        let data = FitData::from_window(&window(truth));
        let model = SymmetricGaussian { max_sigma: 8.0 };
        let result = optimize(&model, &data, [500.0, 25.0, 4.0, 4.0, 1.8], &LMConfig::default());

        assert_eq!(result.termination, Termination::Converged);
        for i in 0..5 {
            assert!((result.params[i] - truth[i]).abs() < 1e-4 * truth[i].abs().max(1.0));
        }
        assert!(result.chi2 < 1e-6);
    }

    #[test]
    fn iteration_cap_is_reported() {
        let truth = [700.0, 30.0, 4.2, 3.6, 1.3];
        let data = FitData::from_window(&window(truth));
        let model = SymmetricGaussian { max_sigma: 8.0 };
        let config = LMConfig {
            max_iterations: 1,
            ..Default::default()
        };
        let result = optimize(&model, &data, [300.0, 0.0, 2.0, 6.0, 3.0], &config);
        assert_eq!(result.termination, Termination::MaxIterations);
        assert_eq!(result.iterations, 1);
    }

    #[test]
    fn flat_data_is_singular() {
        let data = FitData::from_window(&Buffer2::new_filled(9, 9, 0.0));
        let model = SymmetricGaussian { max_sigma: 8.0 };
        let result = optimize(&model, &data, [0.0, 0.0, 40.0, 40.0, 0.25], &LMConfig::default());
        assert_eq!(result.termination, Termination::Singular);
    }
}
