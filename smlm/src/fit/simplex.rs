//! Nelder-Mead downhill simplex minimization of the fit chi².
//!
//! Derivative-free alternative to [`super::lm_optimizer`]; only the model's
//! `evaluate` and `constrain` are used.

use super::lm_optimizer::{FitData, Termination, compute_chi2};
use crate::psf::PsfModel;

#[derive(Debug, Clone)]
pub struct SimplexConfig {
    pub max_iterations: usize,
    /// Relative spread of vertex chi² values that counts as converged.
    pub tolerance: f64,
    /// Spread floor as a fraction of the data's sum of squares, for fits
    /// whose chi² approaches zero.
    pub abs_tolerance: f64,
    /// Vertex spread in every parameter, relative to `|best| + 1`.
    pub param_tolerance: f64,
}

impl Default for SimplexConfig {
    fn default() -> Self {
        Self {
            max_iterations: 250,
            tolerance: 1e-7,
            abs_tolerance: 1e-9,
            param_tolerance: 1e-8,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SimplexResult<const N: usize> {
    pub params: [f64; N],
    pub chi2: f64,
    pub termination: Termination,
    pub iterations: usize,
}

const REFLECT: f64 = 1.0;
const EXPAND: f64 = 2.0;
const CONTRACT: f64 = 0.5;
const SHRINK: f64 = 0.5;

/// Minimizes chi² starting from `initial_params`.
pub fn minimize<const N: usize, M: PsfModel<N>>(
    model: &M,
    data: &FitData,
    initial_params: [f64; N],
    config: &SimplexConfig,
) -> SimplexResult<N> {
    let cost = |p: &[f64; N]| compute_chi2(model, data, p);
    let constrained = |mut p: [f64; N]| {
        model.constrain(&mut p);
        p
    };

    let floor = config.abs_tolerance * data.z.iter().map(|v| v * v).sum::<f64>();

    let start = constrained(initial_params);
    let mut vertices: Vec<([f64; N], f64)> = Vec::with_capacity(N + 1);
    vertices.push((start, cost(&start)));
    for i in 0..N {
        let mut p = start;
        p[i] += initial_step(start[i]);
        let p = constrained(p);
        vertices.push((p, cost(&p)));
    }

    let mut termination = Termination::MaxIterations;
    let mut iterations = 0;

    for iter in 0..config.max_iterations {
        iterations = iter + 1;
        vertices.sort_by(|a, b| a.1.total_cmp(&b.1));

        let best = vertices[0].1;
        let worst = vertices[N].1;
        if worst - best <= config.tolerance * (best.abs() + worst.abs()) + floor
            || collapsed(&vertices, config.param_tolerance)
        {
            termination = Termination::Converged;
            break;
        }

        let centroid = centroid_without_worst(&vertices);
        let worst_point = vertices[N].0;

        let reflected = constrained(along(&centroid, &worst_point, -REFLECT));
        let reflected_cost = cost(&reflected);

        if reflected_cost < best {
            let expanded = constrained(along(&centroid, &worst_point, -EXPAND));
            let expanded_cost = cost(&expanded);
            vertices[N] = if expanded_cost < reflected_cost {
                (expanded, expanded_cost)
            } else {
                (reflected, reflected_cost)
            };
        } else if reflected_cost < vertices[N - 1].1 {
            vertices[N] = (reflected, reflected_cost);
        } else {
            let contracted = if reflected_cost < worst {
                constrained(along(&centroid, &reflected, CONTRACT))
            } else {
                constrained(along(&centroid, &worst_point, CONTRACT))
            };
            let contracted_cost = cost(&contracted);
            if contracted_cost < worst.min(reflected_cost) {
                vertices[N] = (contracted, contracted_cost);
            } else {
                let best_point = vertices[0].0;
                for vertex in vertices.iter_mut().skip(1) {
                    let p = constrained(along(&best_point, &vertex.0, SHRINK));
                    *vertex = (p, cost(&p));
                }
            }
        }
    }

    vertices.sort_by(|a, b| a.1.total_cmp(&b.1));
    let (params, chi2) = vertices[0];
    SimplexResult {
        params,
        chi2,
        termination,
        iterations,
    }
}

#[inline]
fn initial_step(value: f64) -> f64 {
    if value.abs() > 1e-3 { 0.1 * value.abs() } else { 0.1 }
}

/// True when every vertex sits within `tolerance` of the best one in all parameters.
fn collapsed<const N: usize>(vertices: &[([f64; N], f64)], tolerance: f64) -> bool {
    let best = &vertices[0].0;
    vertices[1..].iter().all(|(p, _)| {
        p.iter()
            .zip(best)
            .all(|(v, b)| (v - b).abs() <= tolerance * (b.abs() + 1.0))
    })
}

fn centroid_without_worst<const N: usize>(vertices: &[([f64; N], f64)]) -> [f64; N] {
    let mut centroid = [0.0; N];
    for (p, _) in &vertices[..N] {
        for (c, v) in centroid.iter_mut().zip(p) {
            *c += v;
        }
    }
    for c in &mut centroid {
        *c /= N as f64;
    }
    centroid
}

/// `origin + t · (target − origin)`.
#[inline]
fn along<const N: usize>(origin: &[f64; N], target: &[f64; N], t: f64) -> [f64; N] {
    let mut out = *origin;
    for ((o, &a), &b) in out.iter_mut().zip(origin).zip(target) {
        *o = a + t * (b - a);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psf::{ElongatedGaussian, SymmetricGaussian};
    use common::Buffer2;

    fn data_for<const N: usize, M: PsfModel<N>>(model: &M, params: [f64; N], size: usize) -> FitData {
        let mut w = Buffer2::new_default(size, size);
        for y in 0..size {
            for x in 0..size {
                w[(x, y)] = model.evaluate(x as f64, y as f64, &params);
            }
        }
        FitData::from_window(&w)
    }

    #[test]
    fn along_interpolates() {
        let p = along(&[0.0, 2.0], &[4.0, 6.0], 0.5);
        assert_eq!(p, [2.0, 4.0]);
        let r = along(&[1.0, 1.0], &[2.0, 3.0], -1.0);
        assert_eq!(r, [0.0, -1.0]);
    }

    #[test]
    fn recovers_symmetric_gaussian() {
        let model = SymmetricGaussian { max_sigma: 8.0 };
        let truth = [900.0, 40.0, 4.4, 3.7, 1.5];
        let data = data_for(&model, truth, 9);
        let config = SimplexConfig {
            max_iterations: 5000,
            ..Default::default()
        };
        let result = minimize(&model, &data, [700.0, 50.0, 4.0, 4.0, 1.2], &config);

        assert_eq!(result.termination, Termination::Converged);
        assert!((result.params[2] - 4.4).abs() < 1e-3);
        assert!((result.params[3] - 3.7).abs() < 1e-3);
        assert!((result.params[4] - 1.5).abs() < 1e-3);
    }

    #[test]
    fn recovers_elongated_widths() {
        let model = ElongatedGaussian { max_sigma: 8.0 };
        let truth = [1200.0, 10.0, 4.5, 4.5, 1.1, 2.0];
        let data = data_for(&model, truth, 10);
        let config = SimplexConfig {
            max_iterations: 8000,
            ..Default::default()
        };
        let result = minimize(&model, &data, [1000.0, 20.0, 4.0, 4.0, 1.5, 1.5], &config);

        assert!((result.params[4] - 1.1).abs() < 1e-2);
        assert!((result.params[5] - 2.0).abs() < 1e-2);
    }

    #[test]
    fn collapsed_simplex_counts_as_converged() {
        let tight = [([1.0, 100.0], 0.0), ([1.0 + 1e-10, 100.0 - 1e-7], 5.0)];
        assert!(collapsed(&tight, 1e-8));
        let wide = [([1.0, 100.0], 0.0), ([1.1, 100.0], 5.0)];
        assert!(!collapsed(&wide, 1e-8));
    }

    #[test]
    fn cap_reports_max_iterations() {
        let model = SymmetricGaussian { max_sigma: 8.0 };
        let data = data_for(&model, [900.0, 40.0, 4.4, 3.7, 1.5], 9);
        let config = SimplexConfig {
            max_iterations: 3,
            ..Default::default()
        };
        let result = minimize(&model, &data, [500.0, 0.0, 3.0, 5.0, 2.5], &config);
        assert_eq!(result.termination, Termination::MaxIterations);
        assert_eq!(result.iterations, 3);
    }
}
