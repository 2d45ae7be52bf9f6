//! Local weighted mean registration (Goshtasby 1988).
//!
//! Every source point becomes a control point owning a polynomial fitted
//! exactly to its nearest neighbors. A query point is mapped by the
//! weighted average of the polynomials of nearby control points, each
//! weighted by a compactly supported function of distance over the control
//! point's radius.

use glam::DVec2;
use nalgebra::DMatrix;

use super::solve_least_squares;
use crate::error::RegistrationError;
use crate::progress::{ProgressCallback, Stage};
use crate::spatial::KdTree;

/// Control points blended per query, independent of polynomial order.
pub const QUERY_NEIGHBORS: usize = 20;

/// Monomial exponents `(kx, ky)` up to total degree `order`.
///
/// Degree by degree, x-power descending: `(0,0), (1,0), (0,1), (2,0), (1,1), (0,2), ...`
pub fn exponent_pairs(order: usize) -> Vec<(u32, u32)> {
    let mut pairs = Vec::with_capacity(monomial_count(order));
    for j in 0..=order as u32 {
        for k in (0..=j).rev() {
            pairs.push((k, j - k));
        }
    }
    pairs
}

/// Number of monomials up to total degree `order`.
#[inline]
pub fn monomial_count(order: usize) -> usize {
    (order + 1) * (order + 2) / 2
}

/// `w(r) = 1 − 3r² + 2r³` for `r < 1`, else 0.
#[inline]
pub fn weight(r: f64) -> f64 {
    if r < 1.0 {
        1.0 - 3.0 * r * r + 2.0 * r * r * r
    } else {
        0.0
    }
}

/// Coefficients of the local x and y polynomials.
#[derive(Debug, Clone, PartialEq)]
pub struct PolynomialCoefficients {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

/// One registration source point with its local polynomial.
///
/// Polynomials take normalized coordinates `(p − source) / radius`.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlPoint {
    pub source: DVec2,
    /// Distance to the farthest of the neighbors used in the local fit.
    pub radius: f64,
    pub coefficients: PolynomialCoefficients,
}

impl ControlPoint {
    fn evaluate(&self, exponents: &[(u32, u32)], p: DVec2) -> DVec2 {
        let local = (p - self.source) / self.radius;
        let mut out = DVec2::ZERO;
        for (i, &(kx, ky)) in exponents.iter().enumerate() {
            let term = local.x.powi(kx as i32) * local.y.powi(ky as i32);
            out.x += self.coefficients.x[i] * term;
            out.y += self.coefficients.y[i] * term;
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct LwmMap {
    order: usize,
    exponents: Vec<(u32, u32)>,
    controls: Vec<ControlPoint>,
    tree: KdTree,
}

impl LwmMap {
    /// Fits one control point per pair. Needs at least as many pairs as monomials.
    ///
    /// A point whose neighborhood is degenerate is skipped with a warning; the
    /// build fails only when no control point survives.
    pub fn build(
        pairs: &[(DVec2, DVec2)],
        order: usize,
        progress: &ProgressCallback,
    ) -> Result<Self, RegistrationError> {
        let exponents = exponent_pairs(order);
        let k = exponents.len();
        if pairs.len() < k {
            return Err(RegistrationError::InsufficientPairs {
                found: pairs.len(),
                required: k,
            });
        }

        let sources: Vec<DVec2> = pairs.iter().map(|p| p.0).collect();
        let source_tree = KdTree::build(&sources).ok_or(RegistrationError::InsufficientPairs {
            found: 0,
            required: k,
        })?;

        let mut controls = Vec::with_capacity(pairs.len());
        let mut skipped = 0usize;
        for (i, &source) in sources.iter().enumerate() {
            match fit_control_point(&source_tree, pairs, &exponents, source) {
                Some(cp) => controls.push(cp),
                None => {
                    skipped += 1;
                    tracing::warn!(x = source.x, y = source.y, "Skipping degenerate LWM control point");
                }
            }
            progress.report(Stage::Registration, i + 1, sources.len());
        }

        let control_sources: Vec<DVec2> = controls.iter().map(|c| c.source).collect();
        let tree = KdTree::build(&control_sources).ok_or(RegistrationError::Degenerate)?;
        tracing::info!(
            control_points = controls.len(),
            skipped,
            order,
            "Built LWM control points"
        );

        Ok(Self {
            order,
            exponents,
            controls,
            tree,
        })
    }

    /// Weighted mean of nearby control polynomials. `None` when no control point covers `p`.
    pub fn transform(&self, p: DVec2) -> Option<DVec2> {
        let mut sum = DVec2::ZERO;
        let mut total_weight = 0.0;
        for (i, d2) in self.tree.k_nearest(p, QUERY_NEIGHBORS) {
            let control = &self.controls[i];
            let w = weight(d2.sqrt() / control.radius);
            if w > 0.0 {
                sum += w * control.evaluate(&self.exponents, p);
                total_weight += w;
            }
        }
        (total_weight > 0.0).then(|| sum / total_weight)
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn control_points(&self) -> &[ControlPoint] {
        &self.controls
    }
}

fn fit_control_point(
    tree: &KdTree,
    pairs: &[(DVec2, DVec2)],
    exponents: &[(u32, u32)],
    source: DVec2,
) -> Option<ControlPoint> {
    let k = exponents.len();
    let neighbors = tree.k_nearest(source, k);
    let radius = neighbors.last().map(|n| n.1.sqrt())?;
    if radius <= 0.0 || radius.is_nan() {
        return None;
    }

    let design = DMatrix::from_fn(k, k, |row, col| {
        let local = (pairs[neighbors[row].0].0 - source) / radius;
        let (kx, ky) = exponents[col];
        local.x.powi(kx as i32) * local.y.powi(ky as i32)
    });
    let targets = DMatrix::from_fn(k, 2, |row, col| {
        let t = pairs[neighbors[row].0].1;
        if col == 0 { t.x } else { t.y }
    });

    let solution = solve_least_squares(design, targets)?;
    Some(ControlPoint {
        source,
        radius,
        coefficients: PolynomialCoefficients {
            x: solution.column(0).iter().copied().collect(),
            y: solution.column(1).iter().copied().collect(),
        },
    })
}
