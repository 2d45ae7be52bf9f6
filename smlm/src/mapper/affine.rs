//! Global affine and rigid-body maps fitted by least squares.

use glam::DVec2;
use nalgebra::DMatrix;

use super::solve_least_squares;
use crate::error::RegistrationError;
use crate::spatial::KdTree;

/// `x' = a·x + b·y + tx`, `y' = c·x + d·y + ty`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineMap {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl Default for AffineMap {
    fn default() -> Self {
        Self::identity()
    }
}

fn centroid<'a>(points: impl Iterator<Item = &'a DVec2>) -> DVec2 {
    let (sum, n) = points.fold((DVec2::ZERO, 0usize), |(s, n), p| (s + *p, n + 1));
    if n == 0 { DVec2::ZERO } else { sum / n as f64 }
}

impl AffineMap {
    pub fn identity() -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            tx: 0.0,
            ty: 0.0,
        }
    }

    #[inline]
    pub fn apply(&self, p: DVec2) -> DVec2 {
        DVec2::new(
            self.a * p.x + self.b * p.y + self.tx,
            self.c * p.x + self.d * p.y + self.ty,
        )
    }

    /// Least-squares affine map from at least 3 non-collinear pairs.
    ///
    /// Solves `u·Mᵗ = v` by QR, with `u` the `[x, y, 1]` rows of the sources.
    pub fn fit(pairs: &[(DVec2, DVec2)]) -> Result<Self, RegistrationError> {
        if pairs.len() < 3 {
            return Err(RegistrationError::InsufficientPairs {
                found: pairs.len(),
                required: 3,
            });
        }

        // Centering keeps the design matrix well conditioned for nm-scale coordinates.
        let center = centroid(pairs.iter().map(|(s, _)| s));
        let n = pairs.len();
        let u = DMatrix::from_fn(n, 3, |row, col| {
            let s = pairs[row].0 - center;
            match col {
                0 => s.x,
                1 => s.y,
                _ => 1.0,
            }
        });
        let v = DMatrix::from_fn(n, 2, |row, col| {
            let t = pairs[row].1;
            if col == 0 { t.x } else { t.y }
        });

        let m = solve_least_squares(u, v).ok_or(RegistrationError::Degenerate)?;
        let (a, b, c, d) = (m[(0, 0)], m[(1, 0)], m[(0, 1)], m[(1, 1)]);
        Ok(Self {
            a,
            b,
            c,
            d,
            tx: m[(2, 0)] - a * center.x - b * center.y,
            ty: m[(2, 1)] - c * center.x - d * center.y,
        })
    }

    /// Rotation plus translation from at least 2 distinct pairs.
    ///
    /// Solves the `2N×4` system built from `[x, y, 1, 0] → x'` and
    /// `[y, −x, 0, 1] → y'` by QR, then removes any scale from the rotation
    /// and re-centers the translation.
    pub fn fit_rigid(pairs: &[(DVec2, DVec2)]) -> Result<Self, RegistrationError> {
        if pairs.len() < 2 {
            return Err(RegistrationError::InsufficientPairs {
                found: pairs.len(),
                required: 2,
            });
        }

        let src_center = centroid(pairs.iter().map(|(s, _)| s));
        let dst_center = centroid(pairs.iter().map(|(_, t)| t));
        let n = pairs.len();
        let mut u = DMatrix::zeros(2 * n, 4);
        let mut v = DMatrix::zeros(2 * n, 1);
        for (i, (s, t)) in pairs.iter().enumerate() {
            let s = *s - src_center;
            let t = *t - dst_center;
            u[(2 * i, 0)] = s.x;
            u[(2 * i, 1)] = s.y;
            u[(2 * i, 2)] = 1.0;
            v[(2 * i, 0)] = t.x;
            u[(2 * i + 1, 0)] = s.y;
            u[(2 * i + 1, 1)] = -s.x;
            u[(2 * i + 1, 3)] = 1.0;
            v[(2 * i + 1, 0)] = t.y;
        }

        let m = solve_least_squares(u, v).ok_or(RegistrationError::Degenerate)?;
        let norm = (m[(0, 0)] * m[(0, 0)] + m[(1, 0)] * m[(1, 0)]).sqrt();
        if norm < 1e-12 {
            return Err(RegistrationError::Degenerate);
        }
        let a = m[(0, 0)] / norm;
        let b = m[(1, 0)] / norm;

        // x' = a·x + b·y + tx, y' = −b·x + a·y + ty
        Ok(Self {
            a,
            b,
            c: -b,
            d: a,
            tx: dst_center.x - (a * src_center.x + b * src_center.y),
            ty: dst_center.y - (-b * src_center.x + a * src_center.y),
        })
    }

    /// Affine fit that repeatedly drops the worst pair while `2·stddev > mean`
    /// of the residuals and more than 4 pairs remain. Returns the kept pairs too.
    pub fn fit_cleaned(
        pairs: &[(DVec2, DVec2)],
    ) -> Result<(Self, Vec<(DVec2, DVec2)>), RegistrationError> {
        let mut kept = pairs.to_vec();
        let mut map = Self::fit(&kept)?;

        while kept.len() > 4 {
            let residuals: Vec<f64> = kept.iter().map(|(s, t)| map.apply(*s).distance(*t)).collect();
            let n = residuals.len() as f64;
            let mean = residuals.iter().sum::<f64>() / n;
            let variance = residuals.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / (n - 1.0);
            let std_dev = variance.sqrt();
            if mean < 1e-9 || 2.0 * std_dev <= mean {
                break;
            }

            let worst = residuals
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .unwrap_or(0);
            kept.swap_remove(worst);
            map = Self::fit(&kept)?;
        }
        tracing::debug!(kept = kept.len(), dropped = pairs.len() - kept.len(), "Cleaned affine fit");
        Ok((map, kept))
    }

    /// Rotation angle in radians, for rigid maps.
    pub fn angle(&self) -> f64 {
        self.c.atan2(self.a)
    }
}

/// Affine map fitted per query to nearby control points.
#[derive(Debug, Clone)]
pub struct PiecewiseAffine {
    tree: KdTree,
    pairs: Vec<(DVec2, DVec2)>,
    max_points: usize,
    max_distance: f64,
}

/// Fewest nearby control points a piecewise fit accepts (exclusive).
pub const PIECEWISE_MIN_POINTS: usize = 10;

impl PiecewiseAffine {
    pub fn new(pairs: &[(DVec2, DVec2)], max_points: usize, max_distance: f64) -> Option<Self> {
        let sources: Vec<DVec2> = pairs.iter().map(|p| p.0).collect();
        KdTree::build(&sources).map(|tree| Self {
            tree,
            pairs: pairs.to_vec(),
            max_points,
            max_distance,
        })
    }

    /// `None` when 10 or fewer control points lie within `max_distance`.
    pub fn transform(&self, p: DVec2) -> Option<DVec2> {
        let local: Vec<(DVec2, DVec2)> = self
            .tree
            .radius_search(p, self.max_distance)
            .into_iter()
            .take(self.max_points)
            .map(|(i, _)| self.pairs[i])
            .collect();
        if local.len() <= PIECEWISE_MIN_POINTS {
            return None;
        }
        AffineMap::fit(&local).ok().map(|m| m.apply(p))
    }
}
