//! Two-channel coordinate registration.
//!
//! A [`CoordinateMapper`] is built once from calibration pairs and holds every
//! strategy side by side, so the caller can switch between them per query.
//! Everything is immutable after construction and safe to share between threads.

mod affine;
mod lwm;


pub use affine::{AffineMap, PIECEWISE_MIN_POINTS, PiecewiseAffine};
pub use lwm::{
    ControlPoint, LwmMap, PolynomialCoefficients, QUERY_NEIGHBORS, exponent_pairs,
    monomial_count, weight,
};

use glam::DVec2;
use nalgebra::DMatrix;

use crate::config::{MapperMethod, RegistrationConfig, UndefinedPolicy};
use crate::error::RegistrationError;
use crate::matching::{PointMap, collect_calibration_pairs};
use crate::progress::ProgressCallback;
use crate::registry::SpotRegistry;

/// Least-squares solution of `a·x = b` through QR.
///
/// `None` for an underdetermined or rank-deficient system.
pub(crate) fn solve_least_squares(a: DMatrix<f64>, b: DMatrix<f64>) -> Option<DMatrix<f64>> {
    if a.nrows() < a.ncols() {
        return None;
    }

    let qr = a.qr();
    let r = qr.r();
    let max_diag = r.diagonal().iter().fold(0.0f64, |m, v| m.max(v.abs()));
    if max_diag <= 0.0 || r.diagonal().iter().any(|v| v.abs() <= max_diag * 1e-10) {
        return None;
    }

    let qtb = qr.q().transpose() * b;
    r.solve_upper_triangular(&qtb)
}

/// All registration strategies fitted to one set of calibration pairs.
#[derive(Debug, Clone)]
pub struct CoordinateMapper {
    method: MapperMethod,
    affine: AffineMap,
    rigid: AffineMap,
    lwm: Option<LwmMap>,
    piecewise: Option<PiecewiseAffine>,
}

impl CoordinateMapper {
    pub fn build(pairs: &PointMap, config: &RegistrationConfig) -> Result<Self, RegistrationError> {
        Self::build_with_progress(pairs, config, &ProgressCallback::none())
    }

    /// Fits every strategy. Needs at least 3 pairs, and one pair per LWM
    /// monomial when LWM is the configured method. Otherwise the LWM map is
    /// built only when the pairs allow it.
    pub fn build_with_progress(
        pairs: &PointMap,
        config: &RegistrationConfig,
        progress: &ProgressCallback,
    ) -> Result<Self, RegistrationError> {
        config.validate();

        let lwm_required = monomial_count(config.order).max(3);
        let required = if config.method == MapperMethod::Lwm {
            lwm_required
        } else {
            3
        };
        if pairs.len() < required {
            return Err(RegistrationError::InsufficientPairs {
                found: pairs.len(),
                required,
            });
        }

        let pairs = pairs.pairs();
        let affine = if config.clean_affine_outliers {
            AffineMap::fit_cleaned(pairs)?.0
        } else {
            AffineMap::fit(pairs)?
        };
        let rigid = AffineMap::fit_rigid(pairs)?;
        let lwm = if config.method == MapperMethod::Lwm {
            Some(LwmMap::build(pairs, config.order, progress)?)
        } else if pairs.len() >= lwm_required {
            LwmMap::build(pairs, config.order, progress)
                .inspect_err(|err| tracing::warn!(%err, "LWM map unavailable"))
                .ok()
        } else {
            None
        };
        let piecewise = PiecewiseAffine::new(
            pairs,
            config.piecewise_max_points,
            config.piecewise_max_distance_nm,
        );

        tracing::info!(
            pairs = pairs.len(),
            method = ?config.method,
            rotation = rigid.angle(),
            "Built coordinate mapper"
        );

        Ok(Self {
            method: config.method,
            affine,
            rigid,
            lwm,
            piecewise,
        })
    }

    /// Maps `p` with the configured strategy. `None` where it is undefined.
    #[inline]
    pub fn transform(&self, p: DVec2) -> Option<DVec2> {
        self.transform_with(self.method, p)
    }

    pub fn transform_with(&self, method: MapperMethod, p: DVec2) -> Option<DVec2> {
        match method {
            MapperMethod::Affine => Some(self.affine.apply(p)),
            MapperMethod::RigidBody => Some(self.rigid.apply(p)),
            MapperMethod::Lwm => self.lwm.as_ref()?.transform(p),
            MapperMethod::PiecewiseAffine => self.piecewise.as_ref()?.transform(p),
        }
    }

    pub fn method(&self) -> MapperMethod {
        self.method
    }

    pub fn with_method(mut self, method: MapperMethod) -> Self {
        self.method = method;
        self
    }

    pub fn affine(&self) -> &AffineMap {
        &self.affine
    }

    pub fn rigid(&self) -> &AffineMap {
        &self.rigid
    }

    /// `None` when the pairs were too few for the LWM map and another method was requested.
    pub fn lwm(&self) -> Option<&LwmMap> {
        self.lwm.as_ref()
    }
}

/// Builds a mapper with default settings and the given strategy.
pub fn build_mapper(
    pairs: &PointMap,
    method: MapperMethod,
) -> Result<CoordinateMapper, RegistrationError> {
    let config = RegistrationConfig {
        method,
        ..Default::default()
    };
    CoordinateMapper::build(pairs, &config)
}

/// Maps channel-1 spots into channel-2 coordinates; every other spot carries over.
///
/// Points the mapper cannot transform are handled according to `policy`.
pub fn correct_channels(
    registry: &SpotRegistry,
    mapper: &CoordinateMapper,
    policy: UndefinedPolicy,
) -> SpotRegistry {
    let mut spots = Vec::with_capacity(registry.len());
    let mut undefined = 0usize;

    for spot in registry {
        if spot.index.channel != 1 {
            spots.push(*spot);
            continue;
        }

        let position = spot.position();
        match mapper.transform(position) {
            Some(mapped) => spots.push(spot.with_position(mapped)),
            None => {
                undefined += 1;
                match policy {
                    UndefinedPolicy::Drop => {}
                    UndefinedPolicy::Identity => spots.push(*spot),
                    UndefinedPolicy::Affine => {
                        spots.push(spot.with_position(mapper.affine().apply(position)))
                    }
                }
            }
        }
    }

    if undefined > 0 {
        tracing::warn!(undefined, ?policy, "Mapper undefined for some channel-1 spots");
    }
    tracing::info!(spots = spots.len(), "Corrected channel registration");

    registry.derive(format!("{} (registered)", registry.info().name), spots)
}

/// Collects calibration pairs from `calibration` and builds a mapper from them.
pub fn register_channels(
    calibration: &[&SpotRegistry],
    config: &RegistrationConfig,
    progress: &ProgressCallback,
) -> Result<CoordinateMapper, RegistrationError> {
    let pairs = collect_calibration_pairs(calibration, config)?;
    CoordinateMapper::build_with_progress(&pairs, config, progress)
}
