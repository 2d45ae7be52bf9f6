//! SMLM - single-molecule localization microscopy post-processing.
//!
//! This library turns raw image stacks into localization tables and corrects them:
//! - Local maxima detection and PSF fitting (symmetric, elongated, rotated Gaussians)
//! - Concurrent fit pipeline with width and photon filters
//! - Two-channel registration (local weighted mean, affine, rigid body)
//! - Stage-drift correction by scattergram cross-correlation
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use smlm::prelude::*;
//!
//! let config = Config::from_file("settings.yml")?;
//! let stack = parking_lot::Mutex::new(my_stack);
//! let (spots, stats) = FitPipeline::new(config.fit.clone()).run_stack(&stack)?;
//!
//! let corrected = DriftCorrector::new(config.drift.clone()).correct(&spots)?;
//! println!("{} localizations, {} drift samples", corrected.registry.len(), corrected.track.len());
//! ```

pub mod config;
pub mod drift;
pub mod error;
pub mod fit;
pub mod localization;
pub mod mapper;
pub mod matching;
pub mod maxima;
pub mod pipeline;
pub mod precision;
pub mod progress;
pub mod psf;
pub mod record;
pub mod registry;
pub mod spatial;

pub mod prelude;

// ============================================================================
// Configuration and errors
// ============================================================================

pub use config::{
    Config, DriftConfig, FilterRange, FitConfig, FitMethod, MapperMethod, PreFilter, PsfShape,
    RegistrationConfig, UndefinedPolicy,
};
pub use error::{DriftError, FitError, PipelineError, RecordError, RegistrationError};

// ============================================================================
// Data model
// ============================================================================

pub use localization::{Candidate, FrameIndex, Localization, PsfWidth};
pub use record::{RecordHeader, read_registry, write_registry};
pub use registry::{RegistryInfo, SpotRegistry};

// ============================================================================
// Detection and fitting
// ============================================================================

pub use fit::{Fitter, PsfFit, fit};
pub use maxima::{MaximaDetector, Maximum, detect_maxima, detect_maxima_in};
pub use pipeline::{FitPipeline, FitStats, FrameSource, ImageStack, run_pipeline};
pub use precision::{PrecisionEstimator, localization_precision};
pub use progress::{Progress, ProgressCallback, Stage, StopHandle};

// ============================================================================
// Registration
// ============================================================================

pub use mapper::{
    AffineMap, CoordinateMapper, LwmMap, PiecewiseAffine, build_mapper, correct_channels,
    register_channels,
};
pub use matching::{
    NearestNeighborMatcher, PointMap, SpotPair, collect_calibration_pairs, pair_per_frame,
    pair_points,
};
pub use spatial::KdTree;

// ============================================================================
// Drift
// ============================================================================

pub use drift::{
    DriftCorrection, DriftCorrector, DriftDetector, DriftSample, correct_drift, estimate_drift,
};
