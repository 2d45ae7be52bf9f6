//! Prelude module for convenient imports.
//!
//! ```rust,ignore
//! use smlm::prelude::*;
//! ```

// Configuration
pub use crate::{Config, DriftConfig, FitConfig, MapperMethod, PsfShape, RegistrationConfig};

// Data model
pub use crate::{Candidate, FrameIndex, Localization, RegistryInfo, SpotRegistry};

// Fitting
pub use crate::{FitPipeline, FitStats, FrameSource, ImageStack, MaximaDetector};

// Registration and drift
pub use crate::{CoordinateMapper, DriftCorrector, UndefinedPolicy, correct_channels};

// Errors and progress
pub use crate::{
    DriftError, FitError, PipelineError, ProgressCallback, RegistrationError, StopHandle,
};
