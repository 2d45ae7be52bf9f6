//! Configuration types for fitting, channel registration and drift correction.
//!
//! Every struct is serde-serializable so a whole [`Config`] can be kept in a
//! YAML or JSON settings file and loaded with [`Config::from_file`].

use serde::{Deserialize, Serialize};

// ============================================================================
// Enums
// ============================================================================

/// PSF model fitted to each candidate window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PsfShape {
    /// Single width for both axes.
    #[default]
    Symmetric,
    /// Independent widths along x and y.
    Elongated,
    /// Elliptical Gaussian with a free rotation angle.
    Rotated,
}

/// Optimizer used for the per-window least-squares fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FitMethod {
    /// Derivative-free Nelder-Mead simplex.
    #[default]
    Simplex,
    /// Levenberg-Marquardt with analytic Jacobians.
    LevenbergMarquardt,
}

/// Optional smoothing applied to each frame before maxima detection.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum PreFilter {
    #[default]
    None,
    /// Separable Gaussian blur, sigma in pixels.
    Gaussian { sigma: f64 },
}

/// Strategy used by [`crate::CoordinateMapper::transform`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MapperMethod {
    /// Local weighted mean of per-control-point polynomials.
    #[default]
    Lwm,
    Affine,
    RigidBody,
    /// Affine fitted per query to nearby control points.
    PiecewiseAffine,
}

/// What channel correction does with a point the mapper cannot transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UndefinedPolicy {
    /// Discard the localization.
    Drop,
    /// Keep the localization uncorrected.
    Identity,
    /// Use the global affine map instead.
    #[default]
    Affine,
}

/// Inclusive accept range for a filtered quantity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterRange {
    pub min: f64,
    pub max: f64,
}

impl FilterRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn validate(&self, name: &str) {
        assert!(
            self.min.is_finite() && self.max.is_finite(),
            "{name} bounds must be finite"
        );
        assert!(
            self.min <= self.max,
            "{name} min ({}) must not exceed max ({})",
            self.min,
            self.max
        );
    }
}

// ============================================================================
// Fitting
// ============================================================================

/// Camera, detection and fit parameters for [`crate::FitPipeline`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Physical size of one camera pixel in nm.
    pub pixel_size_nm: f64,
    /// EM gain of the camera.
    pub em_gain: f64,
    /// Photo-electrons per count (photon conversion factor).
    pub photon_conversion: f64,
    /// Camera baseline in counts.
    pub camera_offset: f64,
    /// Half side of the square fit window in pixels. Also the maxima block half-size.
    pub box_half_size: usize,
    pub shape: PsfShape,
    pub method: FitMethod,
    pub max_iterations: usize,
    /// Maxima at or below this value are ignored.
    pub noise_threshold: f64,
    pub pre_filter: PreFilter,
    /// Accept range for the fitted width in nm.
    pub width_filter: Option<FilterRange>,
    /// Accept range for the integrated intensity in photons.
    pub photon_filter: Option<FilterRange>,
    /// Fit with the PSF width held at this value (nm). Overrides `shape`.
    pub fixed_width_nm: Option<f64>,
    /// 1-based channel numbers the producer skips.
    pub skip_channels: Vec<u32>,
    /// Worker threads. `None` uses `min(available_parallelism, 8)`.
    pub worker_count: Option<usize>,
    /// Capacity of the bounded candidate queue.
    pub queue_capacity: usize,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            pixel_size_nm: 107.0,
            em_gain: 50.0,
            photon_conversion: 10.41,
            camera_offset: 100.0,
            box_half_size: 4,
            shape: PsfShape::Symmetric,
            method: FitMethod::Simplex,
            max_iterations: 250,
            noise_threshold: 100.0,
            pre_filter: PreFilter::None,
            width_filter: None,
            photon_filter: None,
            fixed_width_nm: None,
            skip_channels: Vec::new(),
            worker_count: None,
            queue_capacity: 1000,
        }
    }
}

impl FitConfig {
    /// Photons per count after removing the EM gain.
    #[inline]
    pub fn photons_per_count(&self) -> f64 {
        self.photon_conversion / self.em_gain
    }

    /// Side of the square fit window in pixels.
    #[inline]
    pub fn window_size(&self) -> usize {
        2 * self.box_half_size
    }

    pub fn validate(&self) {
        assert!(
            self.pixel_size_nm > 0.0,
            "pixel_size_nm must be positive, got {}",
            self.pixel_size_nm
        );
        assert!(self.em_gain > 0.0, "em_gain must be positive, got {}", self.em_gain);
        assert!(
            self.photon_conversion > 0.0,
            "photon_conversion must be positive, got {}",
            self.photon_conversion
        );
        assert!(
            self.box_half_size >= 2,
            "box_half_size must be at least 2, got {}",
            self.box_half_size
        );
        assert!(
            self.max_iterations > 0,
            "max_iterations must be positive"
        );
        assert!(self.queue_capacity > 0, "queue_capacity must be positive");
        if let PreFilter::Gaussian { sigma } = self.pre_filter {
            assert!(sigma > 0.0, "pre-filter sigma must be positive, got {sigma}");
        }
        if let Some(range) = &self.width_filter {
            range.validate("width_filter");
        }
        if let Some(range) = &self.photon_filter {
            range.validate("photon_filter");
        }
        if let Some(width) = self.fixed_width_nm {
            assert!(width > 0.0, "fixed_width_nm must be positive, got {width}");
        }
        if let Some(workers) = self.worker_count {
            assert!(workers > 0, "worker_count must be positive");
        }
    }
}

// ============================================================================
// Registration
// ============================================================================

/// Parameters for two-channel registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Polynomial order of the LWM local fits.
    pub order: usize,
    /// Maximum distance (nm) between paired spots.
    pub pair_max_distance_nm: f64,
    pub method: MapperMethod,
    /// Fewest calibration pairs accepted.
    pub min_pairs: usize,
    /// Iteratively drop the worst pair from the global affine fit.
    pub clean_affine_outliers: bool,
    pub piecewise_max_points: usize,
    pub piecewise_max_distance_nm: f64,
    pub undefined_policy: UndefinedPolicy,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            order: 2,
            pair_max_distance_nm: 100.0,
            method: MapperMethod::Lwm,
            min_pairs: 4,
            clean_affine_outliers: false,
            piecewise_max_points: 100,
            piecewise_max_distance_nm: 500.0,
            undefined_policy: UndefinedPolicy::Affine,
        }
    }
}

impl RegistrationConfig {
    pub fn validate(&self) {
        assert!(self.order >= 1, "order must be at least 1");
        assert!(
            self.pair_max_distance_nm > 0.0,
            "pair_max_distance_nm must be positive, got {}",
            self.pair_max_distance_nm
        );
        assert!(self.min_pairs >= 3, "min_pairs must be at least 3");
        assert!(
            self.piecewise_max_points > 10,
            "piecewise_max_points must exceed 10"
        );
        assert!(
            self.piecewise_max_distance_nm > 0.0,
            "piecewise_max_distance_nm must be positive"
        );
    }
}

// ============================================================================
// Drift
// ============================================================================

/// Parameters for scattergram cross-correlation drift correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// Frames accumulated into each correlation block.
    pub frames_to_combine: usize,
    /// Optional cap on localizations per block.
    pub max_spots_per_block: Option<usize>,
    /// Target scattergram pixel size in nm; magnification is derived from it.
    pub nm_per_scatter_pixel: f64,
    /// Peak search radius around the correlation center, in scatter pixels.
    pub search_radius: usize,
    /// Half-size of the window fitted around the correlation peak.
    pub fit_half_size: usize,
    /// Moving-average window over block offsets. 1 disables smoothing.
    pub smoothing_window: usize,
    /// Divide the cross-power spectrum by its magnitude (phase-only correlation).
    pub normalize_spectrum: bool,
    /// Always use the one-block-at-a-time path.
    pub force_streaming: bool,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            frames_to_combine: 200,
            max_spots_per_block: None,
            nm_per_scatter_pixel: 40.0,
            search_radius: 32,
            fit_half_size: 4,
            smoothing_window: 1,
            normalize_spectrum: false,
            force_streaming: false,
        }
    }
}

impl DriftConfig {
    pub fn validate(&self) {
        assert!(
            self.frames_to_combine > 0,
            "frames_to_combine must be positive"
        );
        if let Some(max) = self.max_spots_per_block {
            assert!(max > 0, "max_spots_per_block must be positive");
        }
        assert!(
            self.nm_per_scatter_pixel > 0.0,
            "nm_per_scatter_pixel must be positive"
        );
        assert!(self.search_radius > 0, "search_radius must be positive");
        assert!(self.fit_half_size >= 2, "fit_half_size must be at least 2");
        assert!(
            self.smoothing_window >= 1,
            "smoothing_window must be at least 1"
        );
    }
}

// ============================================================================
// Top level
// ============================================================================

/// All processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub fit: FitConfig,
    pub registration: RegistrationConfig,
    pub drift: DriftConfig,
}

impl Config {
    /// Loads settings from a `.yaml`, `.yml` or `.json` file.
    pub fn from_file(path: &str) -> common::SerdeFormatResult<Self> {
        let config: Config = common::load_file(path)?;
        Ok(config)
    }

    pub fn to_text(&self, format: common::FileFormat) -> common::SerdeFormatResult<String> {
        common::serialize(self, format)
    }

    pub fn parse(text: &str, format: common::FileFormat) -> common::SerdeFormatResult<Self> {
        common::deserialize(text, format)
    }

    pub fn validate(&self) {
        self.fit.validate();
        self.registration.validate();
        self.drift.validate();
    }
}
