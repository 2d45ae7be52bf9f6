//! Candidate fit windows and the localizations fitted from them.

use common::Buffer2;
use glam::DVec2;
use serde::{Deserialize, Serialize};

/// Stack coordinates of one image plane. All indices are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameIndex {
    pub channel: u32,
    pub slice: u32,
    pub frame: u32,
    pub position: u32,
}

impl FrameIndex {
    pub fn new(channel: u32, slice: u32, frame: u32, position: u32) -> Self {
        Self {
            channel,
            slice,
            frame,
            position,
        }
    }
}

impl Default for FrameIndex {
    fn default() -> Self {
        Self::new(1, 1, 1, 1)
    }
}

/// A maximum waiting to be fitted: its stack coordinates, seed pixel and pixel window.
///
/// The window is owned by the candidate and dropped once fitting finishes; it never
/// reaches a [`Localization`].
#[derive(Debug, Clone)]
pub struct Candidate {
    pub index: FrameIndex,
    /// Seed pixel in full-image coordinates.
    pub seed_x: u32,
    pub seed_y: u32,
    /// Full-image pixel coordinates of the window's top-left corner.
    pub origin_x: u32,
    pub origin_y: u32,
    pub window: Buffer2<f64>,
}

impl Candidate {
    /// Window corner is derived from the seed and `half_size`.
    pub fn new(index: FrameIndex, seed_x: u32, seed_y: u32, half_size: u32, window: Buffer2<f64>) -> Self {
        Self {
            index,
            seed_x,
            seed_y,
            origin_x: seed_x.saturating_sub(half_size),
            origin_y: seed_y.saturating_sub(half_size),
            window,
        }
    }
}

/// Fitted PSF widths in nm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PsfWidth {
    Symmetric { sigma: f64 },
    Elongated { sigma_x: f64, sigma_y: f64 },
    Rotated { sigma_major: f64, sigma_minor: f64, theta: f64 },
}

impl PsfWidth {
    /// Single representative width: sigma, or the geometric mean of the two axes.
    pub fn width(&self) -> f64 {
        match *self {
            PsfWidth::Symmetric { sigma } => sigma,
            PsfWidth::Elongated { sigma_x, sigma_y } => (sigma_x * sigma_y).sqrt(),
            PsfWidth::Rotated {
                sigma_major,
                sigma_minor,
                ..
            } => (sigma_major * sigma_minor).sqrt(),
        }
    }

    /// Ratio of the two axis widths, 1 for a symmetric PSF.
    pub fn asymmetry(&self) -> f64 {
        match *self {
            PsfWidth::Symmetric { .. } => 1.0,
            PsfWidth::Elongated { sigma_x, sigma_y } => sigma_x / sigma_y,
            PsfWidth::Rotated {
                sigma_major,
                sigma_minor,
                ..
            } => sigma_major / sigma_minor,
        }
    }

    /// Rotation of the major axis in radians, 0 unless rotated.
    pub fn theta(&self) -> f64 {
        match *self {
            PsfWidth::Rotated { theta, .. } => theta,
            _ => 0.0,
        }
    }

    /// Same widths with every length multiplied by `factor`.
    pub fn scaled(&self, factor: f64) -> PsfWidth {
        match *self {
            PsfWidth::Symmetric { sigma } => PsfWidth::Symmetric {
                sigma: sigma * factor,
            },
            PsfWidth::Elongated { sigma_x, sigma_y } => PsfWidth::Elongated {
                sigma_x: sigma_x * factor,
                sigma_y: sigma_y * factor,
            },
            PsfWidth::Rotated {
                sigma_major,
                sigma_minor,
                theta,
            } => PsfWidth::Rotated {
                sigma_major: sigma_major * factor,
                sigma_minor: sigma_minor * factor,
                theta,
            },
        }
    }
}

/// One accepted emitter position. Immutable once created; corrections build new values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Localization {
    pub index: FrameIndex,
    /// Seed pixel the fit started from.
    pub seed_x: u32,
    pub seed_y: u32,
    /// Fitted center in nm.
    pub x_center: f64,
    pub y_center: f64,
    pub z_center: Option<f64>,
    /// Integrated intensity in photons.
    pub intensity: f64,
    /// Background in photons per pixel, camera offset removed.
    pub background: f64,
    pub psf: PsfWidth,
    /// Localization precision in nm.
    pub precision: f64,
}

impl Localization {
    #[inline]
    pub fn position(&self) -> DVec2 {
        DVec2::new(self.x_center, self.y_center)
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.psf.width()
    }

    /// Copy of this localization centered at `position`; every other field carries over.
    pub fn with_position(&self, position: DVec2) -> Localization {
        Localization {
            x_center: position.x,
            y_center: position.y,
            ..*self
        }
    }

    /// Sort key giving a deterministic order independent of fitting order.
    pub fn sort_key(&self) -> (FrameIndex, u32, u32) {
        (self.index, self.seed_y, self.seed_x)
    }
}
