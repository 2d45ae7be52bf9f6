//! Localization histograms used as correlation images.

use common::Buffer2;

use crate::error::DriftError;
use crate::localization::Localization;

/// Scattergram pixels per camera pixel: `⌊pixel / target⌋` rounded up to even, at least 2.
pub fn magnification(pixel_size_nm: f64, target_nm: f64) -> usize {
    let mag = (pixel_size_nm / target_nm).floor().max(0.0) as usize;
    let mag = if mag % 2 == 1 { mag + 1 } else { mag };
    mag.max(2)
}

/// Geometry shared by every scattergram of one drift run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScatterGeometry {
    /// Side of the square, zero-padded image. Always a power of two.
    pub size: usize,
    /// Physical size of one scattergram pixel.
    pub nm_per_pixel: f64,
}

impl ScatterGeometry {
    /// Covers an image of `width × height` camera pixels, or the extent of
    /// `spots` when the image size is unknown.
    pub fn new<'a>(
        width: u32,
        height: u32,
        pixel_size_nm: f64,
        target_nm: f64,
        spots: impl Iterator<Item = &'a Localization>,
    ) -> Self {
        let mag = magnification(pixel_size_nm, target_nm);
        let nm_per_pixel = pixel_size_nm / mag as f64;

        let extent_nm = if width > 0 && height > 0 {
            width.max(height) as f64 * pixel_size_nm
        } else {
            spots.fold(0.0f64, |m, s| m.max(s.x_center).max(s.y_center))
        };
        let pixels = (extent_nm / nm_per_pixel).ceil().max(1.0) as usize;

        Self {
            size: pixels.next_power_of_two().max(4),
            nm_per_pixel,
        }
    }

    pub fn bytes(&self) -> usize {
        self.size * self.size * std::mem::size_of::<f64>()
    }

    /// Histogram of `spots`. Positions outside the image are ignored.
    pub fn render<'a>(
        &self,
        spots: impl Iterator<Item = &'a Localization>,
    ) -> Result<Buffer2<f64>, DriftError> {
        let len = self.size * self.size;
        let mut pixels: Vec<f64> = Vec::new();
        pixels
            .try_reserve_exact(len)
            .map_err(|_| DriftError::AllocationFailed { bytes: self.bytes() })?;
        pixels.resize(len, 0.0);

        let mut image = Buffer2::new(self.size, self.size, pixels);
        for spot in spots {
            let x = (spot.x_center / self.nm_per_pixel).floor();
            let y = (spot.y_center / self.nm_per_pixel).floor();
            if x >= 0.0 && y >= 0.0 && (x as usize) < self.size && (y as usize) < self.size {
                image[(x as usize, y as usize)] += 1.0;
            }
        }
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::localization::{FrameIndex, PsfWidth};

    fn at(x: f64, y: f64) -> Localization {
        Localization {
            index: FrameIndex::default(),
            seed_x: 0,
            seed_y: 0,
            x_center: x,
            y_center: y,
            z_center: None,
            intensity: 100.0,
            background: 1.0,
            psf: PsfWidth::Symmetric { sigma: 120.0 },
            precision: 10.0,
        }
    }

    #[test]
    fn magnification_is_even_and_at_least_two() {
        assert_eq!(magnification(107.0, 40.0), 2);
        assert_eq!(magnification(160.0, 40.0), 4);
        assert_eq!(magnification(120.0, 40.0), 4);
        assert_eq!(magnification(30.0, 40.0), 2);
        assert_eq!(magnification(100.0, 10.0), 10);
    }

    #[test]
    fn geometry_pads_to_power_of_two() {
        let geometry = ScatterGeometry::new(100, 60, 100.0, 40.0, std::iter::empty());
        assert_eq!(geometry.nm_per_pixel, 50.0);
        assert_eq!(geometry.size, 256);

        let spots = [at(900.0, 3000.0)];
        let geometry = ScatterGeometry::new(0, 0, 100.0, 40.0, spots.iter());
        assert_eq!(geometry.size, 64);
    }

    #[test]
    fn render_counts_hits() {
        let geometry = ScatterGeometry {
            size: 8,
            nm_per_pixel: 10.0,
        };
        let spots = [at(15.0, 25.0), at(19.0, 21.0), at(-5.0, 0.0), at(500.0, 0.0)];
        let image = geometry.render(spots.iter()).unwrap();
        assert_eq!(image[(1, 2)], 2.0);
        assert_eq!(image.pixels().iter().sum::<f64>(), 2.0);
    }
}
