use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

/// Axis-aligned pixel rectangle, `x`/`y` is the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Roi {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[inline]
    pub fn right(&self) -> usize {
        self.x + self.width
    }

    #[inline]
    pub fn bottom(&self) -> usize {
        self.y + self.height
    }

    #[inline]
    pub fn contains(&self, x: usize, y: usize) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// Intersection with a `width` x `height` image.
    pub fn clamp_to(&self, width: usize, height: usize) -> Roi {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Roi {
            x,
            y,
            width: self.right().min(width) - x,
            height: self.bottom().min(height) - y,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Row-major 2-D pixel buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer2<T> {
    pixels: Vec<T>,
    width: usize,
    height: usize,
}

impl<T> Buffer2<T> {
    pub fn new(width: usize, height: usize, pixels: Vec<T>) -> Self {
        assert_eq!(
            pixels.len(),
            width * height,
            "pixels length must equal width * height"
        );
        Self {
            pixels,
            width,
            height,
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> &T {
        debug_assert!(x < self.width && y < self.height);
        &self.pixels[y * self.width + x]
    }

    #[inline]
    pub fn get_mut(&mut self, x: usize, y: usize) -> &mut T {
        debug_assert!(x < self.width && y < self.height);
        &mut self.pixels[y * self.width + x]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// The whole buffer as a region.
    #[inline]
    pub fn bounds(&self) -> Roi {
        Roi::new(0, 0, self.width, self.height)
    }

    #[inline]
    pub fn pixels(&self) -> &[T] {
        &self.pixels
    }

    #[inline]
    pub fn pixels_mut(&mut self) -> &mut [T] {
        &mut self.pixels
    }

    #[inline]
    pub fn into_pixels(self) -> Vec<T> {
        self.pixels
    }

    #[inline]
    pub fn row(&self, y: usize) -> &[T] {
        &self.pixels[y * self.width..(y + 1) * self.width]
    }
}

impl<T: Copy> Buffer2<T> {
    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> T {
        self.pixels[y * self.width + x]
    }

    /// Copies the part of the buffer covered by `roi`.
    ///
    /// Returns `None` when `roi` is empty or does not lie fully inside the buffer.
    pub fn crop(&self, roi: Roi) -> Option<Buffer2<T>> {
        if roi.is_empty() || roi.right() > self.width || roi.bottom() > self.height {
            return None;
        }
        let mut pixels = Vec::with_capacity(roi.width * roi.height);
        for y in roi.y..roi.bottom() {
            let start = y * self.width + roi.x;
            pixels.extend_from_slice(&self.pixels[start..start + roi.width]);
        }
        Some(Buffer2::new(roi.width, roi.height, pixels))
    }

    /// Maps every pixel through `f` into a new buffer of the same shape.
    pub fn map<U, F: Fn(T) -> U>(&self, f: F) -> Buffer2<U> {
        Buffer2 {
            pixels: self.pixels.iter().map(|&p| f(p)).collect(),
            width: self.width,
            height: self.height,
        }
    }
}

impl<T: Default + Clone> Buffer2<T> {
    pub fn new_default(width: usize, height: usize) -> Self {
        Self {
            pixels: vec![T::default(); width * height],
            width,
            height,
        }
    }
}

impl<T: Clone> Buffer2<T> {
    pub fn new_filled(width: usize, height: usize, value: T) -> Self {
        Self {
            pixels: vec![value; width * height],
            width,
            height,
        }
    }
}

impl<T> Index<(usize, usize)> for Buffer2<T> {
    type Output = T;

    #[inline]
    fn index(&self, (x, y): (usize, usize)) -> &Self::Output {
        &self.pixels[y * self.width + x]
    }
}

impl<T> IndexMut<(usize, usize)> for Buffer2<T> {
    #[inline]
    fn index_mut(&mut self, (x, y): (usize, usize)) -> &mut Self::Output {
        &mut self.pixels[y * self.width + x]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(width: usize, height: usize) -> Buffer2<u16> {
        Buffer2::new(
            width,
            height,
            (0..width * height).map(|v| v as u16).collect(),
        )
    }

    #[test]
    fn crop_copies_rows() {
        let buf = ramp(5, 4);
        let crop = buf.crop(Roi::new(1, 2, 3, 2)).unwrap();
        assert_eq!(crop.width(), 3);
        assert_eq!(crop.height(), 2);
        assert_eq!(crop.pixels(), &[11, 12, 13, 16, 17, 18]);
    }

    #[test]
    fn crop_outside_is_none() {
        let buf = ramp(5, 4);
        assert!(buf.crop(Roi::new(3, 0, 3, 1)).is_none());
        assert!(buf.crop(Roi::new(0, 0, 0, 1)).is_none());
    }

    #[test]
    fn roi_clamp() {
        let roi = Roi::new(2, 3, 10, 10).clamp_to(6, 5);
        assert_eq!(roi, Roi::new(2, 3, 4, 2));
        assert!(Roi::new(8, 8, 2, 2).clamp_to(6, 5).is_empty());
    }

    #[test]
    #[should_panic(expected = "pixels length must equal width * height")]
    fn new_rejects_bad_length() {
        Buffer2::new(3, 3, vec![0u8; 8]);
    }
}
