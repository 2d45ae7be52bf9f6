//! Separable Gaussian smoothing used before maxima detection.

use common::Buffer2;
use rayon::prelude::*;

const ROWS_PER_CHUNK: usize = 8;

/// Normalized 1-D Gaussian kernel of radius `ceil(3 * sigma)`.
pub fn gaussian_kernel_1d(sigma: f64) -> Vec<f64> {
    assert!(sigma > 0.0, "Sigma must be positive");

    let radius = (3.0 * sigma).ceil() as usize;
    let two_sigma_sq = 2.0 * sigma * sigma;
    let mut kernel: Vec<f64> = (0..=2 * radius)
        .map(|i| {
            let x = i as f64 - radius as f64;
            (-x * x / two_sigma_sq).exp()
        })
        .collect();

    let sum: f64 = kernel.iter().sum();
    for v in &mut kernel {
        *v /= sum;
    }
    kernel
}

/// Blurs `image` with a Gaussian of `sigma` pixels. Edges are clamped.
pub fn gaussian_blur(image: &Buffer2<f64>, sigma: f64) -> Buffer2<f64> {
    let kernel = gaussian_kernel_1d(sigma);
    let width = image.width();
    let height = image.height();
    if width == 0 || height == 0 {
        return image.clone();
    }

    let mut temp = vec![0.0; width * height];
    temp.par_chunks_mut(width * ROWS_PER_CHUNK)
        .enumerate()
        .for_each(|(chunk_idx, chunk)| {
            let y_start = chunk_idx * ROWS_PER_CHUNK;
            for (local_y, out_row) in chunk.chunks_mut(width).enumerate() {
                convolve_line(image.row(y_start + local_y), out_row, &kernel);
            }
        });

    let mut output = vec![0.0; width * height];
    let radius = kernel.len() / 2;
    output
        .par_chunks_mut(width * ROWS_PER_CHUNK)
        .enumerate()
        .for_each(|(chunk_idx, chunk)| {
            let y_start = chunk_idx * ROWS_PER_CHUNK;
            for (local_y, out_row) in chunk.chunks_mut(width).enumerate() {
                let y = y_start + local_y;
                for (k, &weight) in kernel.iter().enumerate() {
                    let sy = (y + k).saturating_sub(radius).min(height - 1);
                    let in_row = &temp[sy * width..(sy + 1) * width];
                    for (o, &v) in out_row.iter_mut().zip(in_row) {
                        *o += weight * v;
                    }
                }
            }
        });

    Buffer2::new(width, height, output)
}

fn convolve_line(input: &[f64], output: &mut [f64], kernel: &[f64]) {
    let radius = kernel.len() / 2;
    let last = input.len() - 1;
    for (x, out) in output.iter_mut().enumerate() {
        *out = kernel
            .iter()
            .enumerate()
            .map(|(k, &weight)| weight * input[(x + k).saturating_sub(radius).min(last)])
            .sum();
    }
}
