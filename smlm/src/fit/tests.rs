//! Tests for per-window PSF fitting.

use super::*;
use crate::localization::FrameIndex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn render<const N: usize, M: PsfModel<N>>(model: &M, params: [f64; N], size: usize) -> Buffer2<f64> {
    let mut window = Buffer2::new_default(size, size);
    for y in 0..size {
        for x in 0..size {
            window[(x, y)] = model.evaluate(x as f64, y as f64, &params);
        }
    }
    window
}

fn symmetric_window(cx: f64, cy: f64, sigma: f64) -> Buffer2<f64> {
    render(&SymmetricGaussian { max_sigma: 20.0 }, [1500.0, 110.0, cx, cy, sigma], 8)
}

#[test]
fn lm_recovers_symmetric_spot() {
    let window = symmetric_window(3.6, 4.2, 1.3);
    let fit = fit(&window, PsfShape::Symmetric, 250).unwrap();

    assert!((fit.x - 3.6).abs() < 0.013);
    assert!((fit.y - 4.2).abs() < 0.013);
    assert!((fit.width.width() - 1.3).abs() < 0.013);
    assert!((fit.amplitude - 1500.0).abs() < 1.0);
    assert!((fit.background - 110.0).abs() < 0.5);
}

#[test]
fn simplex_recovers_symmetric_spot() {
    let window = symmetric_window(4.1, 3.3, 1.5);
    let fitter = Fitter::new(PsfShape::Symmetric, FitMethod::Simplex, 5000);
    let fit = fitter.fit(&window).unwrap();

    assert!((fit.x - 4.1).abs() < 0.015);
    assert!((fit.y - 3.3).abs() < 0.015);
    assert!((fit.width.width() - 1.5).abs() < 0.015);
}

#[test]
fn default_simplex_converges_on_clean_spots() {
    let fitter = Fitter::from_config(&FitConfig::default());
    for i in 0..100 {
        let phase = i as f64 * 0.61;
        let cx = 3.5 + 0.8 * phase.sin();
        let cy = 3.5 + 0.8 * (1.3 * phase).cos();
        let window = symmetric_window(cx, cy, 1.4);
        let fit = fitter.fit(&window).unwrap();

        assert!((fit.x - cx).abs() < 0.02, "x {} vs {cx}", fit.x);
        assert!((fit.y - cy).abs() < 0.02, "y {} vs {cy}", fit.y);
        assert!((fit.width.width() - 1.4).abs() < 0.02);
    }
}

#[test]
fn lm_handles_noise() {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let mut window = render(
        &SymmetricGaussian { max_sigma: 20.0 },
        [2000.0, 100.0, 4.8, 5.3, 1.4],
        10,
    );
    for v in window.pixels_mut() {
        *v += rng.random_range(-15.0..15.0);
    }
    let fit = fit(&window, PsfShape::Symmetric, 250).unwrap();
    assert!((fit.x - 4.8).abs() < 0.1);
    assert!((fit.y - 5.3).abs() < 0.1);
    assert!((fit.width.width() - 1.4).abs() < 0.1);
}

#[test]
fn lm_recovers_elongated_widths() {
    let window = render(
        &ElongatedGaussian { max_sigma: 20.0 },
        [1200.0, 50.0, 5.2, 4.7, 1.1, 2.0],
        10,
    );
    let fit = fit(&window, PsfShape::Elongated, 250).unwrap();
    let PsfWidth::Elongated { sigma_x, sigma_y } = fit.width else {
        panic!("expected elongated widths, got {:?}", fit.width);
    };
    assert!((sigma_x - 1.1).abs() < 0.01);
    assert!((sigma_y - 2.0).abs() < 0.01);
}

#[test]
fn lm_recovers_rotation() {
    let (theta, s1, s2): (f64, f64, f64) = (0.5, 2.0, 1.2);
    let (sin, cos) = theta.sin_cos();
    let a = cos * cos / (s1 * s1) + sin * sin / (s2 * s2);
    let b = sin * cos * (1.0 / (s1 * s1) - 1.0 / (s2 * s2));
    let c = sin * sin / (s1 * s1) + cos * cos / (s2 * s2);
    let window = render(
        &RotatedGaussian { max_sigma: 20.0 },
        [1500.0, 80.0, 6.0, 5.5, a, b, c],
        12,
    );

    let fit = fit(&window, PsfShape::Rotated, 250).unwrap();
    let PsfWidth::Rotated {
        sigma_major,
        sigma_minor,
        theta: fit_theta,
    } = fit.width
    else {
        panic!("expected rotated widths, got {:?}", fit.width);
    };
    assert!((sigma_major - s1).abs() < 0.02);
    assert!((sigma_minor - s2).abs() < 0.02);
    assert!((fit_theta - theta).abs() < 0.02);
    assert!((fit.x - 6.0).abs() < 0.01);
}

#[test]
fn flat_background_is_not_a_spot() {
    let window = Buffer2::new_filled(10, 10, 120.0);
    let result = Fitter::new(PsfShape::Symmetric, FitMethod::LevenbergMarquardt, 250).fit(&window);
    assert!(
        matches!(result, Err(FitError::OutOfRange { parameter: "amplitude", .. })),
        "{result:?}"
    );
}

#[test]
fn fixed_width_keeps_sigma() {
    let window = symmetric_window(3.9, 3.4, 1.4);
    let fitter = Fitter::new(PsfShape::Symmetric, FitMethod::LevenbergMarquardt, 250).with_fixed_sigma(1.4);
    let fit = fitter.fit(&window).unwrap();
    assert_eq!(fit.width, PsfWidth::Symmetric { sigma: 1.4 });
    assert!((fit.x - 3.9).abs() < 0.01);
    assert!((fit.y - 3.4).abs() < 0.01);
}

#[test]
fn tiny_window_is_rejected() {
    let window = Buffer2::new_filled(2, 2, 10.0);
    let err = fit(&window, PsfShape::Symmetric, 250).unwrap_err();
    assert_eq!(
        err,
        FitError::WindowTooSmall {
            width: 2,
            height: 2,
            params: 5
        }
    );
}

#[test]
fn spot_outside_window_fails() {
    let window = render(
        &SymmetricGaussian { max_sigma: 20.0 },
        [1500.0, 100.0, -3.0, 4.0, 1.5],
        8,
    );
    assert!(fit(&window, PsfShape::Symmetric, 250).is_err());
}

#[test]
fn localize_converts_units() {
    let config = FitConfig {
        pixel_size_nm: 100.0,
        photon_conversion: 10.0,
        em_gain: 50.0,
        camera_offset: 100.0,
        ..Default::default()
    };
    let candidate = Candidate::new(FrameIndex::new(1, 1, 3, 1), 20, 24, 4, Buffer2::new_default(8, 8));
    let fit = PsfFit {
        amplitude: 1000.0,
        background: 125.0,
        x: 3.5,
        y: 4.0,
        width: PsfWidth::Symmetric { sigma: 1.5 },
        chi2: 0.0,
        iterations: 7,
    };

    let spot = fit.localize(&candidate, &config);
    assert!((spot.x_center - 1950.0).abs() < 1e-9);
    assert!((spot.y_center - 2400.0).abs() < 1e-9);
    assert!((spot.width() - 150.0).abs() < 1e-9);
    assert!((spot.background - 5.0).abs() < 1e-12);
    let photons = 0.2 * 1000.0 * 2.0 * std::f64::consts::PI * 2.25;
    assert!((spot.intensity - photons).abs() < 1e-9);
    let expected = crate::precision::localization_precision(150.0, 100.0, photons, 5.0);
    assert!((spot.precision - expected).abs() < 1e-12);
    assert_eq!(spot.index.frame, 3);
    assert_eq!((spot.seed_x, spot.seed_y), (20, 24));
}
