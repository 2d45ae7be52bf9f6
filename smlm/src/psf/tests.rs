use super::*;

fn check_jacobian<const N: usize, M: PsfModel<N>>(model: &M, params: [f64; N]) {
    let points = [(1.0, 2.0), (3.5, 3.0), (4.0, 5.5), (6.0, 1.0), (2.2, 6.7)];
    for &(x, y) in &points {
        let analytic = model.jacobian_row(x, y, &params);
        for i in 0..N {
            let h = 1e-6 * params[i].abs().max(1.0);
            let mut plus = params;
            let mut minus = params;
            plus[i] += h;
            minus[i] -= h;
            let numeric = (model.evaluate(x, y, &plus) - model.evaluate(x, y, &minus)) / (2.0 * h);
            let scale = numeric.abs().max(1.0);
            assert!(
                (analytic[i] - numeric).abs() / scale < 1e-5,
                "param {i} at ({x}, {y}): analytic {} numeric {numeric}",
                analytic[i]
            );
        }
    }
}

fn render(width: usize, amp: f64, bg: f64, cx: f64, cy: f64, sigma: f64) -> Buffer2<f64> {
    let model = SymmetricGaussian { max_sigma: 10.0 };
    let mut window = Buffer2::new_default(width, width);
    for y in 0..width {
        for x in 0..width {
            window[(x, y)] = model.evaluate(x as f64, y as f64, &[amp, bg, cx, cy, sigma]);
        }
    }
    window
}

#[test]
fn symmetric_jacobian_matches_finite_difference() {
    check_jacobian(&SymmetricGaussian { max_sigma: 8.0 }, [500.0, 20.0, 3.7, 4.2, 1.4]);
}

#[test]
fn fixed_width_jacobian_matches_finite_difference() {
    check_jacobian(&FixedWidthGaussian { sigma: 1.3 }, [500.0, 20.0, 3.7, 4.2]);
}

#[test]
fn elongated_jacobian_matches_finite_difference() {
    check_jacobian(
        &ElongatedGaussian { max_sigma: 8.0 },
        [800.0, 5.0, 4.1, 3.9, 1.2, 2.1],
    );
}

#[test]
fn rotated_jacobian_matches_finite_difference() {
    check_jacobian(
        &RotatedGaussian { max_sigma: 8.0 },
        [800.0, 5.0, 4.1, 3.9, 0.6, 0.15, 0.35],
    );
}

#[test]
fn ellipse_axes_of_axis_aligned_form() {
    let (theta, major, minor) = ellipse_axes(1.0 / 4.0, 0.0, 1.0);
    assert_eq!(theta, 0.0);
    assert!((major - 2.0).abs() < 1e-12);
    assert!((minor - 1.0).abs() < 1e-12);
}

#[test]
fn ellipse_axes_recovers_rotation() {
    let (theta, s1, s2): (f64, f64, f64) = (0.3, 2.0, 1.0);
    let (sin, cos) = theta.sin_cos();
    let a = cos * cos / (s1 * s1) + sin * sin / (s2 * s2);
    let b = sin * cos * (1.0 / (s1 * s1) - 1.0 / (s2 * s2));
    let c = sin * sin / (s1 * s1) + cos * cos / (s2 * s2);

    let (fit_theta, major, minor) = ellipse_axes(a, b, c);
    assert!((fit_theta - theta).abs() < 1e-9);
    assert!((major - s1).abs() < 1e-9);
    assert!((minor - s2).abs() < 1e-9);
}

#[test]
fn rotated_constrain_keeps_form_positive_definite() {
    let model = RotatedGaussian { max_sigma: 8.0 };
    let mut params = [100.0, 0.0, 4.0, 4.0, 0.5, 3.0, 0.5];
    model.constrain(&mut params);
    assert!(params[4] * params[6] - params[5] * params[5] > 0.0);
}

#[test]
fn moments_seed_close_to_truth() {
    let window = render(10, 1000.0, 50.0, 4.3, 5.1, 1.3);
    let m = Moments::of(&window);
    assert!((m.x - 4.3).abs() < 0.1);
    assert!((m.y - 5.1).abs() < 0.1);
    assert!(m.background > 50.0 && m.background < 60.0);
    assert!(m.amplitude > 900.0);
    assert!(m.sigma() > 0.8 && m.sigma() < 1.6);
}

#[test]
fn moments_of_flat_window_default_to_center() {
    let window = Buffer2::new_filled(8, 8, 100.0);
    let m = Moments::of(&window);
    assert_eq!(m.x, 3.5);
    assert_eq!(m.y, 3.5);
    assert_eq!(m.background, 100.0);
}

#[test]
fn param_counts() {
    assert_eq!(param_count(PsfShape::Symmetric, false), 5);
    assert_eq!(param_count(PsfShape::Rotated, false), 7);
    assert_eq!(param_count(PsfShape::Elongated, true), 4);
}
