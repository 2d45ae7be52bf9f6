use super::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn flat(width: usize, height: usize, value: f64) -> Buffer2<f64> {
    Buffer2::new_filled(width, height, value)
}

fn render_spot(image: &mut Buffer2<f64>, cx: f64, cy: f64, amplitude: f64, sigma: f64) {
    for y in 0..image.height() {
        for x in 0..image.width() {
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            image[(x, y)] += amplitude * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
        }
    }
}

#[test]
fn flat_image_has_no_maxima() {
    let image = flat(40, 30, 250.0);
    assert!(detect_maxima(&image, 3, 0.0).is_empty());
}

#[test]
fn single_raised_pixel_is_found() {
    let mut image = flat(32, 32, 10.0);
    image[(13, 17)] = 500.0;
    let maxima = detect_maxima(&image, 3, 100.0);
    assert_eq!(maxima.len(), 1);
    assert_eq!((maxima[0].x, maxima[0].y), (13, 17));
    assert_eq!(maxima[0].value, 500.0);
}

#[test]
fn single_raised_pixel_found_for_every_offset() {
    for px in 4..12 {
        for py in 4..12 {
            let mut image = flat(16, 16, 1.0);
            image[(px, py)] = 2.0;
            let maxima = detect_maxima(&image, 2, 0.0);
            assert_eq!(maxima.len(), 1, "pixel ({px}, {py})");
            assert_eq!((maxima[0].x, maxima[0].y), (px, py));
        }
    }
}

#[test]
fn threshold_rejects_dim_maxima() {
    let mut image = flat(32, 32, 0.0);
    image[(10, 10)] = 50.0;
    image[(22, 20)] = 150.0;
    let maxima = detect_maxima(&image, 3, 100.0);
    assert_eq!(maxima.len(), 1);
    assert_eq!((maxima[0].x, maxima[0].y), (22, 20));
}

#[test]
fn maxima_near_border_are_dropped() {
    let mut image = flat(32, 32, 0.0);
    image[(1, 15)] = 200.0;
    image[(15, 30)] = 200.0;
    image[(28, 28)] = 200.0;
    let maxima = detect_maxima(&image, 4, 10.0);
    assert_eq!(maxima.len(), 1);
    assert_eq!((maxima[0].x, maxima[0].y), (28, 28));
}

#[test]
fn close_spots_keep_only_the_brighter() {
    let mut image = flat(40, 40, 0.0);
    image[(20, 20)] = 300.0;
    image[(22, 21)] = 200.0;
    let maxima = detect_maxima(&image, 3, 10.0);
    assert_eq!(maxima.len(), 1);
    assert_eq!((maxima[0].x, maxima[0].y), (20, 20));
}

#[test]
fn separated_gaussian_spots_all_found() {
    let mut image = flat(64, 64, 100.0);
    let centers = [(12.0, 12.0), (40.3, 15.6), (20.7, 45.2), (50.0, 50.0)];
    for &(cx, cy) in &centers {
        render_spot(&mut image, cx, cy, 800.0, 1.4);
    }
    let mut maxima = detect_maxima(&image, 4, 300.0);
    maxima.sort_by_key(|m| (m.y, m.x));
    assert_eq!(maxima.len(), centers.len());
    for &(cx, cy) in &centers {
        assert!(
            maxima
                .iter()
                .any(|m| (m.x as f64 - cx).abs() <= 0.5 && (m.y as f64 - cy).abs() <= 0.5),
            "missing spot at ({cx}, {cy})"
        );
    }
}

#[test]
fn roi_restricts_detection() {
    let mut image = flat(64, 64, 0.0);
    image[(10, 10)] = 100.0;
    image[(50, 40)] = 100.0;
    let maxima = detect_maxima_in(&image, Roi::new(32, 32, 32, 32), 3, 1.0);
    assert_eq!(maxima.len(), 1);
    assert_eq!((maxima[0].x, maxima[0].y), (50, 40));
}

#[test]
fn pre_filter_suppresses_pixel_noise() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let mut image = flat(64, 64, 0.0);
    for v in image.pixels_mut() {
        *v = 100.0 + rng.random_range(-10.0..10.0);
    }
    render_spot(&mut image, 31.0, 33.0, 600.0, 1.5);

    let raw = MaximaDetector::new(3, 108.0).detect(&image, None);
    let smoothed = MaximaDetector::new(3, 108.0)
        .with_pre_filter(PreFilter::Gaussian { sigma: 1.0 })
        .detect(&image, None);

    assert!(raw.len() > 1);
    assert_eq!(smoothed.len(), 1);
    assert_eq!((smoothed[0].x, smoothed[0].y), (31, 33));
}
