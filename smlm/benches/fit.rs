use std::hint::black_box;

use common::Buffer2;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use smlm::psf::{ElongatedGaussian, PsfModel, RotatedGaussian, SymmetricGaussian};
use smlm::{FitMethod, Fitter, PsfShape};

const SIZE: usize = 10;

fn render<const N: usize, M: PsfModel<N>>(model: &M, params: [f64; N]) -> Buffer2<f64> {
    let mut window = Buffer2::new_default(SIZE, SIZE);
    for y in 0..SIZE {
        for x in 0..SIZE {
            window[(x, y)] = model.evaluate(x as f64, y as f64, &params);
        }
    }
    window
}

fn windows() -> Vec<(PsfShape, Buffer2<f64>)> {
    let max_sigma = SIZE as f64;
    vec![
        (
            PsfShape::Symmetric,
            render(&SymmetricGaussian { max_sigma }, [1200.0, 110.0, 4.7, 5.2, 1.4]),
        ),
        (
            PsfShape::Elongated,
            render(&ElongatedGaussian { max_sigma }, [1200.0, 110.0, 4.7, 5.2, 1.2, 1.8]),
        ),
        (
            PsfShape::Rotated,
            render(
                &RotatedGaussian { max_sigma },
                [1200.0, 110.0, 4.7, 5.2, 0.45, 0.1, 0.3],
            ),
        ),
    ]
}

fn fit_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("fit_window");
    group.throughput(Throughput::Elements(1));

    for (shape, window) in windows() {
        for method in [FitMethod::LevenbergMarquardt, FitMethod::Simplex] {
            let fitter = Fitter::new(shape, method, 250);
            group.bench_with_input(
                BenchmarkId::new(format!("{shape:?}"), format!("{method:?}")),
                &window,
                |b, window| b.iter(|| black_box(fitter.fit(black_box(window)))),
            );
        }
    }
    group.finish();
}

criterion_group!(benches, fit_benchmarks);
criterion_main!(benches);
