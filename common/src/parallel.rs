//! Bounded parallel helpers shared by the processing crates.

use rayon::prelude::*;

/// Upper bound on worker threads for CPU-bound stages.
pub const MAX_WORKERS: usize = 8;

/// Number of workers to use when `requested` is 0 (auto) or explicit.
///
/// Auto picks `min(available_parallelism, MAX_WORKERS)`. Always at least 1.
pub fn worker_count(requested: usize) -> usize {
    if requested > 0 {
        return requested;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .clamp(1, MAX_WORKERS)
}

/// Maps `f` over `items` in parallel with at most `max_concurrent` items in flight.
///
/// Output order matches input order.
///
/// # Panics
///
/// Panics if `max_concurrent` is 0.
pub fn par_map_limited<T, R, F>(items: &[T], max_concurrent: usize, f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    assert!(max_concurrent > 0, "max_concurrent must be > 0");

    let mut results = Vec::with_capacity(items.len());
    for chunk in items.chunks(max_concurrent) {
        let chunk_results: Vec<R> = chunk.par_iter().map(&f).collect();
        results.extend(chunk_results);
    }
    results
}
