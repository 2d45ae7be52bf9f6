//! 2-D k-d tree over localization coordinates.
//!
//! The tree is implicit: entries are permuted so that the median of every
//! range `lo..hi` sits at `(lo + hi) / 2` with the lower half before it.
//! Read-only once built, so one tree can serve many threads.

#[cfg(test)]
mod tests;

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use glam::DVec2;

#[derive(Debug, Clone)]
pub struct KdTree {
    /// `(position, input index)` in tree order.
    entries: Vec<(DVec2, usize)>,
    points: Vec<DVec2>,
}

/// Splitting coordinate at `depth`: x on even levels, y on odd ones.
#[inline]
fn axis(p: DVec2, depth: usize) -> f64 {
    if depth % 2 == 0 { p.x } else { p.y }
}

fn partition(entries: &mut [(DVec2, usize)], depth: usize) {
    if entries.len() <= 1 {
        return;
    }
    let mid = entries.len() / 2;
    entries.select_nth_unstable_by(mid, |a, b| axis(a.0, depth).total_cmp(&axis(b.0, depth)));
    let (below, rest) = entries.split_at_mut(mid);
    partition(below, depth + 1);
    partition(&mut rest[1..], depth + 1);
}

/// Candidate neighbor; the heap keeps the farthest on top.
#[derive(Debug, Clone, Copy)]
struct Neighbor {
    dist_sq: f64,
    index: usize,
}

impl PartialEq for Neighbor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist_sq.total_cmp(&other.dist_sq)
    }
}

impl KdTree {
    /// `None` for an empty point set.
    pub fn build(points: &[DVec2]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut entries: Vec<(DVec2, usize)> = points.iter().copied().zip(0..).collect();
        partition(&mut entries, 0);
        Some(Self {
            entries,
            points: points.to_vec(),
        })
    }

    /// The `k` nearest points as `(index, distance²)`, closest first.
    pub fn k_nearest(&self, query: DVec2, k: usize) -> Vec<(usize, f64)> {
        if k == 0 {
            return Vec::new();
        }
        let mut heap = BinaryHeap::with_capacity(k + 1);
        self.collect_nearest(0, self.entries.len(), 0, query, k, &mut heap);
        heap.into_sorted_vec()
            .into_iter()
            .map(|n| (n.index, n.dist_sq))
            .collect()
    }

    fn collect_nearest(
        &self,
        lo: usize,
        hi: usize,
        depth: usize,
        query: DVec2,
        k: usize,
        heap: &mut BinaryHeap<Neighbor>,
    ) {
        if lo >= hi {
            return;
        }
        let mid = (lo + hi) / 2;
        let (point, index) = self.entries[mid];
        let dist_sq = query.distance_squared(point);
        if heap.len() < k {
            heap.push(Neighbor { dist_sq, index });
        } else if heap.peek().is_some_and(|worst| dist_sq < worst.dist_sq) {
            heap.pop();
            heap.push(Neighbor { dist_sq, index });
        }

        let diff = axis(query, depth) - axis(point, depth);
        let ((near_lo, near_hi), (far_lo, far_hi)) = if diff < 0.0 {
            ((lo, mid), (mid + 1, hi))
        } else {
            ((mid + 1, hi), (lo, mid))
        };
        self.collect_nearest(near_lo, near_hi, depth + 1, query, k, heap);

        let reach = heap.peek().map_or(f64::INFINITY, |worst| worst.dist_sq);
        if heap.len() < k || diff * diff < reach {
            self.collect_nearest(far_lo, far_hi, depth + 1, query, k, heap);
        }
    }

    /// Closest point no farther than `max_distance`, as `(index, distance²)`.
    pub fn nearest_within(&self, query: DVec2, max_distance: f64) -> Option<(usize, f64)> {
        self.k_nearest(query, 1)
            .into_iter()
            .next()
            .filter(|&(_, d2)| d2 <= max_distance * max_distance)
    }

    /// All points within `radius` as `(index, distance²)`, closest first.
    pub fn radius_search(&self, query: DVec2, radius: f64) -> Vec<(usize, f64)> {
        let mut found = Vec::new();
        self.collect_within(0, self.entries.len(), 0, query, radius * radius, &mut found);
        found.sort_by(|a, b| a.1.total_cmp(&b.1));
        found
    }

    fn collect_within(
        &self,
        lo: usize,
        hi: usize,
        depth: usize,
        query: DVec2,
        radius_sq: f64,
        found: &mut Vec<(usize, f64)>,
    ) {
        if lo >= hi {
            return;
        }
        let mid = (lo + hi) / 2;
        let (point, index) = self.entries[mid];
        let dist_sq = query.distance_squared(point);
        if dist_sq <= radius_sq {
            found.push((index, dist_sq));
        }

        let diff = axis(query, depth) - axis(point, depth);
        let crosses = diff * diff <= radius_sq;
        if diff <= 0.0 || crosses {
            self.collect_within(lo, mid, depth + 1, query, radius_sq, found);
        }
        if diff >= 0.0 || crosses {
            self.collect_within(mid + 1, hi, depth + 1, query, radius_sq, found);
        }
    }

    /// Input point `idx`.
    #[inline]
    pub fn point(&self, idx: usize) -> DVec2 {
        self.points[idx]
    }
}
