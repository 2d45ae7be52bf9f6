//! Tests for the k-d tree.

use super::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn random_points(n: usize, seed: u64) -> Vec<DVec2> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|_| DVec2::new(rng.random_range(0.0..10_000.0), rng.random_range(0.0..10_000.0)))
        .collect()
}

fn brute_k_nearest(points: &[DVec2], query: DVec2, k: usize) -> Vec<(usize, f64)> {
    let mut all: Vec<(usize, f64)> = points
        .iter()
        .enumerate()
        .map(|(i, p)| (i, p.distance_squared(query)))
        .collect();
    all.sort_by(|a, b| a.1.total_cmp(&b.1));
    all.truncate(k);
    all
}

#[test]
fn build_empty_is_none() {
    assert!(KdTree::build(&[]).is_none());
}

#[test]
fn k_nearest_orders_by_distance() {
    let points = vec![
        DVec2::new(0.0, 0.0),
        DVec2::new(1.0, 0.0),
        DVec2::new(2.0, 0.0),
        DVec2::new(3.0, 0.0),
        DVec2::new(10.0, 0.0),
    ];
    let tree = KdTree::build(&points).unwrap();
    let neighbors = tree.k_nearest(DVec2::new(0.0, 0.0), 3);
    let indices: Vec<usize> = neighbors.iter().map(|n| n.0).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert_eq!(neighbors[2].1, 4.0);
}

#[test]
fn k_larger_than_tree_returns_all() {
    let points = random_points(7, 1);
    let tree = KdTree::build(&points).unwrap();
    assert_eq!(tree.k_nearest(DVec2::new(5.0, 5.0), 20).len(), 7);
}

#[test]
fn k_nearest_matches_brute_force() {
    let points = random_points(500, 2);
    let tree = KdTree::build(&points).unwrap();
    for query in random_points(50, 3) {
        let expected = brute_k_nearest(&points, query, 20);
        let found = tree.k_nearest(query, 20);
        assert_eq!(found.len(), expected.len());
        for (f, e) in found.iter().zip(&expected) {
            assert!((f.1 - e.1).abs() < 1e-9);
        }
    }
}

#[test]
fn nearest_within_respects_distance() {
    let points = vec![DVec2::new(100.0, 100.0), DVec2::new(300.0, 100.0)];
    let tree = KdTree::build(&points).unwrap();
    assert_eq!(tree.nearest_within(DVec2::new(150.0, 100.0), 60.0).map(|n| n.0), Some(0));
    assert!(tree.nearest_within(DVec2::new(200.0, 100.0), 60.0).is_none());
}

#[test]
fn radius_search_matches_brute_force() {
    let points = random_points(400, 4);
    let tree = KdTree::build(&points).unwrap();
    let query = DVec2::new(5000.0, 5000.0);
    let radius = 1500.0;

    let mut found: Vec<usize> = tree.radius_search(query, radius).into_iter().map(|n| n.0).collect();
    found.sort_unstable();
    let expected: Vec<usize> = points
        .iter()
        .enumerate()
        .filter(|(_, p)| p.distance(query) <= radius)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(found, expected);
}

#[test]
fn duplicate_points_are_all_kept() {
    let points = vec![DVec2::new(1.0, 1.0); 5];
    let tree = KdTree::build(&points).unwrap();
    assert_eq!(tree.radius_search(DVec2::new(1.0, 1.0), 0.0).len(), 5);
    assert_eq!(tree.k_nearest(DVec2::new(0.0, 0.0), 3).len(), 3);
}
