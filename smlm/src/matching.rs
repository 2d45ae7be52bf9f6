//! Nearest-neighbor pairing of localizations across channels.

use std::collections::HashMap;

use glam::DVec2;

use crate::config::RegistrationConfig;
use crate::error::RegistrationError;
use crate::registry::SpotRegistry;
use crate::spatial::KdTree;

/// Point correspondences keyed by source point.
///
/// Inserting a source that is already present replaces its target.
#[derive(Debug, Clone, Default)]
pub struct PointMap {
    pairs: Vec<(DVec2, DVec2)>,
    by_source: HashMap<[u64; 2], usize>,
}

#[inline]
fn key(p: DVec2) -> [u64; 2] {
    [p.x.to_bits(), p.y.to_bits()]
}

impl PointMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: DVec2, target: DVec2) {
        match self.by_source.get(&key(source)) {
            Some(&i) => self.pairs[i].1 = target,
            None => {
                self.by_source.insert(key(source), self.pairs.len());
                self.pairs.push((source, target));
            }
        }
    }

    pub fn get(&self, source: DVec2) -> Option<DVec2> {
        self.by_source.get(&key(source)).map(|&i| self.pairs[i].1)
    }

    /// Pairs in insertion order.
    pub fn pairs(&self) -> &[(DVec2, DVec2)] {
        &self.pairs
    }

    pub fn sources(&self) -> impl Iterator<Item = DVec2> + '_ {
        self.pairs.iter().map(|p| p.0)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn extend(&mut self, other: &PointMap) {
        for &(s, t) in other.pairs() {
            self.insert(s, t);
        }
    }
}

impl FromIterator<(DVec2, DVec2)> for PointMap {
    fn from_iter<I: IntoIterator<Item = (DVec2, DVec2)>>(iter: I) -> Self {
        let mut map = PointMap::new();
        for (s, t) in iter {
            map.insert(s, t);
        }
        map
    }
}

/// Finds, for each source point, its nearest target within a distance limit.
#[derive(Debug, Clone)]
pub struct NearestNeighborMatcher {
    tree: KdTree,
    max_distance: f64,
}

impl NearestNeighborMatcher {
    /// `None` when there are no targets.
    pub fn new(targets: &[DVec2], max_distance: f64) -> Option<Self> {
        KdTree::build(targets).map(|tree| Self { tree, max_distance })
    }

    /// Index of the matching target and the distance to it.
    pub fn find(&self, source: DVec2) -> Option<(usize, f64)> {
        self.tree
            .nearest_within(source, self.max_distance)
            .map(|(i, d2)| (i, d2.sqrt()))
    }

    pub fn match_points(&self, sources: &[DVec2]) -> PointMap {
        sources
            .iter()
            .filter_map(|&s| self.find(s).map(|(i, _)| (s, self.tree.point(i))))
            .collect()
    }
}

/// Pairs every source with its nearest target within `max_distance`.
pub fn pair_points(sources: &[DVec2], targets: &[DVec2], max_distance: f64) -> PointMap {
    NearestNeighborMatcher::new(targets, max_distance)
        .map(|matcher| matcher.match_points(sources))
        .unwrap_or_default()
}

/// A cross-channel pair within one frame, as indices into a registry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpotPair {
    pub frame: u32,
    pub first: usize,
    pub second: usize,
    pub distance: f64,
}

/// Pairs channel-1 spots to channel-2 spots frame by frame.
pub fn pair_per_frame(registry: &SpotRegistry, max_distance: f64) -> Vec<SpotPair> {
    let spots = registry.spots();
    let mut result = Vec::new();

    for (&frame, indices) in registry.frame_index() {
        let (first, second): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .copied()
            .filter(|&i| spots[i].index.channel <= 2)
            .partition(|&i| spots[i].index.channel == 1);
        let targets: Vec<DVec2> = second.iter().map(|&i| spots[i].position()).collect();
        let Some(matcher) = NearestNeighborMatcher::new(&targets, max_distance) else {
            continue;
        };
        for &i in &first {
            if let Some((t, distance)) = matcher.find(spots[i].position()) {
                result.push(SpotPair {
                    frame,
                    first: i,
                    second: second[t],
                    distance,
                });
            }
        }
    }
    tracing::debug!(pairs = result.len(), "Paired spots per frame");
    result
}

/// Collects channel-1 -> channel-2 calibration pairs from frame 1 of each registry.
pub fn collect_calibration_pairs(
    registries: &[&SpotRegistry],
    config: &RegistrationConfig,
) -> Result<PointMap, RegistrationError> {
    let mut pairs = PointMap::new();

    for registry in registries {
        let first: Vec<DVec2> = registry.channel_frame(1, 1).map(|s| s.position()).collect();
        let second: Vec<DVec2> = registry.channel_frame(2, 1).map(|s| s.position()).collect();
        if first.is_empty() {
            return Err(RegistrationError::MissingChannel { channel: 1 });
        }
        if second.is_empty() {
            return Err(RegistrationError::MissingChannel { channel: 2 });
        }
        pairs.extend(&pair_points(&first, &second, config.pair_max_distance_nm));
    }

    if pairs.len() < config.min_pairs {
        return Err(RegistrationError::InsufficientPairs {
            found: pairs.len(),
            required: config.min_pairs,
        });
    }
    tracing::info!(pairs = pairs.len(), "Collected calibration pairs");
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::localization::{FrameIndex, Localization, PsfWidth};
    use crate::registry::RegistryInfo;

    fn spot(channel: u32, frame: u32, x: f64, y: f64) -> Localization {
        Localization {
            index: FrameIndex::new(channel, 1, frame, 1),
            seed_x: 0,
            seed_y: 0,
            x_center: x,
            y_center: y,
            z_center: None,
            intensity: 1000.0,
            background: 1.0,
            psf: PsfWidth::Symmetric { sigma: 150.0 },
            precision: 5.0,
        }
    }

    #[test]
    fn point_map_replaces_existing_source() {
        let mut map = PointMap::new();
        map.insert(DVec2::new(1.0, 2.0), DVec2::new(3.0, 4.0));
        map.insert(DVec2::new(1.0, 2.0), DVec2::new(5.0, 6.0));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(DVec2::new(1.0, 2.0)), Some(DVec2::new(5.0, 6.0)));
    }

    #[test]
    fn pair_points_honors_max_distance() {
        let sources = [DVec2::new(0.0, 0.0), DVec2::new(1000.0, 0.0), DVec2::new(5000.0, 0.0)];
        let targets = [DVec2::new(10.0, 5.0), DVec2::new(1040.0, 0.0)];
        let map = pair_points(&sources, &targets, 50.0);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(DVec2::new(1000.0, 0.0)), Some(DVec2::new(1040.0, 0.0)));
        assert!(map.get(DVec2::new(5000.0, 0.0)).is_none());
    }

    #[test]
    fn pair_points_without_targets_is_empty() {
        assert!(pair_points(&[DVec2::ZERO], &[], 10.0).is_empty());
    }

    #[test]
    fn calibration_requires_enough_pairs() {
        let spots = vec![
            spot(1, 1, 0.0, 0.0),
            spot(2, 1, 10.0, 0.0),
            spot(1, 1, 1000.0, 0.0),
            spot(2, 1, 1010.0, 0.0),
        ];
        let reg = SpotRegistry::new(RegistryInfo::default(), spots);
        let err = collect_calibration_pairs(&[&reg], &RegistrationConfig::default()).unwrap_err();
        assert_eq!(
            err,
            RegistrationError::InsufficientPairs {
                found: 2,
                required: 4
            }
        );
    }

    #[test]
    fn calibration_uses_frame_one_only() {
        let mut spots = Vec::new();
        for i in 0..5 {
            let x = i as f64 * 1000.0;
            spots.push(spot(1, 1, x, 0.0));
            spots.push(spot(2, 1, x + 20.0, 0.0));
            spots.push(spot(1, 2, x, 500.0));
            spots.push(spot(2, 2, x + 20.0, 500.0));
        }
        let reg = SpotRegistry::new(RegistryInfo::default(), spots);
        let pairs = collect_calibration_pairs(&[&reg], &RegistrationConfig::default()).unwrap();
        assert_eq!(pairs.len(), 5);
        assert!(pairs.pairs().iter().all(|(s, t)| s.y == 0.0 && (t.x - s.x - 20.0).abs() < 1e-12));
    }

    #[test]
    fn calibration_reports_missing_channel() {
        let reg = SpotRegistry::new(RegistryInfo::default(), vec![spot(1, 1, 0.0, 0.0)]);
        let err = collect_calibration_pairs(&[&reg], &RegistrationConfig::default()).unwrap_err();
        assert_eq!(err, RegistrationError::MissingChannel { channel: 2 });
    }

    #[test]
    fn pair_per_frame_lists_every_frame() {
        let spots = vec![
            spot(1, 1, 0.0, 0.0),
            spot(2, 1, 30.0, 0.0),
            spot(1, 2, 0.0, 0.0),
            spot(2, 2, 40.0, 0.0),
            spot(1, 3, 0.0, 0.0),
            spot(2, 3, 400.0, 0.0),
        ];
        let reg = SpotRegistry::new(RegistryInfo::default(), spots);
        let pairs = pair_per_frame(&reg, 100.0);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].frame, 1);
        assert_eq!((pairs[1].first, pairs[1].second), (2, 3));
        assert!((pairs[1].distance - 40.0).abs() < 1e-12);
    }
}
