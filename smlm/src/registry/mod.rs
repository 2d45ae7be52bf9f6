//! Ordered, immutable collection of localizations produced by one processing stage.
//!
//! Corrections never mutate a registry; they build a sibling with
//! [`SpotRegistry::derive`] so the raw fit results stay available.


use std::collections::BTreeMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::localization::Localization;

/// Acquisition metadata shared by every localization in a registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryInfo {
    pub name: String,
    /// Image size in pixels.
    pub width: u32,
    pub height: u32,
    pub pixel_size_nm: f64,
    pub box_half_size: u32,
    pub n_channels: u32,
    pub n_slices: u32,
    pub n_frames: u32,
    pub n_positions: u32,
}

impl Default for RegistryInfo {
    fn default() -> Self {
        Self {
            name: String::new(),
            width: 0,
            height: 0,
            pixel_size_nm: 107.0,
            box_half_size: 4,
            n_channels: 1,
            n_slices: 1,
            n_frames: 1,
            n_positions: 1,
        }
    }
}

impl RegistryInfo {
    /// Image extent in nm.
    pub fn extent_nm(&self) -> (f64, f64) {
        (
            self.width as f64 * self.pixel_size_nm,
            self.height as f64 * self.pixel_size_nm,
        )
    }
}

#[derive(Debug, Clone)]
pub struct SpotRegistry {
    info: RegistryInfo,
    spots: Vec<Localization>,
    /// Frame number -> indices into `spots`, built on first use.
    frame_index: OnceLock<BTreeMap<u32, Vec<usize>>>,
}

impl SpotRegistry {
    pub fn new(info: RegistryInfo, spots: Vec<Localization>) -> Self {
        Self {
            info,
            spots,
            frame_index: OnceLock::new(),
        }
    }

    /// Builds a registry with spots in `(frame index, seed)` order.
    pub fn sorted(info: RegistryInfo, mut spots: Vec<Localization>) -> Self {
        spots.sort_by_key(|s| s.sort_key());
        Self::new(info, spots)
    }

    /// Sibling registry sharing this one's metadata.
    pub fn derive(&self, name: impl Into<String>, spots: Vec<Localization>) -> SpotRegistry {
        let info = RegistryInfo {
            name: name.into(),
            ..self.info.clone()
        };
        SpotRegistry::new(info, spots)
    }

    #[inline]
    pub fn info(&self) -> &RegistryInfo {
        &self.info
    }

    #[inline]
    pub fn spots(&self) -> &[Localization] {
        &self.spots
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.spots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.spots.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Localization> {
        self.spots.iter()
    }

    pub fn into_spots(self) -> Vec<Localization> {
        self.spots
    }

    /// Frame number -> spot indices, in registry order within each frame.
    pub fn frame_index(&self) -> &BTreeMap<u32, Vec<usize>> {
        self.frame_index.get_or_init(|| {
            let mut index: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
            for (i, spot) in self.spots.iter().enumerate() {
                index.entry(spot.index.frame).or_default().push(i);
            }
            index
        })
    }

    /// Spots of one frame.
    pub fn frame(&self, frame: u32) -> impl Iterator<Item = &Localization> {
        self.frame_index()
            .get(&frame)
            .into_iter()
            .flat_map(|indices| indices.iter().map(|&i| &self.spots[i]))
    }

    /// Spots of one channel, in registry order.
    pub fn channel(&self, channel: u32) -> impl Iterator<Item = &Localization> {
        self.spots.iter().filter(move |s| s.index.channel == channel)
    }

    /// Spots of one channel within one frame.
    pub fn channel_frame(&self, channel: u32, frame: u32) -> impl Iterator<Item = &Localization> {
        self.frame(frame).filter(move |s| s.index.channel == channel)
    }

    /// Highest frame number present, 0 when empty.
    pub fn last_frame(&self) -> u32 {
        self.frame_index().keys().next_back().copied().unwrap_or(0)
    }
}

impl<'a> IntoIterator for &'a SpotRegistry {
    type Item = &'a Localization;
    type IntoIter = std::slice::Iter<'a, Localization>;

    fn into_iter(self) -> Self::IntoIter {
        self.spots.iter()
    }
}
