//! Stage-drift estimation and correction.
//!
//! Localizations are grouped into time blocks and rendered as scattergrams.
//! Each block is phase-correlated against the first one; the resulting track
//! is optionally smoothed and every localization is shifted back by the
//! offset of the block nearest in time.

mod detector;
mod scattergram;

pub use detector::{DriftDetector, estimate_drift};
pub use scattergram::{ScatterGeometry, magnification};

use std::collections::BTreeMap;

use common::Buffer2;
use glam::DVec2;

use crate::config::DriftConfig;
use crate::error::DriftError;
use crate::localization::Localization;
use crate::progress::{ProgressCallback, Stage};
use crate::registry::SpotRegistry;

/// Estimated drift of one time block relative to the first block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftSample {
    /// Block center on the time axis (frame, or slice for single-frame stacks).
    pub time: f64,
    /// Offset in nm.
    pub offset: DVec2,
}

/// Corrected registry together with the drift track it was corrected with.
#[derive(Debug)]
pub struct DriftCorrection {
    pub registry: SpotRegistry,
    pub track: Vec<DriftSample>,
}

/// Time axis used to group localizations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeAxis {
    Frame,
    /// Used when the stack has a single frame.
    Slice,
}

impl TimeAxis {
    fn of(self, spot: &Localization) -> u32 {
        match self {
            TimeAxis::Frame => spot.index.frame,
            TimeAxis::Slice => spot.index.slice,
        }
    }
}

#[derive(Debug, Clone)]
struct Block {
    spots: Vec<usize>,
    first: u32,
    last: u32,
}

impl Block {
    fn center(&self) -> f64 {
        (self.first as f64 + self.last as f64) / 2.0
    }
}

#[derive(Debug, Clone)]
pub struct DriftCorrector {
    config: DriftConfig,
    progress: ProgressCallback,
    workers: usize,
}

impl DriftCorrector {
    pub fn new(config: DriftConfig) -> Self {
        config.validate();
        Self {
            config,
            progress: ProgressCallback::none(),
            workers: common::parallel::worker_count(0),
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    /// Caps the number of blocks correlated at once.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = common::parallel::worker_count(workers);
        self
    }

    /// Estimates the drift track of `registry` and returns a corrected sibling registry.
    pub fn correct(&self, registry: &SpotRegistry) -> Result<DriftCorrection, DriftError> {
        if registry.is_empty() {
            return Err(DriftError::InsufficientData);
        }

        let axis = time_axis(registry);
        let blocks = self.blocks(registry, axis);
        let info = registry.info();
        let geometry = ScatterGeometry::new(
            info.width,
            info.height,
            info.pixel_size_nm,
            self.config.nm_per_scatter_pixel,
            registry.iter(),
        );
        tracing::info!(
            blocks = blocks.len(),
            ?axis,
            size = geometry.size,
            nm_per_pixel = geometry.nm_per_pixel,
            "Estimating drift"
        );

        let render = |block: &Block| geometry.render(block.spots.iter().map(|&i| &registry.spots()[i]));
        let reference = render(&blocks[0])?;
        let detector = DriftDetector::new(&reference, &self.config)?;
        let self_peak = detector.estimate(&reference)?;

        let offsets = if self.config.force_streaming {
            self.estimate_streaming(&detector, &blocks, &render)
        } else {
            match self.render_all(&blocks, &render, geometry) {
                Ok(images) => self.estimate_in_memory(&detector, &images),
                Err(err) => {
                    tracing::warn!(%err, "Falling back to streaming drift estimation");
                    self.estimate_streaming(&detector, &blocks, &render)
                }
            }
        }?;

        let mut track: Vec<DriftSample> = blocks
            .iter()
            .zip(offsets)
            .filter_map(|(block, offset)| match offset {
                Ok(offset) => Some(DriftSample {
                    time: block.center(),
                    offset: (offset - self_peak) * geometry.nm_per_pixel,
                }),
                Err(err) => {
                    tracing::warn!(%err, first = block.first, last = block.last, "Skipping drift block");
                    None
                }
            })
            .collect();
        if track.is_empty() {
            return Err(DriftError::InsufficientData);
        }
        smooth(&mut track, self.config.smoothing_window);

        let spots = apply(registry, &track, axis);
        let corrected = registry.derive(format!("{} (drift corrected)", info.name), spots);
        tracing::info!(samples = track.len(), "Drift correction finished");

        Ok(DriftCorrection {
            registry: corrected,
            track,
        })
    }

    /// Consecutive time points, closed at `frames_to_combine` time points or
    /// `max_spots_per_block` localizations, whichever comes first.
    fn blocks(&self, registry: &SpotRegistry, axis: TimeAxis) -> Vec<Block> {
        let slice_index;
        let by_time: &BTreeMap<u32, Vec<usize>> = match axis {
            TimeAxis::Frame => registry.frame_index(),
            TimeAxis::Slice => {
                let mut index: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
                for (i, spot) in registry.iter().enumerate() {
                    index.entry(axis.of(spot)).or_default().push(i);
                }
                slice_index = index;
                &slice_index
            }
        };

        let max_spots = self.config.max_spots_per_block.unwrap_or(usize::MAX);
        let mut blocks = Vec::new();
        let mut current: Option<(Block, usize)> = None;

        for (&time, indices) in by_time {
            let (block, times) = current.get_or_insert_with(|| {
                (
                    Block {
                        spots: Vec::new(),
                        first: time,
                        last: time,
                    },
                    0,
                )
            });
            block.spots.extend_from_slice(indices);
            block.last = time;
            *times += 1;

            if (*times >= self.config.frames_to_combine || block.spots.len() >= max_spots)
                && let Some((block, _)) = current.take()
            {
                blocks.push(block);
            }
        }
        if let Some((block, _)) = current {
            blocks.push(block);
        }
        blocks
    }

    fn render_all<F>(
        &self,
        blocks: &[Block],
        render: &F,
        geometry: ScatterGeometry,
    ) -> Result<Vec<Buffer2<f64>>, DriftError>
    where
        F: Fn(&Block) -> Result<Buffer2<f64>, DriftError>,
    {
        let mut images = Vec::new();
        images
            .try_reserve_exact(blocks.len())
            .map_err(|_| DriftError::AllocationFailed {
                bytes: blocks.len() * geometry.bytes(),
            })?;
        for block in blocks {
            images.push(render(block)?);
        }
        Ok(images)
    }

    fn estimate_in_memory(
        &self,
        detector: &DriftDetector,
        images: &[Buffer2<f64>],
    ) -> Result<Vec<Result<DVec2, DriftError>>, DriftError> {
        let done = std::sync::atomic::AtomicUsize::new(0);
        let offsets = common::parallel::par_map_limited(images, self.workers, |image| {
            let offset = detector.estimate(image);
            let current = done.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
            self.progress.report(Stage::Drift, current, images.len());
            offset
        });
        Ok(offsets)
    }

    /// One block at a time; only a single extra scattergram is alive.
    fn estimate_streaming<F>(
        &self,
        detector: &DriftDetector,
        blocks: &[Block],
        render: &F,
    ) -> Result<Vec<Result<DVec2, DriftError>>, DriftError>
    where
        F: Fn(&Block) -> Result<Buffer2<f64>, DriftError>,
    {
        let mut offsets = Vec::with_capacity(blocks.len());
        for (i, block) in blocks.iter().enumerate() {
            let image = render(block)?;
            offsets.push(detector.estimate(&image));
            self.progress.report(Stage::Drift, i + 1, blocks.len());
        }
        Ok(offsets)
    }
}

fn time_axis(registry: &SpotRegistry) -> TimeAxis {
    let frames = registry.info().n_frames.max(registry.last_frame());
    if frames <= 1 {
        TimeAxis::Slice
    } else {
        TimeAxis::Frame
    }
}

/// Centered moving average over `window` samples, truncated at both ends.
fn smooth(track: &mut [DriftSample], window: usize) {
    if window <= 1 || track.len() < 2 {
        return;
    }
    let before = (window - 1) / 2;
    let after = window - 1 - before;
    let raw: Vec<DVec2> = track.iter().map(|s| s.offset).collect();
    for (i, sample) in track.iter_mut().enumerate() {
        let lo = i.saturating_sub(before);
        let hi = (i + after).min(raw.len() - 1);
        let sum: DVec2 = raw[lo..=hi].iter().copied().sum();
        sample.offset = sum / (hi - lo + 1) as f64;
    }
}

/// Shifts every localization back by the drift of the nearest sample in time.
fn apply(registry: &SpotRegistry, track: &[DriftSample], axis: TimeAxis) -> Vec<Localization> {
    registry
        .iter()
        .map(|spot| {
            let offset = nearest_sample(track, axis.of(spot) as f64).offset;
            spot.with_position(spot.position() - offset)
        })
        .collect()
}

fn nearest_sample(track: &[DriftSample], time: f64) -> &DriftSample {
    let idx = track.partition_point(|s| s.time < time);
    if idx == 0 {
        return &track[0];
    }
    if idx == track.len() {
        return &track[track.len() - 1];
    }
    if time - track[idx - 1].time <= track[idx].time - time {
        &track[idx - 1]
    } else {
        &track[idx]
    }
}

/// Estimates and removes drift from `registry` with `config`.
pub fn correct_drift(registry: &SpotRegistry, config: &DriftConfig) -> Result<DriftCorrection, DriftError> {
    DriftCorrector::new(config.clone()).correct(registry)
}
