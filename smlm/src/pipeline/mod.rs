//! Concurrent fitting of candidate windows.
//!
//! One producer thread feeds candidates into a bounded queue; a fixed pool of
//! workers fits them, each with its own [`Fitter`]. The producer dropping its
//! sender closes the queue, and workers exit once it is drained. Accepted
//! localizations land in a shared collection that is sorted into a
//! [`SpotRegistry`] at the end, so the output never depends on scheduling.

mod source;

pub use source::{FrameSource, ImageStack};

use std::sync::atomic::{AtomicUsize, Ordering};

use common::Roi;
use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;

use crate::config::FitConfig;
use crate::error::PipelineError;
use crate::fit::Fitter;
use crate::localization::{Candidate, Localization};
use crate::maxima::MaximaDetector;
use crate::progress::{ProgressCallback, Stage, StopHandle};
use crate::registry::{RegistryInfo, SpotRegistry};

/// Queue handle given to candidate producers. Counts candidates as they are
/// queued so progress reports carry a running total.
struct Feed<'a> {
    sender: Sender<Candidate>,
    produced: &'a AtomicUsize,
}

impl Feed<'_> {
    /// Queues `candidate`; `false` once no worker is left to receive it.
    fn send(&self, candidate: Candidate) -> bool {
        self.produced.fetch_add(1, Ordering::Relaxed);
        if self.sender.send(candidate).is_ok() {
            return true;
        }
        self.produced.fetch_sub(1, Ordering::Relaxed);
        false
    }
}

/// Outcome counts of one pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FitStats {
    /// Candidates handed to the queue.
    pub produced: usize,
    /// Fits that passed every filter.
    pub accepted: usize,
    /// Fits dropped by the width or photon filter.
    pub rejected: usize,
    /// Fits that did not converge or were invalid.
    pub failed: usize,
}

impl FitStats {
    fn merge(&mut self, other: FitStats) {
        self.accepted += other.accepted;
        self.rejected += other.rejected;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone)]
pub struct FitPipeline {
    config: FitConfig,
    stop: StopHandle,
    progress: ProgressCallback,
}

impl FitPipeline {
    pub fn new(config: FitConfig) -> Self {
        config.validate();
        Self {
            config,
            stop: StopHandle::new(),
            progress: ProgressCallback::none(),
        }
    }

    /// Shares `stop` with the caller; setting it ends the run after in-flight fits.
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    pub fn stop_handle(&self) -> &StopHandle {
        &self.stop
    }

    pub fn worker_count(&self) -> usize {
        common::parallel::worker_count(self.config.worker_count.unwrap_or(0))
    }

    /// Fits every candidate and collects the accepted localizations.
    pub fn run<I>(&self, info: RegistryInfo, candidates: I) -> Result<SpotRegistry, PipelineError>
    where
        I: IntoIterator<Item = Candidate>,
        I::IntoIter: Send,
    {
        self.run_with_stats(info, candidates).map(|(registry, _)| registry)
    }

    pub fn run_with_stats<I>(
        &self,
        info: RegistryInfo,
        candidates: I,
    ) -> Result<(SpotRegistry, FitStats), PipelineError>
    where
        I: IntoIterator<Item = Candidate>,
        I::IntoIter: Send,
    {
        let candidates = candidates.into_iter();
        self.execute(info, move |feed, stop| {
            for candidate in candidates {
                if stop.is_stopped() || !feed.send(candidate) {
                    break;
                }
            }
        })
    }

    /// Detects maxima in every plane of `source` and fits them.
    ///
    /// Planes of channels listed in `skip_channels` are not read. The source
    /// is locked only while a plane is copied out.
    pub fn run_stack<S>(&self, source: &Mutex<S>) -> Result<(SpotRegistry, FitStats), PipelineError>
    where
        S: FrameSource + Send,
    {
        let (info, frames, roi) = {
            let source = source.lock();
            (source.info(), source.frames(), source.roi())
        };
        let detector = MaximaDetector::from_config(&self.config);
        let half = self.config.box_half_size;
        let skip = self.config.skip_channels.clone();

        self.execute(info, move |feed, stop| {
            for index in frames {
                if stop.is_stopped() {
                    break;
                }
                if skip.contains(&index.channel) {
                    continue;
                }

                let Some(plane) = source.lock().read(index) else {
                    tracing::warn!(?index, "Frame unavailable, skipping");
                    continue;
                };

                let maxima = detector.detect(&plane, roi);
                tracing::debug!(?index, maxima = maxima.len(), "Detected maxima");
                for max in maxima {
                    let window_roi = Roi::new(max.x - half, max.y - half, 2 * half, 2 * half);
                    let Some(window) = plane.crop(window_roi) else {
                        continue;
                    };
                    let candidate =
                        Candidate::new(index, max.x as u32, max.y as u32, half as u32, window);
                    if !feed.send(candidate) {
                        return;
                    }
                }
            }
        })
    }

    fn execute<P>(
        &self,
        info: RegistryInfo,
        produce: P,
    ) -> Result<(SpotRegistry, FitStats), PipelineError>
    where
        P: FnOnce(&Feed<'_>, &StopHandle) + Send,
    {
        let workers = self.worker_count();
        let (sender, receiver) = bounded::<Candidate>(self.config.queue_capacity);
        let results = Mutex::new(Vec::new());
        let produced = AtomicUsize::new(0);
        let done = AtomicUsize::new(0);

        tracing::info!(workers, queue = self.config.queue_capacity, "Starting fit pipeline");

        let outcome = std::thread::scope(|scope| {
            let stop = &self.stop;
            let produced = &produced;
            let producer = scope.spawn(move || produce(&Feed { sender, produced }, stop));

            let handles: Vec<_> = (0..workers)
                .map(|worker_id| {
                    let receiver = receiver.clone();
                    let results = &results;
                    let done = &done;
                    scope.spawn(move || self.work(worker_id, receiver, results, done, produced))
                })
                .collect();
            drop(receiver);

            let mut stats = FitStats::default();
            let mut outcome = Ok(());
            for handle in handles {
                match handle.join() {
                    Ok(worker_stats) => stats.merge(worker_stats),
                    Err(_) => outcome = Err(PipelineError::WorkerPanicked),
                }
            }
            if producer.join().is_err() {
                outcome = outcome.and(Err(PipelineError::ProducerPanicked));
            }
            stats.produced = produced.load(Ordering::Relaxed);
            outcome.map(|_| stats)
        });

        let stats = outcome?;
        if self.stop.is_stopped() {
            tracing::warn!(fitted = done.load(Ordering::Relaxed), "Fit pipeline stopped early");
        }
        tracing::info!(
            produced = stats.produced,
            accepted = stats.accepted,
            rejected = stats.rejected,
            failed = stats.failed,
            "Fit pipeline finished"
        );

        Ok((SpotRegistry::sorted(info, results.into_inner()), stats))
    }

    fn work(
        &self,
        worker_id: usize,
        receiver: Receiver<Candidate>,
        results: &Mutex<Vec<Localization>>,
        done: &AtomicUsize,
        produced: &AtomicUsize,
    ) -> FitStats {
        let fitter = Fitter::from_config(&self.config);
        let mut stats = FitStats::default();

        // Keep draining after a stop so a blocked producer can finish.
        for candidate in receiver.iter() {
            if self.stop.is_stopped() {
                continue;
            }

            match fitter.fit(&candidate.window) {
                Ok(fit) => {
                    let localization = fit.localize(&candidate, &self.config);
                    if self.accepts(&localization) {
                        results.lock().push(localization);
                        stats.accepted += 1;
                    } else {
                        stats.rejected += 1;
                    }
                }
                Err(err) => {
                    tracing::debug!(worker_id, index = ?candidate.index, %err, "Fit failed");
                    stats.failed += 1;
                }
            }

            let current = done.fetch_add(1, Ordering::Relaxed) + 1;
            self.progress
                .report(Stage::Fitting, current, produced.load(Ordering::Relaxed));
        }
        stats
    }

    fn accepts(&self, localization: &Localization) -> bool {
        let width_ok = self
            .config
            .width_filter
            .is_none_or(|range| range.contains(localization.width()));
        let photons_ok = self
            .config
            .photon_filter
            .is_none_or(|range| range.contains(localization.intensity));
        width_ok && photons_ok
    }
}

/// Fits `candidates` with `worker_count` workers (0 = automatic).
pub fn run_pipeline<I>(
    candidates: I,
    worker_count: usize,
    config: &FitConfig,
) -> Result<SpotRegistry, PipelineError>
where
    I: IntoIterator<Item = Candidate>,
    I::IntoIter: Send,
{
    let config = FitConfig {
        worker_count: (worker_count > 0).then_some(worker_count),
        ..config.clone()
    };
    let info = RegistryInfo {
        pixel_size_nm: config.pixel_size_nm,
        box_half_size: config.box_half_size as u32,
        ..Default::default()
    };
    FitPipeline::new(config).run(info, candidates)
}
