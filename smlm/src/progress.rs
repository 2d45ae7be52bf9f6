//! Best-effort progress reporting for long-running stages.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Progress information passed to a [`ProgressCallback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub stage: Stage,
    pub current: usize,
    /// Total steps, 0 when unknown.
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Candidates fitted.
    Fitting,
    /// Control points built.
    Registration,
    /// Time blocks correlated.
    Drift,
}

/// Optional progress sink. Cheap to clone; calls are fire-and-forget.
#[derive(Clone, Default)]
pub struct ProgressCallback(Option<Arc<dyn Fn(Progress) + Send + Sync>>);

impl ProgressCallback {
    pub fn new(f: impl Fn(Progress) + Send + Sync + 'static) -> Self {
        Self(Some(Arc::new(f)))
    }

    pub fn none() -> Self {
        Self(None)
    }

    pub fn is_some(&self) -> bool {
        self.0.is_some()
    }

    #[inline]
    pub fn report(&self, stage: Stage, current: usize, total: usize) {
        if let Some(f) = self.0.as_ref() {
            f(Progress {
                stage,
                current,
                total,
            });
        }
    }
}

impl fmt::Debug for ProgressCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ProgressCallback")
            .field(&self.0.as_ref().map(|_| "Fn"))
            .finish()
    }
}

/// Cooperative cancellation flag shared between a caller and running workers.
///
/// Workers check it between candidates; a fit already in progress runs to completion.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
