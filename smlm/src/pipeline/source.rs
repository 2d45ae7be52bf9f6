//! Image stacks the pipeline producer reads from.

use common::{Buffer2, Roi};

use crate::localization::FrameIndex;
use crate::registry::RegistryInfo;

/// Host-supplied access to the pixels of an image stack.
///
/// Reading may move the host's current plane, hence `&mut self`; the pipeline
/// serializes reads behind a mutex.
pub trait FrameSource {
    fn info(&self) -> RegistryInfo;

    /// Every plane to scan, in acquisition order.
    fn frames(&self) -> Vec<FrameIndex>;

    /// Pixels of one plane in raw camera counts. `None` when the plane is unavailable.
    fn read(&mut self, index: FrameIndex) -> Option<Buffer2<f64>>;

    /// Region to search for maxima. The whole plane when `None`.
    fn roi(&self) -> Option<Roi> {
        None
    }
}

/// In-memory stack of planes.
#[derive(Debug, Clone, Default)]
pub struct ImageStack {
    info: RegistryInfo,
    planes: Vec<(FrameIndex, Buffer2<f64>)>,
    roi: Option<Roi>,
}

impl ImageStack {
    pub fn new(info: RegistryInfo) -> Self {
        Self {
            info,
            planes: Vec::new(),
            roi: None,
        }
    }

    pub fn with_roi(mut self, roi: Roi) -> Self {
        self.roi = Some(roi);
        self
    }

    pub fn push(&mut self, index: FrameIndex, plane: Buffer2<f64>) {
        self.planes.push((index, plane));
    }

    pub fn len(&self) -> usize {
        self.planes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.planes.is_empty()
    }
}

impl FrameSource for ImageStack {
    fn info(&self) -> RegistryInfo {
        self.info.clone()
    }

    fn frames(&self) -> Vec<FrameIndex> {
        self.planes.iter().map(|(index, _)| *index).collect()
    }

    fn read(&mut self, index: FrameIndex) -> Option<Buffer2<f64>> {
        self.planes
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, plane)| plane.clone())
    }

    fn roi(&self) -> Option<Roi> {
        self.roi
    }
}
