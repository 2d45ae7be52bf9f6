//! Error types for localization, registration, drift correction and record I/O.

use std::io;

use thiserror::Error;

/// Why a single fit window produced no localization.
///
/// Always recoverable: the candidate is discarded and processing continues.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("Fit window {width}x{height} is too small for {params} parameters")]
    WindowTooSmall {
        width: usize,
        height: usize,
        params: usize,
    },

    #[error("Normal equations are singular")]
    SingularSystem,

    #[error("Fit did not converge within {iterations} iterations")]
    NotConverged { iterations: usize },

    #[error("Fitted {parameter} out of range: {value}")]
    OutOfRange { parameter: &'static str, value: f64 },

    #[error("Fit produced non-finite parameters")]
    NonFinite,
}

/// Failure to build a coordinate mapping from point pairs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistrationError {
    #[error("Need at least {required} point pairs, found {found}")]
    InsufficientPairs { found: usize, required: usize },

    #[error("Point configuration is degenerate (collinear or duplicate points)")]
    Degenerate,

    #[error("Registry has no spots in channel {channel}")]
    MissingChannel { channel: u32 },
}

/// Failure of drift estimation or correction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DriftError {
    #[error("Correlation images must be non-empty power-of-two squares, got {width}x{height}")]
    InvalidImageSize { width: usize, height: usize },

    #[error("Test image dimensions do not match the reference")]
    DimensionMismatch,

    #[error("Not enough localizations to estimate drift")]
    InsufficientData,

    #[error("Failed to allocate {bytes} bytes for block images")]
    AllocationFailed { bytes: usize },
}

/// Failure reading or writing the length-delimited record stream.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Record stream I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid record payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record stream has no header")]
    MissingHeader,

    #[error("Record frame truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Record frame of {0} bytes exceeds the u32 length prefix")]
    FrameTooLarge(usize),
}

/// Failure of the fitting pipeline as a whole. Individual fit failures never surface here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("A fitting worker panicked")]
    WorkerPanicked,

    #[error("The candidate producer panicked")]
    ProducerPanicked,
}
