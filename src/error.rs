use std::collections::TryReserveError;

use thiserror::Error;

/// Errors returned while building images or comparing them.
#[derive(Error, Debug)]
pub enum DssimError {
    #[error("Invalid gamma {0}: expected a value in (0, 1) or SRGB_GAMMA")]
    InvalidGamma(f64),

    #[error("Unsupported number of channels: {0} (only 1 or 3 are supported)")]
    UnsupportedChannelCount(usize),

    #[error("Invalid image size {width}x{height}")]
    InvalidImageSize { width: usize, height: usize },

    #[error("Pixel buffer too small: expected {expected} bytes, got {actual}")]
    InvalidBufferSize { expected: usize, actual: usize },

    #[error("Weights must be finite and non-negative, and the scale weights in use must not all be zero")]
    InvalidWeights,

    #[error(
        "Original image is {}x{} but modified image is {}x{}",
        original.0,
        original.1,
        modified.0,
        modified.1
    )]
    NonMatchingImageDimensions {
        original: (usize, usize),
        modified: (usize, usize),
    },

    #[error("Failed to allocate image buffer")]
    AllocationFailure(#[from] TryReserveError),
}
