//! Error types for the `steadify` crate.
//!
//! This module defines [`StabilizeError`], the unified error type returned by
//! all fallible operations in the crate. Variants carry enough context to
//! diagnose the problem without additional logging at the call site.
//!
//! Transient estimator failures (a flat frame, a fully ignored frame) are
//! deliberately *not* errors: they degrade to an identity motion with zero
//! confidence, which downstream components treat as a scene cut.

use std::{io::Error as IoError, path::PathBuf};

use ffmpeg_next::Error as FfmpegError;
use image::ImageError;
use thiserror::Error;

/// The unified error type for all `steadify` operations.
///
/// Every public method that can fail returns `Result<T, StabilizeError>`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StabilizeError {
    /// The input media file could not be opened.
    #[error("Failed to open media file at {path}: {reason}")]
    FileOpen {
        /// Path that was passed to the opener.
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// The output container could not be created.
    #[error("Failed to create output file at {path}: {reason}")]
    OutputCreate {
        /// Requested output path.
        path: PathBuf,
        /// Underlying reason the create failed.
        reason: String,
    },

    /// The input does not contain a video stream.
    #[error("No video stream found in input")]
    NoVideoStream,

    /// A configuration value was rejected before processing started.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The requested encoder does not exist in this FFmpeg build.
    #[error("Encoder not available: {0}")]
    EncoderNotFound(String),

    /// The input pixel format cannot be stabilized (no 8-16 bit planar
    /// luminance plane, or a packed layout).
    #[error("Unsupported pixel format: {0}")]
    UnsupportedPixelFormat(String),

    /// The input stream produced a frame the pipeline cannot work with
    /// (zero-sized, or a mid-stream format change).
    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    /// A video frame could not be decoded.
    #[error("Failed to decode video frame: {0}")]
    DecodeError(String),

    /// Video encoding or muxing failed. Partial output may exist.
    #[error("Failed to encode video: {0}")]
    EncodeError(String),

    /// The pipeline components disagreed about stream position. This
    /// indicates a bug, not a property of the input.
    #[error("Pipeline state error: {0}")]
    Pipeline(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Writing a diagnostic image failed.
    #[error("Diagnostic image error: {0}")]
    Image(#[from] ImageError),

    /// An error originating from the FFmpeg libraries.
    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),
}

impl From<FfmpegError> for StabilizeError {
    fn from(error: FfmpegError) -> Self {
        StabilizeError::Ffmpeg(error.to_string())
    }
}
