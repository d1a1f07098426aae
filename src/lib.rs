//! # steadify
//!
//! Video stabilization on top of FFmpeg, via the
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next) crate.
//!
//! `steadify` decodes a video, estimates inter-frame camera motion by block
//! matching on a downscaled luminance work frame, smooths the cumulative
//! trajectory with per-component moving averages, optionally plans a
//! per-frame autozoom that hides the stabilization borders, warps every
//! plane of every frame with sub-pixel accuracy, and re-encodes the result.
//! Audio and subtitle streams are copied through untouched.
//!
//! ## Quick start
//!
//! ```no_run
//! use steadify::{media, OutputOptions, StabilizationOptions, Stabilizer};
//! use std::path::Path;
//!
//! let input = Path::new("shaky.mp4");
//! let info = media::probe(input)?;
//! let mut stabilizer =
//!     Stabilizer::new(StabilizationOptions::default(), info.width, info.height)?;
//!
//! media::Transcoder::open(input, Path::new("steady.mp4"), &OutputOptions::default())?
//!     .run(&mut stabilizer)?;
//! # Ok::<(), steadify::StabilizeError>(())
//! ```
//!
//! ## Two-pass autozoom
//!
//! ```no_run
//! use steadify::{
//!     media, FrameStage, OutputOptions, StabilizationOptions, Stabilizer, ZoomMode,
//! };
//! use std::path::Path;
//!
//! let input = Path::new("shaky.mp4");
//! let info = media::probe(input)?;
//! let options = StabilizationOptions::default().with_zoom_mode(ZoomMode::TwoPass);
//! let mut stabilizer = Stabilizer::new(options, info.width, info.height)?;
//!
//! // Pass 1: collect the smoothed trajectory.
//! media::analyze(input, |frame| stabilizer.preprocess(frame))?;
//! stabilizer.plan_autozoom()?;
//!
//! // Pass 2: warp and encode against the plan.
//! media::Transcoder::open(input, Path::new("steady.mp4"), &OutputOptions::default())?
//!     .run(&mut stabilizer)?;
//! # Ok::<(), steadify::StabilizeError>(())
//! ```
//!
//! ## Requirements
//!
//! FFmpeg development libraries must be installed on the system; see the
//! `ffmpeg-next` documentation for platform specifics.

pub mod config;
pub mod error;
pub mod estimator;
pub mod gray;
pub mod imprint;
pub mod media;
pub mod motion;
pub mod pipeline;
mod planes;
pub mod smoother;
pub mod warp;
pub mod zoom;

pub use config::{parse_bitrate, IgnoreRect, OutputOptions, StabilizationOptions, ZoomMode};
pub use error::StabilizeError;
pub use estimator::MotionEstimator;
pub use gray::{WorkFrame, WorkFrameProvider};
pub use media::{Transcoder, VideoInfo};
pub use motion::Motion;
pub use pipeline::{FrameStage, Stabilizer};
pub use smoother::{Correction, TrajectorySmoother};
pub use warp::FrameWarper;
pub use zoom::{fill_scale, plan_two_pass, DynamicZoomPlanner, PlannedFrame};
