//! The stabilization pipeline.
//!
//! [`Stabilizer`] wires the work-frame provider, the motion estimator, the
//! trajectory smoother, the zoom planners and the warper into a single
//! frame-at-a-time stage. The media layer drives it through the
//! [`FrameStage`] capability:
//!
//! - Single-pass (static or dynamic zoom): every decoded frame goes through
//!   [`FrameStage::process`]. Because the smoother reads ahead by its
//!   largest window, frames queue inside the stabilizer and come back
//!   warped once their correction is known.
//! - Two-pass (autozoom): pass 1 feeds every frame to
//!   [`FrameStage::preprocess`], which only collects smoothed corrections;
//!   [`Stabilizer::plan_autozoom`] then turns the whole trajectory into
//!   per-frame zooms, and pass 2 replays the input through `process`, which
//!   warps against the plan with no queueing.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Instant;

use ffmpeg_next::frame;
use log::{debug, info, warn};

use crate::config::{StabilizationOptions, ZoomMode};
use crate::error::StabilizeError;
use crate::estimator::MotionEstimator;
use crate::gray::{WorkFrame, WorkFrameProvider};
use crate::imprint;
use crate::media;
use crate::motion::Motion;
use crate::smoother::{Correction, TrajectorySmoother};
use crate::warp::FrameWarper;
use crate::zoom::{self, DynamicZoomPlanner, PlannedFrame};

/// The capability the media layer drives a frame stage through.
///
/// `preprocess` observes decoded frames without producing output (analysis
/// pass); `process` consumes a frame and returns whichever frames became
/// ready for encoding, preserving stream order; `finish` drains anything
/// still buffered at end of stream.
pub trait FrameStage {
    /// Analyse one decoded frame (two-pass mode, pass 1).
    fn preprocess(&mut self, frame: &frame::Video) -> Result<(), StabilizeError>;

    /// Consume one decoded frame, returning frames ready for encoding.
    fn process(&mut self, frame: frame::Video) -> Result<Vec<frame::Video>, StabilizeError>;

    /// Drain buffered frames at end of stream.
    fn finish(&mut self) -> Result<Vec<frame::Video>, StabilizeError>;
}

/// The complete stabilization pipeline for one video stream.
pub struct Stabilizer {
    options: StabilizationOptions,
    provider: WorkFrameProvider,
    work: WorkFrame,
    work_width: usize,
    work_height: usize,
    estimator: MotionEstimator,
    smoother: TrajectorySmoother,
    warper: FrameWarper,
    /// Frames waiting for their delayed correction (single-pass only).
    pending: VecDeque<frame::Video>,
    dynamic: Option<DynamicZoomPlanner>,
    /// Corrections collected during pass 1.
    collected: Vec<Correction>,
    /// Planned (motion, zoom) pairs consumed during pass 2.
    plan: VecDeque<PlannedFrame>,
    planned: bool,
    frame_index: u64,
    dump_dir: Option<PathBuf>,
    imprint: bool,
}

impl Stabilizer {
    /// Build a pipeline for frames of the given source dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`StabilizeError::InvalidConfig`] for inconsistent options
    /// and [`StabilizeError::UnsupportedInput`] when the source is too
    /// small to produce a work frame.
    pub fn new(
        options: StabilizationOptions,
        frame_width: u32,
        frame_height: u32,
    ) -> Result<Self, StabilizeError> {
        options.validate()?;
        if frame_width == 0 || frame_height == 0 {
            return Err(StabilizeError::UnsupportedInput(
                "zero-sized video stream".to_string(),
            ));
        }

        let downscale = options
            .downscale
            .unwrap_or_else(|| WorkFrameProvider::auto_downscale(frame_width, frame_height));
        let provider = WorkFrameProvider::new(downscale);
        let (work_width, work_height) =
            provider.work_size(frame_width as usize, frame_height as usize);
        if work_width == 0 || work_height == 0 {
            return Err(StabilizeError::UnsupportedInput(format!(
                "{frame_width}x{frame_height} source is empty after downscale by {downscale}"
            )));
        }
        info!(
            "stabilizing at {work_width}x{work_height} (downscale {downscale}), zoom mode {:?}",
            options.zoom_mode
        );

        let estimator = MotionEstimator::new(&options, work_width, work_height, downscale);
        let smoother = TrajectorySmoother::new(&options);
        let dynamic = (options.zoom_mode == ZoomMode::Dynamic)
            .then(|| DynamicZoomPlanner::new(options.prezoom, options.zoom_speed));

        Ok(Self {
            warper: FrameWarper::new(work_width, work_height),
            provider,
            work: WorkFrame::new(),
            work_width,
            work_height,
            estimator,
            smoother,
            pending: VecDeque::new(),
            dynamic,
            collected: Vec::new(),
            plan: VecDeque::new(),
            planned: false,
            frame_index: 0,
            dump_dir: None,
            imprint: false,
            options,
        })
    }

    /// Enable diagnostic output: work-frame dumps into `dump_dir` and/or
    /// the motion overlay drawn into output frames.
    #[must_use]
    pub fn with_diagnostics(mut self, dump_dir: Option<PathBuf>, imprint: bool) -> Self {
        self.dump_dir = dump_dir;
        self.imprint = imprint;
        self
    }

    /// The number of frames `process` can lag behind the input in
    /// single-pass operation.
    pub fn lookahead(&self) -> usize {
        if self.options.zoom_mode == ZoomMode::TwoPass {
            0
        } else {
            self.smoother.lookahead()
        }
    }

    /// Turn the corrections collected by pass 1 into a per-frame zoom plan.
    ///
    /// Call once between the analysis pass and the encode pass in two-pass
    /// mode.
    pub fn plan_autozoom(&mut self) -> Result<(), StabilizeError> {
        if self.options.zoom_mode != ZoomMode::TwoPass {
            return Err(StabilizeError::Pipeline(
                "plan_autozoom requires two-pass zoom mode".to_string(),
            ));
        }
        let tail = self.smoother.finish();
        self.collected.extend(tail);

        let planned = zoom::plan_two_pass(
            &self.collected,
            self.work_width,
            self.work_height,
            self.options.prezoom,
            self.options.zoom_speed,
        );
        let (min_zoom, max_zoom) = planned.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY),
            |(lo, hi), frame| (lo.min(frame.zoom), hi.max(frame.zoom)),
        );
        info!(
            "planned zoom for {} frames (range {:.4}..{:.4})",
            planned.len(),
            min_zoom,
            max_zoom,
        );

        self.plan = planned.into();
        self.collected = Vec::new();
        self.frame_index = 0;
        self.planned = true;
        Ok(())
    }

    /// Run the analysis half of the pipeline on one frame and return the
    /// corrections that became ready.
    fn analyze_frame(&mut self, frame: &frame::Video) -> Result<Vec<Correction>, StabilizeError> {
        let started = Instant::now();
        self.provider.extract(frame, &mut self.work)?;
        if let Some(dir) = &self.dump_dir {
            imprint::dump_work_frame(&self.work, self.frame_index, dir)?;
        }

        let raw = self.estimator.estimate(&self.work);
        debug!(
            "frame {}: motion dx {:+.2} dy {:+.2} scale {:.4} alpha {:+.4} confidence {:.2} ({:?})",
            self.frame_index,
            raw.shift.0,
            raw.shift.1,
            raw.scale,
            raw.alpha,
            raw.confidence,
            started.elapsed(),
        );
        self.frame_index += 1;
        Ok(self.smoother.push(raw))
    }

    /// Warp one queued frame with its correction.
    fn emit_frame(
        &mut self,
        mut frame: frame::Video,
        motion: &Motion,
        zoom: f64,
    ) -> Result<frame::Video, StabilizeError> {
        media::make_frame_writable(&mut frame)?;
        self.warper.apply(&mut frame, motion, zoom)?;
        if self.imprint {
            imprint::imprint_motion(&mut frame, motion, zoom);
        }
        Ok(frame)
    }
}

impl FrameStage for Stabilizer {
    fn preprocess(&mut self, frame: &frame::Video) -> Result<(), StabilizeError> {
        let ready = self.analyze_frame(frame)?;
        self.collected.extend(ready);
        Ok(())
    }

    fn process(&mut self, frame: frame::Video) -> Result<Vec<frame::Video>, StabilizeError> {
        if self.options.zoom_mode == ZoomMode::TwoPass {
            if !self.planned {
                return Err(StabilizeError::Pipeline(
                    "two-pass mode needs preprocess and plan_autozoom before process".to_string(),
                ));
            }
            let planned = self.plan.pop_front().ok_or_else(|| {
                StabilizeError::Pipeline(
                    "pass 2 produced more frames than pass 1 planned".to_string(),
                )
            })?;
            let warped = self.emit_frame(frame, &planned.motion, planned.zoom)?;
            return Ok(vec![warped]);
        }

        let ready = self.analyze_frame(&frame)?;
        self.pending.push_back(frame);

        let mut out = Vec::with_capacity(ready.len());
        for correction in ready {
            let queued = self.pending.pop_front().ok_or_else(|| {
                StabilizeError::Pipeline(
                    "smoother emitted more corrections than frames queued".to_string(),
                )
            })?;
            let zoom = match self.dynamic.as_mut() {
                Some(planner) => {
                    planner.next_zoom(&correction, self.work_width, self.work_height)
                }
                None => self.options.prezoom,
            };
            out.push(self.emit_frame(queued, &correction.motion, zoom)?);
        }
        Ok(out)
    }

    fn finish(&mut self) -> Result<Vec<frame::Video>, StabilizeError> {
        if self.options.zoom_mode == ZoomMode::TwoPass {
            if !self.plan.is_empty() {
                warn!(
                    "pass 1 planned {} more frames than pass 2 delivered",
                    self.plan.len()
                );
                self.plan.clear();
            }
            return Ok(Vec::new());
        }

        let tail = self.smoother.finish();
        let mut out = Vec::with_capacity(tail.len());
        for correction in tail {
            let queued = self.pending.pop_front().ok_or_else(|| {
                StabilizeError::Pipeline(
                    "smoother flushed more corrections than frames queued".to_string(),
                )
            })?;
            let zoom = match self.dynamic.as_mut() {
                Some(planner) => {
                    planner.next_zoom(&correction, self.work_width, self.work_height)
                }
                None => self.options.prezoom,
            };
            out.push(self.emit_frame(queued, &correction.motion, zoom)?);
        }
        if !self.pending.is_empty() {
            return Err(StabilizeError::Pipeline(format!(
                "{} frames left unwarped at end of stream",
                self.pending.len()
            )));
        }
        Ok(out)
    }
}
