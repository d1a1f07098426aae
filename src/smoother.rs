//! Trajectory smoothing.
//!
//! [`TrajectorySmoother`] maintains the cumulative camera path and returns,
//! for each frame, the correction the warper must apply so the path matches
//! a low-pass-filtered version of itself. Each component of the cumulative
//! motion (`dx`, `dy`, `scale`, `alpha`) is smoothed independently by a
//! centred moving average with a component-specific half-width.
//!
//! Future frames are not available in single-pass operation, so the
//! smoother runs on a delay line: pushing frame `t` emits the correction
//! for frame `t - W`, where `W` is the largest half-width. Startup and
//! shutdown pad with edge-clamp (the first and last samples repeated).
//!
//! A motion with zero confidence is a scene cut: pending corrections are
//! flushed with their partial windows and the cumulative path resets to
//! identity, so smoothing never bridges a cut.

use std::collections::VecDeque;

use log::debug;

use crate::config::StabilizationOptions;
use crate::motion::Motion;

/// A correction ready for warping, tagged with segment bookkeeping for the
/// autozoom planner.
#[derive(Debug, Clone, Copy)]
pub struct Correction {
    /// The sampling transform that cancels the jitter of this frame.
    pub motion: Motion,
    /// True for the first frame after a scene cut (and for frame 0).
    pub segment_start: bool,
}

/// Streaming smoother over the cumulative camera path.
pub struct TrajectorySmoother {
    /// Half-widths for `dx`, `dy`, `scale`, `alpha`.
    windows: [usize; 4],
    /// Largest half-width; the read-ahead of the delay line.
    lookahead: usize,
    /// Cumulative component samples of the current segment, a sliding
    /// window over `[base, base + history.len())`.
    history: VecDeque<[f64; 4]>,
    /// Segment index of `history[0]`.
    base: usize,
    /// Segment index of the next correction to emit.
    next_emit: usize,
    /// Number of samples pushed in the current segment.
    len: usize,
    cumulative: Motion,
}

impl TrajectorySmoother {
    pub fn new(options: &StabilizationOptions) -> Self {
        Self {
            windows: [
                options.x_smooth,
                options.y_smooth,
                options.scale_smooth,
                options.alpha_smooth,
            ],
            lookahead: options.max_window(),
            history: VecDeque::new(),
            base: 0,
            next_emit: 0,
            len: 0,
            cumulative: Motion::identity(),
        }
    }

    /// The number of frames the output lags behind the input.
    pub fn lookahead(&self) -> usize {
        self.lookahead
    }

    /// Feed the next per-frame motion; returns the corrections that became
    /// ready. Normally zero or one, but a scene cut flushes every pending
    /// frame of the finished segment.
    pub fn push(&mut self, motion: Motion) -> Vec<Correction> {
        let mut ready = Vec::new();

        if motion.is_scene_cut() {
            if self.len > 0 {
                debug!("scene cut after {} frames, flushing segment", self.len);
            }
            self.drain_pending(&mut ready);
            self.reset_segment();
        } else {
            self.cumulative = self.cumulative.then(&motion);
        }

        let components = [
            self.cumulative.shift.0,
            self.cumulative.shift.1,
            self.cumulative.scale,
            self.cumulative.alpha,
        ];
        self.history.push_back(components);
        self.len += 1;

        while self.next_emit + self.lookahead < self.len {
            ready.push(self.emit(self.next_emit));
            self.next_emit += 1;
            self.evict();
        }

        ready
    }

    /// Flush every pending correction at end of stream and reset.
    pub fn finish(&mut self) -> Vec<Correction> {
        let mut ready = Vec::new();
        self.drain_pending(&mut ready);
        self.reset_segment();
        ready
    }

    fn drain_pending(&mut self, out: &mut Vec<Correction>) {
        while self.next_emit < self.len {
            out.push(self.emit(self.next_emit));
            self.next_emit += 1;
        }
    }

    fn reset_segment(&mut self) {
        self.history.clear();
        self.base = 0;
        self.next_emit = 0;
        self.len = 0;
        self.cumulative = Motion::identity();
    }

    /// Drop history entries no smoothing window can reach any more.
    fn evict(&mut self) {
        while self.base + self.lookahead < self.next_emit {
            self.history.pop_front();
            self.base += 1;
        }
    }

    /// Correction for segment index `t`: the smoothed path composed against
    /// the inverse cumulative path, so that warping with it lands the frame
    /// on the smoothed trajectory.
    fn emit(&self, t: usize) -> Correction {
        let last = self.len - 1;
        let sample = |index: isize| -> [f64; 4] {
            let clamped = index.clamp(0, last as isize) as usize;
            self.history[clamped - self.base]
        };

        let mut smoothed = [0.0f64; 4];
        for (component, value) in smoothed.iter_mut().enumerate() {
            let w = self.windows[component] as isize;
            let mut sum = 0.0;
            for offset in -w..=w {
                sum += sample(t as isize + offset)[component];
            }
            *value = sum / (2 * w + 1) as f64;
        }

        let raw = sample(t as isize);
        let cumulative = Motion {
            shift: (raw[0], raw[1]),
            scale: raw[2],
            alpha: raw[3],
            confidence: 1.0,
        };
        let target = Motion {
            shift: (smoothed[0], smoothed[1]),
            scale: smoothed[2],
            alpha: smoothed[3],
            confidence: 1.0,
        };

        Correction {
            motion: target.inverse().then(&cumulative),
            segment_start: t == 0,
        }
    }
}
