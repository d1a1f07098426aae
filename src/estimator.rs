//! Block-matching motion estimation.
//!
//! [`MotionEstimator`] computes a 2-D similarity transform between the
//! current work frame and the previous one. The previous frame is tiled
//! into non-overlapping blocks; each block is matched against the current
//! frame by exhaustive SAD search within `max_shift`, refined to sub-pixel
//! accuracy by a parabolic fit, and weighted by the steepness of its SAD
//! minimum. A weighted least-squares similarity fit with iterative outlier
//! rejection turns the block displacements into a single motion.
//!
//! Failures are soft: a flat frame, a fully ignored frame, or a fit whose
//! inlier fraction falls below the scene-cut threshold all produce an
//! identity motion with zero confidence, which the smoother treats as a
//! scene cut.

use log::debug;

use crate::config::{IgnoreRect, StabilizationOptions};
use crate::gray::WorkFrame;
use crate::motion::Motion;

/// One matched block: centre position, measured displacement and weight.
#[derive(Debug, Clone, Copy)]
struct BlockMatch {
    x: f64,
    y: f64,
    dx: f64,
    dy: f64,
    weight: f64,
}

/// Similarity fit parameters: `u' = [a -b; b a] u + (tx, ty)` in
/// centre-relative coordinates.
#[derive(Debug, Clone, Copy)]
struct Fit {
    a: f64,
    b: f64,
    tx: f64,
    ty: f64,
}

impl Fit {
    fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }
}

/// Block-matching estimator for inter-frame camera motion.
pub struct MotionEstimator {
    block_size: usize,
    max_shift: usize,
    max_alpha: f64,
    max_scale: f64,
    scene_cut_threshold: f64,
    ignore: Vec<IgnoreRect>,
    width: usize,
    height: usize,
    prev: Option<WorkFrame>,
    matches: Vec<BlockMatch>,
    sad: Vec<u32>,
}

impl MotionEstimator {
    /// Create an estimator for work frames of the given size.
    ///
    /// Ignore rectangles from `options` are downscaled to work-frame
    /// coordinates here.
    pub fn new(
        options: &StabilizationOptions,
        work_width: usize,
        work_height: usize,
        downscale: usize,
    ) -> Self {
        let span = 2 * options.max_shift + 1;
        Self {
            block_size: options.block_size,
            max_shift: options.max_shift,
            max_alpha: options.max_alpha,
            max_scale: options.max_scale,
            scene_cut_threshold: options.scene_cut_threshold,
            ignore: options
                .ignore
                .iter()
                .map(|rect| rect.downscaled(downscale))
                .collect(),
            width: work_width,
            height: work_height,
            prev: None,
            matches: Vec::new(),
            sad: vec![0; span * span],
        }
    }

    /// Estimate the motion from the previous work frame to `curr`.
    ///
    /// The first call has no reference and returns the identity motion with
    /// zero confidence.
    pub fn estimate(&mut self, curr: &WorkFrame) -> Motion {
        if curr.width() != self.width || curr.height() != self.height {
            debug!(
                "work frame size changed ({}x{} -> {}x{}), resetting reference",
                self.width,
                self.height,
                curr.width(),
                curr.height()
            );
            self.width = curr.width();
            self.height = curr.height();
            self.prev = None;
        }

        let motion = match self.prev.take() {
            None => Motion {
                confidence: 0.0,
                ..Motion::identity()
            },
            Some(prev) => {
                let motion = if self.width < 3 * self.block_size
                    || self.height < 3 * self.block_size
                {
                    self.estimate_shift_only(&prev, curr)
                } else {
                    self.estimate_blocks(&prev, curr)
                };
                self.prev = Some(prev);
                motion
            }
        };

        match self.prev.as_mut() {
            Some(prev) => prev.copy_from(curr),
            None => self.prev = Some(curr.clone()),
        }
        motion
    }

    /// Fallback for frames too small to tile: one central block, shift only.
    fn estimate_shift_only(&mut self, prev: &WorkFrame, curr: &WorkFrame) -> Motion {
        let margin = self.max_shift;
        if self.width <= 2 * margin + 4 || self.height <= 2 * margin + 4 {
            debug!("frame too small for any motion search, emitting scene cut");
            return Motion {
                confidence: 0.0,
                ..Motion::identity()
            };
        }

        let bw = self.width - 2 * margin;
        let bh = self.height - 2 * margin;
        match self.match_block(prev, curr, margin, margin, bw, bh) {
            Some(block) => Motion {
                shift: (block.dx, block.dy),
                scale: 1.0,
                alpha: 0.0,
                confidence: 1.0,
            },
            None => {
                debug!("flat frame in shift-only fallback, emitting scene cut");
                Motion {
                    confidence: 0.0,
                    ..Motion::identity()
                }
            }
        }
    }

    fn estimate_blocks(&mut self, prev: &WorkFrame, curr: &WorkFrame) -> Motion {
        let block = self.block_size;
        let margin = self.max_shift;

        let mut matches = std::mem::take(&mut self.matches);
        matches.clear();

        let mut by = margin;
        while by + block + margin <= self.height {
            let mut bx = margin;
            while bx + block + margin <= self.width {
                let ignored = self
                    .ignore
                    .iter()
                    .any(|rect| rect.intersects(bx, by, bx + block, by + block));
                if !ignored {
                    if let Some(found) = self.match_block(prev, curr, bx, by, block, block) {
                        matches.push(found);
                    }
                }
                bx += block;
            }
            by += block;
        }

        let motion = if matches.is_empty() {
            debug!("no usable blocks (flat or fully ignored frame), emitting scene cut");
            Motion {
                confidence: 0.0,
                ..Motion::identity()
            }
        } else {
            self.fit_motion(&matches)
        };

        self.matches = matches;
        motion
    }

    /// Exhaustive SAD search for one block, with parabolic sub-pixel
    /// refinement. Returns `None` when the SAD surface is flat in both
    /// axes (no texture to match).
    fn match_block(
        &mut self,
        prev: &WorkFrame,
        curr: &WorkFrame,
        bx: usize,
        by: usize,
        bw: usize,
        bh: usize,
    ) -> Option<BlockMatch> {
        let m = self.max_shift as isize;
        let span = (2 * m + 1) as usize;

        let mut best = u32::MAX;
        let mut best_ix = 0usize;
        let mut best_iy = 0usize;
        for sy in -m..=m {
            for sx in -m..=m {
                let mut sum = 0u32;
                for row in 0..bh {
                    let p = prev.row(by + row);
                    let c = curr.row((by as isize + row as isize + sy) as usize);
                    let cx = (bx as isize + sx) as usize;
                    for (pv, cv) in p[bx..bx + bw].iter().zip(&c[cx..cx + bw]) {
                        sum += u32::from(pv.abs_diff(*cv));
                    }
                }
                let iy = (sy + m) as usize;
                let ix = (sx + m) as usize;
                self.sad[iy * span + ix] = sum;
                if sum < best {
                    best = sum;
                    best_ix = ix;
                    best_iy = iy;
                }
            }
        }

        let at = |ix: usize, iy: usize| self.sad[iy * span + ix];
        let refine = |lo: Option<u32>, centre: u32, hi: Option<u32>| -> (f64, f64) {
            match (lo, hi) {
                (Some(lo), Some(hi)) => {
                    let curvature = (lo + hi) as f64 - 2.0 * centre as f64;
                    if curvature > 0.0 {
                        let offset = 0.5 * (lo as f64 - hi as f64) / curvature;
                        (offset.clamp(-0.5, 0.5), curvature)
                    } else {
                        // Flat SAD valley: keep the integer minimum.
                        (0.0, 0.0)
                    }
                }
                _ => (0.0, 0.0),
            }
        };

        let (off_x, curv_x) = refine(
            (best_ix > 0).then(|| at(best_ix - 1, best_iy)),
            best,
            (best_ix + 1 < span).then(|| at(best_ix + 1, best_iy)),
        );
        let (off_y, curv_y) = refine(
            (best_iy > 0).then(|| at(best_ix, best_iy - 1)),
            best,
            (best_iy + 1 < span).then(|| at(best_ix, best_iy + 1)),
        );

        let weight = (curv_x + curv_y) / (bw * bh) as f64;
        if weight <= 0.0 {
            return None;
        }

        Some(BlockMatch {
            x: bx as f64 + bw as f64 / 2.0,
            y: by as f64 + bh as f64 / 2.0,
            dx: best_ix as f64 - m as f64 + off_x,
            dy: best_iy as f64 - m as f64 + off_y,
            weight,
        })
    }

    /// Weighted similarity fit with two outlier-rejection passes.
    fn fit_motion(&self, matches: &[BlockMatch]) -> Motion {
        let cx = (self.width as f64 - 1.0) / 2.0;
        let cy = (self.height as f64 - 1.0) / 2.0;
        let total_weight: f64 = matches.iter().map(|b| b.weight).sum();

        let mut inliers: Vec<usize> = (0..matches.len()).collect();
        let mut fit = fit_similarity(matches, &inliers, cx, cy);

        for _ in 0..2 {
            let drop = inliers.len() / 5;
            if drop == 0 || inliers.len() - drop < 4 {
                break;
            }
            inliers.sort_by(|&lhs, &rhs| {
                let rl = residual(&fit, &matches[lhs], cx, cy);
                let rr = residual(&fit, &matches[rhs], cx, cy);
                rl.total_cmp(&rr)
            });
            inliers.truncate(inliers.len() - drop);
            fit = fit_similarity(matches, &inliers, cx, cy);
        }

        let inlier_weight: f64 = inliers.iter().map(|&i| matches[i].weight).sum();
        let mut confidence = if total_weight > 0.0 {
            inlier_weight / total_weight
        } else {
            0.0
        };

        let scale = fit.a.hypot(fit.b);
        let alpha = fit.b.atan2(fit.a);
        let min_scale = 1.0 / self.max_scale;

        if alpha.abs() > self.max_alpha || scale < min_scale || scale > self.max_scale {
            debug!(
                "motion clamp engaged (scale {scale:.4}, alpha {alpha:.4}), emitting scene cut"
            );
            confidence = 0.0;
        }
        if confidence < self.scene_cut_threshold {
            confidence = 0.0;
        }

        Motion {
            shift: (fit.tx, fit.ty),
            scale: scale.clamp(min_scale, self.max_scale),
            alpha: alpha.clamp(-self.max_alpha, self.max_alpha),
            confidence,
        }
    }
}

fn residual(fit: &Fit, block: &BlockMatch, cx: f64, cy: f64) -> f64 {
    let (px, py) = fit.apply(block.x - cx, block.y - cy);
    let ex = px - (block.x - cx + block.dx);
    let ey = py - (block.y - cy + block.dy);
    ex.hypot(ey)
}

/// Weighted least squares for `u' = [a -b; b a] u + t` over the selected
/// blocks, in centre-relative coordinates. Degenerates to a pure shift when
/// the points carry no spatial spread.
fn fit_similarity(matches: &[BlockMatch], selected: &[usize], cx: f64, cy: f64) -> Fit {
    let mut weight_sum = 0.0;
    let mut mean = [0.0f64; 4]; // ux, uy, vx, vy
    for &i in selected {
        let b = &matches[i];
        let w = b.weight;
        weight_sum += w;
        mean[0] += w * (b.x - cx);
        mean[1] += w * (b.y - cy);
        mean[2] += w * (b.x - cx + b.dx);
        mean[3] += w * (b.y - cy + b.dy);
    }
    if weight_sum <= 0.0 {
        return Fit {
            a: 1.0,
            b: 0.0,
            tx: 0.0,
            ty: 0.0,
        };
    }
    for value in &mut mean {
        *value /= weight_sum;
    }

    let mut spread = 0.0;
    let mut dot = 0.0;
    let mut cross = 0.0;
    for &i in selected {
        let b = &matches[i];
        let w = b.weight;
        let ux = b.x - cx - mean[0];
        let uy = b.y - cy - mean[1];
        let vx = b.x - cx + b.dx - mean[2];
        let vy = b.y - cy + b.dy - mean[3];
        spread += w * (ux * ux + uy * uy);
        dot += w * (ux * vx + uy * vy);
        cross += w * (ux * vy - uy * vx);
    }

    let (a, b) = if spread > f64::EPSILON {
        (dot / spread, cross / spread)
    } else {
        (1.0, 0.0)
    };

    Fit {
        a,
        b,
        tx: mean[2] - (a * mean[0] - b * mean[1]),
        ty: mean[3] - (b * mean[0] + a * mean[1]),
    }
}
