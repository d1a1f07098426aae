//! Autozoom planning.
//!
//! A correction moves the sampling window around the source frame; without
//! compensation the warped frame exposes its border. [`fill_scale`] computes
//! the smallest uniform zoom that keeps every output pixel covered for a
//! given correction, and the planners choose per-frame zooms on top of it:
//!
//! - [`plan_two_pass`] sees the whole trajectory. It splits the stream at
//!   scene cuts, re-centres rotation and translation per segment to minimise
//!   the zoom each segment needs, and bounds the frame-to-frame zoom ratio
//!   with a forward and a reverse sweep. With `zoom_speed == 1` the zoom is
//!   constant per segment.
//! - [`DynamicZoomPlanner`] is the incremental single-pass variant. The
//!   `zoom_speed` bound is interpreted as a per-frame *ratio* here as well.

use log::debug;

use crate::motion::Motion;
use crate::smoother::Correction;

/// Upper bound on any planned zoom. Corrections large enough to hit this
/// cannot be covered by zooming at all (the sampling window left the
/// source); the warper's edge clamp handles what remains.
const ZOOM_LIMIT: f64 = 16.0;

/// A correction paired with the zoom to apply while warping it.
#[derive(Debug, Clone, Copy)]
pub struct PlannedFrame {
    pub motion: Motion,
    pub zoom: f64,
}

/// The smallest zoom `z >= 1` such that warping with `motion` at zoom `z`
/// samples only inside the source rectangle.
///
/// Each output corner maps to `scale/z * R(alpha) * (corner - centre) +
/// centre + shift`; solving the four boundary constraints per corner for
/// `z` and taking the maximum gives the exact coverage requirement.
pub fn fill_scale(motion: &Motion, width: usize, height: usize) -> f64 {
    let cx = (width as f64 - 1.0) / 2.0;
    let cy = (height as f64 - 1.0) / 2.0;
    let (sin, cos) = motion.alpha.sin_cos();
    let (dx, dy) = motion.shift;

    let room_left = cx + dx;
    let room_right = (width as f64 - 1.0) - cx - dx;
    let room_top = cy + dy;
    let room_bottom = (height as f64 - 1.0) - cy - dy;

    let mut zoom = 1.0f64;
    for (ux, uy) in [(-cx, -cy), (cx, -cy), (-cx, cy), (cx, cy)] {
        let rx = motion.scale * (cos * ux - sin * uy);
        let ry = motion.scale * (sin * ux + cos * uy);
        zoom = zoom.max(axis_requirement(rx, room_left, room_right));
        zoom = zoom.max(axis_requirement(ry, room_top, room_bottom));
    }
    zoom
}

/// Zoom needed so `r / z` stays within `[-negative_room, positive_room]`.
fn axis_requirement(r: f64, negative_room: f64, positive_room: f64) -> f64 {
    if r > 0.0 {
        if positive_room > f64::EPSILON {
            r / positive_room
        } else {
            ZOOM_LIMIT
        }
    } else if r < 0.0 {
        if negative_room > f64::EPSILON {
            -r / negative_room
        } else {
            ZOOM_LIMIT
        }
    } else {
        1.0
    }
}

/// Plan per-frame zooms over a complete smoothed trajectory.
///
/// Returns one [`PlannedFrame`] per correction, in order. The re-centred
/// motions in the result replace the input motions for pass 2.
pub fn plan_two_pass(
    corrections: &[Correction],
    work_width: usize,
    work_height: usize,
    prezoom: f64,
    zoom_speed: f64,
) -> Vec<PlannedFrame> {
    let mut planned = Vec::with_capacity(corrections.len());

    let mut start = 0;
    while start < corrections.len() {
        let mut end = start + 1;
        while end < corrections.len() && !corrections[end].segment_start {
            end += 1;
        }
        plan_segment(
            &corrections[start..end],
            work_width,
            work_height,
            prezoom,
            zoom_speed,
            &mut planned,
        );
        start = end;
    }

    planned
}

fn plan_segment(
    segment: &[Correction],
    work_width: usize,
    work_height: usize,
    prezoom: f64,
    zoom_speed: f64,
    out: &mut Vec<PlannedFrame>,
) {
    // Rotation re-centring: a rigid pre-rotation of the output canvas by the
    // mid-range angle halves the rotation the zoom has to absorb.
    let (alpha_min, alpha_max) = segment.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY),
        |(lo, hi), c| (lo.min(c.motion.alpha), hi.max(c.motion.alpha)),
    );
    let alpha_mid = (alpha_min + alpha_max) / 2.0;

    // Translation re-centring: subtract the mid-range shift per axis.
    let fold_range = |pick: fn(&Motion) -> f64| {
        let (lo, hi) = segment.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY),
            |(lo, hi), c| (lo.min(pick(&c.motion)), hi.max(pick(&c.motion))),
        );
        (lo + hi) / 2.0
    };
    let shift_mid_x = fold_range(|m| m.shift.0);
    let shift_mid_y = fold_range(|m| m.shift.1);

    let base = out.len();
    for correction in segment {
        let motion = Motion {
            shift: (
                correction.motion.shift.0 - shift_mid_x,
                correction.motion.shift.1 - shift_mid_y,
            ),
            alpha: correction.motion.alpha - alpha_mid,
            ..correction.motion
        };
        let required = fill_scale(&motion, work_width, work_height);
        if required > ZOOM_LIMIT {
            debug!("coverage requires zoom {required:.2}, capping at {ZOOM_LIMIT}");
        }
        out.push(PlannedFrame {
            motion,
            zoom: prezoom.max(required).min(ZOOM_LIMIT),
        });
    }

    // Rate limiting: the forward sweep keeps zoom from falling too fast,
    // the reverse sweep ramps it up ahead of a spike. Both only ever raise
    // values, so coverage is preserved. With zoom_speed == 1 the segment
    // collapses to a constant zoom.
    let zooms = &mut out[base..];
    for t in 1..zooms.len() {
        zooms[t].zoom = zooms[t].zoom.max(zooms[t - 1].zoom / zoom_speed);
    }
    for t in (0..zooms.len().saturating_sub(1)).rev() {
        zooms[t].zoom = zooms[t].zoom.max(zooms[t + 1].zoom / zoom_speed);
    }
}

/// Incremental zoom selection for single-pass operation.
///
/// Each frame takes the largest of the configured prezoom, the previous
/// zoom relaxed by the `zoom_speed` ratio, and the coverage requirement of
/// the current correction. Scene cuts reset the relaxation.
#[derive(Debug, Clone, Copy)]
pub struct DynamicZoomPlanner {
    prezoom: f64,
    zoom_speed: f64,
    current: Option<f64>,
}

impl DynamicZoomPlanner {
    pub fn new(prezoom: f64, zoom_speed: f64) -> Self {
        Self {
            prezoom,
            zoom_speed,
            current: None,
        }
    }

    /// The zoom to use for the next correction in stream order.
    pub fn next_zoom(
        &mut self,
        correction: &Correction,
        work_width: usize,
        work_height: usize,
    ) -> f64 {
        if correction.segment_start {
            self.current = None;
        }
        let required = fill_scale(&correction.motion, work_width, work_height).min(ZOOM_LIMIT);
        let relaxed = match self.current {
            Some(zoom) => zoom / self.zoom_speed,
            None => self.prezoom,
        };
        let zoom = self.prezoom.max(relaxed).max(required);
        self.current = Some(zoom);
        zoom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::Motion;

    fn correction(motion: Motion, segment_start: bool) -> Correction {
        Correction {
            motion,
            segment_start,
        }
    }

    /// Sampling positions of the four output corners under (motion, zoom).
    fn corners_covered(motion: &Motion, zoom: f64, width: usize, height: usize) -> bool {
        let zoomed = Motion {
            scale: motion.scale / zoom,
            ..*motion
        };
        let cx = (width as f64 - 1.0) / 2.0;
        let cy = (height as f64 - 1.0) / 2.0;
        let eps = 1e-9;
        [(0.0, 0.0), (width as f64 - 1.0, 0.0), (0.0, height as f64 - 1.0), (width as f64 - 1.0, height as f64 - 1.0)]
            .iter()
            .all(|&(x, y)| {
                let (sx, sy) = zoomed.transform_point(x, y, cx, cy);
                sx >= -eps
                    && sy >= -eps
                    && sx <= width as f64 - 1.0 + eps
                    && sy <= height as f64 - 1.0 + eps
            })
    }

    #[test]
    fn identity_needs_no_zoom() {
        assert!((fill_scale(&Motion::identity(), 320, 240) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn horizontal_shift_requirement_is_exact() {
        let motion = Motion::from_shift(10.0, 0.0);
        let zoom = fill_scale(&motion, 320, 240);
        let expected = 159.5 / 149.5;
        assert!((zoom - expected).abs() < 1e-9, "{zoom}");
        assert!(corners_covered(&motion, zoom, 320, 240));
        assert!(!corners_covered(&motion, zoom * 0.999, 320, 240));
    }

    #[test]
    fn rotation_requirement_covers_corners() {
        let motion = Motion {
            alpha: 0.05,
            ..Motion::identity()
        };
        let zoom = fill_scale(&motion, 320, 240);
        assert!(zoom > 1.0 && zoom < 1.2, "{zoom}");
        assert!(corners_covered(&motion, zoom, 320, 240));
        assert!(!corners_covered(&motion, zoom * 0.999, 320, 240));
    }

    #[test]
    fn static_mode_picks_segment_constant_zoom() {
        let corrections: Vec<Correction> = (0..20)
            .map(|t| {
                correction(
                    Motion::from_shift(
                        8.0 * (t as f64 * 0.7).sin(),
                        4.0 * (t as f64 * 0.9).cos(),
                    ),
                    t == 0,
                )
            })
            .collect();
        let planned = plan_two_pass(&corrections, 320, 240, 1.0, 1.0);
        assert_eq!(planned.len(), 20);

        let first = planned[0].zoom;
        for frame in &planned {
            assert!((frame.zoom - first).abs() < 1e-12);
            assert!(corners_covered(&frame.motion, frame.zoom, 320, 240));
        }
    }

    #[test]
    fn zoom_rate_is_bounded() {
        let mut corrections: Vec<Correction> =
            vec![correction(Motion::identity(), true)];
        corrections.extend((1..60).map(|t| {
            correction(
                Motion::from_shift(if t == 30 { 20.0 } else { 0.0 }, 0.0),
                false,
            )
        }));
        let speed = 1.01;
        let planned = plan_two_pass(&corrections, 320, 240, 1.0, speed);

        let bound = speed.ln() + 1e-12;
        for pair in planned.windows(2) {
            let ratio = (pair[1].zoom / pair[0].zoom).ln().abs();
            assert!(ratio <= bound, "ratio {ratio} exceeds {bound}");
        }
        for frame in &planned {
            assert!(corners_covered(&frame.motion, frame.zoom, 320, 240));
        }
    }

    #[test]
    fn prezoom_is_a_floor() {
        let corrections = vec![correction(Motion::identity(), true); 5];
        let planned = plan_two_pass(&corrections, 320, 240, 1.25, 1.0);
        for frame in &planned {
            assert!((frame.zoom - 1.25).abs() < 1e-12);
        }
    }

    #[test]
    fn constant_rotation_recentres_to_nearly_no_zoom() {
        let motion = Motion {
            alpha: 0.05,
            ..Motion::identity()
        };
        let corrections: Vec<Correction> = (0..10)
            .map(|t| correction(motion, t == 0))
            .collect();
        let planned = plan_two_pass(&corrections, 320, 240, 1.0, 1.0);
        // The constant angle is absorbed by the canvas pre-rotation.
        for frame in &planned {
            assert!(frame.motion.alpha.abs() < 1e-12);
            assert!(frame.zoom < 1.01, "{}", frame.zoom);
        }
    }

    #[test]
    fn segments_are_planned_independently() {
        let mut corrections: Vec<Correction> = (0..10)
            .map(|t| correction(Motion::from_shift(12.0, 0.0), t == 0))
            .collect();
        corrections.extend((0..10).map(|t| correction(Motion::identity(), t == 0)));

        let planned = plan_two_pass(&corrections, 320, 240, 1.0, 1.0);
        // Constant shift re-centres away entirely in the first segment.
        assert!(planned[0].zoom < 1.01);
        assert!((planned[10].zoom - 1.0).abs() < 1e-12);
    }

    #[test]
    fn dynamic_planner_respects_ratio_and_coverage() {
        let mut planner = DynamicZoomPlanner::new(1.0, 1.05);
        let mut zooms = Vec::new();
        for t in 0..40 {
            let shift = if t == 10 { 15.0 } else { 0.0 };
            let c = correction(Motion::from_shift(shift, 0.0), t == 0);
            let zoom = planner.next_zoom(&c, 320, 240);
            assert!(corners_covered(&c.motion, zoom, 320, 240));
            zooms.push(zoom);
        }
        // After the spike the zoom relaxes by at most the ratio per frame.
        for pair in zooms[10..].windows(2) {
            assert!(pair[1] >= pair[0] / 1.05 - 1e-12);
        }
        assert!(zooms[39] < zooms[10]);
    }
}
