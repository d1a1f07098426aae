//! The 2-D similarity motion model.
//!
//! [`Motion`] describes inter-frame camera motion as a shift, a uniform
//! scale, and a small rotation, together with a confidence score produced by
//! the estimator. All coordinates are work-frame coordinates; the warper
//! rescales shifts per plane when applying a motion at full resolution.
//!
//! The sampling transform about the frame centre `c` is
//! `T(p) = scale * R(alpha) * (p - c) + c + shift`. Composition and
//! inversion are exact, so chaining a motion with its inverse recovers the
//! identity up to floating-point rounding.

/// A 2-D similarity transform plus an estimation confidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Motion {
    /// Translation in pixels, work-frame coordinates.
    pub shift: (f64, f64),
    /// Uniform scale factor, always positive and close to 1.
    pub scale: f64,
    /// Rotation in radians, small.
    pub alpha: f64,
    /// Estimation confidence, >= 0. Zero signals a scene cut.
    pub confidence: f64,
}

impl Default for Motion {
    fn default() -> Self {
        Self::identity()
    }
}

impl Motion {
    /// The identity motion with full confidence.
    pub fn identity() -> Self {
        Self {
            shift: (0.0, 0.0),
            scale: 1.0,
            alpha: 0.0,
            confidence: 1.0,
        }
    }

    /// A pure translation.
    pub fn from_shift(dx: f64, dy: f64) -> Self {
        Self {
            shift: (dx, dy),
            ..Self::identity()
        }
    }

    /// True when the motion carries no confidence, i.e. the estimator
    /// flagged a scene cut or could not match the frame at all.
    pub fn is_scene_cut(&self) -> bool {
        self.confidence <= 0.0
    }

    /// Map a point through the transform about the given frame centre.
    pub fn transform_point(&self, x: f64, y: f64, cx: f64, cy: f64) -> (f64, f64) {
        let (sin, cos) = self.alpha.sin_cos();
        let ux = x - cx;
        let uy = y - cy;
        (
            self.scale * (cos * ux - sin * uy) + cx + self.shift.0,
            self.scale * (sin * ux + cos * uy) + cy + self.shift.1,
        )
    }

    /// Compose two motions: the result applies `self` first, then `next`.
    ///
    /// The confidence of the result is the lower of the two operands'.
    pub fn then(&self, next: &Motion) -> Motion {
        let (sin, cos) = next.alpha.sin_cos();
        let (dx, dy) = self.shift;
        Motion {
            shift: (
                next.shift.0 + next.scale * (cos * dx - sin * dy),
                next.shift.1 + next.scale * (sin * dx + cos * dy),
            ),
            scale: self.scale * next.scale,
            alpha: self.alpha + next.alpha,
            confidence: self.confidence.min(next.confidence),
        }
    }

    /// The exact inverse transform.
    pub fn inverse(&self) -> Motion {
        let inv_scale = 1.0 / self.scale;
        let (sin, cos) = (-self.alpha).sin_cos();
        let (dx, dy) = self.shift;
        Motion {
            shift: (
                -inv_scale * (cos * dx - sin * dy),
                -inv_scale * (sin * dx + cos * dy),
            ),
            scale: inv_scale,
            alpha: -self.alpha,
            confidence: self.confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Motion;

    fn assert_close(a: &Motion, b: &Motion, tolerance: f64) {
        assert!((a.shift.0 - b.shift.0).abs() < tolerance, "{a:?} vs {b:?}");
        assert!((a.shift.1 - b.shift.1).abs() < tolerance, "{a:?} vs {b:?}");
        assert!((a.scale - b.scale).abs() < tolerance, "{a:?} vs {b:?}");
        assert!((a.alpha - b.alpha).abs() < tolerance, "{a:?} vs {b:?}");
    }

    #[test]
    fn identity_maps_points_to_themselves() {
        let motion = Motion::identity();
        let (x, y) = motion.transform_point(17.0, 42.5, 160.0, 120.0);
        assert!((x - 17.0).abs() < 1e-12);
        assert!((y - 42.5).abs() < 1e-12);
    }

    #[test]
    fn shift_composition_adds() {
        let a = Motion::from_shift(3.0, -1.0);
        let b = Motion::from_shift(2.0, 5.0);
        let composed = a.then(&b);
        assert_close(&composed, &Motion::from_shift(5.0, 4.0), 1e-12);
    }

    #[test]
    fn inverse_round_trip_is_identity() {
        let motion = Motion {
            shift: (4.2, -7.9),
            scale: 1.03,
            alpha: 0.04,
            confidence: 0.8,
        };
        assert_close(&motion.then(&motion.inverse()), &Motion::identity(), 1e-9);
        assert_close(&motion.inverse().then(&motion), &Motion::identity(), 1e-9);
    }

    #[test]
    fn composition_matches_point_mapping() {
        let a = Motion {
            shift: (2.0, 1.0),
            scale: 1.02,
            alpha: 0.03,
            confidence: 1.0,
        };
        let b = Motion {
            shift: (-1.5, 0.5),
            scale: 0.99,
            alpha: -0.01,
            confidence: 1.0,
        };
        let composed = a.then(&b);

        let (cx, cy) = (100.0, 80.0);
        let (mx, my) = a.transform_point(31.0, 57.0, cx, cy);
        let via_chain = b.transform_point(mx, my, cx, cy);
        let direct = composed.transform_point(31.0, 57.0, cx, cy);
        assert!((via_chain.0 - direct.0).abs() < 1e-9);
        assert!((via_chain.1 - direct.1).abs() < 1e-9);
    }

    #[test]
    fn composed_confidence_is_minimum() {
        let a = Motion {
            confidence: 0.3,
            ..Motion::identity()
        };
        let b = Motion {
            confidence: 0.7,
            ..Motion::identity()
        };
        assert_eq!(a.then(&b).confidence, 0.3);
    }

    #[test]
    fn scene_cut_detection() {
        let mut motion = Motion::identity();
        assert!(!motion.is_scene_cut());
        motion.confidence = 0.0;
        assert!(motion.is_scene_cut());
    }
}
