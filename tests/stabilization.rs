//! End-to-end pipeline behavior on synthetic frames.
//!
//! These tests exercise the estimator -> smoother -> warper chain without
//! any media fixtures: work frames are generated from smooth textured
//! patterns, full-resolution frames are allocated directly as YUV420P.

use ffmpeg_next::{format::Pixel, frame};
use steadify::{
    FrameStage, FrameWarper, Motion, MotionEstimator, StabilizationOptions, Stabilizer,
    TrajectorySmoother, WorkFrame, ZoomMode,
};

/// Smooth textured pattern sampled at a sub-pixel content offset; the same
/// scene rendered at different offsets simulates camera translation.
fn pattern(x: f64, y: f64) -> f64 {
    128.0 + 55.0 * (x * 0.31).sin() * (y * 0.27).cos() + 40.0 * (x * 0.07 + y * 0.11).sin()
}

fn work_frame(width: usize, height: usize, ox: f64, oy: f64) -> WorkFrame {
    WorkFrame::from_fn(width, height, |x, y| {
        pattern(x as f64 - ox, y as f64 - oy).clamp(0.0, 255.0) as u8
    })
}

fn yuv_frame(width: u32, height: u32, ox: f64, oy: f64) -> frame::Video {
    let mut frame = frame::Video::new(Pixel::YUV420P, width, height);
    let stride = frame.stride(0);
    let data = frame.data_mut(0);
    for y in 0..height as usize {
        for x in 0..width as usize {
            data[y * stride + x] =
                pattern(x as f64 - ox, y as f64 - oy).clamp(0.0, 255.0) as u8;
        }
    }
    for plane in 1..3 {
        let value = 128;
        let stride = frame.stride(plane);
        let rows = (height as usize + 1) / 2;
        let cols = (width as usize + 1) / 2;
        let data = frame.data_mut(plane);
        for y in 0..rows {
            for sample in &mut data[y * stride..y * stride + cols] {
                *sample = value;
            }
        }
    }
    frame
}

fn luma_of(frame: &frame::Video) -> Vec<u8> {
    let stride = frame.stride(0);
    let width = frame.width() as usize;
    let data = frame.data(0);
    (0..frame.height() as usize)
        .flat_map(|y| data[y * stride..y * stride + width].iter().copied())
        .collect()
}

/// Run motions through an estimator + smoother chain, returning the raw
/// motions and the corrections in frame order.
fn chain(
    frames: &[WorkFrame],
    options: &StabilizationOptions,
) -> (Vec<Motion>, Vec<Motion>) {
    let width = frames[0].width();
    let height = frames[0].height();
    let mut estimator = MotionEstimator::new(options, width, height, 1);
    let mut smoother = TrajectorySmoother::new(options);

    let mut raw = Vec::new();
    let mut corrections = Vec::new();
    for frame in frames {
        let motion = estimator.estimate(frame);
        raw.push(motion);
        corrections.extend(smoother.push(motion).into_iter().map(|c| c.motion));
    }
    corrections.extend(smoother.finish().into_iter().map(|c| c.motion));
    (raw, corrections)
}

// -- scenario: static input, static output ---------------------------------

#[test]
fn static_input_passes_through_unchanged() {
    let options = StabilizationOptions::default().with_smoothing(3, 3, 3, 3);
    let mut stabilizer = Stabilizer::new(options, 320, 240).unwrap();

    let reference = luma_of(&yuv_frame(320, 240, 0.0, 0.0));
    let mut outputs = Vec::new();
    for _ in 0..20 {
        outputs.extend(
            stabilizer
                .process(yuv_frame(320, 240, 0.0, 0.0))
                .unwrap(),
        );
    }
    outputs.extend(stabilizer.finish().unwrap());

    assert_eq!(outputs.len(), 20);
    for output in &outputs {
        assert_eq!(luma_of(output), reference, "identity warp must be exact");
    }
}

// -- scenario: pure horizontal drift ---------------------------------------

#[test]
fn constant_drift_is_left_alone() {
    let frames: Vec<WorkFrame> = (0..100)
        .map(|t| work_frame(160, 120, t as f64, 0.0))
        .collect();
    let options = StabilizationOptions::default().with_smoothing(10, 10, 10, 10);
    let (raw, corrections) = chain(&frames, &options);

    assert_eq!(corrections.len(), frames.len());
    // The estimator sees one pixel per frame of rightward drift.
    for motion in &raw[2..98] {
        assert!((motion.shift.0 - 1.0).abs() < 0.3, "{motion:?}");
        assert!(motion.shift.1.abs() < 0.3, "{motion:?}");
        assert!(motion.confidence > 0.0, "{motion:?}");
    }
    // A constant-velocity pan is already smooth: steady-state corrections
    // stay near the identity instead of fighting the pan.
    for motion in &corrections[30..70] {
        assert!(motion.shift.0.abs() < 0.5, "{motion:?}");
        assert!((motion.scale - 1.0).abs() < 0.01, "{motion:?}");
    }
}

// -- scenario: sinusoidal shake --------------------------------------------

#[test]
fn sinusoidal_shake_is_strongly_attenuated() {
    let period = 10.0;
    let positions: Vec<f64> = (0..90)
        .map(|t| 5.0 * (2.0 * std::f64::consts::PI * t as f64 / period).sin())
        .collect();
    let frames: Vec<WorkFrame> = positions
        .iter()
        .map(|&ox| work_frame(160, 120, ox, 0.0))
        .collect();

    let options = StabilizationOptions::default().with_smoothing(15, 15, 15, 15);
    let (_, corrections) = chain(&frames, &options);
    assert_eq!(corrections.len(), frames.len());

    // The content of frame t sits at `positions[t]`; warping samples shifted
    // by the correction, so the residual position is the difference.
    let residual_peak = positions
        .iter()
        .zip(&corrections)
        .skip(20)
        .take(50)
        .map(|(&position, motion)| (position - motion.shift.0).abs())
        .fold(0.0f64, f64::max);
    let raw_peak = positions.iter().fold(0.0f64, |m, v| m.max(v.abs()));

    assert!(
        residual_peak * 5.0 <= raw_peak,
        "residual {residual_peak:.2} vs raw {raw_peak:.2}"
    );
}

// -- scenario: scene cut ----------------------------------------------------

#[test]
fn scene_cut_isolates_segments() {
    let mut frames: Vec<WorkFrame> = (0..50)
        .map(|t| work_frame(160, 120, t as f64 * 0.8, 0.0))
        .collect();
    // Black flash: flat frames have no texture, so estimation fails softly
    // into a confidence-0 motion.
    frames.push(WorkFrame::filled(160, 120, 16));
    frames.extend((0..50).map(|t| work_frame(160, 120, -(t as f64) * 0.8, 20.0)));

    let options = StabilizationOptions::default().with_smoothing(8, 8, 8, 8);
    let (raw, corrections) = chain(&frames, &options);

    assert_eq!(corrections.len(), frames.len());
    assert_eq!(raw[50].confidence, 0.0, "flash must read as a scene cut");

    // Within each segment the corrections stay small and continuous; the
    // cut does not smear segment A's drift into segment B.
    for motion in corrections[10..40].iter().chain(&corrections[62..90]) {
        assert!(motion.shift.0.abs() < 1.0, "{motion:?}");
        assert!(motion.shift.1.abs() < 1.0, "{motion:?}");
    }
    // Past the segment-start edge region the corrections evolve smoothly.
    for pair in corrections[62..].windows(2) {
        let jump = (pair[1].shift.0 - pair[0].shift.0).abs();
        assert!(jump < 2.0, "correction discontinuity {jump}");
    }
}

// -- scenario: ignore rectangle --------------------------------------------

#[test]
fn ignore_rectangle_excludes_foreground_motion() {
    let width = 160;
    let height = 120;
    // Background pans +2 px/frame; a foreground object filling the top-left
    // quadrant races the other way at -6 px/frame.
    let render = |t: f64| {
        WorkFrame::from_fn(width, height, |x, y| {
            if x < width / 2 && y < height / 2 {
                let fx = x as f64 + 6.0 * t;
                let fy = y as f64;
                (96.0 + 70.0 * (fx * 0.41).sin() * (fy * 0.37).cos()).clamp(0.0, 255.0) as u8
            } else {
                pattern(x as f64 - 2.0 * t, y as f64).clamp(0.0, 255.0) as u8
            }
        })
    };

    let options = StabilizationOptions::default().with_ignore_rect(
        steadify::IgnoreRect {
            x: 0,
            y: 0,
            w: width as u32 / 2,
            h: height as u32 / 2,
        },
    );
    let mut estimator = MotionEstimator::new(&options, width, height, 1);
    estimator.estimate(&render(0.0));
    let motion = estimator.estimate(&render(1.0));

    // Ground truth camera displacement is +2 px; the foreground must not
    // drag the estimate.
    assert!((motion.shift.0 - 2.0).abs() <= 0.2, "{motion:?}");
    assert!(motion.shift.1.abs() <= 0.2, "{motion:?}");
}

// -- warp round trip on full frames ----------------------------------------

#[test]
fn full_frame_round_trip_within_interpolation_error() {
    let motion = Motion {
        shift: (3.0, -2.0),
        scale: 1.01,
        alpha: 0.02,
        confidence: 1.0,
    };

    let mut frame = yuv_frame(128, 96, 0.0, 0.0);
    let reference = luma_of(&frame);

    let mut warper = FrameWarper::new(128, 96);
    warper.apply(&mut frame, &motion, 1.0).unwrap();
    warper.apply(&mut frame, &motion.inverse(), 1.0).unwrap();

    let restored = luma_of(&frame);
    let width = 128usize;
    for y in 12..96 - 12 {
        for x in 12..width - 12 {
            let difference = (i16::from(restored[y * width + x])
                - i16::from(reference[y * width + x]))
            .abs();
            assert!(difference <= 8, "({x}, {y}): off by {difference}");
        }
    }
}

// -- two-pass wiring ---------------------------------------------------------

#[test]
fn two_pass_pipeline_plans_and_replays() {
    let options = StabilizationOptions::default()
        .with_smoothing(5, 5, 5, 5)
        .with_zoom_mode(ZoomMode::TwoPass);
    let mut stabilizer = Stabilizer::new(options, 320, 240).unwrap();

    let offsets: Vec<f64> = (0..30).map(|t| 3.0 * (t as f64 * 0.7).sin()).collect();

    // Pass 1: analysis only.
    for &ox in &offsets {
        stabilizer.preprocess(&yuv_frame(320, 240, ox, 0.0)).unwrap();
    }
    stabilizer.plan_autozoom().unwrap();

    // Pass 2: every frame comes back immediately, warped.
    let mut outputs = Vec::new();
    for &ox in &offsets {
        let ready = stabilizer.process(yuv_frame(320, 240, ox, 0.0)).unwrap();
        assert_eq!(ready.len(), 1, "two-pass mode must not queue frames");
        outputs.extend(ready);
    }
    outputs.extend(stabilizer.finish().unwrap());
    assert_eq!(outputs.len(), offsets.len());
}

#[test]
fn two_pass_process_without_plan_is_an_error() {
    let options = StabilizationOptions::default().with_zoom_mode(ZoomMode::TwoPass);
    let mut stabilizer = Stabilizer::new(options, 320, 240).unwrap();
    assert!(stabilizer.process(yuv_frame(320, 240, 0.0, 0.0)).is_err());
}

// -- single-pass latency -----------------------------------------------------

#[test]
fn single_pass_output_lags_by_the_smoothing_window() {
    let options = StabilizationOptions::default().with_smoothing(4, 4, 4, 4);
    let mut stabilizer = Stabilizer::new(options, 320, 240).unwrap();
    assert_eq!(stabilizer.lookahead(), 4);

    let mut produced = 0;
    for t in 0..10 {
        produced += stabilizer
            .process(yuv_frame(320, 240, t as f64, 0.0))
            .unwrap()
            .len();
    }
    // 10 frames in, lookahead 4: corrections exist for the first 6.
    assert_eq!(produced, 6);
    produced += stabilizer.finish().unwrap().len();
    assert_eq!(produced, 10);
}
