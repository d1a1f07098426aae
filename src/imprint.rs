//! Diagnostic output: work-frame dumps and the motion overlay.
//!
//! `--debug` writes every work frame as a grayscale PNG, which is the
//! quickest way to see what the estimator is actually matching against.
//! `--debug_imprint` draws the applied correction into the luminance plane
//! of each output frame: a vector from the frame centre (scaled up to stay
//! visible) plus a zoom bar along the top edge.

use std::path::Path;

use ffmpeg_next::frame;
use image::GrayImage;
use log::debug;

use crate::error::StabilizeError;
use crate::gray::WorkFrame;
use crate::motion::Motion;
use crate::planes::PlaneLayout;

/// Luma value used for overlay marks; bright but inside broadcast range.
const MARK: u8 = 235;

/// How much the correction vector is magnified in the overlay.
const VECTOR_SCALE: f64 = 8.0;

/// Save `work` as `work_NNNNNN.png` inside `dir`.
pub fn dump_work_frame(
    work: &WorkFrame,
    index: u64,
    dir: &Path,
) -> Result<(), StabilizeError> {
    let image = GrayImage::from_raw(
        work.width() as u32,
        work.height() as u32,
        work.as_bytes().to_vec(),
    )
    .ok_or_else(|| {
        StabilizeError::Pipeline("work frame buffer does not match its dimensions".to_string())
    })?;
    image.save(dir.join(format!("work_{index:06}.png")))?;
    Ok(())
}

/// Draw the applied correction into the frame's luminance plane.
///
/// Only 8-bit luma planes are imprinted; deeper formats are skipped with a
/// debug log so the overlay never corrupts 16-bit samples.
pub fn imprint_motion(frame: &mut frame::Video, motion: &Motion, zoom: f64) {
    let layout = match PlaneLayout::resolve(frame.format(), frame.width(), frame.height()) {
        Ok(layout) => layout,
        Err(_) => return,
    };
    let luma = *layout.luma();
    if !luma.is_eight_bit() {
        debug!("skipping motion imprint on {}-bit luma", luma.depth);
        return;
    }

    let stride = frame.stride(0);
    let width = luma.width;
    let height = luma.height;
    let data = frame.data_mut(0);
    let mut put = |x: i64, y: i64| {
        if (0..width as i64).contains(&x) && (0..height as i64).contains(&y) {
            data[y as usize * stride + x as usize] = MARK;
        }
    };

    // Correction vector from the centre, magnified.
    let cx = width as f64 / 2.0;
    let cy = height as f64 / 2.0;
    let tip_x = cx + motion.shift.0 * VECTOR_SCALE;
    let tip_y = cy + motion.shift.1 * VECTOR_SCALE;
    let steps = ((tip_x - cx).abs().max((tip_y - cy).abs()).ceil() as i64).max(1);
    for step in 0..=steps {
        let t = step as f64 / steps as f64;
        put(
            (cx + (tip_x - cx) * t).round() as i64,
            (cy + (tip_y - cy) * t).round() as i64,
        );
    }
    // A 3x3 block marks the tip so direction is readable at full speed.
    for dy in -1..=1 {
        for dx in -1..=1 {
            put(tip_x.round() as i64 + dx, tip_y.round() as i64 + dy);
        }
    }

    // Zoom bar along the top edge: full width means zoom 2.0.
    let bar = (((zoom - 1.0).clamp(0.0, 1.0)) * width as f64) as i64;
    for y in 2..5 {
        for x in 2..2 + bar {
            put(x, y);
        }
    }
}
