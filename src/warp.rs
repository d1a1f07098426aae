//! Sub-pixel frame warping.
//!
//! [`FrameWarper`] applies a correction motion (scaled by the planned zoom)
//! to every plane of a full-resolution frame, in place. Shifts are given in
//! work-frame coordinates and rescaled per plane, which also handles chroma
//! sub-sampling; rotation and scale act about each plane's centre.
//!
//! Sampling is bilinear with edge-clamp for out-of-source positions. The
//! warp reads every source pixel independently of output order, so each
//! plane is first copied into a scratch buffer; scratch allocations are
//! reused across frames. Planes with 8-bit samples warp through `u8`
//! buffers, planes with 9-16 bit samples through `u16`.

use ffmpeg_next::frame;

use crate::error::StabilizeError;
use crate::motion::Motion;
use crate::planes::PlaneLayout;

/// Affine sampling map `(x, y) -> (a x - b y + ox, b x + a y + oy)`.
struct Mapping {
    a: f64,
    b: f64,
    ox: f64,
    oy: f64,
}

impl Mapping {
    /// Build the per-plane map for a motion at the given zoom.
    fn for_plane(
        motion: &Motion,
        zoom: f64,
        plane_width: usize,
        plane_height: usize,
        work_width: usize,
        work_height: usize,
    ) -> Self {
        let shift_x = motion.shift.0 * plane_width as f64 / work_width as f64;
        let shift_y = motion.shift.1 * plane_height as f64 / work_height as f64;
        let scale = motion.scale / zoom;
        let (sin, cos) = motion.alpha.sin_cos();
        let a = scale * cos;
        let b = scale * sin;
        let cx = (plane_width as f64 - 1.0) / 2.0;
        let cy = (plane_height as f64 - 1.0) / 2.0;
        Self {
            a,
            b,
            ox: cx + shift_x - a * cx + b * cy,
            oy: cy + shift_y - b * cx - a * cy,
        }
    }

    #[inline]
    fn sample_position(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x - self.b * y + self.ox,
            self.b * x + self.a * y + self.oy,
        )
    }
}

/// A plane sample type the warper can interpolate.
trait Sample: Copy {
    fn to_f64(self) -> f64;
    fn from_f64(value: f64) -> Self;
}

impl Sample for u8 {
    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    fn from_f64(value: f64) -> Self {
        value.round().clamp(0.0, 255.0) as u8
    }
}

impl Sample for u16 {
    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    fn from_f64(value: f64) -> Self {
        value.round().clamp(0.0, 65535.0) as u16
    }
}

/// Bilinear resample of a contiguous plane through `map`.
fn warp_plane<T: Sample>(src: &[T], dst: &mut [T], width: usize, height: usize, map: &Mapping) {
    let max_x = (width - 1) as f64;
    let max_y = (height - 1) as f64;
    for y in 0..height {
        let row = &mut dst[y * width..(y + 1) * width];
        for (x, out) in row.iter_mut().enumerate() {
            let (sx, sy) = map.sample_position(x as f64, y as f64);
            let sx = sx.clamp(0.0, max_x);
            let sy = sy.clamp(0.0, max_y);

            let x0 = sx.floor() as usize;
            let y0 = sy.floor() as usize;
            let x1 = (x0 + 1).min(width - 1);
            let y1 = (y0 + 1).min(height - 1);
            let fx = sx - x0 as f64;
            let fy = sy - y0 as f64;

            let v00 = src[y0 * width + x0].to_f64();
            let v01 = src[y0 * width + x1].to_f64();
            let v10 = src[y1 * width + x0].to_f64();
            let v11 = src[y1 * width + x1].to_f64();

            let top = v00 + (v01 - v00) * fx;
            let bottom = v10 + (v11 - v10) * fx;
            *out = T::from_f64(top + (bottom - top) * fy);
        }
    }
}

/// Warps every plane of a frame by a correction motion and zoom.
pub struct FrameWarper {
    work_width: usize,
    work_height: usize,
    source8: Vec<u8>,
    warped8: Vec<u8>,
    source16: Vec<u16>,
    warped16: Vec<u16>,
}

impl FrameWarper {
    /// Create a warper for motions expressed in the given work-frame size.
    pub fn new(work_width: usize, work_height: usize) -> Self {
        Self {
            work_width,
            work_height,
            source8: Vec::new(),
            warped8: Vec::new(),
            source16: Vec::new(),
            warped16: Vec::new(),
        }
    }

    /// Warp `frame` in place.
    ///
    /// # Errors
    ///
    /// Returns [`StabilizeError::UnsupportedPixelFormat`] if the frame's
    /// format has no resolvable planar layout.
    pub fn apply(
        &mut self,
        frame: &mut frame::Video,
        motion: &Motion,
        zoom: f64,
    ) -> Result<(), StabilizeError> {
        let layout = PlaneLayout::resolve(frame.format(), frame.width(), frame.height())?;

        for (index, info) in layout.planes.iter().enumerate() {
            let map = Mapping::for_plane(
                motion,
                zoom,
                info.width,
                info.height,
                self.work_width,
                self.work_height,
            );
            let stride = frame.stride(index);
            let samples = info.width * info.height;

            if info.is_eight_bit() {
                self.source8.resize(samples, 0);
                self.warped8.resize(samples, 0);
                {
                    let data = frame.data(index);
                    for y in 0..info.height {
                        self.source8[y * info.width..(y + 1) * info.width]
                            .copy_from_slice(&data[y * stride..y * stride + info.width]);
                    }
                }
                warp_plane(&self.source8, &mut self.warped8, info.width, info.height, &map);
                let data = frame.data_mut(index);
                for y in 0..info.height {
                    data[y * stride..y * stride + info.width]
                        .copy_from_slice(&self.warped8[y * info.width..(y + 1) * info.width]);
                }
            } else {
                self.source16.resize(samples, 0);
                self.warped16.resize(samples, 0);
                {
                    let data = frame.data(index);
                    for y in 0..info.height {
                        let row = &data[y * stride..y * stride + info.width * 2];
                        for (slot, pair) in self.source16[y * info.width..(y + 1) * info.width]
                            .iter_mut()
                            .zip(row.chunks_exact(2))
                        {
                            *slot = u16::from_ne_bytes([pair[0], pair[1]]);
                        }
                    }
                }
                warp_plane(
                    &self.source16,
                    &mut self.warped16,
                    info.width,
                    info.height,
                    &map,
                );
                let data = frame.data_mut(index);
                for y in 0..info.height {
                    let row = &mut data[y * stride..y * stride + info.width * 2];
                    for (value, pair) in self.warped16[y * info.width..(y + 1) * info.width]
                        .iter()
                        .zip(row.chunks_exact_mut(2))
                    {
                        pair.copy_from_slice(&value.to_ne_bytes());
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::Motion;

    fn ramp(width: usize, height: usize) -> Vec<u8> {
        let mut data = vec![0u8; width * height];
        for y in 0..height {
            for x in 0..width {
                data[y * width + x] = ((x * 3 + y * 5) % 256) as u8;
            }
        }
        data
    }

    fn warp_with(data: &[u8], width: usize, height: usize, motion: &Motion, zoom: f64) -> Vec<u8> {
        let map = Mapping::for_plane(motion, zoom, width, height, width, height);
        let mut out = vec![0u8; width * height];
        warp_plane(data, &mut out, width, height, &map);
        out
    }

    #[test]
    fn identity_warp_preserves_pixels() {
        let src = ramp(32, 24);
        let out = warp_with(&src, 32, 24, &Motion::identity(), 1.0);
        assert_eq!(src, out);
    }

    #[test]
    fn integer_shift_moves_content() {
        let src = ramp(32, 24);
        let out = warp_with(&src, 32, 24, &Motion::from_shift(3.0, 0.0), 1.0);
        // Output pixel x samples source x + 3.
        for y in 0..24 {
            for x in 0..29 {
                assert_eq!(out[y * 32 + x], src[y * 32 + x + 3], "({x}, {y})");
            }
        }
    }

    #[test]
    fn subpixel_shift_interpolates() {
        let width = 16;
        let src: Vec<u8> = (0..width * 4)
            .map(|i| ((i % width) * 10) as u8)
            .collect();
        let out = warp_with(&src, width, 4, &Motion::from_shift(0.5, 0.0), 1.0);
        // A half-pixel shift over a linear ramp lands halfway between
        // neighbours.
        assert_eq!(out[2 * width + 4], 45);
    }

    #[test]
    fn out_of_source_samples_clamp_to_edge() {
        let src = ramp(16, 16);
        let out = warp_with(&src, 16, 16, &Motion::from_shift(40.0, 0.0), 1.0);
        for y in 0..16 {
            for x in 0..16 {
                assert_eq!(out[y * 16 + x], src[y * 16 + 15]);
            }
        }
    }

    #[test]
    fn zoom_magnifies_about_the_centre() {
        let src = ramp(33, 33);
        let out = warp_with(&src, 33, 33, &Motion::identity(), 2.0);
        // The centre pixel is a fixed point.
        assert_eq!(out[16 * 33 + 16], src[16 * 33 + 16]);
        // The corner samples the quarter position.
        assert_eq!(out[0], src[8 * 33 + 8]);
    }

    #[test]
    fn round_trip_recovers_interior_within_bilinear_error() {
        let motion = Motion {
            shift: (2.5, -1.5),
            scale: 1.02,
            alpha: 0.03,
            confidence: 1.0,
        };
        // A smooth pattern keeps interpolation error small.
        let width = 48;
        let height = 40;
        let mut src = vec![0u8; width * height];
        for y in 0..height {
            for x in 0..width {
                let v = 128.0
                    + 60.0 * ((x as f64) * 0.2).sin() * ((y as f64) * 0.17).cos();
                src[y * width + x] = v as u8;
            }
        }

        let forward = warp_with(&src, width, height, &motion, 1.0);
        let back = warp_with(&forward, width, height, &motion.inverse(), 1.0);

        for y in 8..height - 8 {
            for x in 8..width - 8 {
                let difference =
                    (i16::from(back[y * width + x]) - i16::from(src[y * width + x])).abs();
                assert!(difference <= 6, "({x}, {y}): {difference}");
            }
        }
    }

    #[test]
    fn full_frame_warp_scales_chroma_shift() {
        let mut frame = frame::Video::new(ffmpeg_next::format::Pixel::YUV420P, 64, 48);
        for plane in 0..3 {
            let stride = frame.stride(plane);
            let (w, h) = if plane == 0 { (64, 48) } else { (32, 24) };
            let data = frame.data_mut(plane);
            for y in 0..h {
                for x in 0..w {
                    data[y * stride + x] = ((x * 4 + y) % 256) as u8;
                }
            }
        }

        let mut warper = FrameWarper::new(64, 48);
        let motion = Motion::from_shift(8.0, 0.0);
        warper.apply(&mut frame, &motion, 1.0).unwrap();

        // Luma moved by 8, chroma by 4.
        let luma_stride = frame.stride(0);
        let luma = frame.data(0);
        assert_eq!(luma[10 * luma_stride + 10], ((18 * 4 + 10) % 256) as u8);
        let chroma_stride = frame.stride(1);
        let chroma = frame.data(1);
        assert_eq!(chroma[10 * chroma_stride + 10], ((14 * 4 + 10) % 256) as u8);
    }

    #[test]
    fn sixteen_bit_identity_warp_preserves_pixels() {
        let mut frame = frame::Video::new(ffmpeg_next::format::Pixel::YUV420P10LE, 32, 24);
        let stride = frame.stride(0);
        {
            let data = frame.data_mut(0);
            for y in 0..24 {
                for x in 0..32 {
                    let value = ((x * 30 + y) % 1024) as u16;
                    let offset = y * stride + x * 2;
                    data[offset..offset + 2].copy_from_slice(&value.to_ne_bytes());
                }
            }
        }
        let reference: Vec<u8> = frame.data(0).to_vec();

        let mut warper = FrameWarper::new(32, 24);
        warper
            .apply(&mut frame, &Motion::identity(), 1.0)
            .unwrap();
        assert_eq!(frame.data(0), &reference[..]);
    }
}
