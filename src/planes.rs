//! Pixel-format plane layout.
//!
//! The warper and the work-frame provider both need to know, for a given
//! pixel format, how many planes a frame has, how deep their samples are and
//! how chroma planes are sub-sampled. `ffmpeg-next` does not surface the
//! pixel-format descriptor, so this module reads it through the raw
//! bindings.

use std::ffi::CStr;

use ffmpeg_next::format::Pixel;
use ffmpeg_sys_next::{
    av_get_pix_fmt_name, av_pix_fmt_count_planes, av_pix_fmt_desc_get, AVPixelFormat,
    AV_PIX_FMT_FLAG_BITSTREAM, AV_PIX_FMT_FLAG_HWACCEL, AV_PIX_FMT_FLAG_PAL,
    AV_PIX_FMT_FLAG_RGB,
};

use crate::error::StabilizeError;

/// Geometry and depth of a single frame plane.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PlaneInfo {
    pub width: usize,
    pub height: usize,
    /// Bits per sample, 8..=16.
    pub depth: u32,
}

impl PlaneInfo {
    /// True when samples are stored as one byte, false for two.
    pub fn is_eight_bit(&self) -> bool {
        self.depth == 8
    }
}

/// Per-plane layout of a video frame in a supported pixel format.
#[derive(Debug, Clone)]
pub(crate) struct PlaneLayout {
    pub planes: Vec<PlaneInfo>,
}

/// Printable name of a pixel format, for error messages.
pub(crate) fn pixel_name(format: Pixel) -> String {
    let av: AVPixelFormat = format.into();
    unsafe {
        let name = av_get_pix_fmt_name(av);
        if name.is_null() {
            format!("{format:?}")
        } else {
            CStr::from_ptr(name).to_string_lossy().into_owned()
        }
    }
}

impl PlaneLayout {
    /// Resolve the plane layout for `format` at the given frame size.
    ///
    /// # Errors
    ///
    /// Returns [`StabilizeError::UnsupportedPixelFormat`] for packed, RGB,
    /// paletted, bitstream or hardware formats, and for sample depths
    /// outside 8..=16 bits.
    pub fn resolve(format: Pixel, width: u32, height: u32) -> Result<Self, StabilizeError> {
        let av: AVPixelFormat = format.into();
        let descriptor = unsafe { av_pix_fmt_desc_get(av) };
        if descriptor.is_null() {
            return Err(StabilizeError::UnsupportedPixelFormat(format!(
                "{format:?} has no descriptor"
            )));
        }
        let descriptor = unsafe { &*descriptor };

        let rejected = (AV_PIX_FMT_FLAG_RGB
            | AV_PIX_FMT_FLAG_HWACCEL
            | AV_PIX_FMT_FLAG_PAL
            | AV_PIX_FMT_FLAG_BITSTREAM) as u64;
        if descriptor.flags & rejected != 0 {
            return Err(StabilizeError::UnsupportedPixelFormat(format!(
                "{} is not a planar YUV format",
                pixel_name(format)
            )));
        }

        let components = descriptor.nb_components as usize;
        let plane_count = unsafe { av_pix_fmt_count_planes(av) };
        if components == 0 || plane_count <= 0 {
            return Err(StabilizeError::UnsupportedPixelFormat(pixel_name(format)));
        }

        let mut planes = Vec::with_capacity(plane_count as usize);
        for plane in 0..plane_count {
            let component = descriptor.comp[..components]
                .iter()
                .find(|c| c.plane == plane)
                .ok_or_else(|| {
                    StabilizeError::UnsupportedPixelFormat(format!(
                        "{} has no component on plane {plane}",
                        pixel_name(format)
                    ))
                })?;

            let depth = component.depth as u32;
            if !(8..=16).contains(&depth) {
                return Err(StabilizeError::UnsupportedPixelFormat(format!(
                    "{} has {depth}-bit samples",
                    pixel_name(format)
                )));
            }
            // One sample per step means the plane holds a single component;
            // anything else is a packed layout.
            let bytes = if depth > 8 { 2 } else { 1 };
            if component.step != bytes {
                return Err(StabilizeError::UnsupportedPixelFormat(format!(
                    "{} interleaves components within a plane",
                    pixel_name(format)
                )));
            }

            // Planes 1 and 2 are the chroma pair in every planar YUV layout;
            // the luma plane and a trailing alpha plane are full resolution.
            let chroma = plane == 1 || plane == 2;
            let (w, h) = if chroma {
                (
                    ceil_shift(width as usize, descriptor.log2_chroma_w),
                    ceil_shift(height as usize, descriptor.log2_chroma_h),
                )
            } else {
                (width as usize, height as usize)
            };
            planes.push(PlaneInfo {
                width: w,
                height: h,
                depth,
            });
        }

        // Component 0 must live on plane 0 for the luminance extraction to
        // make sense.
        if descriptor.comp[0].plane != 0 {
            return Err(StabilizeError::UnsupportedPixelFormat(format!(
                "{} has no leading luminance plane",
                pixel_name(format)
            )));
        }

        Ok(Self { planes })
    }

    /// The luminance plane.
    pub fn luma(&self) -> &PlaneInfo {
        &self.planes[0]
    }
}

fn ceil_shift(value: usize, shift: u8) -> usize {
    (value + (1 << shift) - 1) >> shift
}
