//! Stabilization and output configuration.
//!
//! [`StabilizationOptions`] collects every tunable of the pipeline:
//! smoothing windows, estimator geometry, motion clamps, zoom planning and
//! ignore regions. Options are immutable once handed to the pipeline;
//! [`StabilizationOptions::validate`] rejects inconsistent values before any
//! frame is read.
//!
//! # Example
//!
//! ```
//! use steadify::{StabilizationOptions, ZoomMode};
//!
//! let options = StabilizationOptions::new()
//!     .with_smoothing(45, 45, 60, 60)
//!     .with_zoom_mode(ZoomMode::TwoPass);
//! options.validate().unwrap();
//! ```

use crate::error::StabilizeError;

/// How the per-frame zoom factor is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZoomMode {
    /// Constant zoom equal to `prezoom`. This is the default.
    #[default]
    Static,
    /// Incremental zoom chosen frame by frame, bounded by `zoom_speed`.
    Dynamic,
    /// Two-pass planning: pass 1 collects the whole trajectory, pass 2
    /// applies a per-frame zoom that guarantees full output coverage.
    TwoPass,
}

/// A rectangle excluded from motion estimation, in source-resolution pixels.
///
/// Parsed from the CLI syntax `"x, y, w, h"` and downscaled to work-frame
/// coordinates at use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IgnoreRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl IgnoreRect {
    /// Parse the `"x, y, w, h"` CLI syntax. Separators are commas with
    /// optional surrounding whitespace.
    pub fn parse(text: &str) -> Result<Self, StabilizeError> {
        let parts: Vec<&str> = text.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(StabilizeError::InvalidConfig(format!(
                "ignore rectangle '{text}' must have four components 'x, y, w, h'"
            )));
        }
        let mut values = [0u32; 4];
        for (slot, part) in values.iter_mut().zip(&parts) {
            *slot = part.parse().map_err(|_| {
                StabilizeError::InvalidConfig(format!(
                    "ignore rectangle '{text}' has non-integer component '{part}'"
                ))
            })?;
        }
        Ok(Self {
            x: values[0],
            y: values[1],
            w: values[2],
            h: values[3],
        })
    }

    /// The rectangle in work-frame coordinates.
    pub(crate) fn downscaled(&self, factor: usize) -> IgnoreRect {
        let factor = factor as u32;
        IgnoreRect {
            x: self.x / factor,
            y: self.y / factor,
            w: self.w / factor,
            h: self.h / factor,
        }
    }

    /// True when `[x0, x1) x [y0, y1)` overlaps this rectangle.
    pub(crate) fn intersects(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> bool {
        let (rx0, ry0) = (self.x as usize, self.y as usize);
        let (rx1, ry1) = (rx0 + self.w as usize, ry0 + self.h as usize);
        x0 < rx1 && rx0 < x1 && y0 < ry1 && ry0 < y1
    }
}

/// All tunables of the stabilization pipeline.
///
/// Smoothing windows are half-widths: a window of `n` averages over
/// `2n + 1` samples centred on the frame.
#[derive(Debug, Clone)]
pub struct StabilizationOptions {
    /// Horizontal smoothing half-width, in frames.
    pub x_smooth: usize,
    /// Vertical smoothing half-width, in frames.
    pub y_smooth: usize,
    /// Scale smoothing half-width, in frames.
    pub scale_smooth: usize,
    /// Rotation smoothing half-width, in frames.
    pub alpha_smooth: usize,
    /// Block-matching tile size in work-frame pixels.
    pub block_size: usize,
    /// Maximum block displacement searched, per axis.
    pub max_shift: usize,
    /// Largest rotation (radians) the estimator will report.
    pub max_alpha: f64,
    /// Largest scale ratio the estimator will report (clamped to
    /// `[1/max_scale, max_scale]`).
    pub max_scale: f64,
    /// Minimum inlier weight fraction below which a frame is treated as a
    /// scene cut.
    pub scene_cut_threshold: f64,
    /// Work-frame downscale factor; `None` selects `1 + min(H, W) / 1000`.
    pub downscale: Option<usize>,
    /// Minimum static zoom applied to every frame.
    pub prezoom: f64,
    /// Maximum per-frame zoom ratio in dynamic and two-pass modes.
    pub zoom_speed: f64,
    /// Zoom planning mode.
    pub zoom_mode: ZoomMode,
    /// Regions excluded from the motion fit, source-resolution pixels.
    pub ignore: Vec<IgnoreRect>,
}

impl Default for StabilizationOptions {
    fn default() -> Self {
        Self {
            x_smooth: 30,
            y_smooth: 30,
            scale_smooth: 45,
            alpha_smooth: 45,
            block_size: 16,
            max_shift: 8,
            max_alpha: 0.1,
            max_scale: 1.1,
            scene_cut_threshold: 0.25,
            downscale: None,
            prezoom: 1.0,
            zoom_speed: 1.0002,
            zoom_mode: ZoomMode::Static,
            ignore: Vec::new(),
        }
    }
}

impl StabilizationOptions {
    /// Create options with the default tuning.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set all four smoothing half-widths.
    #[must_use]
    pub fn with_smoothing(mut self, x: usize, y: usize, scale: usize, alpha: usize) -> Self {
        self.x_smooth = x;
        self.y_smooth = y;
        self.scale_smooth = scale;
        self.alpha_smooth = alpha;
        self
    }

    /// Set the estimator block geometry.
    #[must_use]
    pub fn with_block_geometry(mut self, block_size: usize, max_shift: usize) -> Self {
        self.block_size = block_size;
        self.max_shift = max_shift;
        self
    }

    /// Set the zoom planning mode.
    #[must_use]
    pub fn with_zoom_mode(mut self, mode: ZoomMode) -> Self {
        self.zoom_mode = mode;
        self
    }

    /// Add a region to exclude from motion estimation.
    #[must_use]
    pub fn with_ignore_rect(mut self, rect: IgnoreRect) -> Self {
        self.ignore.push(rect);
        self
    }

    /// Reject inconsistent option combinations.
    ///
    /// # Errors
    ///
    /// Returns [`StabilizeError::InvalidConfig`] naming the offending value.
    pub fn validate(&self) -> Result<(), StabilizeError> {
        if self.block_size < 8 {
            return Err(StabilizeError::InvalidConfig(format!(
                "block_size must be at least 8, got {}",
                self.block_size
            )));
        }
        if self.max_shift == 0 || self.max_shift > self.block_size / 2 {
            return Err(StabilizeError::InvalidConfig(format!(
                "max_shift must be in 1..={}, got {}",
                self.block_size / 2,
                self.max_shift
            )));
        }
        for (name, window) in [
            ("x_smooth", self.x_smooth),
            ("y_smooth", self.y_smooth),
            ("scale_smooth", self.scale_smooth),
            ("alpha_smooth", self.alpha_smooth),
        ] {
            if window == 0 {
                return Err(StabilizeError::InvalidConfig(format!(
                    "{name} must be at least 1"
                )));
            }
        }
        if self.max_alpha < 0.0 {
            return Err(StabilizeError::InvalidConfig(format!(
                "max_alpha must be non-negative, got {}",
                self.max_alpha
            )));
        }
        if self.max_scale < 1.0 {
            return Err(StabilizeError::InvalidConfig(format!(
                "max_scale must be at least 1, got {}",
                self.max_scale
            )));
        }
        if self.scene_cut_threshold < 0.0 {
            return Err(StabilizeError::InvalidConfig(format!(
                "scene_cut_threshold must be non-negative, got {}",
                self.scene_cut_threshold
            )));
        }
        if self.downscale == Some(0) {
            return Err(StabilizeError::InvalidConfig(
                "downscale must be at least 1".to_string(),
            ));
        }
        if self.prezoom < 1.0 {
            return Err(StabilizeError::InvalidConfig(format!(
                "prezoom must be at least 1, got {}",
                self.prezoom
            )));
        }
        if self.zoom_speed < 1.0 {
            return Err(StabilizeError::InvalidConfig(format!(
                "zoom_speed must be at least 1, got {}",
                self.zoom_speed
            )));
        }
        Ok(())
    }

    /// The largest smoothing half-width, which is the smoother's lookahead.
    pub(crate) fn max_window(&self) -> usize {
        self.x_smooth
            .max(self.y_smooth)
            .max(self.scale_smooth)
            .max(self.alpha_smooth)
    }
}

/// Output encoding settings resolved from the CLI.
#[derive(Debug, Clone, Default)]
pub struct OutputOptions {
    /// Encoder name; `None` probes the default preference list.
    pub codec: Option<String>,
    /// Target bit rate in bits per second; `None` copies the source rate.
    pub bitrate: Option<usize>,
}

/// Parse a bitrate string of the form `<N>`, `<N>k`, `<N>M` or `<N>G`.
///
/// `"0"` means "copy the source bit rate" and maps to `None`.
///
/// # Errors
///
/// Returns [`StabilizeError::InvalidConfig`] for empty strings, unknown
/// suffixes or non-numeric prefixes.
pub fn parse_bitrate(text: &str) -> Result<Option<usize>, StabilizeError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(StabilizeError::InvalidConfig(
            "bitrate must not be empty".to_string(),
        ));
    }

    let (digits, multiplier) = match text.as_bytes()[text.len() - 1] {
        b'k' | b'K' => (&text[..text.len() - 1], 1_000),
        b'M' => (&text[..text.len() - 1], 1_000_000),
        b'G' => (&text[..text.len() - 1], 1_000_000_000),
        b'0'..=b'9' => (text, 1),
        other => {
            return Err(StabilizeError::InvalidConfig(format!(
                "bitrate '{text}' has unknown suffix '{}'",
                other as char
            )))
        }
    };

    let value: usize = digits.parse().map_err(|_| {
        StabilizeError::InvalidConfig(format!("bitrate '{text}' is not a number"))
    })?;

    if value == 0 {
        Ok(None)
    } else {
        Ok(Some(value * multiplier))
    }
}
