//! Command-line entry point for the stabilizer.

use std::path::PathBuf;

use clap::Parser;
use ffmpeg_next::util::log::Level as FfmpegLevel;
use log::info;

use steadify::{
    media, parse_bitrate, IgnoreRect, OutputOptions, StabilizationOptions, StabilizeError,
    Stabilizer, ZoomMode,
};

#[derive(Parser, Debug)]
#[command(
    name = "steadify",
    version,
    about = "Stabilize shaky video by motion estimation, trajectory smoothing and sub-pixel warping"
)]
struct Cli {
    /// Input video file
    input: PathBuf,

    /// Output video file
    output: PathBuf,

    /// Target output bitrate, e.g. 4500k or 8M; 0 copies the source rate
    #[arg(long, value_name = "N{k,M,G}", default_value = "0")]
    bitrate: String,

    /// Encoder for the output video stream
    #[arg(long, default_value = "libx265")]
    codec: String,

    /// Work-frame downscale factor [default: 1 + min(H, W)/1000]
    #[arg(long, value_name = "N")]
    downscale: Option<usize>,

    /// Minimum static zoom (>= 1)
    #[arg(long, default_value_t = 1.0)]
    prezoom: f64,

    /// Enable two-pass zoom planning (no exposed borders)
    #[arg(long)]
    autozoom: bool,

    /// Maximum per-frame zoom ratio (>= 1)
    #[arg(long = "zoom_speed", default_value_t = 1.0002)]
    zoom_speed: f64,

    /// Horizontal smoothing window, in frames
    #[arg(long = "x_smooth", value_name = "FRAMES")]
    x_smooth: Option<usize>,

    /// Vertical smoothing window, in frames
    #[arg(long = "y_smooth", value_name = "FRAMES")]
    y_smooth: Option<usize>,

    /// Scale smoothing window, in frames
    #[arg(long = "scale_smooth", value_name = "FRAMES")]
    scale_smooth: Option<usize>,

    /// Rotation smoothing window, in frames
    #[arg(long = "alpha_smooth", value_name = "FRAMES")]
    alpha_smooth: Option<usize>,

    /// Confidence threshold below which a frame counts as a scene cut
    #[arg(long = "scene_cut_threshold")]
    scene_cut_threshold: Option<f64>,

    /// Block-matching tile size, in work-frame pixels
    #[arg(long = "block_size")]
    block_size: Option<usize>,

    /// Maximum block displacement searched (<= block_size / 2)
    #[arg(long = "max_shift")]
    max_shift: Option<usize>,

    /// Largest rotation (radians) the estimator may report
    #[arg(long = "max_alpha")]
    max_alpha: Option<f64>,

    /// Largest scale ratio the estimator may report
    #[arg(long = "max_scale")]
    max_scale: Option<f64>,

    /// Region excluded from motion estimation; repeatable
    #[arg(long, value_name = "X, Y, W, H")]
    ignore: Vec<String>,

    /// Dump grayscale work frames as PNGs next to the output
    #[arg(long)]
    debug: bool,

    /// Verbose logging (pipeline and FFmpeg diagnostics)
    #[arg(long)]
    verbose: bool,

    /// Draw the applied correction into output frames
    #[arg(long = "debug_imprint")]
    debug_imprint: bool,
}

/// Resolve CLI flags into validated pipeline and output options.
fn build_options(cli: &Cli) -> Result<(StabilizationOptions, OutputOptions), StabilizeError> {
    let mut options = StabilizationOptions::default();
    if let Some(value) = cli.x_smooth {
        options.x_smooth = value;
    }
    if let Some(value) = cli.y_smooth {
        options.y_smooth = value;
    }
    if let Some(value) = cli.scale_smooth {
        options.scale_smooth = value;
    }
    if let Some(value) = cli.alpha_smooth {
        options.alpha_smooth = value;
    }
    if let Some(value) = cli.scene_cut_threshold {
        options.scene_cut_threshold = value;
    }
    if let Some(value) = cli.block_size {
        options.block_size = value;
    }
    if let Some(value) = cli.max_shift {
        options.max_shift = value;
    }
    if let Some(value) = cli.max_alpha {
        options.max_alpha = value;
    }
    if let Some(value) = cli.max_scale {
        options.max_scale = value;
    }
    options.downscale = cli.downscale;
    options.prezoom = cli.prezoom;
    options.zoom_speed = cli.zoom_speed;
    options.zoom_mode = if cli.autozoom {
        ZoomMode::TwoPass
    } else {
        ZoomMode::Static
    };
    for text in &cli.ignore {
        options.ignore.push(IgnoreRect::parse(text)?);
    }
    options.validate()?;

    let output = OutputOptions {
        codec: Some(cli.codec.clone()),
        bitrate: parse_bitrate(&cli.bitrate)?,
    };
    Ok((options, output))
}

fn run(cli: &Cli) -> Result<(), StabilizeError> {
    let (options, output_options) = build_options(cli)?;
    media::verify_encoder(&output_options)?;

    let dump_dir = if cli.debug {
        let dir = cli.output.with_extension("workframes");
        std::fs::create_dir_all(&dir)?;
        Some(dir)
    } else {
        None
    };

    let info = media::probe(&cli.input)?;
    info!(
        "input: {}x{} {} -> {}",
        info.width,
        info.height,
        info.pixel_format,
        cli.output.display(),
    );

    let mut stabilizer = Stabilizer::new(options, info.width, info.height)?
        .with_diagnostics(dump_dir, cli.debug_imprint);

    if cli.autozoom {
        media::analyze(&cli.input, |frame| stabilizer.preprocess(frame))?;
        stabilizer.plan_autozoom()?;
    }

    media::Transcoder::open(&cli.input, &cli.output, &output_options)?.run(&mut stabilizer)?;
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose || cli.debug {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp(None)
        .init();
    ffmpeg_next::util::log::set_level(if cli.verbose {
        FfmpegLevel::Info
    } else {
        FfmpegLevel::Error
    });

    if let Err(error) = run(&cli) {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}
