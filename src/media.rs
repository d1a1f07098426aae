//! FFmpeg demux/decode/encode layer.
//!
//! This module owns everything container- and codec-shaped so the pipeline
//! never sees a packet: [`probe`] inspects the input before the pipeline is
//! built, [`analyze`] drives a decode-only pass over the video stream
//! (pass 1 of two-pass operation), and [`Transcoder`] runs the full
//! decode -> stage -> encode loop.
//!
//! Non-video streams are not re-encoded: their packets are copied to the
//! output with timestamps rescaled between stream time bases, so audio and
//! subtitles survive stabilization untouched.

use std::path::Path;

use ffmpeg_next::{
    codec::{self, context::Context as CodecContext},
    decoder, encoder,
    format::{self, context::Input, context::Output},
    frame,
    media::Type,
    picture, Packet, Rational, Rescale,
};
use ffmpeg_sys_next::{av_frame_make_writable, AV_CODEC_FLAG_GLOBAL_HEADER};
use log::{debug, info};

use crate::config::OutputOptions;
use crate::error::StabilizeError;
use crate::pipeline::FrameStage;
use crate::planes::{pixel_name, PlaneLayout};

/// Encoders probed, in order, when no codec is requested explicitly.
pub const DEFAULT_ENCODERS: &[&str] = &["hevc_nvenc", "libx265", "libx264"];

/// Resolve the encoder an [`OutputOptions`] asks for.
fn resolve_encoder(options: &OutputOptions) -> Result<codec::Codec, StabilizeError> {
    match &options.codec {
        Some(name) => encoder::find_by_name(name)
            .ok_or_else(|| StabilizeError::EncoderNotFound(name.clone())),
        None => DEFAULT_ENCODERS
            .iter()
            .find_map(|name| encoder::find_by_name(name))
            .ok_or_else(|| StabilizeError::EncoderNotFound(DEFAULT_ENCODERS.join(", "))),
    }
}

/// Check that the requested encoder exists, without opening anything.
///
/// Two-pass operation decodes the whole input before the encoder is first
/// opened; calling this up front keeps a bad `--codec` from wasting the
/// analysis pass.
///
/// # Errors
///
/// Returns [`StabilizeError::EncoderNotFound`] naming the missing encoder.
pub fn verify_encoder(options: &OutputOptions) -> Result<(), StabilizeError> {
    ffmpeg_next::init()?;
    resolve_encoder(options).map(|_| ())
}

/// Basic facts about the input's video stream, gathered before the
/// pipeline is constructed.
#[derive(Debug, Clone)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    /// Printable pixel format name.
    pub pixel_format: String,
}

/// Open `input` far enough to learn the video stream geometry, and verify
/// the pixel format is one the pipeline can warp.
///
/// # Errors
///
/// Fails early with [`StabilizeError::FileOpen`],
/// [`StabilizeError::NoVideoStream`],
/// [`StabilizeError::UnsupportedPixelFormat`] or
/// [`StabilizeError::UnsupportedInput`] so configuration problems surface
/// before any processing starts.
pub fn probe(input: &Path) -> Result<VideoInfo, StabilizeError> {
    ffmpeg_next::init()?;
    let ictx = format::input(&input).map_err(|error| StabilizeError::FileOpen {
        path: input.to_path_buf(),
        reason: error.to_string(),
    })?;
    let stream = ictx
        .streams()
        .best(Type::Video)
        .ok_or(StabilizeError::NoVideoStream)?;
    let decoder = CodecContext::from_parameters(stream.parameters())?
        .decoder()
        .video()?;

    let (width, height) = (decoder.width(), decoder.height());
    if width == 0 || height == 0 {
        return Err(StabilizeError::UnsupportedInput(
            "video stream reports zero-sized frames".to_string(),
        ));
    }
    // Rejects packed, paletted and deep formats before the first frame.
    PlaneLayout::resolve(decoder.format(), width, height)?;

    Ok(VideoInfo {
        width,
        height,
        pixel_format: pixel_name(decoder.format()),
    })
}

/// Decode-only pass over the video stream, calling `visit` on every frame
/// in order. Returns the number of frames decoded.
///
/// Restarting two-pass operation is simply calling this and then opening a
/// [`Transcoder`] on the same path.
pub fn analyze<F>(input: &Path, mut visit: F) -> Result<u64, StabilizeError>
where
    F: FnMut(&frame::Video) -> Result<(), StabilizeError>,
{
    ffmpeg_next::init()?;
    let mut ictx = format::input(&input).map_err(|error| StabilizeError::FileOpen {
        path: input.to_path_buf(),
        reason: error.to_string(),
    })?;
    let stream = ictx
        .streams()
        .best(Type::Video)
        .ok_or(StabilizeError::NoVideoStream)?;
    let video_index = stream.index();
    let mut decoder = CodecContext::from_parameters(stream.parameters())?
        .decoder()
        .video()?;

    let mut frame = frame::Video::empty();
    let mut count = 0u64;
    for (stream, packet) in ictx.packets() {
        if stream.index() != video_index {
            continue;
        }
        decoder
            .send_packet(&packet)
            .map_err(|error| StabilizeError::DecodeError(error.to_string()))?;
        while decoder.receive_frame(&mut frame).is_ok() {
            visit(&frame)?;
            count += 1;
        }
    }
    decoder
        .send_eof()
        .map_err(|error| StabilizeError::DecodeError(error.to_string()))?;
    while decoder.receive_frame(&mut frame).is_ok() {
        visit(&frame)?;
        count += 1;
    }

    info!("analysis pass decoded {count} frames");
    Ok(count)
}

/// Make a decoded frame safely mutable before warping it in place.
///
/// Decoded frames are reference-counted and may share buffers with the
/// decoder; this forces a private copy when needed.
pub(crate) fn make_frame_writable(frame: &mut frame::Video) -> Result<(), StabilizeError> {
    let status = unsafe { av_frame_make_writable(frame.as_mut_ptr()) };
    if status < 0 {
        return Err(StabilizeError::Ffmpeg(
            ffmpeg_next::Error::from(status).to_string(),
        ));
    }
    Ok(())
}

/// Decode -> stage -> encode runner over one input/output pair.
///
/// The video stream is decoded, handed to a [`FrameStage`], and whatever
/// the stage returns is re-encoded; all other streams are copied through.
pub struct Transcoder {
    ictx: Input,
    octx: Output,
    decoder: decoder::Video,
    encoder: encoder::video::Encoder,
    video_index: usize,
    /// Input time base per stream, for packet passthrough.
    stream_time_bases: Vec<Rational>,
    /// The video stream's input time base (decoded frame pts domain).
    decoder_time_base: Rational,
    encoder_time_base: Rational,
    frames_in: u64,
    frames_out: u64,
}

impl Transcoder {
    /// Open the input, build the encoder and write the output header.
    ///
    /// # Errors
    ///
    /// Configuration problems ([`StabilizeError::EncoderNotFound`], bad
    /// output path) are reported here, before any frame is processed.
    pub fn open(
        input: &Path,
        output: &Path,
        options: &OutputOptions,
    ) -> Result<Self, StabilizeError> {
        ffmpeg_next::init()?;
        let ictx = format::input(&input).map_err(|error| StabilizeError::FileOpen {
            path: input.to_path_buf(),
            reason: error.to_string(),
        })?;

        let input_video = ictx
            .streams()
            .best(Type::Video)
            .ok_or(StabilizeError::NoVideoStream)?;
        let video_index = input_video.index();
        let decoder_time_base = input_video.time_base();
        let decoder = CodecContext::from_parameters(input_video.parameters())?
            .decoder()
            .video()?;

        let frame_rate = {
            let average = input_video.avg_frame_rate();
            if average.numerator() > 0 && average.denominator() > 0 {
                average
            } else {
                input_video.rate()
            }
        };
        let source_bit_rate = unsafe { (*input_video.parameters().as_ptr()).bit_rate };
        drop(input_video);

        let encoder_codec = resolve_encoder(options)?;
        debug!("using encoder {}", encoder_codec.name());

        let mut octx = format::output(&output).map_err(|error| StabilizeError::OutputCreate {
            path: output.to_path_buf(),
            reason: error.to_string(),
        })?;
        let needs_global_header = octx
            .format()
            .flags()
            .contains(format::Flags::GLOBAL_HEADER);

        // Mirror every input stream at the same index: the video stream gets
        // the encoder, everything else copies its codec parameters.
        let mut stream_time_bases = Vec::new();
        for stream in ictx.streams() {
            stream_time_bases.push(stream.time_base());
            if stream.index() == video_index {
                octx.add_stream(encoder_codec)
                    .map_err(|error| StabilizeError::EncodeError(error.to_string()))?;
            } else {
                let mut out_stream = octx
                    .add_stream(encoder::find(codec::Id::None))
                    .map_err(|error| StabilizeError::EncodeError(error.to_string()))?;
                out_stream.set_parameters(stream.parameters());
                // The tag comes from the input container and rarely matches
                // the output one.
                unsafe {
                    (*out_stream.parameters().as_mut_ptr()).codec_tag = 0;
                }
            }
        }

        let encoder_time_base = Rational::new(frame_rate.denominator(), frame_rate.numerator());
        let mut video_encoder = CodecContext::from_parameters(
            octx.stream(video_index)
                .ok_or(StabilizeError::NoVideoStream)?
                .parameters(),
        )?
        .encoder()
        .video()
        .map_err(|error| StabilizeError::EncodeError(error.to_string()))?;

        video_encoder.set_width(decoder.width());
        video_encoder.set_height(decoder.height());
        video_encoder.set_format(decoder.format());
        video_encoder.set_aspect_ratio(decoder.aspect_ratio());
        video_encoder.set_time_base(encoder_time_base);
        video_encoder.set_frame_rate(Some(frame_rate));

        let bit_rate = options
            .bitrate
            .or((source_bit_rate > 0).then_some(source_bit_rate as usize));
        if let Some(bit_rate) = bit_rate {
            video_encoder.set_bit_rate(bit_rate);
        }

        if needs_global_header {
            unsafe {
                (*video_encoder.as_mut_ptr()).flags |= AV_CODEC_FLAG_GLOBAL_HEADER as i32;
            }
        }

        let encoder = video_encoder
            .open_as(encoder_codec)
            .map_err(|error| StabilizeError::EncodeError(format!("cannot open encoder: {error}")))?;
        octx.stream_mut(video_index)
            .ok_or(StabilizeError::NoVideoStream)?
            .set_parameters(&encoder);

        octx.write_header()
            .map_err(|error| StabilizeError::EncodeError(format!("cannot write header: {error}")))?;

        Ok(Self {
            ictx,
            octx,
            decoder,
            encoder,
            video_index,
            stream_time_bases,
            decoder_time_base,
            encoder_time_base,
            frames_in: 0,
            frames_out: 0,
        })
    }

    /// Run the full transcode, driving `stage` for every video frame.
    ///
    /// # Errors
    ///
    /// Decode errors, stage errors and encoder/muxer errors all abort the
    /// run; partial output may exist.
    pub fn run<S: FrameStage>(mut self, stage: &mut S) -> Result<(), StabilizeError> {
        let mut packet = Packet::empty();
        loop {
            match packet.read(&mut self.ictx) {
                Ok(()) => {}
                Err(ffmpeg_next::Error::Eof) => break,
                // Transient demux errors: skip to the next packet.
                Err(_) => continue,
            }

            let index = packet.stream();
            if index == self.video_index {
                self.decoder
                    .send_packet(&packet)
                    .map_err(|error| StabilizeError::DecodeError(error.to_string()))?;
                self.receive_and_process(stage)?;
            } else if index < self.stream_time_bases.len() {
                self.copy_packet(&mut packet, index)?;
            }
        }

        // Drain the decoder, then the stage, then the encoder.
        self.decoder
            .send_eof()
            .map_err(|error| StabilizeError::DecodeError(error.to_string()))?;
        self.receive_and_process(stage)?;

        for frame in stage.finish()? {
            self.encode_frame(frame)?;
        }

        self.encoder
            .send_eof()
            .map_err(|error| StabilizeError::EncodeError(error.to_string()))?;
        self.drain_encoder()?;

        self.octx
            .write_trailer()
            .map_err(|error| StabilizeError::EncodeError(error.to_string()))?;

        info!(
            "decoded {} frames, encoded {} frames",
            self.frames_in, self.frames_out
        );
        Ok(())
    }

    fn receive_and_process<S: FrameStage>(&mut self, stage: &mut S) -> Result<(), StabilizeError> {
        let mut frame = frame::Video::empty();
        while self.decoder.receive_frame(&mut frame).is_ok() {
            self.frames_in += 1;
            let taken = std::mem::replace(&mut frame, frame::Video::empty());
            for ready in stage.process(taken)? {
                self.encode_frame(ready)?;
            }
        }
        Ok(())
    }

    fn encode_frame(&mut self, mut frame: frame::Video) -> Result<(), StabilizeError> {
        match frame.pts() {
            Some(pts) => {
                frame.set_pts(Some(pts.rescale(self.decoder_time_base, self.encoder_time_base)));
            }
            // Streams without timestamps: count frames instead.
            None => frame.set_pts(Some(self.frames_out as i64)),
        }
        // Let the encoder choose its own GOP structure.
        frame.set_kind(picture::Type::None);

        self.encoder
            .send_frame(&frame)
            .map_err(|error| StabilizeError::EncodeError(error.to_string()))?;
        self.drain_encoder()?;

        self.frames_out += 1;
        if self.frames_out % 250 == 0 {
            info!("encoded {} frames", self.frames_out);
        }
        Ok(())
    }

    fn drain_encoder(&mut self) -> Result<(), StabilizeError> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.video_index);
            let output_time_base = self
                .octx
                .stream(self.video_index)
                .ok_or(StabilizeError::NoVideoStream)?
                .time_base();
            packet.rescale_ts(self.encoder_time_base, output_time_base);
            packet
                .write_interleaved(&mut self.octx)
                .map_err(|error| StabilizeError::EncodeError(error.to_string()))?;
        }
        Ok(())
    }

    fn copy_packet(&mut self, packet: &mut Packet, index: usize) -> Result<(), StabilizeError> {
        let output_time_base = self
            .octx
            .stream(index)
            .ok_or_else(|| {
                StabilizeError::EncodeError(format!("output has no stream {index}"))
            })?
            .time_base();
        packet.rescale_ts(self.stream_time_bases[index], output_time_base);
        packet.set_position(-1);
        packet
            .write_interleaved(&mut self.octx)
            .map_err(|error| StabilizeError::EncodeError(error.to_string()))?;
        Ok(())
    }
}
