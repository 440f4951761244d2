//! Argument vectors for the external processor.
//!
//! Kept as pure functions so the exact command lines stay testable without
//! spawning anything.

use std::path::Path;

use vplayer_core::types::{
    is_hevc_codec, OutputMode, RemuxRequest, TranscodeRequest, VideoCodecTarget,
};

use crate::gpu::{encoder_name, HwAccel};

/// Output filename for single-file jobs.
pub const OUTPUT_FILE: &str = "output.mp4";

/// Playlist filename for HLS jobs.
pub const HLS_PLAYLIST: &str = "master.m3u8";

/// Segment filename pattern for HLS jobs.
pub const HLS_SEGMENT_PATTERN: &str = "segment_%05d.ts";

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Stream-copy repackaging into `<scratch>/output.mp4`.
///
/// Explicit indices from the probe are absolute within the input; without
/// them the default selectors `0:v:0` and `0:a:0?` apply (the `?` keeps
/// audio optional).
pub fn remux_args(req: &RemuxRequest, scratch: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "warning".into(),
        "-y".into(),
        "-i".into(),
        path_arg(&req.source),
    ];

    match req.video_index {
        Some(i) => args.extend(["-map".into(), format!("0:{i}")]),
        None => args.extend(["-map".into(), "0:v:0".into()]),
    }
    match req.audio_index {
        Some(i) => args.extend(["-map".into(), format!("0:{i}")]),
        None => args.extend(["-map".into(), "0:a:0?".into()]),
    }

    args.extend([
        "-c:v".into(),
        "copy".into(),
        "-c:a".into(),
        "copy".into(),
        "-movflags".into(),
        "faststart".into(),
    ]);

    // HEVC in MP4 needs the hvc1 sample entry for the renderer to accept it.
    if req
        .source_video_codec
        .as_deref()
        .is_some_and(is_hevc_codec)
    {
        args.extend(["-tag:v".into(), "hvc1".into()]);
    }

    args.push(path_arg(&scratch.join(OUTPUT_FILE)));
    args
}

/// Re-encode into either a progressive MP4 or an HLS event playlist.
pub fn transcode_args(req: &TranscodeRequest, scratch: &Path, hw: Option<HwAccel>) -> Vec<String> {
    let hw = if req.hardware_accel { hw } else { None };

    let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "info".into()];
    if let Some(accel) = hw {
        args.extend(accel.input_flags());
    }
    args.extend([
        "-y".into(),
        "-i".into(),
        path_arg(&req.source),
        "-map".into(),
        "0:v:0".into(),
        "-map".into(),
        "0:a:0?".into(),
    ]);

    args.extend(["-c:v".into(), encoder_name(req.video_codec, hw)]);
    args.extend([
        "-b:v".into(),
        req.video_bitrate.clone(),
        "-maxrate".into(),
        req.video_bitrate.clone(),
        "-bufsize".into(),
        req.buffer_size.clone(),
        "-pix_fmt".into(),
        "yuv420p".into(),
    ]);

    if req.video_codec == VideoCodecTarget::Hevc {
        args.extend(["-tag:v".into(), "hvc1".into()]);
    }
    if let Some(filter) = &req.scale_filter {
        args.extend(["-vf".into(), filter.clone()]);
    }

    args.extend([
        "-c:a".into(),
        req.audio_codec.as_str().into(),
        "-b:a".into(),
        req.audio_bitrate.clone(),
    ]);

    match req.output {
        OutputMode::Progressive => {
            args.extend([
                "-movflags".into(),
                "faststart".into(),
                path_arg(&scratch.join(OUTPUT_FILE)),
            ]);
        }
        OutputMode::Hls => {
            args.extend([
                "-f".into(),
                "hls".into(),
                "-hls_time".into(),
                "4".into(),
                "-hls_playlist_type".into(),
                "event".into(),
                "-hls_flags".into(),
                "independent_segments+append_list".into(),
                "-hls_segment_filename".into(),
                path_arg(&scratch.join(HLS_SEGMENT_PATTERN)),
                path_arg(&scratch.join(HLS_PLAYLIST)),
            ]);
        }
    }

    args
}
