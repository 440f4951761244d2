use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Stream classification reported by the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Video,
    Audio,
    Other,
}

/// A single elementary stream inside a probed file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaStreamInfo {
    pub kind: StreamKind,
    /// Codec name, lowercase (e.g. `h264`, `aac`).
    pub codec: String,
    pub profile: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub channels: Option<u32>,
    pub sample_rate: Option<u32>,
    pub bitrate_kbps: Option<u32>,
    /// Absolute stream index within the container.
    pub index: u32,
}

/// Probe result for one source file.
///
/// At most one video stream is the primary; audio streams keep probe order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaProfile {
    pub source: PathBuf,
    /// Comma-separated container token list as reported by the probe,
    /// e.g. `"mov,mp4,m4a"` or `"matroska,webm"`.
    pub format_name: String,
    pub video: Option<MediaStreamInfo>,
    pub audio: Vec<MediaStreamInfo>,
}

impl MediaProfile {
    pub fn format_tokens(&self) -> impl Iterator<Item = &str> {
        self.format_name.split(',').map(str::trim)
    }
}

/// How the renderer gets to consume a source.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackPlan {
    /// The renderer accepts the source file unchanged.
    Direct(PathBuf),
    /// Repackage into MP4 without touching the bitstreams.
    Remux(RemuxRequest),
    /// Re-encode with the parameters chosen by the planner.
    Transcode(TranscodeRequest),
}

impl PlaybackPlan {
    pub fn kind(&self) -> PlanKind {
        match self {
            Self::Direct(_) => PlanKind::Direct,
            Self::Remux(_) => PlanKind::Remux,
            Self::Transcode(_) => PlanKind::Transcode,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    Direct,
    Remux,
    Transcode,
}

impl PlanKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Remux => "remux",
            Self::Transcode => "transcode",
        }
    }
}

impl std::fmt::Display for PlanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Container repackaging job, no codec change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemuxRequest {
    pub source: PathBuf,
    pub container: TargetContainer,
    /// Absolute stream index from the probe; `None` falls back to the
    /// processor's default selector.
    pub video_index: Option<u32>,
    pub audio_index: Option<u32>,
    /// Source video codec name, used to emit compatibility tags.
    pub source_video_codec: Option<String>,
}

/// Re-encode job with planner-chosen parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeRequest {
    pub source: PathBuf,
    pub video_codec: VideoCodecTarget,
    pub audio_codec: AudioCodecTarget,
    pub container: TargetContainer,
    /// Rate strings in the processor's own format, e.g. `"10000k"`.
    pub video_bitrate: String,
    pub buffer_size: String,
    pub audio_bitrate: String,
    /// Processor filter expression, e.g. `"scale=3840:-2"`.
    pub scale_filter: Option<String>,
    pub hardware_accel: bool,
    pub output: OutputMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoCodecTarget {
    H264,
    Hevc,
}

impl VideoCodecTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::Hevc => "hevc",
        }
    }

    /// Widest source the codec target is allowed to carry before the planner
    /// inserts a downscale filter.
    pub fn max_source_width(self) -> u32 {
        match self {
            Self::H264 => 1920,
            Self::Hevc => 3840,
        }
    }
}

impl std::fmt::Display for VideoCodecTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioCodecTarget {
    Aac,
    Ac3,
}

impl AudioCodecTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aac => "aac",
            Self::Ac3 => "ac3",
        }
    }
}

impl std::fmt::Display for AudioCodecTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output containers the processor is asked to author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetContainer {
    Mp4,
}

/// Shape of the materialized output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Single progressive MP4, ready only once the processor exits.
    Progressive,
    /// Segmented playlist, ready as soon as the first segment is recorded.
    Hls,
}

/// Codec names the probe may report for HEVC bitstreams.
pub fn is_hevc_codec(name: &str) -> bool {
    matches!(name, "hevc" | "hev1" | "hvc1")
}
