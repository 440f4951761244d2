use std::path::Path;

use tracing::debug;
use vplayer_core::formats;
use vplayer_core::types::{
    AudioCodecTarget, MediaProfile, OutputMode, PlaybackPlan, RemuxRequest, TargetContainer,
    TranscodeRequest, VideoCodecTarget,
};

use crate::{probe, MediaConfig};

/// Video codecs the renderer decodes natively.
pub static DIRECT_VIDEO_CODECS: &[&str] = &["h264", "avc1", "hev1", "hevc"];

/// Audio codecs the renderer decodes natively.
pub static DIRECT_AUDIO_CODECS: &[&str] = &["aac", "mp3", "ac3", "eac3"];

/// Container tokens the renderer accepts over HTTP without repackaging.
pub static DIRECT_CONTAINER_TOKENS: &[&str] =
    &["mov", "mp4", "m4a", "m4v", "ismv", "isom", "dash", "quicktime"];

/// Maps a source to the cheapest plan the renderer can play.
pub struct Planner {
    config: MediaConfig,
}

impl Planner {
    pub fn new(config: MediaConfig) -> Self {
        Self { config }
    }

    /// Probe the source and decide; falls back to the extension heuristic
    /// when the probe is unavailable.
    pub async fn plan(&self, source: &Path) -> PlaybackPlan {
        match probe::probe(&self.config.ffprobe_path, source).await {
            Ok(profile) => {
                let plan = plan_profile(&profile);
                debug!(source = %source.display(), plan = %plan.kind(), "planned playback");
                plan
            }
            Err(e) => {
                debug!(source = %source.display(), error = %e, "probe unavailable, using heuristic plan");
                heuristic_plan(source)
            }
        }
    }

    /// Always transcode, regardless of what the probe says. Used after the
    /// renderer rejects a direct or remuxed stream.
    pub async fn forced_transcode_plan(&self, source: &Path) -> PlaybackPlan {
        match probe::probe(&self.config.ffprobe_path, source).await {
            Ok(profile) => PlaybackPlan::Transcode(transcode_request(&profile)),
            Err(_) => PlaybackPlan::Transcode(fallback_transcode_request(source)),
        }
    }
}

/// Pure decision core; first matching clause wins.
pub fn plan_profile(profile: &MediaProfile) -> PlaybackPlan {
    let video_ok = profile
        .video
        .as_ref()
        .is_some_and(|v| DIRECT_VIDEO_CODECS.contains(&v.codec.as_str()));
    let audio_ok = profile
        .audio
        .iter()
        .any(|a| DIRECT_AUDIO_CODECS.contains(&a.codec.as_str()));
    let container_ok = profile
        .format_tokens()
        .any(|t| DIRECT_CONTAINER_TOKENS.contains(&t));

    if video_ok && audio_ok && container_ok {
        return PlaybackPlan::Direct(profile.source.clone());
    }

    if video_ok && audio_ok && !container_ok {
        let audio_index = profile
            .audio
            .iter()
            .find(|a| DIRECT_AUDIO_CODECS.contains(&a.codec.as_str()))
            .map(|a| a.index);
        return PlaybackPlan::Remux(RemuxRequest {
            source: profile.source.clone(),
            container: TargetContainer::Mp4,
            video_index: profile.video.as_ref().map(|v| v.index),
            audio_index,
            source_video_codec: profile.video.as_ref().map(|v| v.codec.clone()),
        });
    }

    PlaybackPlan::Transcode(transcode_request(profile))
}

fn transcode_request(profile: &MediaProfile) -> TranscodeRequest {
    let (width, height) = profile
        .video
        .as_ref()
        .map(|v| (v.width.unwrap_or(1920), v.height.unwrap_or(1080)))
        .unwrap_or((1920, 1080));
    let long_edge = width.max(height);

    let use_hevc = long_edge >= 1920 || width >= 1920 || height >= 1080;
    let video_codec = if use_hevc {
        VideoCodecTarget::Hevc
    } else {
        VideoCodecTarget::H264
    };

    let kbps = if long_edge >= 3800 {
        if use_hevc { 25_000 } else { 18_000 }
    } else if long_edge >= 2500 {
        if use_hevc { 18_000 } else { 12_000 }
    } else if long_edge >= 1920 {
        if use_hevc { 12_000 } else { 10_000 }
    } else if use_hevc {
        8_000
    } else {
        6_000
    };

    let max_width = video_codec.max_source_width();
    let scale_filter = (width > max_width).then(|| format!("scale={max_width}:-2"));

    TranscodeRequest {
        source: profile.source.clone(),
        video_codec,
        audio_codec: AudioCodecTarget::Aac,
        container: TargetContainer::Mp4,
        video_bitrate: format!("{kbps}k"),
        buffer_size: format!("{}k", kbps * 2),
        audio_bitrate: "192k".into(),
        scale_filter,
        hardware_accel: true,
        // HLS lets playback start before the encode finishes.
        output: OutputMode::Hls,
    }
}

/// Extension-based plan for sources the probe could not read.
fn heuristic_plan(source: &Path) -> PlaybackPlan {
    if formats::prefers_direct(source) {
        return PlaybackPlan::Direct(source.to_path_buf());
    }
    if formats::is_recognized(source) {
        return PlaybackPlan::Remux(RemuxRequest {
            source: source.to_path_buf(),
            container: TargetContainer::Mp4,
            video_index: None,
            audio_index: None,
            source_video_codec: None,
        });
    }
    PlaybackPlan::Transcode(fallback_transcode_request(source))
}

fn fallback_transcode_request(source: &Path) -> TranscodeRequest {
    TranscodeRequest {
        source: source.to_path_buf(),
        video_codec: VideoCodecTarget::H264,
        audio_codec: AudioCodecTarget::Aac,
        container: TargetContainer::Mp4,
        video_bitrate: "10000k".into(),
        buffer_size: "20000k".into(),
        audio_bitrate: "192k".into(),
        scale_filter: None,
        hardware_accel: true,
        output: OutputMode::Hls,
    }
}
