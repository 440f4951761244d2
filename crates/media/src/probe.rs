use std::path::Path;

use vplayer_core::types::{MediaProfile, MediaStreamInfo, StreamKind};

use crate::ProbeError;

/// Run the external probe on a file and build its [`MediaProfile`].
///
/// The inspector keeps no state between calls; every invocation spawns a
/// fresh probe process.
pub async fn probe(ffprobe_path: &Path, source: &Path) -> Result<MediaProfile, ProbeError> {
    let output = tokio::process::Command::new(ffprobe_path)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(source)
        .output()
        .await
        .map_err(|e| ProbeError::Unavailable(format!("spawn failed: {e}")))?;

    if !output.status.success() {
        return Err(ProbeError::Unavailable(format!(
            "probe exited with {}",
            output.status
        )));
    }

    let raw: serde_json::Value = serde_json::from_slice(&output.stdout)
        .map_err(|e| ProbeError::Unavailable(format!("parse JSON: {e}")))?;

    parse_probe_output(source, &raw)
}

fn parse_probe_output(source: &Path, raw: &serde_json::Value) -> Result<MediaProfile, ProbeError> {
    let format = raw
        .get("format")
        .ok_or_else(|| ProbeError::Unavailable("missing 'format'".into()))?;

    let format_name = format
        .get("format_name")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let streams = raw
        .get("streams")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    let mut video = None;
    let mut audio = Vec::new();

    for s in &streams {
        let codec_type = s.get("codec_type").and_then(|v| v.as_str()).unwrap_or("");
        let kind = match codec_type {
            "video" => StreamKind::Video,
            "audio" => StreamKind::Audio,
            _ => StreamKind::Other,
        };
        let index = s.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        let codec = s
            .get("codec_name")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_ascii_lowercase();
        let profile = s
            .get("profile")
            .and_then(|v| v.as_str())
            .map(|p| p.to_string());

        let info = MediaStreamInfo {
            kind,
            codec,
            profile,
            width: num_field(s, "width").map(|n| n as u32),
            height: num_field(s, "height").map(|n| n as u32),
            channels: num_field(s, "channels").map(|n| n as u32),
            sample_rate: num_field(s, "sample_rate").map(|n| n as u32),
            bitrate_kbps: num_field(s, "bit_rate").map(|b| (b / 1000) as u32),
            index,
        };

        match kind {
            StreamKind::Video => {
                // First video stream is the primary.
                if video.is_none() {
                    video = Some(info);
                }
            }
            StreamKind::Audio => audio.push(info),
            StreamKind::Other => {}
        }
    }

    Ok(MediaProfile {
        source: source.to_path_buf(),
        format_name,
        video,
        audio,
    })
}

/// Numeric probe fields arrive either as JSON numbers or as decimal strings;
/// anything unparseable falls back to `None`.
fn num_field(stream: &serde_json::Value, key: &str) -> Option<u64> {
    let v = stream.get(key)?;
    v.as_u64().or_else(|| v.as_str()?.parse().ok())
}
