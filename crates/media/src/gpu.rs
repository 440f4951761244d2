//! Hardware encoder discovery.
//!
//! The planner always asks for hardware encoding; whether a job actually
//! gets it depends on which accelerated encoders the local processor build
//! ships for the codec target being encoded.

use std::path::Path;

use tracing::info;

use vplayer_core::types::VideoCodecTarget;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwAccel {
    Nvenc,
    Vaapi,
    Qsv,
    VideoToolbox,
}

/// Selection order when more than one accelerator ships an encoder.
const PREFERENCE: [HwAccel; 4] = [
    HwAccel::Nvenc,
    HwAccel::Qsv,
    HwAccel::Vaapi,
    HwAccel::VideoToolbox,
];

impl HwAccel {
    /// Decoder-side flags, inserted right after the processor's log flags.
    pub fn input_flags(self) -> Vec<String> {
        match self {
            Self::Nvenc => vec!["-hwaccel".into(), "cuda".into()],
            Self::Vaapi => vec![
                "-hwaccel".into(),
                "vaapi".into(),
                "-hwaccel_output_format".into(),
                "vaapi".into(),
                "-vaapi_device".into(),
                "/dev/dri/renderD128".into(),
            ],
            Self::Qsv => vec!["-hwaccel".into(), "qsv".into()],
            Self::VideoToolbox => vec!["-hwaccel".into(), "videotoolbox".into()],
        }
    }

    fn encoder_suffix(self) -> &'static str {
        match self {
            Self::Nvenc => "nvenc",
            Self::Vaapi => "vaapi",
            Self::Qsv => "qsv",
            Self::VideoToolbox => "videotoolbox",
        }
    }
}

/// Encoder name for a codec target, hardware-assisted when an accelerator is
/// available and the job asked for it.
pub fn encoder_name(codec: VideoCodecTarget, hw: Option<HwAccel>) -> String {
    match hw {
        Some(accel) => format!("{}_{}", codec.as_str(), accel.encoder_suffix()),
        None => match codec {
            VideoCodecTarget::H264 => "libx264".into(),
            VideoCodecTarget::Hevc => "libx265".into(),
        },
    }
}

/// Accelerated encoders the local processor build ships.
///
/// Built once at startup from the processor's `-encoders` listing and then
/// queried per codec target.
#[derive(Debug, Clone, Default)]
pub struct EncoderInventory {
    listing: String,
}

impl EncoderInventory {
    /// Ask the processor what it can encode. An unreadable listing reads as
    /// an empty inventory, which selects software encoding everywhere.
    pub async fn query(ffmpeg_path: &Path) -> Self {
        let output = tokio::process::Command::new(ffmpeg_path)
            .args(["-hide_banner", "-encoders"])
            .output()
            .await;
        let listing = match output {
            Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout).into_owned(),
            Ok(_) => {
                info!("encoder listing failed, falling back to software encoding");
                String::new()
            }
            Err(e) => {
                info!(error = %e, "processor unavailable for encoder listing, falling back to software encoding");
                String::new()
            }
        };
        let inventory = Self { listing };
        info!(
            h264 = ?inventory.accel_for(VideoCodecTarget::H264),
            hevc = ?inventory.accel_for(VideoCodecTarget::Hevc),
            "encoder inventory ready"
        );
        inventory
    }

    /// Whether the listing carries the accelerated encoder for this target.
    pub fn supports(&self, codec: VideoCodecTarget, accel: HwAccel) -> bool {
        self.listing.contains(&encoder_name(codec, Some(accel)))
    }

    /// Preferred accelerator that can encode the given target, or None for
    /// software encoding.
    pub fn accel_for(&self, codec: VideoCodecTarget) -> Option<HwAccel> {
        PREFERENCE.into_iter().find(|&a| self.supports(codec, a))
    }

    /// The one process-wide accelerator choice: it must cover every codec
    /// target the planner can emit, or hardware-flagged jobs for the
    /// uncovered target would be handed an encoder that does not exist.
    pub fn shared_accel(&self) -> Option<HwAccel> {
        PREFERENCE.into_iter().find(|&a| {
            self.supports(VideoCodecTarget::H264, a) && self.supports(VideoCodecTarget::Hevc, a)
        })
    }
}
