pub mod args;
pub mod gpu;
pub mod hls;
pub mod job;
pub mod locate;
pub mod plan;
pub mod probe;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use vplayer_core::error::PlayerError;

/// Probe failures. Anything that keeps us from getting stream metadata is
/// "unavailable"; the planner falls back to the extension heuristic.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe unavailable: {0}")]
    Unavailable(String),
}

impl From<ProbeError> for PlayerError {
    fn from(e: ProbeError) -> Self {
        match e {
            ProbeError::Unavailable(msg) => PlayerError::ProbeUnavailable(msg),
        }
    }
}

/// Processing job failures.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("processor failed: {stderr_tail}")]
    Failed {
        code: Option<i32>,
        stderr_tail: String,
    },
    #[error("output missing or never became ready")]
    OutputMissing,
    #[error("processing cancelled")]
    Cancelled,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ProcessingError> for PlayerError {
    fn from(e: ProcessingError) -> Self {
        match e {
            ProcessingError::Failed { code, stderr_tail } => PlayerError::ProcessingFailed {
                exit_code: code,
                stderr_tail,
            },
            ProcessingError::OutputMissing => PlayerError::OutputMissing,
            ProcessingError::Cancelled => PlayerError::Cancelled,
            ProcessingError::Io(err) => PlayerError::ProcessingFailed {
                exit_code: None,
                stderr_tail: err.to_string(),
            },
        }
    }
}

/// Shared configuration for the inspector, planner and coordinator.
#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    /// Root under which each job allocates its own scratch directory.
    pub scratch_root: PathBuf,
    /// How often the coordinator re-reads a playlist while waiting for the
    /// first segment.
    pub hls_poll_interval: Duration,
    /// How long a playlist may stay empty before the job is failed.
    pub hls_ready_timeout: Duration,
    /// Accelerator used for jobs that request hardware encoding.
    pub hw_accel: Option<gpu::HwAccel>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            scratch_root: std::env::temp_dir().join("vplayer-processing"),
            hls_poll_interval: Duration::from_millis(200),
            hls_ready_timeout: Duration::from_secs(8),
            hw_accel: None,
        }
    }
}
