//! Locating the external probe and processor binaries.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum LocateError {
    #[error("{0} not found (set VPLAYER_FFMPEG_PATH / VPLAYER_FFPROBE_PATH)")]
    NotFound(String),
}

static SYSTEM_PREFIXES: &[&str] = &[
    "/opt/homebrew/bin",
    "/usr/local/bin",
    "/opt/local/bin",
    "/usr/bin",
];

pub fn locate_ffmpeg() -> Result<PathBuf, LocateError> {
    locate("ffmpeg", &["VPLAYER_FFMPEG_PATH", "FFMPEG_PATH"])
}

pub fn locate_ffprobe() -> Result<PathBuf, LocateError> {
    locate("ffprobe", &["VPLAYER_FFPROBE_PATH", "FFPROBE_PATH"])
}

fn locate(name: &str, env_keys: &[&str]) -> Result<PathBuf, LocateError> {
    for key in env_keys {
        if let Ok(value) = std::env::var(key) {
            let path = PathBuf::from(value);
            if path.is_file() {
                debug!(%key, path = %path.display(), "using binary from environment");
                return Ok(path);
            }
        }
    }

    // Bundled next to the executable.
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let path = dir.join(name);
            if path.is_file() {
                return Ok(path);
            }
        }
    }

    for prefix in SYSTEM_PREFIXES {
        let path = Path::new(prefix).join(name);
        if path.is_file() {
            debug!(path = %path.display(), "using system binary");
            return Ok(path);
        }
    }

    Err(LocateError::NotFound(name.to_string()))
}
