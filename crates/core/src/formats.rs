//! Source format registry.
//!
//! Consulted only when the probe is unavailable; a successful probe is the
//! single source of truth for playback decisions.

use std::path::Path;

/// Extensions the player recognizes as playable video sources.
pub static RECOGNIZED_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "m4v", "m4a", "mov", "wmv", "flv", "webm", "ts", "mpg", "mpeg", "3gp",
    "ogv",
];

/// Extensions whose container the renderer consumes without repackaging.
pub static DIRECT_PREFERRED_EXTENSIONS: &[&str] = &["mp4", "m4v", "m4a", "mov"];

pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

pub fn is_recognized(path: &Path) -> bool {
    extension_of(path).is_some_and(|e| RECOGNIZED_EXTENSIONS.contains(&e.as_str()))
}

pub fn prefers_direct(path: &Path) -> bool {
    extension_of(path).is_some_and(|e| DIRECT_PREFERRED_EXTENSIONS.contains(&e.as_str()))
}
