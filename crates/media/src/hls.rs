//! HLS playlist helpers shared by the coordinator and the stream server.

/// Content-Type for HLS master/variant playlists.
pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Content-Type for MPEG-TS segments.
pub const SEGMENT_CONTENT_TYPE_TS: &str = "video/mp2t";

/// Content-Type for MP4/fMP4 segments.
pub const SEGMENT_CONTENT_TYPE_MP4: &str = "video/mp4";

pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Determine the content type of a file served out of an HLS session.
pub fn content_type_for(filename: &str) -> &'static str {
    let lower = filename.to_ascii_lowercase();
    if lower.ends_with(".m3u8") {
        PLAYLIST_CONTENT_TYPE
    } else if lower.ends_with(".ts") {
        SEGMENT_CONTENT_TYPE_TS
    } else if lower.ends_with(".mp4") || lower.ends_with(".m4s") {
        SEGMENT_CONTENT_TYPE_MP4
    } else {
        FALLBACK_CONTENT_TYPE
    }
}

/// An event playlist has recorded its first segment once an `#EXTINF` entry
/// appears; that is the readiness condition for handing it to the renderer.
pub fn playlist_has_segment(contents: &str) -> bool {
    contents.contains("#EXTINF")
}
