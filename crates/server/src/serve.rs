//! Request handling for the loopback listener.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

use crate::range::{self, RangeOutcome};
use crate::{Inner, SessionKind};

/// File bodies are streamed in chunks of at most this size.
const CHUNK_SIZE: usize = 1024 * 1024;

/// Registered file sessions always serve progressive MP4.
const FILE_CONTENT_TYPE: &str = "video/mp4";

pub(crate) fn router(inner: Arc<Inner>) -> Router {
    Router::new()
        .route("/stream/{id}", get(stream_file))
        .route("/hls/{id}", get(hls_default))
        .route("/hls/{id}/{*rest}", get(hls_file))
        .fallback(unknown_route)
        .method_not_allowed_fallback(method_not_allowed)
        .with_state(inner)
}

async fn lookup(inner: &Inner, id: &str) -> Option<SessionKind> {
    let id = Uuid::parse_str(id).ok()?;
    inner.session(id).await
}

async fn stream_file(
    State(inner): State<Arc<Inner>>,
    UrlPath(id): UrlPath<String>,
    headers: HeaderMap,
) -> Response {
    let Some(SessionKind::File { path }) = lookup(&inner, &id).await else {
        return error_response(StatusCode::NOT_FOUND, "unknown stream");
    };
    serve_file_range(&path, &headers).await
}

async fn serve_file_range(path: &Path, headers: &HeaderMap) -> Response {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "registered file unreadable");
            return error_response(StatusCode::GONE, "stream content no longer available");
        }
    };
    let size = match file.metadata().await {
        Ok(m) => m.len(),
        Err(_) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, "unreadable stream"),
    };

    let range_header = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    match range::resolve(range_header, size) {
        RangeOutcome::Full => {
            let stream = ReaderStream::with_capacity(file, CHUNK_SIZE);
            file_response(StatusCode::OK, size, None, Body::from_stream(stream))
        }
        RangeOutcome::Partial { start, end } => {
            if file.seek(std::io::SeekFrom::Start(start)).await.is_err() {
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, "seek failed");
            }
            let len = end - start + 1;
            let stream = ReaderStream::with_capacity(file.take(len), CHUNK_SIZE);
            file_response(
                StatusCode::PARTIAL_CONTENT,
                len,
                Some((start, end, size)),
                Body::from_stream(stream),
            )
        }
        RangeOutcome::Unsatisfiable => Response::builder()
            .status(StatusCode::RANGE_NOT_SATISFIABLE)
            .header(header::CONTENT_RANGE, format!("bytes */{size}"))
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .header(header::CONNECTION, "close")
            .body(Body::from("requested range not satisfiable"))
            .unwrap(),
    }
}

fn file_response(
    status: StatusCode,
    content_length: u64,
    content_range: Option<(u64, u64, u64)>,
    body: Body,
) -> Response {
    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, FILE_CONTENT_TYPE)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONNECTION, "close")
        .header(header::CONTENT_LENGTH, content_length.to_string());
    if let Some((start, end, size)) = content_range {
        builder = builder.header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{size}"));
    }
    builder.body(body).unwrap()
}

async fn hls_default(State(inner): State<Arc<Inner>>, UrlPath(id): UrlPath<String>) -> Response {
    serve_hls(&inner, &id, None).await
}

async fn hls_file(
    State(inner): State<Arc<Inner>>,
    UrlPath((id, rest)): UrlPath<(String, String)>,
) -> Response {
    serve_hls(&inner, &id, Some(rest)).await
}

async fn serve_hls(inner: &Inner, id: &str, rest: Option<String>) -> Response {
    let Some(SessionKind::Hls {
        directory,
        playlist,
    }) = lookup(inner, id).await
    else {
        return error_response(StatusCode::NOT_FOUND, "unknown stream");
    };

    let relative = rest.unwrap_or(playlist);
    let Some(target) = resolve_under(&directory, &relative) else {
        return error_response(StatusCode::NOT_FOUND, "not found");
    };

    let data = match tokio::fs::read(&target).await {
        Ok(d) => d,
        Err(_) => return error_response(StatusCode::NOT_FOUND, "not found"),
    };

    let filename = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            vplayer_media::hls::content_type_for(filename),
        )
        .header(header::CONTENT_LENGTH, data.len().to_string())
        .header(header::CONNECTION, "close")
        .body(Body::from(data))
        .unwrap()
}

/// Strip `..` components, then require the resolved file to stay under the
/// session's (canonical) directory.
fn resolve_under(directory: &Path, relative: &str) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for comp in Path::new(relative).components() {
        if let Component::Normal(part) = comp {
            clean.push(part);
        }
    }
    let canonical = directory.join(clean).canonicalize().ok()?;
    canonical.starts_with(directory).then_some(canonical)
}

async fn unknown_route() -> Response {
    error_response(StatusCode::NOT_FOUND, "not found")
}

async fn method_not_allowed() -> Response {
    error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
}

fn error_response(status: StatusCode, message: &str) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(header::CONNECTION, "close")
        .body(Body::from(message.to_string()))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_components_are_stripped() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().canonicalize().unwrap();
        std::fs::write(dir.join("master.m3u8"), "#EXTM3U\n").unwrap();

        let resolved = resolve_under(&dir, "../master.m3u8").unwrap();
        assert_eq!(resolved, dir.join("master.m3u8"));

        assert!(resolve_under(&dir, "missing.ts").is_none());
    }

    #[test]
    fn symlinks_outside_the_directory_are_rejected() {
        #[cfg(unix)]
        {
            let tmp = tempfile::tempdir().unwrap();
            let dir = tmp.path().join("session");
            std::fs::create_dir(&dir).unwrap();
            let dir = dir.canonicalize().unwrap();
            std::fs::write(tmp.path().join("secret.txt"), "secret").unwrap();
            std::os::unix::fs::symlink(tmp.path().join("secret.txt"), dir.join("leak.txt"))
                .unwrap();

            assert!(resolve_under(&dir, "leak.txt").is_none());
        }
    }
}
