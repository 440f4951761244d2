//! Loopback HTTP server that exposes prepared artifacts to the renderer.
//!
//! One shared listener, lazily bound on first registration; sessions are
//! keyed by UUID and live until their handle is cleaned up. The server never
//! touches artifact scratch directories; removing those is the artifact's
//! own job.

pub mod range;
mod serve;

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;
use vplayer_core::error::PlayerError;

/// Fixed loopback port the renderer is pointed at by default.
pub const DEFAULT_PORT: u16 = 39453;

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("stream listener unavailable: {0}")]
    ListenerUnavailable(String),
    #[error("invalid stream registration: {0}")]
    InvalidRequest(String),
}

impl From<ServeError> for PlayerError {
    fn from(e: ServeError) -> Self {
        match e {
            ServeError::ListenerUnavailable(msg) => PlayerError::ListenerUnavailable(msg),
            ServeError::InvalidRequest(msg) => PlayerError::InvalidRequest(msg),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamServerConfig {
    /// Address the listener binds on first registration. Registered URLs
    /// always carry the port actually bound, so `:0` is valid too.
    pub bind: SocketAddr,
}

impl Default for StreamServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
        }
    }
}

/// What a session serves.
#[derive(Debug, Clone)]
pub(crate) enum SessionKind {
    File {
        path: PathBuf,
    },
    Hls {
        directory: PathBuf,
        playlist: String,
    },
}

#[derive(Debug)]
struct ListenerHandle {
    addr: SocketAddr,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Default, Debug)]
struct ServerState {
    sessions: HashMap<Uuid, SessionKind>,
    listener: Option<ListenerHandle>,
}

#[derive(Debug)]
pub(crate) struct Inner {
    config: StreamServerConfig,
    // One lock guards both the session table and listener startup.
    state: Mutex<ServerState>,
}

impl Inner {
    pub(crate) async fn session(&self, id: Uuid) -> Option<SessionKind> {
        self.state.lock().await.sessions.get(&id).cloned()
    }
}

/// Process-wide stream server. Cheap to clone; all clones share the listener
/// and session table.
#[derive(Clone)]
pub struct StreamServer {
    inner: Arc<Inner>,
}

impl StreamServer {
    pub fn new(config: StreamServerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(ServerState::default()),
            }),
        }
    }

    /// Expose a completed file with byte-range support.
    pub async fn register_file(&self, path: &Path) -> Result<StreamHandle, ServeError> {
        let kind = SessionKind::File {
            path: path.to_path_buf(),
        };
        let (id, addr) = self.register(kind).await?;
        info!(%id, path = %path.display(), "registered file stream");
        Ok(self.handle(id, format!("http://{addr}/stream/{id}")))
    }

    /// Expose a playlist directory. The named playlist must already exist.
    pub async fn register_hls(
        &self,
        directory: &Path,
        playlist: &str,
    ) -> Result<StreamHandle, ServeError> {
        if !directory.join(playlist).is_file() {
            return Err(ServeError::InvalidRequest(format!(
                "playlist {playlist} not found in {}",
                directory.display()
            )));
        }
        // Canonical base for the traversal guard on every request.
        let directory = directory.canonicalize().map_err(|e| {
            ServeError::InvalidRequest(format!("unreadable directory {}: {e}", directory.display()))
        })?;

        let kind = SessionKind::Hls {
            directory: directory.clone(),
            playlist: playlist.to_string(),
        };
        let (id, addr) = self.register(kind).await?;
        info!(%id, directory = %directory.display(), "registered HLS stream");
        Ok(self.handle(id, format!("http://{addr}/hls/{id}/{playlist}")))
    }

    fn handle(&self, id: Uuid, url: String) -> StreamHandle {
        StreamHandle {
            id,
            url,
            inner: self.inner.clone(),
            cleaned: AtomicBool::new(false),
        }
    }

    async fn register(&self, kind: SessionKind) -> Result<(Uuid, SocketAddr), ServeError> {
        let mut state = self.inner.state.lock().await;
        let addr = match &state.listener {
            Some(listener) => listener.addr,
            None => {
                let listener = Self::start_listener(self.inner.clone(), self.inner.config.bind)
                    .await?;
                let addr = listener.addr;
                state.listener = Some(listener);
                addr
            }
        };
        let id = Uuid::new_v4();
        state.sessions.insert(id, kind);
        Ok((id, addr))
    }

    async fn start_listener(
        inner: Arc<Inner>,
        bind: SocketAddr,
    ) -> Result<ListenerHandle, ServeError> {
        let listener = tokio::net::TcpListener::bind(bind)
            .await
            .map_err(|e| ServeError::ListenerUnavailable(format!("bind {bind}: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| ServeError::ListenerUnavailable(format!("local addr: {e}")))?;

        let app = serve::router(inner);
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!(error = %e, "stream listener terminated");
            }
        });

        info!(%addr, "stream listener started");
        Ok(ListenerHandle { addr, task })
    }
}

/// Disposable reference to a registered session. Cleanup removes the session
/// binding only and is idempotent; requests after cleanup answer 404.
#[derive(Debug)]
pub struct StreamHandle {
    id: Uuid,
    url: String,
    inner: Arc<Inner>,
    cleaned: AtomicBool,
}

impl StreamHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn cleanup(&self) {
        if self.cleaned.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.state.lock().await.sessions.remove(&self.id);
        info!(id = %self.id, "stream session removed");
    }
}
