use std::path::{Path, PathBuf};

use vplayer_core::error::PlayerError;
use vplayer_core::types::PlaybackPlan;
use vplayer_media::job::{ProcessingArtifact, ProcessingTask};
use vplayer_server::StreamHandle;

/// Lifecycle of the playback backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Idle,
    Preparing,
    Active,
    Completed,
}

impl BackendState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Preparing => "preparing",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for BackendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scoped read access to the source file. Dropping releases the grant.
#[derive(Debug)]
pub(crate) struct SourceAccess {
    path: PathBuf,
}

impl SourceAccess {
    pub fn acquire(path: &Path) -> Result<Self, PlayerError> {
        std::fs::File::open(path)
            .map_err(|e| PlayerError::PermissionDenied(format!("{}: {e}", path.display())))?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for SourceAccess {
    fn drop(&mut self) {
        tracing::trace!(path = %self.path.display(), "released source access");
    }
}

/// Everything the controller owns for the active source. At most one of
/// each resource; all of them are torn down before the next session starts.
pub(crate) struct PlaybackSession {
    pub source: PathBuf,
    pub plan: PlaybackPlan,
    pub task: Option<ProcessingTask>,
    pub artifact: Option<ProcessingArtifact>,
    pub stream: Option<StreamHandle>,
    pub access: SourceAccess,
    pub resume_offset: Option<f64>,
    pub last_persisted: Option<f64>,
    pub has_escalated: bool,
    pub awaiting_replay: bool,
}

impl PlaybackSession {
    pub fn new(
        source: PathBuf,
        plan: PlaybackPlan,
        access: SourceAccess,
        resume_offset: Option<f64>,
    ) -> Self {
        Self {
            source,
            plan,
            task: None,
            artifact: None,
            stream: None,
            access,
            resume_offset,
            last_persisted: None,
            has_escalated: false,
            awaiting_replay: false,
        }
    }
}
