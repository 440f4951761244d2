use thiserror::Error;

/// Unified playback failure taxonomy.
///
/// Component crates carry their own error types; the session controller
/// converts them into this set at the boundary and is the only place failures
/// become user-visible.
#[derive(Debug, Error)]
pub enum PlayerError {
    /// External probe binary missing, failed, or produced unusable output.
    #[error("media probe unavailable: {0}")]
    ProbeUnavailable(String),

    /// The processor exited non-zero or produced no output.
    #[error("processing failed: {stderr_tail}")]
    ProcessingFailed {
        exit_code: Option<i32>,
        stderr_tail: String,
    },

    /// Output never became ready within the readiness window.
    #[error("processing output missing")]
    OutputMissing,

    /// Task cancelled by the controller; dropped silently upstream.
    #[error("cancelled")]
    Cancelled,

    #[error("stream listener unavailable: {0}")]
    ListenerUnavailable(String),

    #[error("invalid stream registration: {0}")]
    InvalidRequest(String),

    #[error("renderer failure: {0}")]
    RendererFailure(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

impl PlayerError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProbeUnavailable(_) => "probe_unavailable",
            Self::ProcessingFailed { .. } => "processing_failed",
            Self::OutputMissing => "output_missing",
            Self::Cancelled => "cancelled",
            Self::ListenerUnavailable(_) => "listener_unavailable",
            Self::InvalidRequest(_) => "invalid_request",
            Self::RendererFailure(_) => "renderer_failure",
            Self::PermissionDenied(_) => "permission_denied",
        }
    }
}
