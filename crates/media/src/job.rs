//! Processing coordinator.
//!
//! Drives the external processor to materialize remuxed or segmented
//! outputs. Each job owns a fresh scratch directory; the artifact handed
//! back owns that directory and removes it on cleanup.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vplayer_core::types::{OutputMode, RemuxRequest, TranscodeRequest};

use crate::{args, hls, MediaConfig, ProcessingError};

const STDERR_TAIL_LIMIT: usize = 2048;

/// Shape of a materialized output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactKind {
    /// A single completed file.
    File { path: PathBuf },
    /// A directory holding a playlist plus its segments.
    Hls {
        directory: PathBuf,
        playlist: String,
    },
}

/// A materialized processing output. Owns its scratch directory; `cleanup`
/// removes it recursively and is idempotent. Dropping the artifact without
/// an explicit cleanup also releases the directory.
#[derive(Debug)]
pub struct ProcessingArtifact {
    kind: ArtifactKind,
    scratch_dir: PathBuf,
    cleaned: AtomicBool,
}

impl ProcessingArtifact {
    fn file(scratch_dir: PathBuf, path: PathBuf) -> Self {
        Self {
            kind: ArtifactKind::File { path },
            scratch_dir,
            cleaned: AtomicBool::new(false),
        }
    }

    fn hls(scratch_dir: PathBuf) -> Self {
        Self {
            kind: ArtifactKind::Hls {
                directory: scratch_dir.clone(),
                playlist: args::HLS_PLAYLIST.to_string(),
            },
            scratch_dir,
            cleaned: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> &ArtifactKind {
        &self.kind
    }

    pub fn cleanup(&self) {
        if self.cleaned.swap(true, Ordering::SeqCst) {
            return;
        }
        match std::fs::remove_dir_all(&self.scratch_dir) {
            Ok(()) => debug!(dir = %self.scratch_dir.display(), "removed artifact scratch directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(dir = %self.scratch_dir.display(), error = %e, "failed to remove artifact scratch directory")
            }
        }
    }
}

impl Drop for ProcessingArtifact {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Cancellation handle for an in-flight job.
///
/// Cancelling is idempotent, and a waiter attached after cancellation fires
/// immediately.
#[derive(Debug, Clone)]
pub struct ProcessingTask {
    token: CancellationToken,
}

impl ProcessingTask {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

/// A launched job: the cancellation handle plus the pending artifact.
pub struct ProcessingJob {
    pub task: ProcessingTask,
    pub artifact: JoinHandle<Result<ProcessingArtifact, ProcessingError>>,
}

/// Launches processor jobs. Stateless across jobs beyond the scratch root.
#[derive(Debug, Clone)]
pub struct Coordinator {
    config: MediaConfig,
}

impl Coordinator {
    pub fn new(config: MediaConfig) -> Self {
        Self { config }
    }

    pub async fn prepare_remux(&self, req: &RemuxRequest) -> Result<ProcessingJob, ProcessingError> {
        let scratch = self.allocate_scratch().await?;
        let argv = args::remux_args(req, &scratch);
        self.launch_file(argv, scratch)
    }

    pub async fn prepare_transcode(
        &self,
        req: &TranscodeRequest,
    ) -> Result<ProcessingJob, ProcessingError> {
        let scratch = self.allocate_scratch().await?;
        let argv = args::transcode_args(req, &scratch, self.config.hw_accel);
        match req.output {
            OutputMode::Progressive => self.launch_file(argv, scratch),
            OutputMode::Hls => self.launch_hls(argv, scratch),
        }
    }

    async fn allocate_scratch(&self) -> Result<PathBuf, ProcessingError> {
        let dir = self.config.scratch_root.join(Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    fn launch_file(
        &self,
        argv: Vec<String>,
        scratch: PathBuf,
    ) -> Result<ProcessingJob, ProcessingError> {
        let (child, drain, tail) = self.spawn_processor(&argv, &scratch)?;
        let token = CancellationToken::new();
        let task = ProcessingTask {
            token: token.clone(),
        };
        let output_path = scratch.join(args::OUTPUT_FILE);
        let artifact = tokio::spawn(drive_file(child, token, scratch, output_path, drain, tail));
        Ok(ProcessingJob { task, artifact })
    }

    fn launch_hls(
        &self,
        argv: Vec<String>,
        scratch: PathBuf,
    ) -> Result<ProcessingJob, ProcessingError> {
        let (child, drain, tail) = self.spawn_processor(&argv, &scratch)?;
        let token = CancellationToken::new();
        let task = ProcessingTask {
            token: token.clone(),
        };
        let poll = self.config.hls_poll_interval;
        let timeout = self.config.hls_ready_timeout;
        let artifact = tokio::spawn(drive_hls(child, token, scratch, poll, timeout, drain, tail));
        Ok(ProcessingJob { task, artifact })
    }

    fn spawn_processor(
        &self,
        argv: &[String],
        scratch: &Path,
    ) -> Result<(Child, JoinHandle<()>, Arc<Mutex<String>>), ProcessingError> {
        debug!(program = %self.config.ffmpeg_path.display(), ?argv, "launching processor");
        let mut child = match Command::new(&self.config.ffmpeg_path)
            .args(argv)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                let _ = std::fs::remove_dir_all(scratch);
                return Err(ProcessingError::Failed {
                    code: None,
                    stderr_tail: format!("failed to launch processor: {e}"),
                });
            }
        };

        // The drain keeps the pipe from filling up and stalling the child.
        let (drain, tail) = match child.stderr.take() {
            Some(stderr) => spawn_stderr_drain(stderr),
            None => (
                tokio::spawn(async {}),
                Arc::new(Mutex::new(String::new())),
            ),
        };
        Ok((child, drain, tail))
    }
}

async fn drive_file(
    mut child: Child,
    token: CancellationToken,
    scratch: PathBuf,
    output_path: PathBuf,
    drain: JoinHandle<()>,
    tail: Arc<Mutex<String>>,
) -> Result<ProcessingArtifact, ProcessingError> {
    let status = tokio::select! {
        status = child.wait() => match status {
            Ok(s) => s,
            Err(e) => {
                let _ = drain.await;
                remove_scratch(&scratch).await;
                return Err(e.into());
            }
        },
        _ = token.cancelled() => {
            terminate(&mut child).await;
            let _ = drain.await;
            remove_scratch(&scratch).await;
            return Err(ProcessingError::Cancelled);
        }
    };
    let _ = drain.await;

    if status.success() && output_path.is_file() {
        info!(output = %output_path.display(), "processing complete");
        return Ok(ProcessingArtifact::file(scratch, output_path));
    }

    remove_scratch(&scratch).await;
    if status.success() {
        Err(ProcessingError::OutputMissing)
    } else {
        Err(ProcessingError::Failed {
            code: status.code(),
            stderr_tail: tail_of(&tail),
        })
    }
}

async fn drive_hls(
    mut child: Child,
    token: CancellationToken,
    scratch: PathBuf,
    poll: std::time::Duration,
    timeout: std::time::Duration,
    drain: JoinHandle<()>,
    tail: Arc<Mutex<String>>,
) -> Result<ProcessingArtifact, ProcessingError> {
    let playlist_path = scratch.join(args::HLS_PLAYLIST);
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if let Ok(contents) = tokio::fs::read_to_string(&playlist_path).await {
            if hls::playlist_has_segment(&contents) {
                break;
            }
        }

        match child.try_wait() {
            Ok(Some(status)) if !status.success() => {
                let _ = drain.await;
                remove_scratch(&scratch).await;
                return Err(ProcessingError::Failed {
                    code: status.code(),
                    stderr_tail: tail_of(&tail),
                });
            }
            Ok(_) => {}
            Err(e) => {
                terminate(&mut child).await;
                let _ = drain.await;
                remove_scratch(&scratch).await;
                return Err(e.into());
            }
        }

        if tokio::time::Instant::now() >= deadline {
            terminate(&mut child).await;
            let _ = drain.await;
            remove_scratch(&scratch).await;
            return Err(ProcessingError::OutputMissing);
        }

        tokio::select! {
            _ = tokio::time::sleep(poll) => {}
            // Cancelled while polling: the playlist never became usable.
            _ = token.cancelled() => {
                terminate(&mut child).await;
                let _ = drain.await;
                remove_scratch(&scratch).await;
                return Err(ProcessingError::OutputMissing);
            }
        }
    }

    // The playlist is usable; the processor keeps appending segments. A
    // later failure is logged but no longer propagated.
    info!(playlist = %playlist_path.display(), "HLS stream ready");
    tokio::spawn(supervise_hls(child, token, drain, tail));
    Ok(ProcessingArtifact::hls(scratch))
}

async fn supervise_hls(
    mut child: Child,
    token: CancellationToken,
    drain: JoinHandle<()>,
    tail: Arc<Mutex<String>>,
) {
    tokio::select! {
        status = child.wait() => match status {
            Ok(s) if !s.success() => {
                warn!(code = ?s.code(), stderr = %tail_of(&tail), "processor exited after stream handoff");
            }
            Ok(_) => debug!("processor finished appending segments"),
            Err(e) => warn!(error = %e, "failed to wait on processor"),
        },
        _ = token.cancelled() => {
            terminate(&mut child).await;
        }
    }
    let _ = drain.await;
}

async fn terminate(child: &mut Child) {
    let _ = child.start_kill();
    let _ = child.wait().await;
}

async fn remove_scratch(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(dir = %dir.display(), error = %e, "failed to remove scratch directory"),
    }
}

fn spawn_stderr_drain(stderr: ChildStderr) -> (JoinHandle<()>, Arc<Mutex<String>>) {
    let tail = Arc::new(Mutex::new(String::new()));
    let buf = tail.clone();
    let handle = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let trimmed = line.trim_end();
            if !trimmed.is_empty() {
                debug!(target: "vplayer::processor", "{trimmed}");
            }
            if let Ok(mut tail) = buf.lock() {
                tail.push_str(&line);
                tail.push('\n');
                if tail.len() > STDERR_TAIL_LIMIT {
                    let mut cut = tail.len() - STDERR_TAIL_LIMIT;
                    while !tail.is_char_boundary(cut) {
                        cut += 1;
                    }
                    tail.drain(..cut);
                }
            }
        }
    });
    (handle, tail)
}

fn tail_of(tail: &Arc<Mutex<String>>) -> String {
    let contents = tail
        .lock()
        .map(|t| t.trim().to_string())
        .unwrap_or_default();
    if contents.is_empty() {
        "unknown error".into()
    } else {
        contents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vplayer_core::types::{AudioCodecTarget, TargetContainer, VideoCodecTarget};

    fn test_config(ffmpeg: PathBuf, root: &Path) -> MediaConfig {
        MediaConfig {
            ffmpeg_path: ffmpeg,
            scratch_root: root.to_path_buf(),
            hls_poll_interval: Duration::from_millis(50),
            hls_ready_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    fn remux_request() -> RemuxRequest {
        RemuxRequest {
            source: PathBuf::from("/dev/null"),
            container: TargetContainer::Mp4,
            video_index: None,
            audio_index: None,
            source_video_codec: None,
        }
    }

    fn hls_request() -> TranscodeRequest {
        TranscodeRequest {
            source: PathBuf::from("/dev/null"),
            video_codec: VideoCodecTarget::H264,
            audio_codec: AudioCodecTarget::Aac,
            container: TargetContainer::Mp4,
            video_bitrate: "10000k".into(),
            buffer_size: "20000k".into(),
            audio_bitrate: "192k".into(),
            scale_filter: None,
            hardware_accel: false,
            output: OutputMode::Hls,
        }
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_wakes_late_waiters() {
        let task = ProcessingTask {
            token: CancellationToken::new(),
        };
        task.cancel();
        task.cancel();
        // A waiter attached after cancellation completes immediately.
        tokio::time::timeout(Duration::from_millis(100), task.cancelled())
            .await
            .expect("late waiter should fire immediately");
        assert!(task.is_cancelled());
    }

    #[cfg(unix)]
    fn write_script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-processor.sh");
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    fn scratch_entries(root: &Path) -> usize {
        std::fs::read_dir(root).map(|rd| rd.count()).unwrap_or(0)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_job_failure_carries_stderr_tail_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(tmp.path(), "#!/bin/sh\necho boom >&2\nexit 3\n");
        let root = tmp.path().join("scratch");
        let coordinator = Coordinator::new(test_config(script, &root));

        let job = coordinator.prepare_remux(&remux_request()).await.unwrap();
        let result = job.artifact.await.unwrap();
        match result {
            Err(ProcessingError::Failed { code, stderr_tail }) => {
                assert_eq!(code, Some(3));
                assert!(stderr_tail.contains("boom"), "tail was: {stderr_tail}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(scratch_entries(&root), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_job_success_yields_file_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        // The output path is the last argument.
        let script = write_script(
            tmp.path(),
            "#!/bin/sh\nfor a in \"$@\"; do out=\"$a\"; done\necho data > \"$out\"\n",
        );
        let root = tmp.path().join("scratch");
        let coordinator = Coordinator::new(test_config(script, &root));

        let job = coordinator.prepare_remux(&remux_request()).await.unwrap();
        let artifact = job.artifact.await.unwrap().unwrap();
        let path = match artifact.kind() {
            ArtifactKind::File { path } => path.clone(),
            other => panic!("expected file artifact, got {other:?}"),
        };
        assert!(path.is_file());
        assert!(path.ends_with("output.mp4"));

        artifact.cleanup();
        assert!(!path.exists());
        assert_eq!(scratch_entries(&root), 0);
        // A second cleanup is a no-op.
        artifact.cleanup();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_without_output_is_output_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(tmp.path(), "#!/bin/sh\nexit 0\n");
        let root = tmp.path().join("scratch");
        let coordinator = Coordinator::new(test_config(script, &root));

        let job = coordinator.prepare_remux(&remux_request()).await.unwrap();
        let result = job.artifact.await.unwrap();
        assert!(matches!(result, Err(ProcessingError::OutputMissing)));
        assert_eq!(scratch_entries(&root), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hls_job_surfaces_once_playlist_has_a_segment() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(
            tmp.path(),
            concat!(
                "#!/bin/sh\n",
                "for a in \"$@\"; do out=\"$a\"; done\n",
                "printf '#EXTM3U\\n#EXT-X-VERSION:3\\n' > \"$out\"\n",
                "sleep 0.2\n",
                "printf '#EXTINF:4.0,\\nsegment_00000.ts\\n' >> \"$out\"\n",
                "sleep 30\n",
            ),
        );
        let root = tmp.path().join("scratch");
        let coordinator = Coordinator::new(test_config(script, &root));

        let job = coordinator.prepare_transcode(&hls_request()).await.unwrap();
        let artifact = job.artifact.await.unwrap().unwrap();
        match artifact.kind() {
            ArtifactKind::Hls {
                directory,
                playlist,
            } => {
                assert_eq!(playlist, "master.m3u8");
                let contents = std::fs::read_to_string(directory.join(playlist)).unwrap();
                assert!(hls::playlist_has_segment(&contents));
            }
            other => panic!("expected HLS artifact, got {other:?}"),
        }

        // Teardown order: stop the processor, then release the directory.
        job.task.cancel();
        artifact.cleanup();
        assert_eq!(scratch_entries(&root), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hls_job_times_out_without_segments() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(
            tmp.path(),
            concat!(
                "#!/bin/sh\n",
                "for a in \"$@\"; do out=\"$a\"; done\n",
                "printf '#EXTM3U\\n' > \"$out\"\n",
                "sleep 30\n",
            ),
        );
        let root = tmp.path().join("scratch");
        let coordinator = Coordinator::new(test_config(script, &root));

        let job = coordinator.prepare_transcode(&hls_request()).await.unwrap();
        let result = job.artifact.await.unwrap();
        assert!(matches!(result, Err(ProcessingError::OutputMissing)));
        assert_eq!(scratch_entries(&root), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hls_job_cancelled_while_polling() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(tmp.path(), "#!/bin/sh\nsleep 30\n");
        let root = tmp.path().join("scratch");
        let coordinator = Coordinator::new(test_config(script, &root));

        let job = coordinator.prepare_transcode(&hls_request()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        job.task.cancel();

        let result = job.artifact.await.unwrap();
        assert!(matches!(result, Err(ProcessingError::OutputMissing)));
        assert_eq!(scratch_entries(&root), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_job_cancelled_before_exit() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(tmp.path(), "#!/bin/sh\nsleep 30\n");
        let root = tmp.path().join("scratch");
        let coordinator = Coordinator::new(test_config(script, &root));

        let job = coordinator.prepare_remux(&remux_request()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        job.task.cancel();

        let result = job.artifact.await.unwrap();
        assert!(matches!(result, Err(ProcessingError::Cancelled)));
        assert_eq!(scratch_entries(&root), 0);
    }
}
