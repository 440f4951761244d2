//! Controller state-machine tests with a scripted renderer.
//!
//! The probe path points at a nonexistent binary, so planning always goes
//! through the extension heuristic; processing jobs run against a shell
//! stand-in where a real pipeline is needed.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use vplayer_history::HistoryStore;
use vplayer_media::job::Coordinator;
use vplayer_media::plan::Planner;
use vplayer_media::MediaConfig;
use vplayer_player::{
    BackendState, Controller, PlayerConfig, PlayerEvent, PlayerHandle, Renderer, RendererObserver,
};
use vplayer_server::{StreamServer, StreamServerConfig};

#[derive(Default)]
struct StubState {
    attached: Vec<(String, RendererObserver)>,
    seeks: Vec<f64>,
    detaches: usize,
}

/// Renderer double: records every interaction and hands the per-session
/// observers back to the test so it can script signals.
#[derive(Clone, Default)]
struct StubRenderer {
    state: Arc<Mutex<StubState>>,
}

impl StubRenderer {
    fn attached_urls(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .attached
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }

    fn observer(&self, index: usize) -> RendererObserver {
        self.state.lock().unwrap().attached[index].1.clone()
    }

    fn seeks(&self) -> Vec<f64> {
        self.state.lock().unwrap().seeks.clone()
    }

    fn detaches(&self) -> usize {
        self.state.lock().unwrap().detaches
    }
}

impl Renderer for StubRenderer {
    fn attach(&mut self, url: &str, observer: RendererObserver) {
        self.state
            .lock()
            .unwrap()
            .attached
            .push((url.to_string(), observer));
    }

    fn seek(&mut self, seconds: f64) {
        self.state.lock().unwrap().seeks.push(seconds);
    }

    fn detach(&mut self) {
        self.state.lock().unwrap().detaches += 1;
    }
}

struct Harness {
    handle: PlayerHandle,
    events: broadcast::Receiver<PlayerEvent>,
    renderer: StubRenderer,
    _tmp: tempfile::TempDir,
}

fn spawn_player_with(
    tmp: tempfile::TempDir,
    ffmpeg_path: PathBuf,
    player_config: PlayerConfig,
) -> Harness {
    let media_config = MediaConfig {
        ffmpeg_path,
        ffprobe_path: PathBuf::from("/nonexistent/ffprobe"),
        scratch_root: tmp.path().join("scratch"),
        hls_poll_interval: Duration::from_millis(50),
        hls_ready_timeout: Duration::from_secs(3),
        hw_accel: None,
    };
    let renderer = StubRenderer::default();
    let (controller, handle) = Controller::new(
        Planner::new(media_config.clone()),
        Coordinator::new(media_config),
        StreamServer::new(StreamServerConfig {
            bind: ([127, 0, 0, 1], 0).into(),
        }),
        HistoryStore::new(tmp.path().join("history.json")),
        Box::new(renderer.clone()),
        player_config,
    );
    let events = handle.subscribe();
    tokio::spawn(controller.run());
    Harness {
        handle,
        events,
        renderer,
        _tmp: tmp,
    }
}

fn spawn_player(tmp: tempfile::TempDir, ffmpeg_path: PathBuf) -> Harness {
    spawn_player_with(
        tmp,
        ffmpeg_path,
        PlayerConfig {
            replay_delay: Duration::from_millis(100),
            persist_threshold: 1.0,
        },
    )
}

fn write_source(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"not really media").unwrap();
    path
}

/// Wait for a state change; any failure event before it is a test failure.
async fn wait_for_state(events: &mut broadcast::Receiver<PlayerEvent>, want: BackendState) {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(PlayerEvent::StateChanged(state)) if state == want => break,
                Ok(PlayerEvent::StateChanged(_)) => {}
                Ok(PlayerEvent::Failure(message)) => {
                    panic!("unexpected failure while waiting for {want}: {message}")
                }
                Err(e) => panic!("event stream closed: {e}"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {want}"));
}

async fn wait_for_failure(events: &mut broadcast::Receiver<PlayerEvent>) -> String {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(PlayerEvent::Failure(message)) => break message,
                Ok(PlayerEvent::StateChanged(_)) => {}
                Err(e) => panic!("event stream closed: {e}"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("timed out waiting for a failure")
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    let wait = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(2), wait)
        .await
        .expect("condition never reached");
}

#[cfg(unix)]
fn write_script(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join("fake-processor.sh");
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Writes a playlist with one recorded segment, then idles like a live
/// encoder would.
#[cfg(unix)]
const HLS_SCRIPT: &str = concat!(
    "#!/bin/sh\n",
    "for a in \"$@\"; do out=\"$a\"; done\n",
    "printf '#EXTM3U\\n#EXT-X-VERSION:3\\n#EXTINF:4.0,\\nsegment_00000.ts\\n' > \"$out\"\n",
    "sleep 30\n",
);

#[tokio::test]
async fn direct_plan_hands_source_straight_to_renderer() {
    let tmp = tempfile::tempdir().unwrap();
    let source = write_source(tmp.path(), "movie.mp4");
    let mut h = spawn_player(tmp, PathBuf::from("/nonexistent/ffmpeg"));

    h.handle.load(&source);
    wait_for_state(&mut h.events, BackendState::Active).await;

    let urls = h.renderer.attached_urls();
    assert_eq!(urls.len(), 1);
    // The original path goes to the renderer; the HTTP server stays out.
    assert_eq!(urls[0], source.to_string_lossy());
    assert!(!urls[0].starts_with("http://"));
}

#[tokio::test]
async fn unreadable_source_surfaces_permission_denied() {
    let tmp = tempfile::tempdir().unwrap();
    let missing = tmp.path().join("gone.mp4");
    let mut h = spawn_player(tmp, PathBuf::from("/nonexistent/ffmpeg"));

    h.handle.load(&missing);
    let message = wait_for_failure(&mut h.events).await;
    assert!(message.contains("permission denied"), "got: {message}");
}

#[tokio::test]
async fn resume_offset_applied_when_renderer_ready() {
    let tmp = tempfile::tempdir().unwrap();
    let source = write_source(tmp.path(), "movie.mp4");
    HistoryStore::new(tmp.path().join("history.json"))
        .record_position(&source, 42.5)
        .unwrap();
    let mut h = spawn_player(tmp, PathBuf::from("/nonexistent/ffmpeg"));

    h.handle.load(&source);
    wait_for_state(&mut h.events, BackendState::Active).await;

    h.renderer.observer(0).ready();
    let renderer = h.renderer.clone();
    eventually(move || renderer.seeks().contains(&42.5)).await;
}

#[tokio::test]
async fn positions_persist_once_per_second_of_advance() {
    let tmp = tempfile::tempdir().unwrap();
    let source = write_source(tmp.path(), "movie.mp4");
    let history = HistoryStore::new(tmp.path().join("history.json"));
    let mut h = spawn_player(tmp, PathBuf::from("/nonexistent/ffmpeg"));

    h.handle.load(&source);
    wait_for_state(&mut h.events, BackendState::Active).await;

    let observer = h.renderer.observer(0);
    observer.position(5.0);
    observer.position(5.4); // under the threshold, not persisted
    let hist = history.clone();
    let probe_source = source.clone();
    eventually(move || hist.resume_for(&probe_source) == Some(5.0)).await;

    observer.position(6.1);
    let hist = history.clone();
    let probe_source = source.clone();
    eventually(move || hist.resume_for(&probe_source) == Some(6.1)).await;
}

#[tokio::test]
async fn stop_detaches_and_drops_stale_signals() {
    let tmp = tempfile::tempdir().unwrap();
    let source = write_source(tmp.path(), "movie.mp4");
    let mut h = spawn_player(tmp, PathBuf::from("/nonexistent/ffmpeg"));

    h.handle.load(&source);
    wait_for_state(&mut h.events, BackendState::Active).await;

    h.handle.stop();
    wait_for_state(&mut h.events, BackendState::Idle).await;
    let renderer = h.renderer.clone();
    eventually(move || renderer.detaches() >= 1).await;

    // Signals from the dead session go nowhere.
    h.renderer.observer(0).ended();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(matches!(
        h.events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
}

#[tokio::test]
async fn completed_session_replays_after_countdown() {
    let tmp = tempfile::tempdir().unwrap();
    let source = write_source(tmp.path(), "movie.mp4");
    let mut h = spawn_player(tmp, PathBuf::from("/nonexistent/ffmpeg"));

    h.handle.load(&source);
    wait_for_state(&mut h.events, BackendState::Active).await;

    h.renderer.observer(0).ended();
    wait_for_state(&mut h.events, BackendState::Completed).await;

    // The countdown expires and playback restarts from zero.
    wait_for_state(&mut h.events, BackendState::Active).await;
    let renderer = h.renderer.clone();
    eventually(move || renderer.seeks().contains(&0.0)).await;
}

#[tokio::test]
async fn dismissed_replay_stays_completed() {
    let tmp = tempfile::tempdir().unwrap();
    let source = write_source(tmp.path(), "movie.mp4");
    let mut h = spawn_player_with(
        tmp,
        PathBuf::from("/nonexistent/ffmpeg"),
        PlayerConfig {
            replay_delay: Duration::from_millis(500),
            persist_threshold: 1.0,
        },
    );

    h.handle.load(&source);
    wait_for_state(&mut h.events, BackendState::Active).await;

    h.renderer.observer(0).ended();
    wait_for_state(&mut h.events, BackendState::Completed).await;
    h.handle.dismiss_replay();

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(matches!(
        h.events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
}

#[cfg(unix)]
#[tokio::test]
async fn renderer_failure_escalates_once_then_surfaces() {
    let tmp = tempfile::tempdir().unwrap();
    let source = write_source(tmp.path(), "movie.mp4");
    let ffmpeg = write_script(tmp.path(), HLS_SCRIPT);
    let mut h = spawn_player(tmp, ffmpeg);

    h.handle.load(&source);
    wait_for_state(&mut h.events, BackendState::Active).await;

    // First failure on a direct plan: exactly one escalation to transcode.
    h.renderer.observer(0).failed("decoder gave up");
    wait_for_state(&mut h.events, BackendState::Preparing).await;
    wait_for_state(&mut h.events, BackendState::Active).await;

    let urls = h.renderer.attached_urls();
    assert_eq!(urls.len(), 2);
    assert!(urls[1].starts_with("http://127.0.0.1:"), "got {}", urls[1]);
    assert!(urls[1].ends_with("/master.m3u8"), "got {}", urls[1]);

    // A failure after escalation is fatal and surfaces the raw message.
    h.renderer.observer(1).failed("still broken");
    let message = wait_for_failure(&mut h.events).await;
    assert!(message.contains("still broken"), "got: {message}");
    wait_for_state(&mut h.events, BackendState::Idle).await;

    // No third attach.
    assert_eq!(h.renderer.attached_urls().len(), 2);
}

#[cfg(unix)]
#[tokio::test]
async fn processing_failure_surfaces_and_returns_to_idle() {
    let tmp = tempfile::tempdir().unwrap();
    // A recognized but not direct-preferred extension: heuristic remux.
    let source = write_source(tmp.path(), "movie.mkv");
    let ffmpeg = write_script(tmp.path(), "#!/bin/sh\necho kaboom >&2\nexit 2\n");
    let mut h = spawn_player(tmp, ffmpeg);

    h.handle.load(&source);
    let message = wait_for_failure(&mut h.events).await;
    assert!(message.contains("kaboom"), "got: {message}");
    wait_for_state(&mut h.events, BackendState::Idle).await;
    assert!(h.renderer.attached_urls().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn new_load_supersedes_inflight_preparation() {
    let tmp = tempfile::tempdir().unwrap();
    // Remux against a processor that never finishes.
    let slow = write_source(tmp.path(), "slow.mkv");
    let quick = write_source(tmp.path(), "quick.mp4");
    let ffmpeg = write_script(tmp.path(), "#!/bin/sh\nsleep 30\n");
    let mut h = spawn_player(tmp, ffmpeg);

    h.handle.load(&slow);
    wait_for_state(&mut h.events, BackendState::Preparing).await;

    // Loading a direct source tears the stalled job down.
    h.handle.load(&quick);
    wait_for_state(&mut h.events, BackendState::Active).await;

    let urls = h.renderer.attached_urls();
    assert_eq!(urls.len(), 1);
    assert_eq!(urls[0], quick.to_string_lossy());
}
