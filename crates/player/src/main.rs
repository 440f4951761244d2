use std::path::PathBuf;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vplayer_history::HistoryStore;
use vplayer_media::job::Coordinator;
use vplayer_media::plan::Planner;
use vplayer_media::{gpu, locate, MediaConfig};
use vplayer_player::{Controller, PlayerConfig, PlayerEvent, Renderer, RendererObserver};
use vplayer_server::{StreamServer, StreamServerConfig};

/// Renderer stand-in for headless runs: logs the handed-off URL so an
/// external client can fetch the stream, and reports readiness right away so
/// resume seeks still apply.
#[derive(Default)]
struct HandoffRenderer;

impl Renderer for HandoffRenderer {
    fn attach(&mut self, url: &str, observer: RendererObserver) {
        info!(%url, "stream ready for renderer");
        observer.ready();
    }

    fn seek(&mut self, seconds: f64) {
        info!(seconds, "seek");
    }

    fn detach(&mut self) {}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let source: PathBuf = std::env::args()
        .nth(1)
        .context("usage: vplayer <media-file>")?
        .into();

    let ffmpeg_path = locate::locate_ffmpeg().context("media processor not found")?;
    let ffprobe_path = locate::locate_ffprobe().context("media probe not found")?;
    let hw_accel = gpu::EncoderInventory::query(&ffmpeg_path).await.shared_accel();
    info!(
        ffmpeg = %ffmpeg_path.display(),
        ffprobe = %ffprobe_path.display(),
        ?hw_accel,
        "media stack located"
    );

    let media_config = MediaConfig {
        ffmpeg_path,
        ffprobe_path,
        hw_accel,
        ..Default::default()
    };

    let history = match std::env::var("VPLAYER_DATA_DIR") {
        Ok(dir) => HistoryStore::new(PathBuf::from(dir).join("history.json")),
        Err(_) => HistoryStore::open_default(),
    };
    info!(history = %history.path().display(), "history store");

    let (controller, handle) = Controller::new(
        Planner::new(media_config.clone()),
        Coordinator::new(media_config),
        StreamServer::new(StreamServerConfig::default()),
        history,
        Box::new(HandoffRenderer),
        PlayerConfig::default(),
    );

    let mut events = handle.subscribe();
    let run = tokio::spawn(controller.run());

    handle.load(&source);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                handle.shutdown();
                break;
            }
            event = events.recv() => match event {
                Ok(PlayerEvent::StateChanged(state)) => info!(%state, "backend state"),
                Ok(PlayerEvent::Failure(message)) => error!(%message, "playback failure"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    let _ = run.await;
    Ok(())
}
