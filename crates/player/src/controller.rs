//! Playback session controller.
//!
//! Runs as a single actor task: every cross-thread completion (processing
//! result, renderer signal, replay timer) is posted into its mailbox tagged
//! with the source captured at dispatch time, and messages for a superseded
//! source are dropped. All session state lives on this task, so none of it
//! needs a lock.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use vplayer_core::error::PlayerError;
use vplayer_core::types::{PlaybackPlan, PlanKind};
use vplayer_history::HistoryStore;
use vplayer_media::job::{ArtifactKind, Coordinator, ProcessingArtifact, ProcessingJob};
use vplayer_media::plan::Planner;
use vplayer_media::ProcessingError;
use vplayer_server::StreamServer;

use crate::renderer::{Renderer, RendererObserver, RendererSignal};
use crate::session::{BackendState, PlaybackSession, SourceAccess};

#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Countdown after end-of-stream before playback restarts from zero.
    pub replay_delay: Duration,
    /// Minimum position advance, in seconds, between history persists.
    pub persist_threshold: f64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            replay_delay: Duration::from_secs(3),
            persist_threshold: 1.0,
        }
    }
}

/// User-visible notifications. The controller is the only component that
/// surfaces failures.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    StateChanged(BackendState),
    Failure(String),
}

/// Mailbox messages. Async completions carry the source captured when they
/// were dispatched.
#[derive(Debug)]
pub(crate) enum ControllerMsg {
    Load(PathBuf),
    Stop,
    Replay,
    DismissReplay,
    Shutdown,
    Renderer {
        source: PathBuf,
        signal: RendererSignal,
    },
    Prepared {
        source: PathBuf,
        result: Result<ProcessingArtifact, ProcessingError>,
    },
    ReplayElapsed {
        source: PathBuf,
    },
}

/// Cloneable front for posting commands and watching events.
#[derive(Clone)]
pub struct PlayerHandle {
    tx: mpsc::UnboundedSender<ControllerMsg>,
    events: broadcast::Sender<PlayerEvent>,
}

impl PlayerHandle {
    pub fn load(&self, source: impl AsRef<Path>) {
        let _ = self
            .tx
            .send(ControllerMsg::Load(source.as_ref().to_path_buf()));
    }

    pub fn stop(&self) {
        let _ = self.tx.send(ControllerMsg::Stop);
    }

    pub fn replay(&self) {
        let _ = self.tx.send(ControllerMsg::Replay);
    }

    pub fn dismiss_replay(&self) {
        let _ = self.tx.send(ControllerMsg::DismissReplay);
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(ControllerMsg::Shutdown);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }
}

pub struct Controller {
    planner: Planner,
    coordinator: Coordinator,
    server: StreamServer,
    history: HistoryStore,
    renderer: Box<dyn Renderer>,
    config: PlayerConfig,
    state: BackendState,
    session: Option<PlaybackSession>,
    rx: mpsc::UnboundedReceiver<ControllerMsg>,
    tx: mpsc::UnboundedSender<ControllerMsg>,
    events: broadcast::Sender<PlayerEvent>,
}

impl Controller {
    pub fn new(
        planner: Planner,
        coordinator: Coordinator,
        server: StreamServer,
        history: HistoryStore,
        renderer: Box<dyn Renderer>,
        config: PlayerConfig,
    ) -> (Self, PlayerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(64);
        let handle = PlayerHandle {
            tx: tx.clone(),
            events: events.clone(),
        };
        let controller = Self {
            planner,
            coordinator,
            server,
            history,
            renderer,
            config,
            state: BackendState::Idle,
            session: None,
            rx,
            tx,
            events,
        };
        (controller, handle)
    }

    pub fn state(&self) -> BackendState {
        self.state
    }

    /// Drive the mailbox until shutdown.
    pub async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            match msg {
                ControllerMsg::Load(source) => self.handle_load(source).await,
                ControllerMsg::Stop => {
                    self.teardown().await;
                    self.set_state(BackendState::Idle);
                }
                ControllerMsg::Replay => self.handle_replay(),
                ControllerMsg::DismissReplay => self.handle_dismiss_replay(),
                ControllerMsg::Shutdown => {
                    self.teardown().await;
                    self.set_state(BackendState::Idle);
                    break;
                }
                ControllerMsg::Renderer { source, signal } => {
                    if self.is_current(&source) {
                        self.handle_renderer_signal(signal).await;
                    } else {
                        debug!(source = %source.display(), "dropped signal for superseded source");
                    }
                }
                ControllerMsg::Prepared { source, result } => {
                    self.handle_prepared(source, result).await;
                }
                ControllerMsg::ReplayElapsed { source } => self.handle_replay_elapsed(source),
            }
        }
    }

    async fn handle_load(&mut self, source: PathBuf) {
        self.teardown().await;

        let access = match SourceAccess::acquire(&source) {
            Ok(access) => access,
            Err(e) => {
                self.fail(e);
                self.set_state(BackendState::Idle);
                return;
            }
        };
        let resume_offset = self.history.resume_for(&source);
        let plan = self.planner.plan(&source).await;
        info!(
            source = %source.display(),
            plan = %plan.kind(),
            resume = ?resume_offset,
            "loading"
        );

        self.session = Some(PlaybackSession::new(
            source,
            plan.clone(),
            access,
            resume_offset,
        ));
        self.dispatch_plan(plan).await;
    }

    async fn dispatch_plan(&mut self, plan: PlaybackPlan) {
        match plan {
            PlaybackPlan::Direct(path) => {
                self.attach_renderer(path.to_string_lossy().into_owned());
                self.set_state(BackendState::Active);
            }
            PlaybackPlan::Remux(req) => {
                self.set_state(BackendState::Preparing);
                let job = self.coordinator.prepare_remux(&req).await;
                self.start_job(job).await;
            }
            PlaybackPlan::Transcode(req) => {
                self.set_state(BackendState::Preparing);
                let job = self.coordinator.prepare_transcode(&req).await;
                self.start_job(job).await;
            }
        }
    }

    async fn start_job(&mut self, job: Result<ProcessingJob, ProcessingError>) {
        let Some(source) = self.session.as_ref().map(|s| s.source.clone()) else {
            return;
        };
        match job {
            Ok(ProcessingJob { task, artifact }) => {
                if let Some(session) = self.session.as_mut() {
                    session.task = Some(task);
                }
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let result = match artifact.await {
                        Ok(result) => result,
                        Err(e) => Err(ProcessingError::Failed {
                            code: None,
                            stderr_tail: format!("processing task aborted: {e}"),
                        }),
                    };
                    let _ = tx.send(ControllerMsg::Prepared { source, result });
                });
            }
            Err(e) => {
                self.fail(e.into());
                self.teardown().await;
                self.set_state(BackendState::Idle);
            }
        }
    }

    async fn handle_prepared(
        &mut self,
        source: PathBuf,
        result: Result<ProcessingArtifact, ProcessingError>,
    ) {
        if !self.is_current(&source) {
            // A superseded completion cleans up its own output and drops.
            if let Ok(artifact) = result {
                artifact.cleanup();
            }
            return;
        }
        match result {
            Ok(artifact) => self.publish_artifact(artifact).await,
            Err(ProcessingError::Cancelled) => {
                debug!("cancelled processing result dropped");
            }
            Err(e) => {
                self.fail(e.into());
                self.teardown().await;
                self.set_state(BackendState::Idle);
            }
        }
    }

    async fn publish_artifact(&mut self, artifact: ProcessingArtifact) {
        let registration = match artifact.kind() {
            ArtifactKind::File { path } => self.server.register_file(path).await,
            ArtifactKind::Hls {
                directory,
                playlist,
            } => self.server.register_hls(directory, playlist).await,
        };
        match registration {
            Ok(handle) => {
                let url = handle.url().to_string();
                if let Some(session) = self.session.as_mut() {
                    session.artifact = Some(artifact);
                    session.stream = Some(handle);
                }
                self.attach_renderer(url);
                self.set_state(BackendState::Active);
            }
            Err(e) => {
                artifact.cleanup();
                self.fail(e.into());
                self.teardown().await;
                self.set_state(BackendState::Idle);
            }
        }
    }

    async fn handle_renderer_signal(&mut self, signal: RendererSignal) {
        match signal {
            RendererSignal::Ready => {
                let offset = self.session.as_mut().and_then(|s| s.resume_offset.take());
                if let Some(offset) = offset {
                    if offset > 0.0 {
                        info!(offset, "seeking to stored resume offset");
                        self.renderer.seek(offset);
                    }
                }
            }
            RendererSignal::Position(seconds) => self.persist_position(seconds),
            RendererSignal::Ended => self.enter_completed(),
            RendererSignal::Failed(message) => self.handle_renderer_failure(message).await,
        }
    }

    async fn handle_renderer_failure(&mut self, message: String) {
        let Some((plan_kind, has_escalated, source)) = self
            .session
            .as_ref()
            .map(|s| (s.plan.kind(), s.has_escalated, s.source.clone()))
        else {
            return;
        };

        if matches!(plan_kind, PlanKind::Direct | PlanKind::Remux) && !has_escalated {
            warn!(%message, "renderer rejected stream, escalating to transcode");
            self.release_pipeline().await;
            let plan = self.planner.forced_transcode_plan(&source).await;
            if let Some(session) = self.session.as_mut() {
                session.has_escalated = true;
                session.plan = plan.clone();
            }
            self.dispatch_plan(plan).await;
        } else {
            self.fail(PlayerError::RendererFailure(message));
            self.teardown().await;
            self.set_state(BackendState::Idle);
        }
    }

    fn persist_position(&mut self, seconds: f64) {
        let threshold = self.config.persist_threshold;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let due = session
            .last_persisted
            .map_or(true, |last| seconds - last >= threshold);
        if !due {
            return;
        }
        match self.history.record_position(&session.source, seconds) {
            Ok(()) => session.last_persisted = Some(seconds),
            Err(e) => warn!(error = %e, "failed to persist playback position"),
        }
    }

    fn enter_completed(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.awaiting_replay = true;
        let source = session.source.clone();
        self.set_state(BackendState::Completed);

        let tx = self.tx.clone();
        let delay = self.config.replay_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(ControllerMsg::ReplayElapsed { source });
        });
    }

    fn handle_replay(&mut self) {
        if self.state == BackendState::Completed {
            self.restart_from_zero();
        }
    }

    fn handle_dismiss_replay(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.awaiting_replay = false;
        }
    }

    fn handle_replay_elapsed(&mut self, source: PathBuf) {
        if !self.is_current(&source) {
            return;
        }
        let awaiting = self.session.as_ref().is_some_and(|s| s.awaiting_replay);
        if self.state == BackendState::Completed && awaiting {
            self.restart_from_zero();
        }
    }

    fn restart_from_zero(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.awaiting_replay = false;
            session.resume_offset = None;
            session.last_persisted = None;
        }
        self.renderer.seek(0.0);
        self.set_state(BackendState::Active);
    }

    fn attach_renderer(&mut self, url: String) {
        let observer = match self.session.as_ref() {
            Some(session) => RendererObserver::new(session.source.clone(), self.tx.clone()),
            None => return,
        };
        debug!(%url, "attaching renderer");
        self.renderer.attach(&url, observer);
    }

    /// Release the pipeline under the current session, in acquisition-reverse
    /// order, keeping the session record itself (used by escalation).
    async fn release_pipeline(&mut self) {
        self.renderer.detach();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Some(task) = session.task.take() {
            task.cancel();
        }
        if let Some(stream) = session.stream.take() {
            stream.cleanup().await;
        }
        if let Some(artifact) = session.artifact.take() {
            artifact.cleanup();
        }
    }

    /// Full teardown: pipeline, then access grant, then tracking.
    async fn teardown(&mut self) {
        self.release_pipeline().await;
        if let Some(session) = self.session.take() {
            drop(session.access);
        }
    }

    fn is_current(&self, source: &Path) -> bool {
        self.session.as_ref().is_some_and(|s| s.source == *source)
    }

    fn set_state(&mut self, state: BackendState) {
        if self.state != state {
            self.state = state;
            debug!(%state, "backend state");
            let _ = self.events.send(PlayerEvent::StateChanged(state));
        }
    }

    fn fail(&mut self, error: PlayerError) {
        error!(kind = error.kind(), %error, "playback failure");
        let _ = self.events.send(PlayerEvent::Failure(error.to_string()));
    }
}
