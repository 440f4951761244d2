use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::controller::ControllerMsg;

/// Signals a renderer reports for the session it is attached to.
#[derive(Debug, Clone, PartialEq)]
pub enum RendererSignal {
    /// The renderer can accept seeks.
    Ready,
    /// Periodic playback position, in seconds.
    Position(f64),
    /// End of stream.
    Ended,
    /// Fatal renderer error with its message.
    Failed(String),
}

/// Callback set handed to a renderer at attach time.
///
/// Every signal is tagged with the source captured at attach and posted to
/// the controller mailbox; the controller drops signals whose source no
/// longer matches the active session.
#[derive(Debug, Clone)]
pub struct RendererObserver {
    source: PathBuf,
    tx: mpsc::UnboundedSender<ControllerMsg>,
}

impl RendererObserver {
    pub(crate) fn new(source: PathBuf, tx: mpsc::UnboundedSender<ControllerMsg>) -> Self {
        Self { source, tx }
    }

    pub fn ready(&self) {
        self.send(RendererSignal::Ready);
    }

    pub fn position(&self, seconds: f64) {
        self.send(RendererSignal::Position(seconds));
    }

    pub fn ended(&self) {
        self.send(RendererSignal::Ended);
    }

    pub fn failed(&self, message: impl Into<String>) {
        self.send(RendererSignal::Failed(message.into()));
    }

    fn send(&self, signal: RendererSignal) {
        let _ = self.tx.send(ControllerMsg::Renderer {
            source: self.source.clone(),
            signal,
        });
    }
}

/// Seam to the native frame renderer.
///
/// The controller wires one observer per session and detaches during
/// teardown; implementations must not retain observers past detach.
pub trait Renderer: Send + 'static {
    /// Hand the renderer a playable URL (a local file path for direct plans,
    /// a loopback HTTP URL otherwise).
    fn attach(&mut self, url: &str, observer: RendererObserver);

    fn seek(&mut self, seconds: f64);

    fn detach(&mut self);
}
