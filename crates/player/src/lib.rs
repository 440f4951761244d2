pub mod controller;
pub mod renderer;
pub mod session;

pub use controller::{Controller, PlayerConfig, PlayerEvent, PlayerHandle};
pub use renderer::{Renderer, RendererObserver, RendererSignal};
pub use session::BackendState;
