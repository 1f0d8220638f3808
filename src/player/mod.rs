//! Incremental playback: the controller state machine and its host surface.

mod controller;
mod host;
mod state;

pub use controller::{ControllerOptions, DEFAULT_PREFETCH_WINDOW, PlaybackController};
pub use host::{Command, PlayerHandle, parse_command};
pub use state::{Notification, PlaybackState, PlaybackStatus};
