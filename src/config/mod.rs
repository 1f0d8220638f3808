//! Configuration module for the read-aloud player.
//!
//! Provides CLI argument parsing, the voice allow-list and stored preferences.

#[allow(clippy::module_inception)]
mod config;
mod preferences;
pub mod voices;

pub use config::AppConfig;
pub use preferences::{Preferences, default_preferences_path};
