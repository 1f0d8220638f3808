//! Read Aloud - reads a text file sentence by sentence through a remote TTS service.
//!
//! Sentences are synthesized on demand and played one at a time while the next
//! few are prefetched. When reading from a file, transport commands are taken
//! from stdin.

use std::io::{BufRead, Read};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::LocalTime;

use read_aloud::audio::DeviceOutput;
use read_aloud::config::{AppConfig, Preferences};
use read_aloud::player::{Command, ControllerOptions, Notification, PlaybackController, PlaybackState, PlayerHandle, parse_command};
use read_aloud::text::Segment;
use read_aloud::tts::Synthesizer;

const HELP: &str = "Commands: <enter> toggle | play | pause | stop | next | back | np | pp | jump <n> | voice <id> | rate <x> | refresh | quit";

/// Load the text to read from the configured file, or stdin.
fn read_text(config: &AppConfig) -> Result<String> {
    match config.file {
        Some(ref path) => std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text).context("Failed to read text from stdin")?;
            Ok(text)
        }
    }
}

/// Decides which sentence to print from the notification stream.
///
/// A sentence is printed once when it starts playing; resuming it after a
/// pause does not print it again.
#[derive(Debug, Default)]
struct SentenceLog {
    printed: Option<usize>,
}

impl SentenceLog {
    fn observe(&mut self, notification: &Notification) -> Option<usize> {
        match *notification {
            Notification::StateChanged(PlaybackState::Playing(index)) if self.printed != Some(index) => {
                self.printed = Some(index);
                Some(index)
            }
            Notification::StateChanged(PlaybackState::Playing(_) | PlaybackState::Paused(_)) | Notification::ParagraphChanged(_) => None,
            // Anything else means the next start is a fresh read
            _ => {
                self.printed = None;
                None
            }
        }
    }
}

/// Print each sentence as it starts playing, with paragraph breaks.
fn spawn_notification_task(mut notifications: mpsc::UnboundedReceiver<Notification>, segments: Vec<Segment>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut log = SentenceLog::default();
        while let Some(notification) = notifications.recv().await {
            if let Some(index) = log.observe(&notification)
                && let Some(segment) = segments.get(index)
            {
                info!("📖 [{}/{}] {}", index + 1, segments.len(), segment.text);
            }
            match notification {
                Notification::ParagraphChanged(paragraph) => info!("¶ Paragraph {}", paragraph + 1),
                other => debug!("{:?}", other),
            }
        }
    })
}

/// Forward stdin command lines to the player.
///
/// Lines are read on a plain thread: a blocked stdin read must not keep the
/// runtime alive at exit.
fn spawn_command_task(player: PlayerHandle, shutdown: CancellationToken) -> JoinHandle<()> {
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to read command: {}", e);
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        info!("{}", HELP);
        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => break,
                line = line_rx.recv() => line,
            };
            let Some(line) = line else {
                break;
            };

            match parse_command(&line) {
                Some(Command::Shutdown) => {
                    shutdown.cancel();
                    break;
                }
                Some(command) => {
                    if !player.send(command) {
                        break;
                    }
                }
                None => warn!("Unknown command '{}'. {}", line.trim(), HELP),
            }
        }
    })
}

/// Persist voice changes and end non-interactive sessions once reading stops.
fn spawn_status_task(player: PlayerHandle, config: AppConfig, interactive: bool, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut status = player.subscribe();
        let mut params = status.borrow().params.clone();
        let mut was_active = false;
        let mut reported: Option<String> = None;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            let current = status.borrow_and_update().clone();

            if current.params != params {
                params = current.params.clone();
                let prefs = Preferences { voice: params.voice_id.clone(), rate: params.rate };
                if let Err(e) = prefs.save(&config.preferences) {
                    warn!("Failed to save preferences: {:#}", e);
                }
            }

            if current.last_error != reported {
                if let Some(ref e) = current.last_error {
                    error!("❌ {} ({})", e, current.progress_label());
                }
                reported = current.last_error.clone();
            }

            if current.state.is_active() {
                was_active = true;
            } else if (was_active || current.last_error.is_some()) && current.state == PlaybackState::Idle {
                was_active = false;
                info!("⏹️  Stopped at {}", current.progress_label());
                if !interactive {
                    shutdown.cancel();
                    break;
                }
            }
        }
    })
}

/// Wait for Ctrl+C, SIGTERM or an internal shutdown request.
async fn wait_for_shutdown(shutdown: CancellationToken) {
    tokio::select! {
        _ = shutdown.cancelled() => {
            debug!("Shutdown requested");
        }
        _ = signal::ctrl_c() => {
            info!("🛑 Received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        warn!("Failed to register SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("🛑 Received SIGTERM, shutting down...");
        }
    }

    shutdown.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_args();

    // Respect RUST_LOG, fall back to the verbose flag, default to info
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| if config.verbose { EnvFilter::try_new("debug") } else { EnvFilter::try_new("info") })
        .context("Invalid log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(LocalTime::new(time::macros::format_description!("[hour]:[minute]:[second]")))
        .init();

    info!("🔈 Read Aloud v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        error!("❌ Configuration error: {}", e);
        std::process::exit(1);
    }
    config.log_config();

    let text = read_text(&config)?;
    let interactive = config.file.is_some();

    let synthesizer = Arc::new(Synthesizer::new(&config)?);
    let output = Arc::new(DeviceOutput::new());
    let options = ControllerOptions {
        start_index: config.start_sentence,
        prefetch_window: config.prefetch_window,
        cache_capacity: config.cache_capacity,
    };

    let mut controller = PlaybackController::new(&text, synthesizer, output, config.voice_params(), options);
    if controller.segments().is_empty() {
        warn!("Nothing to read");
        return Ok(());
    }

    let (notify_tx, notify_rx) = mpsc::unbounded_channel();
    controller.set_listener(notify_tx);
    let notification_handle = spawn_notification_task(notify_rx, controller.segments().to_vec());

    let (player, player_handle) = controller.spawn();
    let shutdown = CancellationToken::new();

    let status_handle = spawn_status_task(player.clone(), config.clone(), interactive, shutdown.clone());
    let command_handle = interactive.then(|| spawn_command_task(player.clone(), shutdown.clone()));

    player.send(Command::Play);

    wait_for_shutdown(shutdown).await;

    // Stopping the player drops the active stream and any pending synthesis
    player.send(Command::Shutdown);

    let graceful_timeout = tokio::time::Duration::from_millis(500);
    tokio::select! {
        _ = player_handle => {
            debug!("Player task finished gracefully");
        }
        _ = tokio::time::sleep(graceful_timeout) => {
            debug!("Player task didn't finish in time");
        }
    }

    status_handle.abort();
    notification_handle.abort();
    if let Some(handle) = command_handle {
        handle.abort();
    }

    info!("✅ Read Aloud stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentence_printed_once_across_pause() {
        let mut log = SentenceLog::default();
        let printed: Vec<usize> = [
            Notification::StateChanged(PlaybackState::Loading(0)),
            Notification::StateChanged(PlaybackState::Playing(0)),
            Notification::StateChanged(PlaybackState::Paused(0)),
            Notification::StateChanged(PlaybackState::Playing(0)),
            Notification::SentenceChanged(1),
            Notification::StateChanged(PlaybackState::Loading(1)),
            Notification::StateChanged(PlaybackState::Playing(1)),
        ]
        .iter()
        .filter_map(|n| log.observe(n))
        .collect();
        assert_eq!(printed, vec![0, 1]);
    }

    #[test]
    fn test_sentence_reprinted_after_stop() {
        let mut log = SentenceLog::default();
        assert_eq!(log.observe(&Notification::StateChanged(PlaybackState::Playing(0))), Some(0));
        assert_eq!(log.observe(&Notification::StateChanged(PlaybackState::Idle)), None);
        assert_eq!(log.observe(&Notification::StateChanged(PlaybackState::Playing(0))), Some(0));
    }

    #[test]
    fn test_sentence_reprinted_after_reload() {
        let mut log = SentenceLog::default();
        assert_eq!(log.observe(&Notification::StateChanged(PlaybackState::Playing(2))), Some(2));
        assert_eq!(log.observe(&Notification::StateChanged(PlaybackState::Loading(2))), None);
        assert_eq!(log.observe(&Notification::StateChanged(PlaybackState::Playing(2))), Some(2));
    }
}
