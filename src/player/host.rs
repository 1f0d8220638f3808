//! Host surface: transport commands and the spawned controller task.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::controller::{Message, PlaybackController};
use super::state::PlaybackStatus;

/// Transport command issued by the host.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play,
    Pause,
    Toggle,
    Stop,
    Next,
    Prev,
    NextParagraph,
    PrevParagraph,
    JumpTo(usize),
    SetVoice(String),
    SetRate(f32),
    Refresh,
    SetText(String),
    Shutdown,
}

/// Parse an interactive command line.
///
/// An empty line toggles play/pause. Sentence numbers are 1-based.
pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    let (word, arg) = match line.split_once(char::is_whitespace) {
        Some((word, arg)) => (word, arg.trim()),
        None => (line, ""),
    };

    let command = match word.to_lowercase().as_str() {
        "" | "t" | "toggle" => Command::Toggle,
        "p" | "play" => Command::Play,
        "pause" => Command::Pause,
        "s" | "stop" => Command::Stop,
        "n" | "next" => Command::Next,
        "b" | "prev" | "back" => Command::Prev,
        "np" | "next-paragraph" => Command::NextParagraph,
        "pp" | "prev-paragraph" => Command::PrevParagraph,
        "j" | "jump" | "goto" => {
            let number: usize = arg.parse().ok()?;
            Command::JumpTo(number.checked_sub(1)?)
        }
        "v" | "voice" if !arg.is_empty() => Command::SetVoice(arg.to_string()),
        "r" | "rate" => Command::SetRate(arg.parse().ok()?),
        "refresh" | "reload" => Command::Refresh,
        "q" | "quit" | "exit" => Command::Shutdown,
        _ => return None,
    };
    Some(command)
}

/// Handle to a controller running on its own task.
#[derive(Clone)]
pub struct PlayerHandle {
    commands: mpsc::UnboundedSender<Message>,
    status: watch::Receiver<PlaybackStatus>,
}

impl PlayerHandle {
    /// Queue a command; returns false once the controller has shut down.
    pub fn send(&self, command: Command) -> bool {
        self.commands.send(Message::Command(command)).is_ok()
    }

    /// Latest published status.
    pub fn status(&self) -> PlaybackStatus {
        self.status.borrow().clone()
    }

    /// Status receiver for hosts that render on change.
    pub fn subscribe(&self) -> watch::Receiver<PlaybackStatus> {
        self.status.clone()
    }
}

impl PlaybackController {
    /// Move the controller onto a task and return a handle to drive it.
    ///
    /// The task ends on [`Command::Shutdown`], dropping the controller and
    /// with it any playback and pending synthesis.
    pub fn spawn(mut self) -> (PlayerHandle, JoinHandle<()>) {
        let (status_tx, status_rx) = watch::channel(self.status());
        let handle = PlayerHandle { commands: self.inbox(), status: status_rx };

        let task = tokio::spawn(async move {
            loop {
                let Some(message) = self.next_message().await else {
                    break;
                };
                if matches!(message, Message::Command(Command::Shutdown)) {
                    info!("Player shutting down");
                    break;
                }
                self.handle_message(message);

                let status = self.status();
                status_tx.send_if_modified(|current| {
                    if *current == status {
                        false
                    } else {
                        *current = status;
                        true
                    }
                });
            }
            debug!("Player task finished");
        });

        (handle, task)
    }
}
