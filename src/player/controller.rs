//! Sentence-by-sentence playback controller.
//!
//! The controller owns the cursor, the playback state and the single active
//! audio playback. Transport methods never block: synthesis and playback
//! completion run on spawned tasks that report back through the controller's
//! inbox, which the owner drains with [`PlaybackController::process_next_event`]
//! (or [`PlaybackController::spawn`]).
//!
//! Every report carries the generation it was issued under. Interrupting
//! transitions bump the generation, so a late answer for a superseded request
//! is dropped without touching state.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::host::Command;
use super::state::{Notification, PlaybackState, PlaybackStatus};
use crate::audio::{ActivePlayback, AudioOutput};
use crate::config::voices;
use crate::text::{Segment, paragraph_count, segment};
use crate::tts::{AudioClip, DEFAULT_CAPACITY, SegmentCache, Synthesize, SynthesisError, VoiceParams, clamp_rate};

/// Default number of sentences prefetched ahead of the one playing.
pub const DEFAULT_PREFETCH_WINDOW: usize = 2;

/// Construction options for [`PlaybackController`].
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub start_index: usize,     // Initial cursor (clamped to the text)
    pub prefetch_window: usize, // Sentences synthesized ahead
    pub cache_capacity: usize,  // Resident clips
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self { start_index: 0, prefetch_window: DEFAULT_PREFETCH_WINDOW, cache_capacity: DEFAULT_CAPACITY }
    }
}

/// Everything delivered to the controller's inbox.
pub(super) enum Message {
    Command(Command),
    Fetched { generation: u64, index: usize, result: Result<Arc<AudioClip>, SynthesisError> },
    Started { generation: u64, index: usize, result: anyhow::Result<Box<dyn ActivePlayback>> },
    Finished { generation: u64, index: usize },
}

/// Playback state machine over a segmented text.
pub struct PlaybackController {
    segments: Arc<[Segment]>,
    total_paragraphs: usize,
    cache: SegmentCache,
    output: Arc<dyn AudioOutput>,
    params: VoiceParams,
    state: PlaybackState,
    cursor: usize,
    paragraph: usize,
    generation: u64,
    prefetch_window: usize,
    foreground: Option<CancellationToken>,     // Cancels the fetch blocking playback
    active: Option<Box<dyn ActivePlayback>>,    // The one playback this controller owns
    starting: bool,                             // Output is being prepared off the controller task
    last_error: Option<String>,
    inbox_tx: mpsc::UnboundedSender<Message>,
    inbox_rx: mpsc::UnboundedReceiver<Message>,
    listener: Option<mpsc::UnboundedSender<Notification>>,
}

impl PlaybackController {
    /// Create a controller for `text`, idle at `options.start_index`.
    pub fn new(
        text: &str,
        synthesizer: Arc<dyn Synthesize>,
        output: Arc<dyn AudioOutput>,
        params: VoiceParams,
        options: ControllerOptions,
    ) -> Self {
        let segments: Arc<[Segment]> = segment(text).into();
        let cache = SegmentCache::new(synthesizer, params.clone(), options.cache_capacity);
        cache.set_segments(segments.clone());

        let cursor = options.start_index.min(segments.len().saturating_sub(1));
        let paragraph = segments.get(cursor).map_or(0, |s| s.paragraph_index);
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

        info!("Loaded {} sentences in {} paragraphs", segments.len(), paragraph_count(&segments));

        Self {
            total_paragraphs: paragraph_count(&segments),
            segments,
            cache,
            output,
            params,
            state: PlaybackState::Idle,
            cursor,
            paragraph,
            generation: 0,
            prefetch_window: options.prefetch_window,
            foreground: None,
            active: None,
            starting: false,
            last_error: None,
            inbox_tx,
            inbox_rx,
            listener: None,
        }
    }

    /// Send sentence, paragraph and state changes to `listener`.
    pub fn set_listener(&mut self, listener: mpsc::UnboundedSender<Notification>) {
        self.listener = Some(listener);
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn params(&self) -> &VoiceParams {
        &self.params
    }

    pub fn cache(&self) -> &SegmentCache {
        &self.cache
    }

    /// Snapshot for display.
    pub fn status(&self) -> PlaybackStatus {
        PlaybackStatus {
            state: self.state,
            cursor: self.cursor,
            paragraph: self.paragraph,
            total_sentences: self.segments.len(),
            total_paragraphs: self.total_paragraphs,
            params: self.params.clone(),
            last_error: self.last_error.clone(),
        }
    }

    /// Start or resume playback at the cursor.
    pub fn play(&mut self) {
        if self.segments.is_empty() {
            return;
        }

        match self.state {
            PlaybackState::Loading(_) | PlaybackState::Playing(_) => {}
            PlaybackState::Paused(index) => {
                if let Some(playback) = self.active.as_mut() {
                    match playback.resume() {
                        Ok(()) => {
                            info!("▶️  Resumed sentence {}", index + 1);
                            self.set_state(PlaybackState::Playing(index));
                            return;
                        }
                        Err(e) => {
                            warn!("Failed to resume playback: {:#}", e);
                            self.release_output();
                        }
                    }
                } else if self.foreground.is_some() || self.starting {
                    // Paused while loading and the sentence is still on its way
                    self.set_state(PlaybackState::Loading(index));
                    return;
                }
                self.begin_load(self.cursor);
            }
            PlaybackState::Idle => self.begin_load(self.cursor),
        }
    }

    /// Pause without discarding the loaded sentence.
    pub fn pause(&mut self) {
        match self.state {
            PlaybackState::Playing(index) => {
                if let Some(playback) = self.active.as_mut()
                    && let Err(e) = playback.pause()
                {
                    warn!("Failed to pause playback: {:#}", e);
                    self.release_output();
                }
                info!("⏸️  Paused at sentence {}", index + 1);
                self.set_state(PlaybackState::Paused(index));
            }
            // The fetch keeps going and lands in the cache; play() picks it up
            PlaybackState::Loading(index) => self.set_state(PlaybackState::Paused(index)),
            _ => {}
        }
    }

    /// Play if stopped or paused, pause if playing or loading.
    pub fn toggle(&mut self) {
        if self.state.is_active() { self.pause() } else { self.play() }
    }

    /// Halt playback, drop any pending fetch and rewind to the first sentence.
    pub fn stop(&mut self) {
        self.interrupt();
        self.set_cursor(0);
        self.set_state(PlaybackState::Idle);
    }

    /// Move to `index` (clamped); keeps playing if playback was active.
    pub fn jump_to(&mut self, index: usize) {
        self.move_to(index);
    }

    pub fn next(&mut self) {
        self.move_to(self.cursor + 1);
    }

    pub fn prev(&mut self) {
        self.move_to(self.cursor.saturating_sub(1));
    }

    /// Move to the first sentence of the next paragraph, if any.
    pub fn next_paragraph(&mut self) {
        let current = self.paragraph;
        if let Some(target) = self.segments.iter().find(|s| s.paragraph_index > current).map(|s| s.index) {
            self.move_to(target);
        }
    }

    /// Move to the first sentence of the previous paragraph (or the very first sentence).
    pub fn prev_paragraph(&mut self) {
        if self.segments.is_empty() {
            return;
        }
        let target = match self.paragraph {
            0 => Some(0),
            current => self.segments.iter().find(|s| s.paragraph_index == current - 1).map(|s| s.index),
        };
        if let Some(target) = target {
            self.move_to(target);
        }
    }

    /// Switch voice; cached audio is discarded.
    pub fn set_voice(&mut self, voice_id: &str) {
        if !voices::is_supported(voice_id) {
            warn!("Ignoring unsupported voice '{}'", voice_id);
            return;
        }
        if self.params.voice_id == voice_id {
            return;
        }
        self.apply_params(VoiceParams::new(voice_id, self.params.rate));
    }

    /// Switch speaking rate (clamped to 0.5-1.5); cached audio is discarded.
    pub fn set_rate(&mut self, rate: f32) {
        let rate = clamp_rate(rate);
        if (self.params.rate - rate).abs() < f32::EPSILON {
            return;
        }
        self.apply_params(VoiceParams::new(self.params.voice_id.clone(), rate));
    }

    /// Discard everything synthesized so far and read again from the start.
    pub fn refresh(&mut self) {
        self.stop();
        self.cache.invalidate_all();
        self.play();
    }

    /// Replace the text being read. Playback stops and the cursor rewinds.
    pub fn set_text(&mut self, text: &str) {
        self.interrupt();
        self.segments = segment(text).into();
        self.total_paragraphs = paragraph_count(&self.segments);
        self.cache.set_segments(self.segments.clone());
        self.last_error = None;
        self.set_cursor(0);
        self.set_state(PlaybackState::Idle);
        info!("Loaded {} sentences in {} paragraphs", self.segments.len(), self.total_paragraphs);
    }

    /// Wait for one fetch result, completion or command and apply it.
    pub async fn process_next_event(&mut self) {
        // The controller keeps a sender, so the inbox never closes
        if let Some(message) = self.inbox_rx.recv().await {
            self.handle_message(message);
        }
    }

    pub(super) async fn next_message(&mut self) -> Option<Message> {
        self.inbox_rx.recv().await
    }

    pub(super) fn inbox(&self) -> mpsc::UnboundedSender<Message> {
        self.inbox_tx.clone()
    }

    pub(super) fn handle_message(&mut self, message: Message) {
        match message {
            Message::Command(command) => self.apply(command),
            Message::Fetched { generation, index, result } => self.on_fetched(generation, index, result),
            Message::Started { generation, index, result } => self.on_started(generation, index, result),
            Message::Finished { generation, index } => self.on_finished(generation, index),
        }
    }

    pub(super) fn apply(&mut self, command: Command) {
        match command {
            Command::Play => self.play(),
            Command::Pause => self.pause(),
            Command::Toggle => self.toggle(),
            Command::Stop => self.stop(),
            Command::Next => self.next(),
            Command::Prev => self.prev(),
            Command::NextParagraph => self.next_paragraph(),
            Command::PrevParagraph => self.prev_paragraph(),
            Command::JumpTo(index) => self.jump_to(index),
            Command::SetVoice(voice) => self.set_voice(&voice),
            Command::SetRate(rate) => self.set_rate(rate),
            Command::Refresh => self.refresh(),
            Command::SetText(text) => self.set_text(&text),
            Command::Shutdown => {}
        }
    }

    fn on_fetched(&mut self, generation: u64, index: usize, result: Result<Arc<AudioClip>, SynthesisError>) {
        if generation != self.generation {
            debug!("Discarding stale fetch for sentence {} (generation {} != {})", index + 1, generation, self.generation);
            return;
        }

        match self.state {
            PlaybackState::Loading(loading) if loading == index => {}
            PlaybackState::Paused(paused) if paused == index => {
                debug!("Sentence {} ready while paused", index + 1);
                self.foreground = None;
                return;
            }
            _ => {
                debug!("Ignoring fetch for sentence {} in state {}", index + 1, self.state);
                return;
            }
        }

        self.foreground = None;
        match result {
            Ok(clip) => self.start_output(index, clip),
            Err(e) if e.is_cancelled() => self.set_state(PlaybackState::Idle),
            Err(e) => {
                warn!("❌ Synthesis failed for sentence {}: {}", index + 1, e);
                self.last_error = Some(e.to_string());
                self.set_state(PlaybackState::Idle);
            }
        }
    }

    fn on_started(&mut self, generation: u64, index: usize, result: anyhow::Result<Box<dyn ActivePlayback>>) {
        if generation != self.generation {
            debug!("Discarding stale output for sentence {}", index + 1);
            if let Ok(mut playback) = result {
                playback.stop();
            }
            return;
        }
        self.starting = false;

        let mut playback = match result {
            Ok(playback) => playback,
            Err(e) => {
                if matches!(self.state, PlaybackState::Loading(i) | PlaybackState::Paused(i) if i == index) {
                    warn!("❌ Audio output failed for sentence {}: {:#}", index + 1, e);
                    self.last_error = Some(format!("{e:#}"));
                    self.set_state(PlaybackState::Idle);
                }
                return;
            }
        };

        match self.state {
            PlaybackState::Loading(loading) if loading == index => {
                self.active = Some(playback);
                info!("🔊 Playing sentence {}/{}", index + 1, self.segments.len());
                self.set_state(PlaybackState::Playing(index));
                self.cache.prefetch(index, self.prefetch_window);
            }
            PlaybackState::Paused(paused) if paused == index => match playback.pause() {
                Ok(()) => {
                    debug!("Sentence {} ready while paused", index + 1);
                    self.active = Some(playback);
                    self.cache.prefetch(index, self.prefetch_window);
                }
                Err(e) => {
                    warn!("Failed to pause new playback: {:#}", e);
                    playback.stop();
                }
            },
            _ => playback.stop(),
        }
    }

    fn on_finished(&mut self, generation: u64, index: usize) {
        if generation != self.generation {
            debug!("Discarding stale completion for sentence {}", index + 1);
            return;
        }

        match self.state {
            PlaybackState::Playing(playing) if playing == index => {}
            PlaybackState::Paused(paused) if paused == index => {
                // Ran out right as it was paused; play() will start the sentence over
                self.release_output();
                return;
            }
            _ => return,
        }

        self.release_output();
        let next = index + 1;
        if next < self.segments.len() {
            self.set_cursor(next);
            self.begin_load(next);
        } else {
            info!("✅ Finished reading ({} sentences)", self.segments.len());
            self.set_state(PlaybackState::Idle);
        }
    }

    /// Clamp, interrupt, move the cursor and restart playback if it was active.
    fn move_to(&mut self, index: usize) {
        if self.segments.is_empty() {
            return;
        }
        let index = index.min(self.segments.len() - 1);
        let resume = self.state.is_active();

        self.interrupt();
        self.set_cursor(index);

        if resume {
            self.begin_load(index);
        } else {
            self.set_state(PlaybackState::Idle);
        }
    }

    fn apply_params(&mut self, params: VoiceParams) {
        info!("🎙️  Voice {} at {}x", params.voice_id, params.rate);
        let resume = self.state.is_active();

        self.interrupt();
        self.params = params.clone();
        self.cache.set_params(params);

        if resume {
            self.begin_load(self.cursor);
        } else {
            self.set_state(PlaybackState::Idle);
        }
    }

    /// Issue the foreground fetch for `index` under the current generation.
    fn begin_load(&mut self, index: usize) {
        self.release_output();
        if let Some(token) = self.foreground.take() {
            token.cancel();
        }
        self.last_error = None;
        self.set_state(PlaybackState::Loading(index));

        let token = CancellationToken::new();
        self.foreground = Some(token.clone());

        let generation = self.generation;
        let cache = self.cache.clone();
        let inbox = self.inbox_tx.clone();
        tokio::spawn(async move {
            let result = cache.ensure(index, &token).await;
            let _ = inbox.send(Message::Fetched { generation, index, result });
        });
    }

    /// Hand a clip to the output and watch for its completion.
    ///
    /// Preparing the output (decoding, opening the device) runs on its own
    /// task; the result comes back as a `Started` message.
    fn start_output(&mut self, index: usize, clip: Arc<AudioClip>) {
        self.release_output();
        self.starting = true;

        let generation = self.generation;
        let output = self.output.clone();
        let inbox = self.inbox_tx.clone();
        tokio::spawn(async move {
            let (done_tx, done_rx) = oneshot::channel();
            let result = output.start(clip, done_tx).await;
            let started = result.is_ok();
            if inbox.send(Message::Started { generation, index, result }).is_err() || !started {
                return;
            }
            // A dropped sender means the playback was stopped, not finished
            if done_rx.await.is_ok() {
                let _ = inbox.send(Message::Finished { generation, index });
            }
        });
    }

    /// Invalidate outstanding work: new generation, cancelled fetch, silent output.
    fn interrupt(&mut self) {
        self.generation += 1;
        self.starting = false;
        if let Some(token) = self.foreground.take() {
            token.cancel();
        }
        self.release_output();
    }

    fn release_output(&mut self) {
        if let Some(mut playback) = self.active.take() {
            playback.stop();
        }
    }

    fn set_cursor(&mut self, index: usize) {
        if index != self.cursor {
            self.cursor = index;
            self.notify(Notification::SentenceChanged(index));
        }
        let paragraph = self.segments.get(index).map_or(0, |s| s.paragraph_index);
        if paragraph != self.paragraph {
            self.paragraph = paragraph;
            self.notify(Notification::ParagraphChanged(paragraph));
        }
    }

    fn set_state(&mut self, state: PlaybackState) {
        if state != self.state {
            debug!("State {} -> {}", self.state, state);
            self.state = state;
            self.notify(Notification::StateChanged(state));
        }
    }

    fn notify(&self, notification: Notification) {
        if let Some(ref listener) = self.listener {
            let _ = listener.send(notification);
        }
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.interrupt();
        self.cache.invalidate_all();
    }
}
