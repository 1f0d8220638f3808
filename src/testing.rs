//! In-process fakes for the synthesis service and the audio device.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::audio::{ActivePlayback, AudioOutput};
use crate::tts::{AudioClip, Synthesize, SynthesisError, VoiceParams};

const WAIT_LIMIT: Duration = Duration::from_secs(5);

type Reply = oneshot::Sender<Result<Bytes, SynthesisError>>;

/// Synthesizer returning the segment text as its "audio".
///
/// Instant fakes answer immediately; gated fakes hold every request until the
/// test releases it by text.
pub struct FakeSynthesizer {
    gated: bool,
    honor_cancel: bool,
    calls: Mutex<Vec<(String, VoiceParams)>>,
    failing: Mutex<HashSet<String>>,
    pending: Mutex<Vec<(String, Reply)>>,
}

impl FakeSynthesizer {
    fn build(gated: bool, honor_cancel: bool) -> Arc<Self> {
        Arc::new(Self {
            gated,
            honor_cancel,
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            pending: Mutex::new(Vec::new()),
        })
    }

    pub fn instant() -> Arc<Self> {
        Self::build(false, true)
    }

    pub fn gated() -> Arc<Self> {
        Self::build(true, true)
    }

    /// Gated, and keeps going after cancellation like a slow server would.
    pub fn gated_ignoring_cancel() -> Arc<Self> {
        Self::build(true, false)
    }

    /// Make instant requests for `text` fail.
    pub fn fail_on(&self, text: &str) {
        self.failing.lock().insert(text.to_string());
    }

    pub fn calls_for(&self, text: &str) -> usize {
        self.calls.lock().iter().filter(|(t, _)| t == text).count()
    }

    pub fn voices_for(&self, text: &str) -> Vec<String> {
        self.calls.lock().iter().filter(|(t, _)| t == text).map(|(_, p)| p.voice_id.clone()).collect()
    }

    /// Wait until `text` has been requested at least once.
    pub async fn wait_for_call(&self, text: &str) {
        self.wait_for_calls(text, 1).await;
    }

    pub async fn wait_for_calls(&self, text: &str, count: usize) {
        wait_until(|| self.calls_for(text) >= count, &format!("{count} call(s) for {text:?}")).await;
    }

    /// Answer the oldest live request for `text` with success.
    pub async fn release(&self, text: &str) {
        self.answer(text, Ok(Bytes::from(text.to_string()))).await;
    }

    /// Answer the oldest live request for `text` with an upstream error.
    pub async fn fail(&self, text: &str) {
        self.answer(text, Err(SynthesisError::Upstream { status: 500 })).await;
    }

    async fn answer(&self, text: &str, reply: Result<Bytes, SynthesisError>) {
        let mut sender = None;
        wait_until(
            || {
                let mut pending = self.pending.lock();
                pending.retain(|(_, tx)| !tx.is_closed());
                if let Some(pos) = pending.iter().position(|(t, _)| t == text) {
                    sender = Some(pending.remove(pos).1);
                }
                sender.is_some()
            },
            &format!("pending request for {text:?}"),
        )
        .await;
        if let Some(tx) = sender {
            let _ = tx.send(reply);
        }
    }
}

#[async_trait]
impl Synthesize for FakeSynthesizer {
    async fn synthesize(&self, text: &str, params: &VoiceParams, cancel: &CancellationToken) -> Result<Bytes, SynthesisError> {
        self.calls.lock().push((text.to_string(), params.clone()));

        if !self.gated {
            if self.failing.lock().contains(text) {
                return Err(SynthesisError::Upstream { status: 503 });
            }
            return Ok(Bytes::from(text.to_string()));
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().push((text.to_string(), tx));
        let reply = async { rx.await.unwrap_or(Err(SynthesisError::Cancelled)) };

        if self.honor_cancel {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(SynthesisError::Cancelled),
                result = reply => result,
            }
        } else {
            reply.await
        }
    }
}

#[derive(Default)]
struct OutputLog {
    started: Vec<String>,
    finishers: Vec<(String, oneshot::Sender<()>)>,
    pauses: usize,
    resumes: usize,
    stops: usize,
}

/// Audio output that records what it was asked to play.
#[derive(Default)]
pub struct FakeOutput {
    log: Arc<Mutex<OutputLog>>,
    fail_start: AtomicBool,
}

impl FakeOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Texts of every clip started, in order.
    pub fn started(&self) -> Vec<String> {
        self.log.lock().started.clone()
    }

    /// Complete the oldest unfinished playback of `text`.
    pub fn finish(&self, text: &str) -> bool {
        let mut log = self.log.lock();
        match log.finishers.iter().position(|(t, _)| t == text) {
            Some(pos) => log.finishers.remove(pos).1.send(()).is_ok(),
            None => false,
        }
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn pauses(&self) -> usize {
        self.log.lock().pauses
    }

    pub fn resumes(&self) -> usize {
        self.log.lock().resumes
    }

    pub fn stops(&self) -> usize {
        self.log.lock().stops
    }
}

#[async_trait]
impl AudioOutput for FakeOutput {
    async fn start(&self, clip: Arc<AudioClip>, done: oneshot::Sender<()>) -> Result<Box<dyn ActivePlayback>> {
        if self.fail_start.load(Ordering::SeqCst) {
            anyhow::bail!("no output device");
        }
        let text = String::from_utf8_lossy(&clip.data).into_owned();
        {
            let mut log = self.log.lock();
            log.started.push(text.clone());
            log.finishers.push((text, done));
        }
        Ok(Box::new(FakePlayback { log: self.log.clone() }))
    }
}

struct FakePlayback {
    log: Arc<Mutex<OutputLog>>,
}

impl ActivePlayback for FakePlayback {
    fn pause(&mut self) -> Result<()> {
        self.log.lock().pauses += 1;
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.log.lock().resumes += 1;
        Ok(())
    }

    fn stop(&mut self) {
        self.log.lock().stops += 1;
    }
}

/// Poll `ready` until it holds, failing the test after a few seconds.
pub async fn wait_until(mut ready: impl FnMut() -> bool, what: &str) {
    let waited = tokio::time::timeout(WAIT_LIMIT, async {
        while !ready() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}
