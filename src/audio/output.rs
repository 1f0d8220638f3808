//! Clip playback through the default output device.
//!
//! Each clip gets its own output stream, fed from a lock-free ring buffer
//! holding the whole (resampled) clip. The audio callback signals completion
//! once the buffer runs dry. Decoding, resampling and opening the stream run
//! on the blocking pool so the player task never waits on them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use parking_lot::Mutex;
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use super::decode::decode_mp3;
use super::resampler::resample;
use super::util::{find_best_config, get_device_name};
use crate::tts::AudioClip;

/// Something that can play a synthesized clip.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Start playing `clip`. `done` fires once the clip has played to the end;
    /// it is dropped unfired if the playback is stopped first.
    async fn start(&self, clip: Arc<AudioClip>, done: oneshot::Sender<()>) -> Result<Box<dyn ActivePlayback>>;
}

/// A clip currently owned by the output.
pub trait ActivePlayback: Send {
    fn pause(&mut self) -> Result<()>;
    fn resume(&mut self) -> Result<()>;
    /// Silence the clip and release the device.
    fn stop(&mut self);
}

/// Output on the system's default audio device.
#[derive(Debug, Default)]
pub struct DeviceOutput;

impl DeviceOutput {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AudioOutput for DeviceOutput {
    async fn start(&self, clip: Arc<AudioClip>, done: oneshot::Sender<()>) -> Result<Box<dyn ActivePlayback>> {
        let playback = tokio::task::spawn_blocking(move || open_playback(&clip, done)).await.context("Audio output task failed")??;
        Ok(Box::new(playback))
    }
}

/// Decode `clip`, open the default device and start a stream playing it.
fn open_playback(clip: &AudioClip, done: oneshot::Sender<()>) -> Result<DevicePlayback> {
    let audio = decode_mp3(&clip.data).with_context(|| format!("Failed to decode audio for sentence {}", clip.index + 1))?;

    let host = cpal::default_host();
    let device = host.default_output_device().context("No output device available")?;
    let preferred_rate = device.default_output_config().map(|c| c.sample_rate()).unwrap_or(audio.sample_rate);
    let supported = device.supported_output_configs().context("Failed to get supported output configs")?;
    let config = find_best_config(supported, preferred_rate)?;
    let device_rate = config.sample_rate();

    debug!(
        "Output {} at {} Hz, {} channels ({:.1}s clip at {} Hz)",
        get_device_name(&device),
        device_rate,
        config.channels(),
        audio.duration_secs(),
        audio.sample_rate
    );

    let samples = resample(&audio.samples, audio.sample_rate, device_rate)?;

    let ring = HeapRb::<f32>::new(samples.len().max(1));
    let (mut producer, mut consumer) = ring.split();
    producer.push_slice(&samples);

    let paused = Arc::new(AtomicBool::new(false));
    let stopped = Arc::new(AtomicBool::new(false));
    let done = Arc::new(Mutex::new(Some(done)));

    let channels = config.channels() as usize;
    let stream_config: StreamConfig = config.config();
    let callback_paused = paused.clone();
    let callback_stopped = stopped.clone();

    let stream = device.build_output_stream(
        &stream_config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let silent = callback_paused.load(Ordering::Relaxed) || callback_stopped.load(Ordering::Relaxed);

            for frame in data.chunks_mut(channels) {
                let sample = if silent { 0.0 } else { consumer.try_pop().unwrap_or(0.0) };
                frame.fill(sample);
            }

            if !silent
                && consumer.is_empty()
                && let Some(done) = done.lock().take()
            {
                let _ = done.send(());
            }
        },
        |err| error!("Audio playback error: {}", err),
        None,
    )?;

    stream.play().context("Failed to start playback stream")?;
    info!("Audio output: {} Hz -> {} Hz on {}", audio.sample_rate, device_rate, get_device_name(&device));

    Ok(DevicePlayback { stream, paused, stopped })
}

/// A stream playing one clip. Dropping it closes the stream.
struct DevicePlayback {
    stream: Stream,
    paused: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

impl ActivePlayback for DevicePlayback {
    fn pause(&mut self) -> Result<()> {
        self.paused.store(true, Ordering::SeqCst);
        self.stream.pause().context("Failed to pause playback stream")
    }

    fn resume(&mut self) -> Result<()> {
        self.paused.store(false, Ordering::SeqCst);
        self.stream.play().context("Failed to resume playback stream")
    }

    fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Err(e) = self.stream.pause() {
            debug!("Failed to pause stream on stop: {}", e);
        }
    }
}
