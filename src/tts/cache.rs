//! Per-segment audio cache with single-flight synthesis and prefetching.
//!
//! Clips are keyed by segment index and only valid for the voice parameters
//! they were synthesized with; changing the voice, the rate or the text
//! drops every clip and aborts every request in flight.
//!
//! Concurrent `ensure` calls for one index share a single request. Each
//! caller holds a waiter slot; when the last waiter gives up the request is
//! aborted and its result is never stored.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::SynthesisError;
use super::params::VoiceParams;
use super::synthesizer::Synthesize;
use crate::text::Segment;

/// Default number of resident clips.
pub const DEFAULT_CAPACITY: usize = 32;

/// Synthesized audio for one segment under one set of voice parameters.
#[derive(Debug)]
pub struct AudioClip {
    pub index: usize,
    pub params: VoiceParams,
    pub data: Bytes, // Encoded audio as returned by the service
}

type FetchResult = Result<Arc<AudioClip>, SynthesisError>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

/// A synthesis request shared by every caller waiting on the same index.
struct InFlight {
    id: u64,
    fetch: SharedFetch,
    cancel: CancellationToken,
    waiters: usize,
}

struct CacheState {
    segments: Arc<[Segment]>,
    params: VoiceParams,
    clips: HashMap<usize, Arc<AudioClip>>,
    in_flight: HashMap<usize, InFlight>,
    prefetch_cancel: CancellationToken, // Parent of every background prefetch
    next_fetch_id: u64,
}

struct CacheInner {
    synthesizer: Arc<dyn Synthesize>,
    capacity: usize,
    state: Mutex<CacheState>,
}

/// Bounded cache of synthesized segments. Cloning shares the same cache.
#[derive(Clone)]
pub struct SegmentCache {
    inner: Arc<CacheInner>,
}

impl SegmentCache {
    /// Create an empty cache with no segments.
    pub fn new(synthesizer: Arc<dyn Synthesize>, params: VoiceParams, capacity: usize) -> Self {
        let state = CacheState {
            segments: Arc::from(Vec::new()),
            params,
            clips: HashMap::new(),
            in_flight: HashMap::new(),
            prefetch_cancel: CancellationToken::new(),
            next_fetch_id: 0,
        };
        Self { inner: Arc::new(CacheInner { synthesizer, capacity: capacity.max(1), state: Mutex::new(state) }) }
    }

    /// Cached clip for `index`, if synthesized under the current parameters.
    pub fn get(&self, index: usize) -> Option<Arc<AudioClip>> {
        let state = self.inner.state.lock();
        state.clips.get(&index).filter(|clip| clip.params == state.params).cloned()
    }

    /// Get the clip for `index`, synthesizing it if needed.
    ///
    /// Joins an in-flight request for the same index instead of issuing a
    /// second one. Cancelling `cancel` withdraws this caller only.
    pub async fn ensure(&self, index: usize, cancel: &CancellationToken) -> FetchResult {
        let (fetch, _waiter) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;

            if let Some(clip) = state.clips.get(&index) {
                return Ok(clip.clone());
            }

            let (fetch, id) = match state.in_flight.get_mut(&index) {
                Some(entry) => {
                    debug!("Joining in-flight synthesis for segment {}", index);
                    entry.waiters += 1;
                    (entry.fetch.clone(), entry.id)
                }
                None => {
                    let entry = self.spawn_fetch(state, index)?;
                    let joined = (entry.fetch.clone(), entry.id);
                    state.in_flight.insert(index, entry);
                    joined
                }
            };
            (fetch, Waiter { cache: self.clone(), index, id })
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SynthesisError::Cancelled),
            result = fetch => result,
        }
    }

    /// Start background synthesis of the `window` segments after `from_index`.
    ///
    /// Never blocks; failures are logged and forgotten.
    pub fn prefetch(&self, from_index: usize, window: usize) {
        for index in from_index + 1..=from_index + window {
            let parent = {
                let state = self.inner.state.lock();
                if index >= state.segments.len() {
                    break;
                }
                if state.clips.contains_key(&index) {
                    continue;
                }
                state.prefetch_cancel.clone()
            };

            let cache = self.clone();
            let token = parent.child_token();
            tokio::spawn(async move {
                match cache.ensure(index, &token).await {
                    Ok(_) => debug!("Prefetched segment {}", index),
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => debug!("Prefetch of segment {} failed: {}", index, e),
                }
            });
        }
    }

    /// Drop every clip and abort every request in flight.
    pub fn invalidate_all(&self) {
        let mut state = self.inner.state.lock();
        let dropped = state.clips.len();
        let aborted = state.in_flight.len();
        state.clips.clear();
        for (_, entry) in state.in_flight.drain() {
            entry.cancel.cancel();
        }
        state.prefetch_cancel.cancel();
        state.prefetch_cancel = CancellationToken::new();
        if dropped > 0 || aborted > 0 {
            debug!("Cache invalidated ({} clips dropped, {} requests aborted)", dropped, aborted);
        }
    }

    /// Switch voice parameters; invalidates everything.
    pub fn set_params(&self, params: VoiceParams) {
        self.invalidate_all();
        self.inner.state.lock().params = params;
    }

    /// Replace the segment list; invalidates everything.
    pub fn set_segments(&self, segments: Arc<[Segment]>) {
        self.invalidate_all();
        self.inner.state.lock().segments = segments;
    }

    /// Indices with a resident clip, ascending.
    pub fn cached_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.inner.state.lock().clips.keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    /// Number of requests currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    /// Spawn the synthesis task for `index` (caller holds the lock).
    fn spawn_fetch(&self, state: &mut CacheState, index: usize) -> Result<InFlight, SynthesisError> {
        let text = state.segments.get(index).map(|s| s.text.clone()).ok_or(SynthesisError::NoSegment(index))?;
        let params = state.params.clone();
        let id = state.next_fetch_id;
        state.next_fetch_id += 1;

        debug!("Requesting synthesis for segment {}", index);

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let cache = self.clone();
        let task = tokio::spawn(async move {
            let result = cache.inner.synthesizer.synthesize(&text, &params, &token).await;
            cache.complete(index, id, params, result)
        });

        let fetch = async move { task.await.unwrap_or_else(|e| Err(SynthesisError::Task(e.to_string()))) }.boxed().shared();

        Ok(InFlight { id, fetch, cancel, waiters: 1 })
    }

    /// Store a finished request, unless it was abandoned or invalidated meanwhile.
    fn complete(&self, index: usize, id: u64, params: VoiceParams, result: Result<Bytes, SynthesisError>) -> FetchResult {
        let mut state = self.inner.state.lock();

        let current = state.in_flight.get(&index).is_some_and(|entry| entry.id == id);
        if !current {
            debug!("Discarding abandoned synthesis for segment {}", index);
            return Err(SynthesisError::Cancelled);
        }
        state.in_flight.remove(&index);

        let clip = Arc::new(AudioClip { index, params, data: result? });
        if clip.params == state.params {
            state.clips.insert(index, clip.clone());
            self.evict(&mut state, index);
        }
        Ok(clip)
    }

    /// Keep the cache within capacity, dropping clips furthest from `anchor`.
    fn evict(&self, state: &mut CacheState, anchor: usize) {
        while state.clips.len() > self.inner.capacity {
            let Some(&victim) = state.clips.keys().max_by_key(|&&index| index.abs_diff(anchor)) else {
                break;
            };
            state.clips.remove(&victim);
            debug!("Evicted segment {} from cache", victim);
        }
    }

    /// Give up one waiter slot; abort the request when nobody is left.
    fn release_waiter(&self, index: usize, id: u64) {
        let mut state = self.inner.state.lock();
        let abandoned = match state.in_flight.get_mut(&index) {
            Some(entry) if entry.id == id => {
                entry.waiters = entry.waiters.saturating_sub(1);
                entry.waiters == 0
            }
            _ => false,
        };
        if abandoned && let Some(entry) = state.in_flight.remove(&index) {
            entry.cancel.cancel();
            debug!("Aborted synthesis for segment {} (no waiters left)", index);
        }
    }
}

/// Waiter slot on an in-flight request, released on drop.
struct Waiter {
    cache: SegmentCache,
    index: usize,
    id: u64,
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.cache.release_waiter(self.index, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSynthesizer;
    use crate::text::segment;

    fn cache_for(text: &str, synth: &Arc<FakeSynthesizer>, capacity: usize) -> SegmentCache {
        let cache = SegmentCache::new(synth.clone(), VoiceParams::new("en-US-JennyNeural", 1.0), capacity);
        cache.set_segments(segment(text).into());
        cache
    }

    #[tokio::test]
    async fn test_ensure_caches_result() {
        let synth = FakeSynthesizer::instant();
        let cache = cache_for("One. Two.", &synth, DEFAULT_CAPACITY);
        let token = CancellationToken::new();

        assert!(cache.get(1).is_none());
        let clip = cache.ensure(1, &token).await.unwrap();
        assert_eq!(clip.data, Bytes::from("Two."));
        assert!(cache.get(1).is_some());

        cache.ensure(1, &token).await.unwrap();
        assert_eq!(synth.calls_for("Two."), 1);
    }

    #[tokio::test]
    async fn test_concurrent_ensure_is_single_flight() {
        let synth = FakeSynthesizer::gated();
        let cache = cache_for("One. Two.", &synth, DEFAULT_CAPACITY);
        let token = CancellationToken::new();

        let (first, second, _) = tokio::join!(cache.ensure(0, &token), cache.ensure(0, &token), synth.release("One."));

        assert_eq!(first.unwrap().data, Bytes::from("One."));
        assert_eq!(second.unwrap().data, Bytes::from("One."));
        assert_eq!(synth.calls_for("One."), 1);
    }

    #[tokio::test]
    async fn test_voice_change_invalidates() {
        let synth = FakeSynthesizer::instant();
        let cache = cache_for("One. Two. Three.", &synth, DEFAULT_CAPACITY);
        let token = CancellationToken::new();
        for index in 0..3 {
            cache.ensure(index, &token).await.unwrap();
        }
        assert_eq!(cache.cached_indices(), vec![0, 1, 2]);

        cache.set_params(VoiceParams::new("en-US-GuyNeural", 1.0));
        for index in 0..3 {
            assert!(cache.get(index).is_none());
        }

        let clip = cache.ensure(0, &token).await.unwrap();
        assert_eq!(clip.params.voice_id, "en-US-GuyNeural");
        assert_eq!(synth.calls_for("One."), 2);
    }

    #[tokio::test]
    async fn test_invalidate_aborts_in_flight() {
        let synth = FakeSynthesizer::gated();
        let cache = cache_for("One.", &synth, DEFAULT_CAPACITY);
        let token = CancellationToken::new();

        let waiting = cache.ensure(0, &token);
        let invalidate = async {
            synth.wait_for_call("One.").await;
            cache.invalidate_all();
        };
        let (result, _) = tokio::join!(waiting, invalidate);

        assert!(result.unwrap_err().is_cancelled());
        assert!(cache.get(0).is_none());
        assert_eq!(cache.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_last_waiter_cancel_aborts_request() {
        let synth = FakeSynthesizer::gated_ignoring_cancel();
        let cache = cache_for("One.", &synth, DEFAULT_CAPACITY);
        let token = CancellationToken::new();

        let waiting = cache.ensure(0, &token);
        let cancel = async {
            synth.wait_for_call("One.").await;
            token.cancel();
        };
        let (result, _) = tokio::join!(waiting, cancel);
        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(cache.in_flight_count(), 0);

        // The late response must not land in the cache
        synth.release("One.").await;
        tokio::task::yield_now().await;
        assert!(cache.get(0).is_none());
    }

    #[tokio::test]
    async fn test_one_waiter_cancelling_keeps_request_alive() {
        let synth = FakeSynthesizer::gated();
        let cache = cache_for("One.", &synth, DEFAULT_CAPACITY);
        let impatient = CancellationToken::new();
        let patient = CancellationToken::new();

        let (gave_up, got, _) = tokio::join!(cache.ensure(0, &impatient), cache.ensure(0, &patient), async {
            synth.wait_for_call("One.").await;
            impatient.cancel();
            tokio::task::yield_now().await;
            synth.release("One.").await;
        });

        assert!(gave_up.unwrap_err().is_cancelled());
        assert_eq!(got.unwrap().data, Bytes::from("One."));
        assert!(cache.get(0).is_some());
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let synth = FakeSynthesizer::instant();
        synth.fail_on("Two.");
        let cache = cache_for("One. Two.", &synth, DEFAULT_CAPACITY);
        let token = CancellationToken::new();

        assert!(cache.ensure(1, &token).await.is_err());
        assert!(cache.get(1).is_none());
        assert!(cache.ensure(1, &token).await.is_err());
        assert_eq!(synth.calls_for("Two."), 2);
    }

    #[tokio::test]
    async fn test_capacity_evicts_furthest() {
        let synth = FakeSynthesizer::instant();
        let cache = cache_for("A. B. C. D.", &synth, 2);
        let token = CancellationToken::new();

        cache.ensure(0, &token).await.unwrap();
        cache.ensure(1, &token).await.unwrap();
        cache.ensure(3, &token).await.unwrap();
        assert_eq!(cache.cached_indices(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_prefetch_fills_window() {
        let synth = FakeSynthesizer::instant();
        let cache = cache_for("A. B. C. D.", &synth, DEFAULT_CAPACITY);

        cache.prefetch(0, 2);
        synth.wait_for_call("C.").await;
        for _ in 0..10 {
            if cache.cached_indices() == vec![1, 2] {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(cache.cached_indices(), vec![1, 2]);
        assert_eq!(synth.calls_for("D."), 0);

        // Past the end is ignored
        cache.prefetch(3, 2);
        assert_eq!(cache.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_out_of_range_index() {
        let synth = FakeSynthesizer::instant();
        let cache = cache_for("A.", &synth, DEFAULT_CAPACITY);
        let result = cache.ensure(5, &CancellationToken::new()).await;
        assert_eq!(result.unwrap_err(), SynthesisError::NoSegment(5));
    }
}
