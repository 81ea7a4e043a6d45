//! Headless audio backend.
//!
//! Implements [`AudioBackend`] without any output device. Clips are plain
//! records with a configured duration, and instances play until somebody calls
//! [`HeadlessBackend::finish`]. Used by the simulator binary and by tests that
//! need deterministic control over loads, failures and end-of-playback.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use resonance_common::{ClipHandle, IdGenerator, InstanceId, SoundSource, SpriteMap};
use tracing::debug;

use crate::audio_backend::{AudioBackend, BackendError, BackendResult, EndedNotifier, PlayOptions};

/// Duration reported for clips without an explicit duration.
pub const DEFAULT_CLIP_SECONDS: f64 = 1.0;

/// Future that returns `Pending` once before completing.
///
/// Makes every headless load a real suspension point.
#[derive(Debug, Default)]
struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

#[derive(Debug)]
struct HeadlessClip {
    source: String,
    duration: f64,
    sprites: SpriteMap,
}

#[derive(Debug)]
struct HeadlessInstance {
    clip: ClipHandle,
    options: PlayOptions,
    notifier: Option<EndedNotifier>,
}

#[derive(Debug, Default)]
struct HeadlessState {
    clips: HashMap<ClipHandle, HeadlessClip>,
    instances: HashMap<InstanceId, HeadlessInstance>,
    durations: HashMap<String, f64>,
    failing: HashSet<String>,
    prepare_calls: Vec<String>,
    disposed: Vec<ClipHandle>,
    default_duration: f64,
}

#[derive(Debug)]
struct HeadlessInner {
    state: Mutex<HeadlessState>,
    clip_ids: IdGenerator,
    instance_ids: IdGenerator,
}

impl HeadlessInner {
    fn complete_prepare(&self, location: String, sprites: SpriteMap) -> BackendResult<ClipHandle> {
        let mut state = self.state.lock();
        if state.failing.contains(&location) {
            return Err(BackendError::SourceUnavailable {
                location,
                message: "source marked as failing".to_string(),
            });
        }

        let duration = state
            .durations
            .get(&location)
            .copied()
            .unwrap_or(state.default_duration);
        let handle = ClipHandle::from_raw(self.clip_ids.next());
        debug!("Headless clip {} prepared from {}", handle, location);
        state.clips.insert(
            handle,
            HeadlessClip {
                source: location,
                duration,
                sprites,
            },
        );
        Ok(handle)
    }
}

/// Device-less [`AudioBackend`] with scripted durations and failures.
#[derive(Debug, Clone)]
pub struct HeadlessBackend {
    inner: Arc<HeadlessInner>,
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessBackend {
    /// Create a backend whose clips last [`DEFAULT_CLIP_SECONDS`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_default_duration(DEFAULT_CLIP_SECONDS)
    }

    /// Create a backend with a different default clip duration.
    #[must_use]
    pub fn with_default_duration(seconds: f64) -> Self {
        let state = HeadlessState {
            default_duration: seconds.max(0.0),
            ..HeadlessState::default()
        };
        Self {
            inner: Arc::new(HeadlessInner {
                state: Mutex::new(state),
                clip_ids: IdGenerator::new(),
                instance_ids: IdGenerator::new(),
            }),
        }
    }

    /// Set the duration reported for clips prepared from `source`.
    pub fn set_duration(&self, source: &SoundSource, seconds: f64) {
        self.inner
            .state
            .lock()
            .durations
            .insert(source.describe(), seconds.max(0.0));
    }

    /// Make future loads of `source` fail.
    pub fn fail_source(&self, source: &SoundSource) {
        self.inner.state.lock().failing.insert(source.describe());
    }

    /// Let `source` load again.
    pub fn clear_failure(&self, source: &SoundSource) {
        self.inner.state.lock().failing.remove(&source.describe());
    }

    /// Total number of `prepare_clip` calls.
    #[must_use]
    pub fn prepare_calls(&self) -> usize {
        self.inner.state.lock().prepare_calls.len()
    }

    /// Number of `prepare_clip` calls for one source.
    #[must_use]
    pub fn prepare_calls_for(&self, source: &SoundSource) -> usize {
        let location = source.describe();
        self.inner
            .state
            .lock()
            .prepare_calls
            .iter()
            .filter(|call| **call == location)
            .count()
    }

    /// Number of clips currently held.
    #[must_use]
    pub fn live_clips(&self) -> usize {
        self.inner.state.lock().clips.len()
    }

    /// Number of `dispose` calls that released a clip.
    #[must_use]
    pub fn disposed_count(&self) -> usize {
        self.inner.state.lock().disposed.len()
    }

    /// Number of instances currently playing.
    #[must_use]
    pub fn playing_count(&self) -> usize {
        self.inner.state.lock().instances.len()
    }

    /// Currently playing instances, in id order.
    #[must_use]
    pub fn playing_instances(&self) -> Vec<InstanceId> {
        let mut ids: Vec<_> = self.inner.state.lock().instances.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Whether an instance is still playing.
    #[must_use]
    pub fn is_instance_playing(&self, instance: InstanceId) -> bool {
        self.inner.state.lock().instances.contains_key(&instance)
    }

    /// Options an instance was started (or last adjusted) with.
    #[must_use]
    pub fn instance_options(&self, instance: InstanceId) -> Option<PlayOptions> {
        self.inner
            .state
            .lock()
            .instances
            .get(&instance)
            .map(|i| i.options.clone())
    }

    /// Source description of the clip an instance is playing.
    #[must_use]
    pub fn instance_source(&self, instance: InstanceId) -> Option<String> {
        let state = self.inner.state.lock();
        state
            .instances
            .get(&instance)
            .and_then(|i| state.clips.get(&i.clip))
            .map(|c| c.source.clone())
    }

    /// Simulate natural completion of an instance.
    ///
    /// Returns `false` if the instance is not playing.
    pub fn finish(&self, instance: InstanceId) -> bool {
        let removed = self.inner.state.lock().instances.remove(&instance);
        match removed {
            Some(playing) => {
                if let Some(notifier) = playing.notifier {
                    notifier.notify();
                }
                true
            },
            None => false,
        }
    }

    /// Simulate natural completion of every playing instance.
    pub fn finish_all(&self) -> usize {
        let finished: Vec<_> = self.inner.state.lock().instances.drain().collect();
        let count = finished.len();
        for (_, playing) in finished {
            if let Some(notifier) = playing.notifier {
                notifier.notify();
            }
        }
        count
    }
}

impl AudioBackend for HeadlessBackend {
    fn prepare_clip(
        &self,
        source: &SoundSource,
        sprites: &SpriteMap,
    ) -> BoxFuture<'static, BackendResult<ClipHandle>> {
        let location = source.describe();
        self.inner.state.lock().prepare_calls.push(location.clone());

        let inner = Arc::clone(&self.inner);
        let sprites = sprites.clone();
        async move {
            YieldNow::default().await;
            inner.complete_prepare(location, sprites)
        }
        .boxed()
    }

    fn play(&self, clip: ClipHandle, options: &PlayOptions) -> BackendResult<InstanceId> {
        let mut state = self.inner.state.lock();
        let clip_state = state.clips.get(&clip).ok_or(BackendError::UnknownClip(clip))?;
        if let Some(sprite) = &options.sprite {
            if !clip_state.sprites.contains_key(sprite) {
                return Err(BackendError::UnknownSprite(sprite.clone()));
            }
        }

        let instance = InstanceId::from_raw(self.inner.instance_ids.next());
        let mut options = options.clone();
        options.normalize();
        state.instances.insert(
            instance,
            HeadlessInstance {
                clip,
                options,
                notifier: None,
            },
        );
        Ok(instance)
    }

    fn stop(&self, clip: ClipHandle, instance: Option<InstanceId>) {
        let mut state = self.inner.state.lock();
        match instance {
            Some(id) => {
                if state.instances.get(&id).is_some_and(|i| i.clip == clip) {
                    state.instances.remove(&id);
                }
            },
            None => state.instances.retain(|_, i| i.clip != clip),
        }
    }

    fn set_volume(&self, clip: ClipHandle, instance: InstanceId, volume: f32) {
        if let Some(playing) = self.inner.state.lock().instances.get_mut(&instance) {
            if playing.clip == clip {
                playing.options.volume = volume;
                playing.options.normalize();
            }
        }
    }

    fn set_rate(&self, clip: ClipHandle, instance: InstanceId, rate: f32) {
        if let Some(playing) = self.inner.state.lock().instances.get_mut(&instance) {
            if playing.clip == clip {
                playing.options.rate = rate;
                playing.options.normalize();
            }
        }
    }

    fn set_loop(&self, clip: ClipHandle, instance: InstanceId, looped: bool) {
        if let Some(playing) = self.inner.state.lock().instances.get_mut(&instance) {
            if playing.clip == clip {
                playing.options.looped = looped;
            }
        }
    }

    fn on_ended(&self, clip: ClipHandle, instance: InstanceId, notifier: EndedNotifier) {
        let mut state = self.inner.state.lock();
        match state.instances.get_mut(&instance) {
            Some(playing) if playing.clip == clip => playing.notifier = Some(notifier),
            _ => debug!("Instance {} already gone, dropping notifier", instance),
        }
    }

    fn dispose(&self, clip: ClipHandle) {
        let mut state = self.inner.state.lock();
        if state.clips.remove(&clip).is_some() {
            state.instances.retain(|_, i| i.clip != clip);
            state.disposed.push(clip);
        }
    }

    fn estimated_duration_seconds(&self, clip: ClipHandle) -> f64 {
        self.inner
            .state
            .lock()
            .clips
            .get(&clip)
            .map_or(0.0, |c| c.duration)
    }
}
