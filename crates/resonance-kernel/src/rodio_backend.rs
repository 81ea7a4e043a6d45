//! Audio Backend with Rodio Integration
//!
//! Device-backed [`AudioBackend`] built on rodio:
//!
//! - Clips are decoded once into interleaved `f32` sample buffers
//! - Every instance gets its own `Sink`
//! - Sprites are played with `skip_duration` + `take_duration`
//! - [`RodioBackend::update`] must be called each frame; it detects drained
//!   sinks and fires their end notifications
//!
//! # Example
//!
//! ```ignore
//! let (_stream, backend) = RodioBackend::try_default()?;
//! let engine = SoundEngine::new(Arc::new(backend.clone()), EngineConfig::default());
//! // game loop
//! backend.update();
//! engine.process_events();
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Cursor};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::{Mutex, RwLock};
use resonance_common::{ClipHandle, IdGenerator, InstanceId, SoundSource, SpriteMap};
use rodio::buffer::SamplesBuffer;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use tracing::{debug, info, warn};

use crate::audio_backend::{AudioBackend, BackendError, BackendResult, EndedNotifier, PlayOptions};

/// Decoded clip kept in memory.
#[derive(Debug)]
struct DecodedClip {
    samples: Arc<Vec<f32>>,
    sample_rate: u32,
    channels: u16,
    duration: Duration,
    sprites: SpriteMap,
}

impl DecodedClip {
    fn new(samples: Vec<f32>, sample_rate: u32, channels: u16, sprites: SpriteMap) -> Self {
        let frames = samples.len() / usize::from(channels.max(1));
        let seconds = frames as f64 / f64::from(sample_rate.max(1));
        Self {
            samples: Arc::new(samples),
            sample_rate,
            channels,
            duration: Duration::from_secs_f64(seconds),
            sprites,
        }
    }
}

struct RodioInstance {
    clip: ClipHandle,
    sink: Sink,
    notifier: Option<EndedNotifier>,
}

impl std::fmt::Debug for RodioInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RodioInstance")
            .field("clip", &self.clip)
            .field("empty", &self.sink.empty())
            .finish_non_exhaustive()
    }
}

struct RodioInner {
    handle: OutputStreamHandle,
    clips: RwLock<HashMap<ClipHandle, DecodedClip>>,
    instances: Mutex<HashMap<InstanceId, RodioInstance>>,
    clip_ids: IdGenerator,
    instance_ids: IdGenerator,
}

/// [`AudioBackend`] that plays through the default rodio output device.
///
/// The `OutputStream` returned by [`RodioBackend::try_default`] must be kept
/// alive for as long as sound should be audible.
#[derive(Clone)]
pub struct RodioBackend {
    inner: Arc<RodioInner>,
}

impl std::fmt::Debug for RodioBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RodioBackend")
            .field("clips", &self.inner.clips.read().len())
            .field("instances", &self.inner.instances.lock().len())
            .finish_non_exhaustive()
    }
}

impl RodioBackend {
    /// Open the default output device.
    pub fn try_default() -> BackendResult<(OutputStream, Self)> {
        let (stream, handle) =
            OutputStream::try_default().map_err(|e| BackendError::Device(e.to_string()))?;
        info!("Rodio audio device initialized");
        Ok((stream, Self::with_handle(handle)))
    }

    /// Build a backend on an existing stream handle.
    #[must_use]
    pub fn with_handle(handle: OutputStreamHandle) -> Self {
        Self {
            inner: Arc::new(RodioInner {
                handle,
                clips: RwLock::new(HashMap::new()),
                instances: Mutex::new(HashMap::new()),
                clip_ids: IdGenerator::new(),
                instance_ids: IdGenerator::new(),
            }),
        }
    }

    /// Reap drained sinks and fire their end notifications.
    ///
    /// Returns the number of instances that finished.
    pub fn update(&self) -> usize {
        let finished: Vec<RodioInstance> = {
            let mut instances = self.inner.instances.lock();
            let done: Vec<InstanceId> = instances
                .iter()
                .filter(|(_, i)| i.sink.empty())
                .map(|(id, _)| *id)
                .collect();
            done.iter().filter_map(|id| instances.remove(id)).collect()
        };

        let count = finished.len();
        for instance in finished {
            if let Some(notifier) = instance.notifier {
                notifier.notify();
            }
        }
        count
    }

    fn decode(source: &SoundSource, sprites: &SpriteMap) -> BackendResult<DecodedClip> {
        let decoded = match source {
            SoundSource::Path(path) => {
                let file = File::open(path).map_err(|e| BackendError::SourceUnavailable {
                    location: path.display().to_string(),
                    message: e.to_string(),
                })?;
                let decoder = Decoder::new(BufReader::new(file))
                    .map_err(|e| BackendError::DecodeFailed(e.to_string()))?;
                let sample_rate = decoder.sample_rate();
                let channels = decoder.channels();
                let samples: Vec<f32> = decoder.convert_samples::<f32>().collect();
                DecodedClip::new(samples, sample_rate, channels, sprites.clone())
            },
            SoundSource::Bytes { data, .. } => {
                let decoder = Decoder::new(Cursor::new(data.to_vec()))
                    .map_err(|e| BackendError::DecodeFailed(e.to_string()))?;
                let sample_rate = decoder.sample_rate();
                let channels = decoder.channels();
                let samples: Vec<f32> = decoder.convert_samples::<f32>().collect();
                DecodedClip::new(samples, sample_rate, channels, sprites.clone())
            },
        };
        Ok(decoded)
    }

    fn with_instance(&self, clip: ClipHandle, instance: InstanceId, f: impl FnOnce(&Sink)) {
        if let Some(playing) = self.inner.instances.lock().get(&instance) {
            if playing.clip == clip {
                f(&playing.sink);
            }
        }
    }
}

impl AudioBackend for RodioBackend {
    fn prepare_clip(
        &self,
        source: &SoundSource,
        sprites: &SpriteMap,
    ) -> BoxFuture<'static, BackendResult<ClipHandle>> {
        let result = Self::decode(source, sprites).map(|clip| {
            let handle = ClipHandle::from_raw(self.inner.clip_ids.next());
            debug!(
                "Decoded {} into {} ({:.2}s)",
                source.describe(),
                handle,
                clip.duration.as_secs_f64()
            );
            self.inner.clips.write().insert(handle, clip);
            handle
        });
        future::ready(result).boxed()
    }

    fn play(&self, clip: ClipHandle, options: &PlayOptions) -> BackendResult<InstanceId> {
        let clips = self.inner.clips.read();
        let decoded = clips.get(&clip).ok_or(BackendError::UnknownClip(clip))?;

        let mut options = options.clone();
        options.normalize();

        let sink =
            Sink::try_new(&self.inner.handle).map_err(|e| BackendError::Device(e.to_string()))?;
        sink.set_volume(options.volume);
        sink.set_speed(options.rate);

        let buffer = SamplesBuffer::new(
            decoded.channels,
            decoded.sample_rate,
            (*decoded.samples).clone(),
        );

        match &options.sprite {
            Some(name) => {
                let region = decoded
                    .sprites
                    .get(name)
                    .ok_or_else(|| BackendError::UnknownSprite(name.clone()))?;
                let sprite = buffer
                    .skip_duration(region.start())
                    .take_duration(region.duration());
                if options.looped {
                    sink.append(sprite.repeat_infinite());
                } else {
                    sink.append(sprite);
                }
            },
            None => {
                if options.looped {
                    sink.append(buffer.repeat_infinite());
                } else {
                    sink.append(buffer);
                }
            },
        }
        sink.play();

        let instance = InstanceId::from_raw(self.inner.instance_ids.next());
        self.inner.instances.lock().insert(
            instance,
            RodioInstance {
                clip,
                sink,
                notifier: None,
            },
        );
        Ok(instance)
    }

    fn stop(&self, clip: ClipHandle, instance: Option<InstanceId>) {
        let mut instances = self.inner.instances.lock();
        match instance {
            Some(id) => {
                if instances.get(&id).is_some_and(|i| i.clip == clip) {
                    if let Some(playing) = instances.remove(&id) {
                        playing.sink.stop();
                    }
                }
            },
            None => instances.retain(|_, i| {
                if i.clip == clip {
                    i.sink.stop();
                    false
                } else {
                    true
                }
            }),
        }
    }

    fn set_volume(&self, clip: ClipHandle, instance: InstanceId, volume: f32) {
        self.with_instance(clip, instance, |sink| sink.set_volume(volume.clamp(0.0, 1.0)));
    }

    fn set_rate(&self, clip: ClipHandle, instance: InstanceId, rate: f32) {
        self.with_instance(clip, instance, |sink| sink.set_speed(rate.clamp(0.1, 4.0)));
    }

    fn set_loop(&self, _clip: ClipHandle, instance: InstanceId, looped: bool) {
        // Sinks cannot change their queued source; takes effect on the next play.
        warn!(
            "Cannot change looping of live instance {} to {}",
            instance, looped
        );
    }

    fn on_ended(&self, clip: ClipHandle, instance: InstanceId, notifier: EndedNotifier) {
        let mut instances = self.inner.instances.lock();
        match instances.get_mut(&instance) {
            Some(playing) if playing.clip == clip => playing.notifier = Some(notifier),
            _ => debug!("Instance {} already gone, dropping notifier", instance),
        }
    }

    fn dispose(&self, clip: ClipHandle) {
        self.stop(clip, None);
        if self.inner.clips.write().remove(&clip).is_some() {
            debug!("Disposed {}", clip);
        }
    }

    fn estimated_duration_seconds(&self, clip: ClipHandle) -> f64 {
        self.inner
            .clips
            .read()
            .get(&clip)
            .map_or(0.0, |c| c.duration.as_secs_f64())
    }
}
