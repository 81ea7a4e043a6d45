//! Audio Backend Capability
//!
//! The engine core never decodes or mixes audio itself. Everything that touches
//! a device goes through the narrow [`AudioBackend`] trait defined here:
//!
//! - `prepare_clip`: turn a [`SoundSource`] into a backend-ready [`ClipHandle`]
//!   (the only operation that may suspend)
//! - `play` / `stop` / `set_*`: per-instance playback control
//! - `on_ended`: register a one-shot [`EndedNotifier`] for natural completion
//! - `dispose`: release the clip's resources
//!
//! # Completion channel
//!
//! ```text
//! ┌──────────────┐  notify()   ┌──────────────────┐  process_events()  ┌───────────┐
//! │ AudioBackend │────────────▶│ PlaybackEvent tx │───────────────────▶│  Engine   │
//! │ (per clip)   │             │ (crossbeam)      │                    │ scheduler │
//! └──────────────┘             └──────────────────┘                    └───────────┘
//! ```
//!
//! Backends never call back into the engine directly; they post on the
//! completion channel and the engine drains it under its own lock.

use crossbeam_channel::{Receiver, Sender};
use futures::future::BoxFuture;
use resonance_common::{ClipHandle, InstanceId, SoundSource, SpriteMap};
use thiserror::Error;
use tracing::debug;

/// Minimum playback rate accepted by [`PlayOptions::normalize`].
pub const MIN_PLAYBACK_RATE: f32 = 0.1;

/// Maximum playback rate accepted by [`PlayOptions::normalize`].
pub const MAX_PLAYBACK_RATE: f32 = 4.0;

/// Backend error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Source could not be opened or fetched.
    #[error("Failed to open audio source '{location}': {message}")]
    SourceUnavailable {
        /// Source description.
        location: String,
        /// Error message.
        message: String,
    },

    /// Audio data could not be decoded.
    #[error("Failed to decode audio: {0}")]
    DecodeFailed(String),

    /// Clip handle is not (or no longer) known to the backend.
    #[error("Unknown clip handle: {0}")]
    UnknownClip(ClipHandle),

    /// Requested sprite is not defined for the clip.
    #[error("Unknown sprite: {0}")]
    UnknownSprite(String),

    /// Output device failure.
    #[error("Audio device error: {0}")]
    Device(String),
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Resolved playback parameters for one instance.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayOptions {
    /// Sprite to play instead of the whole clip.
    pub sprite: Option<String>,
    /// Volume multiplier (0.0-1.0).
    pub volume: f32,
    /// Playback rate (1.0 = normal).
    pub rate: f32,
    /// Whether to loop.
    pub looped: bool,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            sprite: None,
            volume: 1.0,
            rate: 1.0,
            looped: false,
        }
    }
}

impl PlayOptions {
    /// Set the sprite.
    #[must_use]
    pub fn with_sprite(mut self, sprite: impl Into<String>) -> Self {
        self.sprite = Some(sprite.into());
        self
    }

    /// Set the volume.
    #[must_use]
    pub const fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    /// Set the playback rate.
    #[must_use]
    pub const fn with_rate(mut self, rate: f32) -> Self {
        self.rate = rate;
        self
    }

    /// Set looping.
    #[must_use]
    pub const fn with_loop(mut self, looped: bool) -> Self {
        self.looped = looped;
        self
    }

    /// Clamp values to valid ranges.
    pub fn normalize(&mut self) {
        self.volume = if self.volume.is_nan() {
            1.0
        } else {
            self.volume.clamp(0.0, 1.0)
        };
        self.rate = if self.rate.is_nan() {
            1.0
        } else {
            self.rate.clamp(MIN_PLAYBACK_RATE, MAX_PLAYBACK_RATE)
        };
    }
}

/// Message posted on the completion channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// An instance reached its natural end.
    Ended {
        /// Asset the instance belongs to.
        asset_id: String,
        /// Finished instance.
        instance: InstanceId,
    },
}

/// Creates the completion channel shared by an engine and its backend.
#[must_use]
pub fn completion_channel() -> (Sender<PlaybackEvent>, Receiver<PlaybackEvent>) {
    crossbeam_channel::unbounded()
}

/// One-shot end-of-playback notification.
///
/// Consumed by [`EndedNotifier::notify`], so it can fire at most once. Dropping
/// it without notifying (for example on an explicit stop) sends nothing.
#[derive(Debug)]
pub struct EndedNotifier {
    asset_id: String,
    instance: InstanceId,
    sender: Sender<PlaybackEvent>,
}

impl EndedNotifier {
    /// Create a notifier for one instance.
    pub fn new(
        asset_id: impl Into<String>,
        instance: InstanceId,
        sender: Sender<PlaybackEvent>,
    ) -> Self {
        Self {
            asset_id: asset_id.into(),
            instance,
            sender,
        }
    }

    /// Instance this notifier belongs to.
    #[must_use]
    pub const fn instance(&self) -> InstanceId {
        self.instance
    }

    /// Asset this notifier belongs to.
    #[must_use]
    pub fn asset_id(&self) -> &str {
        &self.asset_id
    }

    /// Report natural completion.
    pub fn notify(self) {
        let event = PlaybackEvent::Ended {
            asset_id: self.asset_id,
            instance: self.instance,
        };
        if self.sender.send(event).is_err() {
            debug!("Completion channel closed, dropping end notification");
        }
    }
}

/// Capability the engine core needs from an audio playback backend.
///
/// Implementations must be cheap to call from under the engine lock: only
/// `prepare_clip` may do slow work, and it does so in the returned future.
pub trait AudioBackend: Send + Sync {
    /// Prepare a playable clip from a source.
    ///
    /// `sprites` lists the named regions later passed through
    /// [`PlayOptions::sprite`].
    fn prepare_clip(
        &self,
        source: &SoundSource,
        sprites: &SpriteMap,
    ) -> BoxFuture<'static, BackendResult<ClipHandle>>;

    /// Start a new instance of a clip.
    fn play(&self, clip: ClipHandle, options: &PlayOptions) -> BackendResult<InstanceId>;

    /// Stop one instance, or every instance of the clip when `instance` is `None`.
    fn stop(&self, clip: ClipHandle, instance: Option<InstanceId>);

    /// Change the volume of a live instance.
    fn set_volume(&self, clip: ClipHandle, instance: InstanceId, volume: f32);

    /// Change the playback rate of a live instance.
    fn set_rate(&self, clip: ClipHandle, instance: InstanceId, rate: f32);

    /// Toggle looping of a live instance.
    fn set_loop(&self, clip: ClipHandle, instance: InstanceId, looped: bool);

    /// Register the end-of-playback notifier for an instance.
    ///
    /// The notifier must fire exactly once on natural completion and never on
    /// an explicit stop. If the instance already finished, fire immediately.
    fn on_ended(&self, clip: ClipHandle, instance: InstanceId, notifier: EndedNotifier);

    /// Release the clip and any instances still using it.
    fn dispose(&self, clip: ClipHandle);

    /// Approximate clip length, used for memory estimates.
    fn estimated_duration_seconds(&self, clip: ClipHandle) -> f64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_play_options_normalize() {
        let mut options = PlayOptions::default()
            .with_volume(1.5)
            .with_rate(10.0)
            .with_loop(true);
        options.normalize();

        assert!((options.volume - 1.0).abs() < f32::EPSILON);
        assert!((options.rate - MAX_PLAYBACK_RATE).abs() < f32::EPSILON);
        assert!(options.looped);
    }

    #[test]
    fn test_play_options_nan_resets() {
        let mut options = PlayOptions::default()
            .with_volume(f32::NAN)
            .with_rate(f32::NAN);
        options.normalize();
        assert!((options.volume - 1.0).abs() < f32::EPSILON);
        assert!((options.rate - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_notifier_fires_once() {
        let (tx, rx) = completion_channel();
        let notifier = EndedNotifier::new("boom", InstanceId::from_raw(4), tx);
        assert_eq!(notifier.instance(), InstanceId::from_raw(4));
        notifier.notify();

        let event = rx.try_recv().expect("event should be queued");
        assert_eq!(
            event,
            PlaybackEvent::Ended {
                asset_id: "boom".to_string(),
                instance: InstanceId::from_raw(4),
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_notifier_sends_nothing() {
        let (tx, rx) = completion_channel();
        drop(EndedNotifier::new("boom", InstanceId::from_raw(1), tx));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::SourceUnavailable {
            location: "sfx/boom.wav".to_string(),
            message: "not found".to_string(),
        };
        assert!(err.to_string().contains("sfx/boom.wav"));

        let err = BackendError::UnknownClip(ClipHandle::from_raw(9));
        assert!(err.to_string().contains('9'));
    }
}
