//! # Resonance Kernel
//!
//! Audio backend capability for the Resonance sound-effect engine.
//!
//! This crate provides:
//! - The [`AudioBackend`] trait the engine core talks to
//! - Resolved per-instance [`PlayOptions`]
//! - The completion channel ([`EndedNotifier`], [`PlaybackEvent`])
//! - [`HeadlessBackend`], a device-less backend for tools and tests
//! - `RodioBackend` behind the `rodio-backend` feature
//!
//! ## Threading
//!
//! Backends are `Send + Sync` and are shared with the engine through an
//! `Arc`. They never call into the engine; end-of-playback is reported as a
//! message on the completion channel.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod audio_backend;
pub mod headless;
#[cfg(feature = "rodio-backend")]
pub mod rodio_backend;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::audio_backend::*;
    pub use crate::headless::*;
    #[cfg(feature = "rodio-backend")]
    pub use crate::rodio_backend::*;
}

pub use prelude::*;
