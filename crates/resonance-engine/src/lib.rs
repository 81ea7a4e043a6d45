//! # Resonance Engine
//!
//! Sound-effect engine core: an in-memory clip cache with priority-aware
//! eviction, concurrent-playback scheduling, and weighted variant selection.
//!
//! This crate provides:
//! - [`SoundEngine`], the single entry point
//! - [`AssetRegistry`] for declared sounds
//! - [`LoadCache`] with LRU + priority eviction under a memory budget
//! - [`PlaybackScheduler`] with global and per-sound caps and a priority queue
//! - [`VariantSelector`] for weighted random variants
//! - [`StatsCollector`] snapshots
//! - [`EngineConfig`] and [`SoundManifest`] TOML loading
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use resonance_common::{SoundAsset, SoundSource};
//! use resonance_engine::{EngineConfig, PlayRequest, SoundEngine};
//! use resonance_kernel::HeadlessBackend;
//!
//! let backend = HeadlessBackend::new();
//! let engine = SoundEngine::new(Arc::new(backend.clone()), EngineConfig::default());
//!
//! pollster::block_on(async {
//!     engine
//!         .add_sound(SoundAsset::new("click", SoundSource::path("ui/click.wav")))
//!         .await
//!         .expect("valid sound");
//!     let outcome = engine.play(PlayRequest::new("click")).await;
//!     assert!(outcome.started().is_some());
//! });
//!
//! backend.finish_all();
//! assert_eq!(engine.process_events(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod cache;
pub mod config;
pub mod engine;
pub mod manifest;
pub mod registry;
pub mod scheduler;
pub mod stats;
pub mod variant;

mod e2e_tests;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::cache::{LoadCache, LoadedEntry};
    pub use crate::config::EngineConfig;
    pub use crate::engine::{PreloadReport, SoundEngine};
    pub use crate::manifest::{ManifestError, ManifestResult, SoundManifest};
    pub use crate::registry::AssetRegistry;
    pub use crate::scheduler::{DropReason, PendingPlay, PlayOutcome, PlayRequest, PlaybackScheduler};
    pub use crate::stats::{CacheStats, PlaybackStats, SoundPlayCount, StatsCollector};
    pub use crate::variant::VariantSelector;
}

pub use prelude::*;
