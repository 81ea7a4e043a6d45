//! # Resonance Simulator
//!
//! Drives the sound engine against the headless backend and prints cache and
//! playback statistics as JSON.
//!
//! ```text
//! resonance-sim [MANIFEST] [CONFIG]
//! ```
//!
//! Without a manifest a built-in demo set is used. Without a config file
//! `resonance.toml` in the working directory is tried, then defaults.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use resonance_common::{SoundAsset, SoundPriority, SoundSource, SoundVariant};
use resonance_engine::{EngineConfig, PlayRequest, SoundEngine, SoundManifest};
use resonance_kernel::HeadlessBackend;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Plays issued per simulated frame.
const BURST: usize = 24;

/// Simulated frames.
const FRAMES: usize = 8;

fn demo_manifest() -> SoundManifest {
    let sounds = vec![
        SoundAsset::with_variants(
            "footstep",
            vec![
                SoundVariant::new("l", SoundSource::path("sfx/step_l.wav")),
                SoundVariant::new("r", SoundSource::path("sfx/step_r.wav")),
                SoundVariant::new("scuff", SoundSource::path("sfx/step_scuff.wav"))
                    .with_weight(0.25),
            ],
        )
        .with_avoid_repeat(true)
        .with_priority(SoundPriority::Low)
        .with_max_instances(4),
        SoundAsset::new("gunshot", SoundSource::path("sfx/gunshot.wav"))
            .with_max_instances(3)
            .with_cooldown(Duration::from_millis(20)),
        SoundAsset::new("pickup", SoundSource::path("sfx/pickup.wav"))
            .with_priority(SoundPriority::High),
        SoundAsset::new("alarm", SoundSource::path("sfx/alarm.ogg"))
            .with_priority(SoundPriority::Critical)
            .with_max_instances(1),
    ];
    let demo = sounds.iter().map(|s| s.id.clone()).collect();
    SoundManifest {
        sounds,
        groups: [("demo".to_string(), demo)].into_iter().collect(),
    }
}

/// Main entry point.
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("resonance=info".parse()?))
        .init();

    info!("Resonance simulator starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut args = std::env::args().skip(1);
    let manifest = match args.next() {
        Some(path) => SoundManifest::load_from(&path)
            .with_context(|| format!("loading manifest {path}"))?,
        None => demo_manifest(),
    };
    let config = match args.next() {
        Some(path) => EngineConfig::load_from(path),
        None => EngineConfig::load(),
    };

    let backend = HeadlessBackend::new();
    let engine = SoundEngine::new(Arc::new(backend.clone()), config);
    engine.add_manifest(&manifest).await?;

    for (group, members) in &manifest.groups {
        let report = engine.preload_for_game(group, members.iter().cloned()).await;
        if !report.is_complete() {
            warn!("Group '{}' failed to load: {:?}", group, report.failed);
        }
    }

    let ids: Vec<String> = manifest.sounds.iter().map(|s| s.id.clone()).collect();
    if ids.is_empty() {
        warn!("Manifest declares no sounds");
        return Ok(());
    }

    let mut rng = fastrand::Rng::with_seed(7);
    let mut pending = Vec::new();
    for frame in 0..FRAMES {
        for _ in 0..BURST {
            let id = &ids[rng.usize(..ids.len())];
            let outcome = engine.play(PlayRequest::new(id.as_str())).await;
            if outcome.is_queued() {
                pending.push(outcome);
            }
        }

        // Half the playing sounds end each frame.
        let playing = backend.playing_instances();
        for instance in playing.iter().step_by(2) {
            backend.finish(*instance);
        }
        let ended = engine.process_events();
        info!("Frame {}: {} sounds ended", frame, ended);
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    backend.finish_all();
    while engine.process_events() > 0 {
        backend.finish_all();
    }
    engine.stop_all();

    let mut admitted = 0;
    let queued = pending.len();
    for outcome in pending {
        if outcome.instance().await.is_some() {
            admitted += 1;
        }
    }
    info!("{} of {} queued plays were admitted", admitted, queued);

    info!(
        "{} sounds registered, resident: {:?}",
        engine.registered_ids().len(),
        engine.loaded_ids()
    );
    println!("{}", serde_json::to_string_pretty(&engine.cache_stats())?);
    println!("{}", serde_json::to_string_pretty(&engine.playback_stats())?);

    engine.unload_all();
    info!("Resonance simulator shutdown complete");
    Ok(())
}
