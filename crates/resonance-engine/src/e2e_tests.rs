//! End-to-end tests for the Resonance engine.
//!
//! These drive the public [`SoundEngine`] surface against the headless
//! backend, simulating game-side usage and checking the engine's guarantees.

#![cfg(test)]

use std::sync::Arc;

use futures::FutureExt;
use resonance_common::{InstanceId, SoundAsset, SoundPriority, SoundSource, SoundVariant};
use resonance_kernel::HeadlessBackend;

use crate::{DropReason, EngineConfig, PlayOutcome, PlayRequest, SoundEngine};

fn engine_with(config: EngineConfig) -> (SoundEngine, HeadlessBackend) {
    let backend = HeadlessBackend::new();
    let engine = SoundEngine::new(Arc::new(backend.clone()), config);
    (engine, backend)
}

fn sound(id: &str) -> SoundAsset {
    SoundAsset::new(id, SoundSource::path(format!("sfx/{id}.wav")))
}

fn add(engine: &SoundEngine, asset: SoundAsset) {
    pollster::block_on(engine.add_sound(asset)).expect("valid asset");
}

fn load(engine: &SoundEngine, id: &str) {
    pollster::block_on(engine.load(id)).expect("load should succeed");
}

fn play(engine: &SoundEngine, request: PlayRequest) -> PlayOutcome {
    pollster::block_on(engine.play(request))
}

/// Cache capacity and eviction
mod cache_tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn e2e_concurrent_loads_collapse() {
        let (engine, backend) = engine_with(EngineConfig::default());
        add(&engine, sound("boom"));

        let (first, second) = pollster::block_on(async {
            futures::join!(engine.load("boom"), engine.load("boom"))
        });
        assert!(first.is_ok());
        assert!(second.is_ok());
        assert_eq!(
            backend.prepare_calls_for(&SoundSource::path("sfx/boom.wav")),
            1,
            "Two concurrent loads must issue one backend load"
        );
    }

    #[test]
    fn e2e_concurrent_load_failure_reaches_every_waiter() {
        let (engine, backend) = engine_with(EngineConfig::default());
        let asset = sound("boom");
        backend.fail_source(asset.source.as_ref().expect("source"));
        add(&engine, asset);

        let (first, second) = pollster::block_on(async {
            futures::join!(engine.load("boom"), engine.load("boom"))
        });
        assert!(first.is_err());
        assert_eq!(first, second);
        assert_eq!(backend.prepare_calls(), 1);
    }

    #[test]
    fn e2e_loaded_sound_is_not_reloaded() {
        let (engine, backend) = engine_with(EngineConfig::default());
        add(&engine, sound("boom"));
        load(&engine, "boom");
        load(&engine, "boom");
        assert!(play(&engine, PlayRequest::new("boom")).started().is_some());

        assert_eq!(backend.prepare_calls(), 1);
    }

    #[test]
    fn e2e_low_priority_evicted_before_older_high_priority() {
        let (engine, _) = engine_with(EngineConfig::default().with_max_cache_size(2));
        add(&engine, sound("b").with_priority(SoundPriority::High));
        add(&engine, sound("a").with_priority(SoundPriority::Low));
        add(&engine, sound("c"));

        load(&engine, "b");
        load(&engine, "a");
        load(&engine, "c");

        assert!(engine.is_loaded("b"), "Older High sound should survive");
        assert!(!engine.is_loaded("a"), "Newer Low sound should be evicted");
        assert!(engine.is_loaded("c"));
        assert_eq!(engine.cache_stats().evictions, 1);
        assert_eq!(engine.loaded_ids(), vec!["b", "c"]);
        assert_eq!(engine.registered_ids(), vec!["a", "b", "c"]);
    }

    #[test]
    fn e2e_playing_sound_is_never_evicted() {
        let (engine, backend) = engine_with(EngineConfig::default().with_max_cache_size(2));
        add(&engine, sound("music").with_priority(SoundPriority::Low));
        add(&engine, sound("b"));
        add(&engine, sound("c"));

        let instance = play(&engine, PlayRequest::new("music"))
            .started()
            .expect("started");
        load(&engine, "b");
        load(&engine, "c");

        assert!(engine.is_loaded("music"));
        assert!(backend.is_instance_playing(instance));
        assert!(!engine.is_loaded("b"));
    }

    #[test]
    fn e2e_memory_budget_evicts() {
        let backend = HeadlessBackend::new();
        backend.set_duration(&SoundSource::path("sfx/long.wav"), 10.0);
        // 10 s at 176,400 B/s is 1,764,000 bytes.
        let config = EngineConfig::default().with_memory_budget(1_900_000);
        let engine = SoundEngine::new(Arc::new(backend.clone()), config);

        add(&engine, sound("long"));
        add(&engine, sound("short"));
        add(&engine, sound("other"));
        load(&engine, "long");
        load(&engine, "short");
        assert_eq!(engine.cache_stats().memory_usage_bytes, 1_764_000 + 176_400);

        load(&engine, "other");
        assert!(!engine.is_loaded("long"));
        assert!(engine.is_loaded("short"));
        assert!(engine.cache_stats().memory_usage_bytes < 1_900_000);
    }

    #[test]
    fn e2e_failed_load_can_be_retried() {
        let (engine, backend) = engine_with(EngineConfig::default());
        let asset = sound("flaky");
        let source = asset.source.clone().expect("source");
        add(&engine, asset);

        backend.fail_source(&source);
        assert_eq!(
            play(&engine, PlayRequest::new("flaky")).drop_reason(),
            Some(DropReason::LoadFailed)
        );
        assert!(engine.is_registered("flaky"));

        backend.clear_failure(&source);
        assert!(play(&engine, PlayRequest::new("flaky")).started().is_some());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Load(u8),
        Play(u8),
        FinishOldest,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..12).prop_map(Op::Load),
            (0u8..12).prop_map(Op::Play),
            Just(Op::FinishOldest),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn e2e_capacity_invariant(max in 2usize..6, ops in proptest::collection::vec(op(), 1..60)) {
            // Fewer playing sounds than slots keeps an idle entry to evict.
            let config = EngineConfig::default()
                .with_max_cache_size(max)
                .with_max_concurrent_sounds(max - 1);
            let (engine, backend) = engine_with(config);
            for i in 0..12 {
                add(&engine, sound(&format!("s{i}")));
            }

            let mut playing: Vec<InstanceId> = Vec::new();
            for op in ops {
                match op {
                    Op::Load(i) => load(&engine, &format!("s{i}")),
                    Op::Play(i) => {
                        if let Some(id) = play(&engine, PlayRequest::new(format!("s{i}"))).started() {
                            playing.push(id);
                        }
                    },
                    Op::FinishOldest => {
                        if !playing.is_empty() {
                            let id = playing.remove(0);
                            prop_assert!(backend.finish(id));
                            engine.process_events();
                        }
                    },
                }

                prop_assert!(engine.cache_stats().loaded <= max);
                for id in &playing {
                    prop_assert!(backend.is_instance_playing(*id), "evicted a playing sound");
                }
            }
        }
    }
}

/// Admission, queueing, and caps
mod scheduling_tests {
    use super::*;

    #[test]
    fn e2e_admission_ceiling_queues_critical() {
        let (engine, backend) = engine_with(EngineConfig::default().with_max_concurrent_sounds(2));
        for id in ["a", "b", "c"] {
            add(&engine, sound(id).with_priority(SoundPriority::Critical));
        }

        let a = play(&engine, PlayRequest::new("a")).started().expect("a plays");
        assert!(play(&engine, PlayRequest::new("b")).started().is_some());
        let c = play(&engine, PlayRequest::new("c"));
        assert!(c.is_queued(), "Third critical sound should queue");
        assert_eq!(backend.playing_count(), 2);
        assert_eq!(
            engine.playback_stats().queued_by_priority[&SoundPriority::Critical],
            1
        );

        assert!(backend.finish(a));
        assert_eq!(engine.process_events(), 1);

        let c = pollster::block_on(c.instance()).expect("queued sound admitted");
        assert!(backend.is_instance_playing(c));
        assert!(engine.is_playing("c"));
        assert_eq!(engine.playback_stats().active_sounds, 2);
    }

    #[test]
    fn e2e_normal_priority_dropped_at_capacity() {
        let (engine, _) = engine_with(EngineConfig::default().with_max_concurrent_sounds(1));
        add(&engine, sound("a"));
        add(&engine, sound("b"));

        assert!(play(&engine, PlayRequest::new("a")).started().is_some());
        assert_eq!(
            play(&engine, PlayRequest::new("b")).drop_reason(),
            Some(DropReason::AtCapacity)
        );
        assert_eq!(engine.playback_stats().queued_by_priority[&SoundPriority::Normal], 0);
    }

    #[test]
    fn e2e_request_priority_overrides_asset() {
        let (engine, _) = engine_with(EngineConfig::default().with_max_concurrent_sounds(1));
        add(&engine, sound("a"));
        add(&engine, sound("b"));

        assert!(play(&engine, PlayRequest::new("a")).started().is_some());
        let outcome = play(
            &engine,
            PlayRequest::new("b").with_priority(SoundPriority::High),
        );
        assert!(outcome.is_queued());
    }

    #[test]
    fn e2e_per_asset_cap() {
        let (engine, _) = engine_with(EngineConfig::default());
        add(
            &engine,
            sound("hit").with_max_instances(2).with_priority(SoundPriority::Low),
        );
        add(&engine, sound("other"));

        assert!(play(&engine, PlayRequest::new("hit")).started().is_some());
        assert!(play(&engine, PlayRequest::new("other")).started().is_some());
        assert!(play(&engine, PlayRequest::new("hit")).started().is_some());
        assert_eq!(
            play(&engine, PlayRequest::new("hit")).drop_reason(),
            Some(DropReason::AtCapacity)
        );

        assert!(engine.is_playing("other"));
        assert_eq!(engine.playback_stats().active_sounds, 3);
    }

    #[test]
    fn e2e_queue_is_fifo_within_priority() {
        let (engine, backend) = engine_with(EngineConfig::default().with_max_concurrent_sounds(1));
        for id in ["blocker", "first", "second"] {
            add(&engine, sound(id).with_priority(SoundPriority::High));
        }

        let blocker = play(&engine, PlayRequest::new("blocker"))
            .started()
            .expect("started");
        let first = play(&engine, PlayRequest::new("first"));
        let second = play(&engine, PlayRequest::new("second"));

        backend.finish(blocker);
        engine.process_events();

        assert!(engine.is_playing("first"));
        assert!(!engine.is_playing("second"));
        let PlayOutcome::Queued(mut second) = second else {
            panic!("second request should be queued");
        };
        assert!((&mut second).now_or_never().is_none());
        assert!(pollster::block_on(first.instance()).is_some());
    }

    #[test]
    fn e2e_critical_jumps_the_queue() {
        let (engine, backend) = engine_with(EngineConfig::default().with_max_concurrent_sounds(1));
        add(&engine, sound("blocker"));
        add(&engine, sound("high").with_priority(SoundPriority::High));
        add(&engine, sound("alarm").with_priority(SoundPriority::Critical));

        let blocker = play(&engine, PlayRequest::new("blocker"))
            .started()
            .expect("started");
        let _high = play(&engine, PlayRequest::new("high"));
        let _alarm = play(&engine, PlayRequest::new("alarm"));

        backend.finish(blocker);
        engine.process_events();
        assert!(engine.is_playing("alarm"));
        assert!(!engine.is_playing("high"));
    }

    #[test]
    fn e2e_capped_queued_sound_does_not_block_others() {
        let (engine, backend) = engine_with(EngineConfig::default().with_max_concurrent_sounds(2));
        add(
            &engine,
            sound("siren")
                .with_priority(SoundPriority::Critical)
                .with_max_instances(1),
        );
        add(&engine, sound("filler"));
        add(&engine, sound("shout").with_priority(SoundPriority::High));

        assert!(play(&engine, PlayRequest::new("siren")).started().is_some());
        let filler = play(&engine, PlayRequest::new("filler"))
            .started()
            .expect("started");
        let siren_again = play(&engine, PlayRequest::new("siren"));
        let shout = play(&engine, PlayRequest::new("shout"));
        assert!(siren_again.is_queued());
        assert!(shout.is_queued());

        // One slot frees; the siren is still capped so the shout takes it.
        backend.finish(filler);
        engine.process_events();
        assert!(engine.is_playing("shout"));
        assert_eq!(
            engine.playback_stats().queued_by_priority[&SoundPriority::Critical],
            1
        );
        assert!(pollster::block_on(shout.instance()).is_some());
    }

    #[test]
    fn e2e_full_queue_drops_or_displaces() {
        let config = EngineConfig::default()
            .with_max_concurrent_sounds(1)
            .with_max_queue_len(1);
        let (engine, _) = engine_with(config);
        add(&engine, sound("blocker"));
        add(&engine, sound("high").with_priority(SoundPriority::High));
        add(&engine, sound("alarm").with_priority(SoundPriority::Critical));

        assert!(play(&engine, PlayRequest::new("blocker")).started().is_some());
        let high = play(&engine, PlayRequest::new("high"));
        assert!(high.is_queued());
        assert_eq!(
            play(&engine, PlayRequest::new("high")).drop_reason(),
            Some(DropReason::QueueFull)
        );

        let alarm = play(&engine, PlayRequest::new("alarm"));
        assert!(alarm.is_queued());
        assert_eq!(pollster::block_on(high.instance()), None, "High request was displaced");
    }

    #[test]
    fn e2e_unloading_queued_sound_resolves_none() {
        let (engine, _) = engine_with(EngineConfig::default().with_max_concurrent_sounds(1));
        add(&engine, sound("blocker"));
        add(&engine, sound("late").with_priority(SoundPriority::High));

        assert!(play(&engine, PlayRequest::new("blocker")).started().is_some());
        let late = play(&engine, PlayRequest::new("late"));
        assert!(late.is_queued());

        engine.unload("late");
        assert_eq!(pollster::block_on(late.instance()), None);
    }

    #[test]
    fn e2e_queued_sound_survives_eviction_pressure() {
        let config = EngineConfig::default()
            .with_max_cache_size(2)
            .with_max_concurrent_sounds(1);
        let (engine, backend) = engine_with(config);
        add(&engine, sound("a"));
        add(&engine, sound("b").with_priority(SoundPriority::Critical));
        add(&engine, sound("c"));

        let a = play(&engine, PlayRequest::new("a")).started().expect("a plays");
        let b = play(&engine, PlayRequest::new("b"));
        assert!(b.is_queued());

        // "b" is idle but waited on, so loading "c" must not evict it.
        load(&engine, "c");
        assert!(engine.is_loaded("b"));

        backend.finish(a);
        engine.process_events();
        let b = pollster::block_on(b.instance()).expect("queued critical sound admitted");
        assert!(backend.is_instance_playing(b));
        assert!(engine.is_playing("b"));
    }

    #[test]
    fn e2e_play_reloads_when_evicted_before_admission() {
        let (engine, backend) = engine_with(EngineConfig::default().with_max_cache_size(1));
        add(&engine, sound("b"));
        add(&engine, sound("c"));

        // The second load of "b" completes the shared load; loading "c" then
        // evicts "b" before the play resumes.
        let (outcome, loaded_b, loaded_c) = pollster::block_on(async {
            futures::join!(
                engine.play(PlayRequest::new("b")),
                engine.load("b"),
                engine.load("c")
            )
        });
        assert!(loaded_b.is_ok());
        assert!(loaded_c.is_ok());

        let instance = outcome.started().expect("play reloads and starts");
        assert!(backend.is_instance_playing(instance));
        assert_eq!(backend.prepare_calls_for(&SoundSource::path("sfx/b.wav")), 2);
    }
}

/// Variant selection through the engine
mod variant_tests {
    use super::*;

    #[test]
    fn e2e_weighted_variants_follow_weights() {
        let (engine, backend) = engine_with(EngineConfig::default().with_variant_seed(2024));
        add(
            &engine,
            SoundAsset::with_variants(
                "step",
                vec![
                    SoundVariant::new("a", SoundSource::path("sfx/step_a.wav")).with_weight(1.0),
                    SoundVariant::new("b", SoundSource::path("sfx/step_b.wav")).with_weight(3.0),
                ],
            ),
        );

        let draws = 4_000;
        let mut b_count = 0;
        for _ in 0..draws {
            let instance = play(&engine, PlayRequest::new("step"))
                .started()
                .expect("started");
            if backend.instance_source(instance).as_deref() == Some("sfx/step_b.wav") {
                b_count += 1;
            }
            backend.finish(instance);
            engine.process_events();
        }

        let share = f64::from(b_count) / f64::from(draws);
        assert!((share - 0.75).abs() < 0.03, "b share was {share}");
    }

    #[test]
    fn e2e_avoid_repeat_alternates_two_variants() {
        let (engine, backend) = engine_with(EngineConfig::default().with_variant_seed(9));
        add(
            &engine,
            SoundAsset::with_variants(
                "step",
                vec![
                    SoundVariant::new("l", SoundSource::path("sfx/l.wav")),
                    SoundVariant::new("r", SoundSource::path("sfx/r.wav")),
                ],
            )
            .with_avoid_repeat(true),
        );

        let mut last = None;
        for _ in 0..20 {
            let instance = play(&engine, PlayRequest::new("step"))
                .started()
                .expect("started");
            let source = backend.instance_source(instance);
            assert_ne!(source, last);
            last = source;
            backend.finish(instance);
            engine.process_events();
        }
    }
}

/// Statistics bookkeeping
mod stats_tests {
    use super::*;

    #[test]
    fn e2e_hits_misses_and_rate() {
        let (engine, _) = engine_with(EngineConfig::default());
        add(&engine, sound("known"));

        assert!(play(&engine, PlayRequest::new("known")).started().is_some());
        assert!(play(&engine, PlayRequest::new("known")).started().is_some());
        assert!(play(&engine, PlayRequest::new("known")).started().is_some());
        assert_eq!(
            play(&engine, PlayRequest::new("unknown")).drop_reason(),
            Some(DropReason::UnknownAsset)
        );

        let stats = engine.cache_stats();
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.75).abs() < f64::EPSILON);
        assert_eq!(stats.loaded, 1);
        assert_eq!(stats.max_size, 50);
    }

    #[test]
    fn e2e_top_sounds() {
        let (engine, backend) = engine_with(EngineConfig::default());
        for (id, plays) in [("rare", 1), ("common", 4), ("also_common", 4)] {
            add(&engine, sound(id));
            for _ in 0..plays {
                assert!(play(&engine, PlayRequest::new(id)).started().is_some());
            }
        }
        backend.finish_all();
        engine.process_events();

        let stats = engine.playback_stats();
        assert_eq!(stats.total_plays, 9);
        assert_eq!(stats.active_sounds, 0);
        let top: Vec<&str> = stats.top_sounds.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(top, vec!["also_common", "common", "rare"]);
    }
}

/// Full game-side flows
mod flow_tests {
    use super::*;

    #[test]
    fn e2e_single_instance_sound_lifecycle() {
        let (engine, backend) = engine_with(EngineConfig::default());
        add(
            &engine,
            sound("clear")
                .with_max_instances(1)
                .with_priority(SoundPriority::Normal),
        );

        let instance = play(&engine, PlayRequest::new("clear"))
            .started()
            .expect("first play starts");
        assert!(engine.is_playing("clear"));

        assert_eq!(
            play(&engine, PlayRequest::new("clear")).drop_reason(),
            Some(DropReason::AtCapacity),
            "Second play should be dropped while the first runs"
        );

        assert!(backend.finish(instance));
        assert!(!engine.is_playing("clear"));
        assert!(engine.is_loaded("clear"));
    }

    #[test]
    fn e2e_duplicate_registration_is_noop() {
        let (engine, backend) = engine_with(EngineConfig::default());
        add(&engine, sound("dup").with_preload(true));
        add(&engine, sound("dup").with_preload(true));

        assert_eq!(backend.prepare_calls(), 1);
        assert!(engine.is_loaded("dup"));
    }

    #[test]
    fn e2e_level_preload_and_teardown() {
        let (engine, backend) = engine_with(EngineConfig::default());
        for id in ["ambience", "door", "footstep"] {
            add(&engine, sound(id));
        }

        let report = pollster::block_on(
            engine.preload_for_game("crypt", ["ambience", "door", "footstep", "missing"]),
        );
        assert!(report.is_complete());
        assert_eq!(report.loaded.len(), 3);
        assert_eq!(report.skipped, vec!["missing"]);
        assert_eq!(backend.live_clips(), 3);

        let door = play(&engine, PlayRequest::new("door")).started().expect("door");
        assert_eq!(engine.unload_group("crypt"), 3);
        assert!(!backend.is_instance_playing(door));
        assert_eq!(backend.live_clips(), 0);
        assert_eq!(engine.playback_stats().active_sounds, 0);
    }

    #[test]
    fn e2e_engine_is_shareable_across_threads() {
        let (engine, backend) = engine_with(EngineConfig::default());
        add(&engine, sound("shot"));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let engine = engine.clone();
                std::thread::spawn(move || {
                    pollster::block_on(engine.play(PlayRequest::new("shot"))).started()
                })
            })
            .collect();

        let started = handles
            .into_iter()
            .filter_map(|h| h.join().expect("thread"))
            .count();
        assert_eq!(started, 4);
        assert_eq!(backend.prepare_calls(), 1);
        assert_eq!(backend.playing_count(), 4);
    }
}
