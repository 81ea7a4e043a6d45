//! Engine statistics.
//!
//! Counters that outlive cache entries (lookups, lifetime play counts) live in
//! [`StatsCollector`]; snapshots combine them with the current cache and
//! scheduler state.

use std::collections::{BTreeMap, HashMap};

use resonance_common::SoundPriority;
use serde::Serialize;

use crate::cache::LoadCache;
use crate::scheduler::PlaybackScheduler;

/// Number of entries reported in [`PlaybackStats::top_sounds`].
pub const TOP_SOUNDS: usize = 10;

/// Cache snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    /// Resident entries.
    pub loaded: usize,
    /// Configured entry limit.
    pub max_size: usize,
    /// Estimated bytes of resident clips.
    pub memory_usage_bytes: u64,
    /// Entries removed by capacity passes.
    pub evictions: u64,
    /// Play lookups of registered ids.
    pub hits: u64,
    /// Play lookups of unknown ids.
    pub misses: u64,
    /// `hits / (hits + misses)`, 0 without lookups.
    pub hit_rate: f64,
}

/// Lifetime play count of one sound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SoundPlayCount {
    /// Asset id.
    pub id: String,
    /// Plays started.
    pub plays: u64,
}

/// Playback snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackStats {
    /// Plays started over the engine's lifetime.
    pub total_plays: u64,
    /// Instances playing now.
    pub active_sounds: usize,
    /// Queue depth per priority.
    pub queued_by_priority: BTreeMap<SoundPriority, usize>,
    /// Most played sounds, descending, ties by id.
    pub top_sounds: Vec<SoundPlayCount>,
}

/// Running counters.
#[derive(Debug, Default)]
pub struct StatsCollector {
    hits: u64,
    misses: u64,
    total_plays: u64,
    plays: HashMap<String, u64>,
}

impl StatsCollector {
    /// Create empty counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a lookup of a registered id.
    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    /// Record a lookup of an unknown id.
    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    /// Record a started instance.
    pub fn record_play(&mut self, id: &str) {
        self.total_plays += 1;
        *self.plays.entry(id.to_string()).or_default() += 1;
    }

    /// Hit ratio of play lookups.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Build a cache snapshot.
    #[must_use]
    pub fn cache_stats(&self, cache: &LoadCache) -> CacheStats {
        CacheStats {
            loaded: cache.loaded_count(),
            max_size: cache.max_size(),
            memory_usage_bytes: cache.memory_usage(),
            evictions: cache.evictions(),
            hits: self.hits,
            misses: self.misses,
            hit_rate: self.hit_rate(),
        }
    }

    /// Build a playback snapshot.
    #[must_use]
    pub fn playback_stats(&self, scheduler: &PlaybackScheduler) -> PlaybackStats {
        PlaybackStats {
            total_plays: self.total_plays,
            active_sounds: scheduler.active_count(),
            queued_by_priority: scheduler.queued_by_priority(),
            top_sounds: self.top_sounds(TOP_SOUNDS),
        }
    }

    /// Most played sounds.
    #[must_use]
    pub fn top_sounds(&self, limit: usize) -> Vec<SoundPlayCount> {
        let mut counts: Vec<SoundPlayCount> = self
            .plays
            .iter()
            .map(|(id, plays)| SoundPlayCount {
                id: id.clone(),
                plays: *plays,
            })
            .collect();
        counts.sort_by(|a, b| b.plays.cmp(&a.plays).then_with(|| a.id.cmp(&b.id)));
        counts.truncate(limit);
        counts
    }
}
