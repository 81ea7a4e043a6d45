//! Load cache for backend-ready clips.
//!
//! The cache owns one [`LoadedEntry`] per resident asset and tracks loads that
//! are still in flight. Capacity is enforced *before* a new load starts:
//!
//! 1. The cache is over capacity when `entries + pending >= max_size` or the
//!    estimated memory reaches the budget.
//! 2. Idle entries (`active_instances == 0`) that no queued request is waiting
//!    on are ordered by `(priority, last_access)`, lowest priority and oldest
//!    access first.
//! 3. `ceil(eviction_ratio * size)` of them are removed and handed back to the
//!    caller, which disposes their clips.
//!
//! Playing entries are never evicted; if too few idle entries exist the cache
//! evicts what it can and the load proceeds anyway.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use futures::future::{BoxFuture, Shared};
use resonance_common::{ClipHandle, EngineResult, SoundAsset, SoundPriority};
use tracing::debug;

use crate::config::EngineConfig;

/// In-flight load shared by every caller waiting on it.
pub type SharedLoad = Shared<BoxFuture<'static, EngineResult<()>>>;

/// Cache-owned state of a resident asset.
#[derive(Debug, Clone)]
pub struct LoadedEntry {
    /// Declaration the entry was loaded from.
    pub asset: Arc<SoundAsset>,
    /// Clip handle per variant id.
    pub variant_handles: BTreeMap<String, ClipHandle>,
    /// Logical access time, bumped on every load or play.
    pub last_access: u64,
    /// Instances currently playing.
    pub active_instances: usize,
    /// Plays started from this entry.
    pub play_count: u64,
    /// Estimated decoded size.
    pub estimated_bytes: u64,
    /// Variant used by the most recent play.
    pub last_variant: Option<String>,
}

impl LoadedEntry {
    /// Create an idle entry.
    pub fn new(
        asset: Arc<SoundAsset>,
        variant_handles: BTreeMap<String, ClipHandle>,
        estimated_bytes: u64,
    ) -> Self {
        Self {
            asset,
            variant_handles,
            last_access: 0,
            active_instances: 0,
            play_count: 0,
            estimated_bytes,
            last_variant: None,
        }
    }

    /// Clip handle of a variant.
    #[must_use]
    pub fn handle(&self, variant_id: &str) -> Option<ClipHandle> {
        self.variant_handles.get(variant_id).copied()
    }

    /// All clip handles.
    pub fn handles(&self) -> impl Iterator<Item = ClipHandle> + '_ {
        self.variant_handles.values().copied()
    }

    /// Eviction priority of the entry.
    #[must_use]
    pub fn priority(&self) -> SoundPriority {
        self.asset.priority
    }

    /// Check whether the entry may be evicted.
    #[must_use]
    pub const fn is_evictable(&self) -> bool {
        self.active_instances == 0
    }
}

struct PendingLoad {
    ticket: u64,
    future: SharedLoad,
}

impl std::fmt::Debug for PendingLoad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingLoad")
            .field("ticket", &self.ticket)
            .finish_non_exhaustive()
    }
}

/// Resident clips plus in-flight loads, bounded by entry count and memory.
#[derive(Debug)]
pub struct LoadCache {
    entries: HashMap<String, LoadedEntry>,
    pending: HashMap<String, PendingLoad>,
    max_size: usize,
    memory_budget: u64,
    eviction_ratio: f64,
    bytes_per_second: u64,
    tick: u64,
    next_ticket: u64,
    evictions: u64,
}

impl LoadCache {
    /// Create a cache with the limits from `config`.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        debug!(
            "Created load cache (max {} entries, {} bytes)",
            config.max_cache_size, config.max_memory_budget_bytes
        );
        Self {
            entries: HashMap::new(),
            pending: HashMap::new(),
            max_size: config.max_cache_size.max(1),
            memory_budget: config.max_memory_budget_bytes,
            eviction_ratio: config.eviction_ratio,
            bytes_per_second: config.bytes_per_second,
            tick: 0,
            next_ticket: 0,
            evictions: 0,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Estimated size of a clip of the given length.
    #[must_use]
    pub fn estimate_bytes(&self, duration_seconds: f64) -> u64 {
        if !duration_seconds.is_finite() || duration_seconds <= 0.0 {
            return 0;
        }
        (duration_seconds * self.bytes_per_second as f64).round() as u64
    }

    /// Bump the access time of a resident entry.
    ///
    /// Returns `false` if the asset is not resident.
    pub fn touch(&mut self, id: &str) -> bool {
        let tick = self.next_tick();
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.last_access = tick;
                true
            },
            None => false,
        }
    }

    /// In-flight load for an asset, if any.
    #[must_use]
    pub fn pending(&self, id: &str) -> Option<SharedLoad> {
        self.pending.get(id).map(|p| p.future.clone())
    }

    /// Allocate the ticket of a load about to start.
    pub fn reserve_ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }

    /// Record an in-flight load.
    pub fn begin_load(&mut self, id: &str, ticket: u64, future: SharedLoad) {
        self.pending
            .insert(id.to_string(), PendingLoad { ticket, future });
    }

    /// Retire an in-flight load.
    ///
    /// Returns `false` if the load was cancelled (or superseded) meanwhile.
    pub fn finish_load(&mut self, id: &str, ticket: u64) -> bool {
        match self.pending.get(id) {
            Some(pending) if pending.ticket == ticket => {
                self.pending.remove(id);
                true
            },
            _ => false,
        }
    }

    /// Forget an in-flight load so its result is discarded.
    pub fn cancel_load(&mut self, id: &str) -> bool {
        self.pending.remove(id).is_some()
    }

    /// Store a freshly loaded entry.
    pub fn insert(&mut self, mut entry: LoadedEntry) {
        entry.last_access = self.next_tick();
        debug!(
            "Cached '{}' ({} clips, ~{} bytes)",
            entry.asset.id,
            entry.variant_handles.len(),
            entry.estimated_bytes
        );
        self.entries.insert(entry.asset.id.clone(), entry);
    }

    /// Look up a resident entry.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&LoadedEntry> {
        self.entries.get(id)
    }

    /// Check whether at least one clip of the asset is resident.
    #[must_use]
    pub fn is_loaded(&self, id: &str) -> bool {
        self.entries
            .get(id)
            .is_some_and(|e| !e.variant_handles.is_empty())
    }

    /// Check whether a load for the asset is in flight.
    #[must_use]
    pub fn is_loading(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    /// Playing instance count of an asset (0 if not resident).
    #[must_use]
    pub fn active_instances(&self, id: &str) -> usize {
        self.entries.get(id).map_or(0, |e| e.active_instances)
    }

    /// Account for a started instance.
    pub fn record_play(&mut self, id: &str, variant_id: &str) {
        let tick = self.next_tick();
        if let Some(entry) = self.entries.get_mut(id) {
            entry.active_instances += 1;
            entry.play_count += 1;
            entry.last_access = tick;
            entry.last_variant = Some(variant_id.to_string());
        }
    }

    /// Account for an instance that stopped or ended.
    pub fn release_instance(&mut self, id: &str) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.active_instances = entry.active_instances.saturating_sub(1);
        }
    }

    /// Zero the playing count of an asset.
    pub fn clear_instances(&mut self, id: &str) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.active_instances = 0;
        }
    }

    /// Zero the playing count of every asset.
    pub fn clear_all_instances(&mut self) {
        for entry in self.entries.values_mut() {
            entry.active_instances = 0;
        }
    }

    /// Remove an entry regardless of its playing state.
    pub fn remove(&mut self, id: &str) -> Option<LoadedEntry> {
        self.cancel_load(id);
        self.entries.remove(id)
    }

    /// Remove every entry and in-flight load.
    pub fn drain(&mut self) -> Vec<LoadedEntry> {
        self.pending.clear();
        self.entries.drain().map(|(_, entry)| entry).collect()
    }

    /// Check whether a capacity pass is due.
    #[must_use]
    pub fn is_over_capacity(&self) -> bool {
        self.len() >= self.max_size || self.memory_usage() >= self.memory_budget
    }

    /// Evict idle entries if the cache is at capacity.
    ///
    /// Entries named in `pinned` are kept. Returns the evicted entries; their
    /// clips still need disposing.
    pub fn enforce_capacity(&mut self, pinned: &HashSet<String>) -> Vec<LoadedEntry> {
        if !self.is_over_capacity() {
            return Vec::new();
        }

        let size = self.len();
        let target = ((size as f64 * self.eviction_ratio).ceil() as usize).max(1);

        let mut candidates: Vec<(SoundPriority, u64, String)> = self
            .entries
            .values()
            .filter(|e| e.is_evictable() && !pinned.contains(&e.asset.id))
            .map(|e| (e.priority(), e.last_access, e.asset.id.clone()))
            .collect();
        candidates.sort();

        let evicted: Vec<LoadedEntry> = candidates
            .into_iter()
            .take(target)
            .filter_map(|(_, _, id)| self.entries.remove(&id))
            .collect();

        self.evictions += evicted.len() as u64;
        debug!(
            "Capacity pass over {} entries evicted {} (wanted {})",
            size,
            evicted.len(),
            target
        );
        evicted
    }

    /// Resident plus in-flight entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len() + self.pending.len()
    }

    /// Check if nothing is resident or loading.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of resident entries.
    #[must_use]
    pub fn loaded_count(&self) -> usize {
        self.entries.len()
    }

    /// Ids of resident entries, sorted.
    #[must_use]
    pub fn loaded_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Sum of the estimated sizes of resident entries.
    #[must_use]
    pub fn memory_usage(&self) -> u64 {
        self.entries.values().map(|e| e.estimated_bytes).sum()
    }

    /// Configured entry limit.
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }

    /// Total entries evicted by capacity passes.
    #[must_use]
    pub const fn evictions(&self) -> u64 {
        self.evictions
    }
}
