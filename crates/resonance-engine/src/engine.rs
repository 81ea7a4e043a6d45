//! Sound engine facade.
//!
//! [`SoundEngine`] composes the registry, load cache, variant selector,
//! scheduler, and stats behind one lock:
//!
//! ```text
//! play(request)
//!   ├─ registry lookup ──────────── miss ─▶ Dropped(UnknownAsset)
//!   ├─ load (evict first, then prepare clips; collapses concurrent loads)
//!   ├─ cooldown / capacity check ─── full ─▶ Queued (High+) or Dropped
//!   └─ select variant ─▶ backend.play ─▶ on_ended(notifier)
//!
//! notifier ─▶ completion channel ─▶ pump_events ─▶ release slot ─▶ drain queue
//! ```
//!
//! The lock is never held across an await. The only suspension point is the
//! backend's clip preparation inside an in-flight load.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Weak};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use futures::future::{join_all, FutureExt};
use parking_lot::Mutex;
use resonance_common::{ClipHandle, EngineError, EngineResult, InstanceId, SoundAsset};
use resonance_kernel::{
    completion_channel, AudioBackend, BackendResult, EndedNotifier, PlaybackEvent,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{LoadCache, LoadedEntry, SharedLoad};
use crate::config::EngineConfig;
use crate::manifest::SoundManifest;
use crate::registry::AssetRegistry;
use crate::scheduler::{ActiveInstance, DropReason, PlayOutcome, PlayRequest, PlaybackScheduler};
use crate::stats::{CacheStats, PlaybackStats, StatsCollector};
use crate::variant::VariantSelector;

/// Outcome of [`SoundEngine::preload_for_game`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreloadReport {
    /// Group the preload was issued for.
    pub group_id: String,
    /// Ids that are now resident.
    pub loaded: Vec<String>,
    /// Ids whose load failed.
    pub failed: Vec<String>,
    /// Ids that are not registered.
    pub skipped: Vec<String>,
}

impl PreloadReport {
    fn new(group_id: &str) -> Self {
        Self {
            group_id: group_id.to_string(),
            ..Self::default()
        }
    }

    /// Check whether every registered id loaded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

struct EngineState {
    registry: AssetRegistry,
    cache: LoadCache,
    scheduler: PlaybackScheduler,
    selector: VariantSelector,
    stats: StatsCollector,
    groups: HashMap<String, BTreeSet<String>>,
}

struct EngineInner {
    backend: Arc<dyn AudioBackend>,
    config: EngineConfig,
    state: Mutex<EngineState>,
    events_tx: Sender<PlaybackEvent>,
    events_rx: Receiver<PlaybackEvent>,
}

/// The sound-effect engine.
///
/// Cloning is cheap and every clone drives the same engine.
#[derive(Clone)]
pub struct SoundEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for SoundEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SoundEngine")
            .field("registered", &state.registry.len())
            .field("loaded", &state.cache.loaded_count())
            .field("active", &state.scheduler.active_count())
            .field("queued", &state.scheduler.queue_len())
            .finish_non_exhaustive()
    }
}

impl SoundEngine {
    /// Create an engine on top of a backend.
    pub fn new(backend: Arc<dyn AudioBackend>, mut config: EngineConfig) -> Self {
        config.validate();

        let selector = match config.variant_seed {
            Some(seed) => VariantSelector::with_seed(seed),
            None => VariantSelector::new(),
        };
        let state = EngineState {
            registry: AssetRegistry::new(),
            cache: LoadCache::new(&config),
            scheduler: PlaybackScheduler::new(&config),
            selector,
            stats: StatsCollector::new(),
            groups: HashMap::new(),
        };
        let (events_tx, events_rx) = completion_channel();

        info!(
            "Sound engine ready (cache {}, concurrent {}, budget {} bytes)",
            config.max_cache_size, config.max_concurrent_sounds, config.max_memory_budget_bytes
        );

        Self {
            inner: Arc::new(EngineInner {
                backend,
                config,
                state: Mutex::new(state),
                events_tx,
                events_rx,
            }),
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Register a sound, loading it right away if it asks for preload.
    ///
    /// Registering an id twice is a no-op.
    pub async fn add_sound(&self, asset: SoundAsset) -> EngineResult<()> {
        let id = asset.id.clone();
        let preload = asset.preload;

        let added = self.inner.state.lock().registry.add(asset)?;
        if !added {
            return Ok(());
        }
        debug!("Registered sound '{}'", id);

        if preload {
            self.load(&id).await?;
        }
        Ok(())
    }

    /// Register several sounds.
    ///
    /// Every sound is attempted; the first failure is returned.
    pub async fn add_sounds<I>(&self, assets: I) -> EngineResult<()>
    where
        I: IntoIterator<Item = SoundAsset>,
    {
        let mut first_error = None;
        for asset in assets {
            if let Err(err) = self.add_sound(asset).await {
                warn!("Failed to add sound: {err}");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Register a manifest's sounds and remember its groups.
    pub async fn add_manifest(&self, manifest: &SoundManifest) -> EngineResult<()> {
        {
            let mut state = self.inner.state.lock();
            for (group, members) in &manifest.groups {
                state
                    .groups
                    .entry(group.clone())
                    .or_default()
                    .extend(members.iter().cloned());
            }
        }
        self.add_sounds(manifest.sounds.iter().cloned()).await
    }

    /// Make a registered sound resident.
    ///
    /// Concurrent calls for the same id share one backend load.
    pub async fn load(&self, id: &str) -> EngineResult<()> {
        let load = {
            let mut state = self.inner.state.lock();
            self.inner.pump_events(&mut state);

            let asset = state
                .registry
                .get(id)
                .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
            if state.cache.touch(id) {
                return Ok(());
            }
            match state.cache.pending(id) {
                Some(load) => load,
                None => self.start_load(&mut state, asset),
            }
        };
        load.await
    }

    fn start_load(&self, state: &mut EngineState, asset: Arc<SoundAsset>) -> SharedLoad {
        // Queued requests still need their clips.
        let pinned = state.scheduler.queued_ids();
        for evicted in state.cache.enforce_capacity(&pinned) {
            debug!("Evicted '{}'", evicted.asset.id);
            self.inner.release_entry(&evicted);
        }

        let ticket = state.cache.reserve_ticket();
        let backend = Arc::clone(&self.inner.backend);
        let engine = Arc::downgrade(&self.inner);
        let id = asset.id.clone();

        let load = async move {
            let variant_ids = asset.variant_ids();
            let prepares: Vec<_> = variant_ids
                .iter()
                .filter_map(|variant_id| asset.source_for(variant_id))
                .map(|source| backend.prepare_clip(source, &asset.sprites))
                .collect();
            let results = join_all(prepares).await;
            let prepared: Vec<(String, BackendResult<ClipHandle>)> =
                variant_ids.into_iter().zip(results).collect();
            EngineInner::finish_load(&engine, backend.as_ref(), &asset, ticket, prepared)
        }
        .boxed()
        .shared();

        state.cache.begin_load(&id, ticket, load.clone());
        load
    }

    /// Load every registered id of a game group, concurrently.
    ///
    /// Unknown ids are skipped and failures are reported, never raised.
    pub async fn preload_for_game<I, S>(&self, group_id: &str, ids: I) -> PreloadReport
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut report = PreloadReport::new(group_id);
        let requested: Vec<String> = ids.into_iter().map(Into::into).collect();

        let known: Vec<String> = {
            let mut state = self.inner.state.lock();
            let (known, unknown): (Vec<String>, Vec<String>) = requested
                .into_iter()
                .partition(|id| state.registry.contains(id));
            report.skipped = unknown;
            state
                .groups
                .entry(group_id.to_string())
                .or_default()
                .extend(known.iter().cloned());
            known
        };

        let results = join_all(known.iter().map(|id| self.load(id))).await;
        for (id, result) in known.into_iter().zip(results) {
            match result {
                Ok(()) => report.loaded.push(id),
                Err(err) => {
                    warn!("Failed to preload '{}' for '{}': {}", id, group_id, err);
                    report.failed.push(id);
                },
            }
        }

        info!(
            "Preloaded group '{}': {} loaded, {} failed, {} skipped",
            group_id,
            report.loaded.len(),
            report.failed.len(),
            report.skipped.len()
        );
        report
    }

    /// Play a sound.
    ///
    /// Loads the sound first if needed. Under capacity pressure High and
    /// Critical requests queue; lower priorities are dropped.
    pub async fn play(&self, request: PlayRequest) -> PlayOutcome {
        let known = {
            let mut state = self.inner.state.lock();
            self.inner.pump_events(&mut state);
            let known = state.registry.contains(&request.id);
            if known {
                state.stats.record_hit();
            } else {
                state.stats.record_miss();
            }
            known
        };
        if !known {
            return self.inner.dropped(&request, DropReason::UnknownAsset);
        }

        // Another caller may evict the clip between the load and admission;
        // reload once before giving up.
        let mut reloaded = false;
        loop {
            if let Err(err) = self.load(&request.id).await {
                warn!("Cannot play '{}': {}", request.id, err);
                let reason = match err {
                    EngineError::NotFound(_) => DropReason::UnknownAsset,
                    _ => DropReason::LoadFailed,
                };
                return self.inner.dropped(&request, reason);
            }

            {
                let mut state = self.inner.state.lock();
                let Some(asset) = state.registry.get(&request.id) else {
                    return self.inner.dropped(&request, DropReason::UnknownAsset);
                };
                if reloaded || state.cache.is_loaded(&asset.id) {
                    return self.inner.admit(&mut state, &asset, request);
                }
            }

            debug!("'{}' was evicted before admission, reloading", request.id);
            reloaded = true;
        }
    }

    /// Stop one instance, or every instance of a sound.
    pub fn stop(&self, id: &str, instance: Option<InstanceId>) {
        let mut state = self.inner.state.lock();
        self.inner.pump_events(&mut state);

        match instance {
            Some(instance) => {
                let clip = state
                    .scheduler
                    .instance(instance)
                    .filter(|active| active.asset_id == id)
                    .map(|active| active.clip);
                if let Some(clip) = clip {
                    self.inner.backend.stop(clip, Some(instance));
                    state.scheduler.release(instance);
                    state.cache.release_instance(id);
                }
            },
            None => {
                if let Some(entry) = state.cache.get(id) {
                    for clip in entry.handles() {
                        self.inner.backend.stop(clip, None);
                    }
                }
                state.scheduler.release_asset(id);
                state.cache.clear_instances(id);
            },
        }

        self.inner.drain_queue(&mut state);
    }

    /// Stop everything and give up on queued requests.
    pub fn stop_all(&self) {
        let mut state = self.inner.state.lock();
        self.inner.pump_events(&mut state);

        for (instance, active) in state.scheduler.release_all() {
            self.inner.backend.stop(active.clip, Some(instance));
        }
        state.cache.clear_all_instances();
        let cancelled = state.scheduler.cancel_all();
        debug!("Stopped all sounds ({} queued requests cancelled)", cancelled);
    }

    /// Remove a sound's declaration and clips, even while it plays.
    ///
    /// Returns `false` if the id was not registered.
    pub fn unload(&self, id: &str) -> bool {
        let mut state = self.inner.state.lock();
        self.inner.pump_events(&mut state);

        let removed = state.registry.remove(id).is_some();
        self.inner.discard_asset(&mut state, id);
        for members in state.groups.values_mut() {
            members.remove(id);
        }
        self.inner.drain_queue(&mut state);

        if removed {
            info!("Unloaded sound '{}'", id);
        }
        removed
    }

    /// Remove every declaration and clip.
    pub fn unload_all(&self) {
        let mut state = self.inner.state.lock();
        self.inner.pump_events(&mut state);

        state.scheduler.cancel_all();
        state.scheduler.release_all();
        for entry in state.cache.drain() {
            self.inner.release_entry(&entry);
        }
        state.registry.clear();
        state.groups.clear();
        info!("Unloaded all sounds");
    }

    /// Release the clips of a group's sounds, keeping their declarations.
    ///
    /// Returns the number of sounds whose clips were released.
    pub fn unload_group(&self, group_id: &str) -> usize {
        let mut state = self.inner.state.lock();
        self.inner.pump_events(&mut state);

        let Some(members) = state.groups.remove(group_id) else {
            return 0;
        };
        let released = members
            .iter()
            .filter(|id| self.inner.discard_asset(&mut state, id))
            .count();
        self.inner.drain_queue(&mut state);

        info!("Unloaded group '{}' ({} sounds)", group_id, released);
        released
    }

    /// Members remembered for a group.
    #[must_use]
    pub fn group_members(&self, group_id: &str) -> Vec<String> {
        self.inner
            .state
            .lock()
            .groups
            .get(group_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Check whether a sound is registered.
    #[must_use]
    pub fn is_registered(&self, id: &str) -> bool {
        self.inner.state.lock().registry.contains(id)
    }

    /// Check whether a sound's clips are resident.
    #[must_use]
    pub fn is_loaded(&self, id: &str) -> bool {
        let mut state = self.inner.state.lock();
        self.inner.pump_events(&mut state);
        state.cache.is_loaded(id)
    }

    /// Check whether any instance of a sound is playing.
    #[must_use]
    pub fn is_playing(&self, id: &str) -> bool {
        let mut state = self.inner.state.lock();
        self.inner.pump_events(&mut state);
        state.cache.active_instances(id) > 0
    }

    /// Registered ids, sorted.
    #[must_use]
    pub fn registered_ids(&self) -> Vec<String> {
        self.inner.state.lock().registry.ids()
    }

    /// Ids whose clips are resident, sorted.
    #[must_use]
    pub fn loaded_ids(&self) -> Vec<String> {
        let mut state = self.inner.state.lock();
        self.inner.pump_events(&mut state);
        state.cache.loaded_ids()
    }

    /// Cache snapshot.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        let mut state = self.inner.state.lock();
        self.inner.pump_events(&mut state);
        state.stats.cache_stats(&state.cache)
    }

    /// Playback snapshot.
    #[must_use]
    pub fn playback_stats(&self) -> PlaybackStats {
        let mut state = self.inner.state.lock();
        self.inner.pump_events(&mut state);
        state.stats.playback_stats(&state.scheduler)
    }

    /// Change the volume of a playing instance.
    ///
    /// Returns `false` if the instance is not playing.
    pub fn set_volume(&self, instance: InstanceId, volume: f32) -> bool {
        self.with_instance(instance, |backend, clip| {
            backend.set_volume(clip, instance, volume);
        })
    }

    /// Change the playback rate of a playing instance.
    pub fn set_rate(&self, instance: InstanceId, rate: f32) -> bool {
        self.with_instance(instance, |backend, clip| {
            backend.set_rate(clip, instance, rate);
        })
    }

    /// Toggle looping of a playing instance.
    pub fn set_loop(&self, instance: InstanceId, looped: bool) -> bool {
        self.with_instance(instance, |backend, clip| {
            backend.set_loop(clip, instance, looped);
        })
    }

    fn with_instance(
        &self,
        instance: InstanceId,
        f: impl FnOnce(&dyn AudioBackend, ClipHandle),
    ) -> bool {
        let mut state = self.inner.state.lock();
        self.inner.pump_events(&mut state);
        match state.scheduler.instance(instance) {
            Some(active) => {
                f(self.inner.backend.as_ref(), active.clip);
                true
            },
            None => false,
        }
    }

    /// Change the global concurrency ceiling.
    ///
    /// Lowering it never interrupts playing instances; raising it admits
    /// queued requests right away.
    pub fn set_max_concurrent_sounds(&self, max: usize) {
        let mut state = self.inner.state.lock();
        self.inner.pump_events(&mut state);
        state.scheduler.set_max_concurrent(max.max(1));
        self.inner.drain_queue(&mut state);
    }

    /// Apply pending end-of-playback notifications.
    ///
    /// Returns how many instances ended.
    pub fn process_events(&self) -> usize {
        let mut state = self.inner.state.lock();
        self.inner.pump_events(&mut state)
    }
}

impl EngineInner {
    fn finish_load(
        engine: &Weak<Self>,
        backend: &dyn AudioBackend,
        asset: &Arc<SoundAsset>,
        ticket: u64,
        prepared: Vec<(String, BackendResult<ClipHandle>)>,
    ) -> EngineResult<()> {
        let mut handles = BTreeMap::new();
        let mut failure = None;
        for (variant_id, result) in prepared {
            match result {
                Ok(clip) => {
                    handles.insert(variant_id, clip);
                },
                Err(err) => {
                    failure.get_or_insert(EngineError::LoadFailed {
                        asset_id: asset.id.clone(),
                        variant_id,
                        cause: err.to_string(),
                    });
                },
            }
        }

        let discard = |handles: &BTreeMap<String, ClipHandle>| {
            for clip in handles.values() {
                backend.dispose(*clip);
            }
        };

        let Some(inner) = engine.upgrade() else {
            discard(&handles);
            return Err(EngineError::NotFound(asset.id.clone()));
        };
        let mut state = inner.state.lock();

        if !state.cache.finish_load(&asset.id, ticket) {
            debug!("Load of '{}' was cancelled", asset.id);
            discard(&handles);
            return Err(EngineError::NotFound(asset.id.clone()));
        }

        if let Some(err) = failure {
            warn!("{err}");
            discard(&handles);
            return Err(err);
        }

        let seconds: f64 = handles
            .values()
            .map(|clip| backend.estimated_duration_seconds(*clip))
            .sum();
        let bytes = state.cache.estimate_bytes(seconds);
        state
            .cache
            .insert(LoadedEntry::new(Arc::clone(asset), handles, bytes));
        info!("Loaded sound '{}' (~{} bytes)", asset.id, bytes);
        Ok(())
    }

    fn dropped(&self, request: &PlayRequest, reason: DropReason) -> PlayOutcome {
        if self.config.debug_logging {
            debug!("Dropped '{}': {}", request.id, reason);
        }
        PlayOutcome::Dropped(reason)
    }

    fn admit(
        &self,
        state: &mut EngineState,
        asset: &SoundAsset,
        request: PlayRequest,
    ) -> PlayOutcome {
        if state.scheduler.on_cooldown(asset, Instant::now()) {
            return self.dropped(&request, DropReason::Cooldown);
        }

        if state
            .scheduler
            .can_admit(asset, state.cache.active_instances(&asset.id))
        {
            return match self.start_instance(state, asset, &request) {
                Ok(instance) => {
                    if self.config.debug_logging {
                        debug!("Admitted '{}' as {}", request.id, instance);
                    }
                    PlayOutcome::Started(instance)
                },
                Err(reason) => self.dropped(&request, reason),
            };
        }

        let priority = request.priority_for(asset);
        if !priority.is_queueable() {
            return self.dropped(&request, DropReason::AtCapacity);
        }

        let id = request.id.clone();
        match state.scheduler.enqueue(priority, request) {
            Ok(pending) => {
                if self.config.debug_logging {
                    debug!("Queued '{}' at {} priority", id, priority);
                }
                PlayOutcome::Queued(pending)
            },
            Err(reason) => self.dropped(&PlayRequest::new(id), reason),
        }
    }

    fn start_instance(
        &self,
        state: &mut EngineState,
        asset: &SoundAsset,
        request: &PlayRequest,
    ) -> Result<InstanceId, DropReason> {
        let EngineState {
            cache,
            scheduler,
            selector,
            stats,
            ..
        } = state;

        let entry = cache.get(&asset.id).ok_or(DropReason::LoadFailed)?;
        let variant_id = selector
            .select(asset, entry, request.variant.as_deref())
            .ok_or(DropReason::NoVariant)?;
        let clip = entry.handle(&variant_id).ok_or(DropReason::NoVariant)?;

        let options = request.resolve(asset);
        let instance = self.backend.play(clip, &options).map_err(|err| {
            warn!("Backend refused to play '{}': {}", asset.id, err);
            DropReason::Backend
        })?;
        self.backend.on_ended(
            clip,
            instance,
            EndedNotifier::new(asset.id.clone(), instance, self.events_tx.clone()),
        );

        cache.record_play(&asset.id, &variant_id);
        scheduler.register(
            instance,
            ActiveInstance {
                asset_id: asset.id.clone(),
                clip,
                variant_id,
                priority: request.priority_for(asset),
            },
            Instant::now(),
        );
        stats.record_play(&asset.id);
        Ok(instance)
    }

    /// Admit queued requests while global capacity remains.
    fn drain_queue(&self, state: &mut EngineState) -> usize {
        if !state.scheduler.begin_drain() {
            return 0;
        }

        let mut deferred = Vec::new();
        let mut started = 0;
        while state.scheduler.has_global_capacity() {
            let Some(queued) = state.scheduler.pop_next() else {
                break;
            };
            if queued.is_abandoned() {
                continue;
            }

            let Some(asset) = state.registry.get(&queued.request.id) else {
                queued.resolve(None);
                continue;
            };
            // Blocked by its own cap; others may still fit.
            if !state
                .scheduler
                .can_admit(&asset, state.cache.active_instances(&asset.id))
            {
                deferred.push(queued);
                continue;
            }
            if state.scheduler.on_cooldown(&asset, Instant::now()) {
                queued.resolve(None);
                continue;
            }

            match self.start_instance(state, &asset, &queued.request) {
                Ok(instance) => {
                    if self.config.debug_logging {
                        debug!("Dequeued '{}' as {}", asset.id, instance);
                    }
                    started += 1;
                    queued.resolve(Some(instance));
                },
                Err(reason) => {
                    debug!("Queued '{}' dropped: {}", asset.id, reason);
                    queued.resolve(None);
                },
            }
        }

        for queued in deferred {
            state.scheduler.requeue(queued);
        }
        state.scheduler.end_drain();
        started
    }

    /// Apply completion messages, then drain the queue.
    fn pump_events(&self, state: &mut EngineState) -> usize {
        let mut ended = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            let PlaybackEvent::Ended { asset_id, instance } = event;
            let known = state
                .scheduler
                .instance(instance)
                .is_some_and(|active| active.asset_id == asset_id);
            if known {
                state.scheduler.release(instance);
                state.cache.release_instance(&asset_id);
                ended += 1;
            } else {
                debug!("Ignoring end of unknown instance {}", instance);
            }
        }

        if ended > 0 {
            self.drain_queue(state);
        }
        ended
    }

    /// Drop an asset's queued requests, instances, clips, and in-flight load.
    ///
    /// Returns `true` if clips were resident.
    fn discard_asset(&self, state: &mut EngineState, id: &str) -> bool {
        state.scheduler.cancel_asset(id);
        state.scheduler.release_asset(id);
        match state.cache.remove(id) {
            Some(entry) => {
                self.release_entry(&entry);
                true
            },
            None => false,
        }
    }

    fn release_entry(&self, entry: &LoadedEntry) {
        for clip in entry.handles() {
            self.backend.stop(clip, None);
            self.backend.dispose(clip);
        }
    }
}
