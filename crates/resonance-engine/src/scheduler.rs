//! Playback admission and the overflow queue.
//!
//! A play request is either admitted, queued, or dropped:
//!
//! ```text
//! Requested ──▶ Admitted ──▶ Playing ──▶ Ended
//!     │            ▲
//!     ├──▶ Queued ─┘        (High / Critical only)
//!     └──▶ Dropped
//! ```
//!
//! The scheduler only does the bookkeeping: active instances, the bounded
//! priority queue, and cooldowns. Starting a clip is the engine's job.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::channel::oneshot;
use resonance_common::{ClipHandle, InstanceId, SoundAsset, SoundPriority};
use resonance_kernel::PlayOptions;
use tracing::debug;

use crate::config::EngineConfig;

/// A request to play a registered sound.
///
/// Unset fields fall back to the asset's declaration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlayRequest {
    /// Asset id.
    pub id: String,
    /// Sprite to play.
    pub sprite: Option<String>,
    /// Priority override.
    pub priority: Option<SoundPriority>,
    /// Volume override (0.0-1.0).
    pub volume: Option<f32>,
    /// Playback rate (default 1.0).
    pub rate: Option<f32>,
    /// Loop override.
    pub looped: Option<bool>,
    /// Explicit variant.
    pub variant: Option<String>,
}

impl PlayRequest {
    /// Create a request for an asset.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Set the sprite.
    #[must_use]
    pub fn with_sprite(mut self, sprite: impl Into<String>) -> Self {
        self.sprite = Some(sprite.into());
        self
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: SoundPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set the volume.
    #[must_use]
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Set the playback rate.
    #[must_use]
    pub fn with_rate(mut self, rate: f32) -> Self {
        self.rate = Some(rate);
        self
    }

    /// Set looping.
    #[must_use]
    pub fn with_loop(mut self, looped: bool) -> Self {
        self.looped = Some(looped);
        self
    }

    /// Request a specific variant.
    #[must_use]
    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    /// Effective priority against an asset.
    #[must_use]
    pub fn priority_for(&self, asset: &SoundAsset) -> SoundPriority {
        self.priority.unwrap_or(asset.priority)
    }

    /// Resolve backend options against an asset.
    #[must_use]
    pub fn resolve(&self, asset: &SoundAsset) -> PlayOptions {
        let sprite_loop = self
            .sprite
            .as_deref()
            .and_then(|name| asset.sprite(name))
            .is_some_and(|region| region.looped);

        let mut options = PlayOptions::default()
            .with_volume(self.volume.unwrap_or(asset.default_volume))
            .with_rate(self.rate.unwrap_or(1.0))
            .with_loop(self.looped.unwrap_or(sprite_loop));
        if let Some(sprite) = &self.sprite {
            options = options.with_sprite(sprite.clone());
        }
        options.normalize();
        options
    }
}

/// Why a request did not start or queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Asset id is not registered.
    UnknownAsset,
    /// Capacity reached and the priority does not queue.
    AtCapacity,
    /// The asset could not be loaded (or was unloaded meanwhile).
    LoadFailed,
    /// The requested variant is not resident.
    NoVariant,
    /// The asset played too recently.
    Cooldown,
    /// The queue is full of equal or higher priority requests.
    QueueFull,
    /// The backend refused to start the clip.
    Backend,
}

impl DropReason {
    /// Short name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnknownAsset => "unknown_asset",
            Self::AtCapacity => "at_capacity",
            Self::LoadFailed => "load_failed",
            Self::NoVariant => "no_variant",
            Self::Cooldown => "cooldown",
            Self::QueueFull => "queue_full",
            Self::Backend => "backend",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Future resolving once a queued request is admitted (`Some`) or given up
/// on (`None`).
#[derive(Debug)]
#[must_use = "a queued play resolves through this future"]
pub struct PendingPlay {
    rx: oneshot::Receiver<Option<InstanceId>>,
}

impl Future for PendingPlay {
    type Output = Option<InstanceId>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| result.ok().flatten())
    }
}

/// Result of [`crate::SoundEngine::play`].
#[derive(Debug)]
pub enum PlayOutcome {
    /// Playback started.
    Started(InstanceId),
    /// Waiting in the priority queue.
    Queued(PendingPlay),
    /// Not played.
    Dropped(DropReason),
}

impl PlayOutcome {
    /// Instance id if playback started immediately.
    #[must_use]
    pub const fn started(&self) -> Option<InstanceId> {
        match self {
            Self::Started(id) => Some(*id),
            _ => None,
        }
    }

    /// Check whether the request was queued.
    #[must_use]
    pub const fn is_queued(&self) -> bool {
        matches!(self, Self::Queued(_))
    }

    /// Drop reason, if dropped.
    #[must_use]
    pub const fn drop_reason(&self) -> Option<DropReason> {
        match self {
            Self::Dropped(reason) => Some(*reason),
            _ => None,
        }
    }

    /// Wait for the final result.
    pub async fn instance(self) -> Option<InstanceId> {
        match self {
            Self::Started(id) => Some(id),
            Self::Queued(pending) => pending.await,
            Self::Dropped(_) => None,
        }
    }
}

/// A request waiting for capacity.
#[derive(Debug)]
pub struct QueuedPlay {
    /// Effective priority.
    pub priority: SoundPriority,
    /// Arrival order.
    pub seq: u64,
    /// Original request.
    pub request: PlayRequest,
    responder: oneshot::Sender<Option<InstanceId>>,
}

impl QueuedPlay {
    /// Resolve the waiting future.
    pub fn resolve(self, instance: Option<InstanceId>) {
        // The caller may have stopped waiting.
        let _ = self.responder.send(instance);
    }

    /// Check whether nobody is waiting any more.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.responder.is_canceled()
    }
}

impl PartialEq for QueuedPlay {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedPlay {}

impl PartialOrd for QueuedPlay {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedPlay {
    // Max-heap: higher priority first, then earlier arrival.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// A playing instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveInstance {
    /// Asset being played.
    pub asset_id: String,
    /// Clip the instance runs on.
    pub clip: ClipHandle,
    /// Variant chosen for the instance.
    pub variant_id: String,
    /// Effective priority.
    pub priority: SoundPriority,
}

/// Active-instance bookkeeping plus the bounded priority queue.
#[derive(Debug)]
pub struct PlaybackScheduler {
    max_concurrent: usize,
    max_queue_len: usize,
    active: HashMap<InstanceId, ActiveInstance>,
    queue: BinaryHeap<QueuedPlay>,
    next_seq: u64,
    draining: bool,
    last_admitted: HashMap<String, Instant>,
}

impl PlaybackScheduler {
    /// Create a scheduler with the limits from `config`.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent_sounds,
            max_queue_len: config.max_queue_len,
            active: HashMap::new(),
            queue: BinaryHeap::new(),
            next_seq: 0,
            draining: false,
            last_admitted: HashMap::new(),
        }
    }

    /// Global concurrency ceiling.
    #[must_use]
    pub const fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Change the ceiling. Instances already playing are not interrupted.
    pub fn set_max_concurrent(&mut self, max: usize) {
        debug!("Concurrency ceiling {} -> {}", self.max_concurrent, max);
        self.max_concurrent = max;
    }

    /// Check the global ceiling.
    #[must_use]
    pub fn has_global_capacity(&self) -> bool {
        self.active.len() < self.max_concurrent
    }

    /// Check both the global ceiling and the asset's own cap.
    #[must_use]
    pub fn can_admit(&self, asset: &SoundAsset, asset_active: usize) -> bool {
        self.has_global_capacity()
            && asset
                .max_instances
                .map_or(true, |max| asset_active < max as usize)
    }

    /// Check whether the asset's cooldown window is still open.
    #[must_use]
    pub fn on_cooldown(&self, asset: &SoundAsset, now: Instant) -> bool {
        match (asset.cooldown(), self.last_admitted.get(&asset.id)) {
            (Some(cooldown), Some(last)) => now.saturating_duration_since(*last) < cooldown,
            _ => false,
        }
    }

    /// Record an admitted instance.
    pub fn register(&mut self, instance: InstanceId, active: ActiveInstance, now: Instant) {
        self.last_admitted.insert(active.asset_id.clone(), now);
        self.active.insert(instance, active);
    }

    /// Forget an instance that ended or was stopped.
    pub fn release(&mut self, instance: InstanceId) -> Option<ActiveInstance> {
        self.active.remove(&instance)
    }

    /// Forget every instance of an asset.
    pub fn release_asset(&mut self, asset_id: &str) -> Vec<(InstanceId, ActiveInstance)> {
        let ids: Vec<InstanceId> = self
            .active
            .iter()
            .filter(|(_, a)| a.asset_id == asset_id)
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.active.remove(&id).map(|a| (id, a)))
            .collect()
    }

    /// Forget every instance.
    pub fn release_all(&mut self) -> Vec<(InstanceId, ActiveInstance)> {
        self.active.drain().collect()
    }

    /// Look up a playing instance.
    #[must_use]
    pub fn instance(&self, instance: InstanceId) -> Option<&ActiveInstance> {
        self.active.get(&instance)
    }

    /// Number of playing instances.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Queue a request.
    ///
    /// When the queue is full, the lowest-ranked queued request is displaced
    /// (and resolved to `None`) if the new one outranks it.
    pub fn enqueue(
        &mut self,
        priority: SoundPriority,
        request: PlayRequest,
    ) -> Result<PendingPlay, DropReason> {
        if self.max_queue_len == 0 {
            return Err(DropReason::QueueFull);
        }

        if self.queue.len() >= self.max_queue_len {
            let mut items = std::mem::take(&mut self.queue).into_vec();
            let lowest = items
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| a.cmp(b))
                .map(|(index, queued)| (index, queued.priority));

            match lowest {
                Some((index, lowest_priority)) if priority > lowest_priority => {
                    let displaced = items.swap_remove(index);
                    debug!(
                        "Queue full, '{}' displaces '{}'",
                        request.id, displaced.request.id
                    );
                    displaced.resolve(None);
                    self.queue = items.into();
                },
                _ => {
                    self.queue = items.into();
                    return Err(DropReason::QueueFull);
                },
            }
        }

        let (responder, rx) = oneshot::channel();
        self.next_seq += 1;
        self.queue.push(QueuedPlay {
            priority,
            seq: self.next_seq,
            request,
            responder,
        });
        Ok(PendingPlay { rx })
    }

    /// Take the highest-priority, earliest queued request.
    pub fn pop_next(&mut self) -> Option<QueuedPlay> {
        self.queue.pop()
    }

    /// Put back a request that could not be admitted yet.
    pub fn requeue(&mut self, queued: QueuedPlay) {
        self.queue.push(queued);
    }

    /// Resolve queued requests for an asset to `None`.
    pub fn cancel_asset(&mut self, asset_id: &str) -> usize {
        let (cancelled, kept): (Vec<QueuedPlay>, Vec<QueuedPlay>) = std::mem::take(&mut self.queue)
            .into_vec()
            .into_iter()
            .partition(|q| q.request.id == asset_id);
        self.queue = kept.into();

        let count = cancelled.len();
        for queued in cancelled {
            queued.resolve(None);
        }
        count
    }

    /// Resolve every queued request to `None`.
    pub fn cancel_all(&mut self) -> usize {
        let cancelled = std::mem::take(&mut self.queue).into_vec();
        let count = cancelled.len();
        for queued in cancelled {
            queued.resolve(None);
        }
        count
    }

    /// Ids with at least one queued request.
    #[must_use]
    pub fn queued_ids(&self) -> HashSet<String> {
        self.queue.iter().map(|q| q.request.id.clone()).collect()
    }

    /// Number of queued requests.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Queue depth per priority (every priority present).
    #[must_use]
    pub fn queued_by_priority(&self) -> BTreeMap<SoundPriority, usize> {
        let mut depth: BTreeMap<SoundPriority, usize> =
            SoundPriority::all().into_iter().map(|p| (p, 0)).collect();
        for queued in &self.queue {
            *depth.entry(queued.priority).or_default() += 1;
        }
        depth
    }

    /// Enter the drain loop. Returns `false` if a drain is already running.
    pub fn begin_drain(&mut self) -> bool {
        !std::mem::replace(&mut self.draining, true)
    }

    /// Leave the drain loop.
    pub fn end_drain(&mut self) {
        self.draining = false;
    }
}
