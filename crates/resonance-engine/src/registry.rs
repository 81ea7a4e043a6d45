//! Declared sound definitions.
//!
//! Definitions are immutable once registered and shared as `Arc<SoundAsset>`
//! with cache entries and in-flight loads.

use std::collections::HashMap;
use std::sync::Arc;

use resonance_common::{EngineResult, SoundAsset};
use tracing::debug;

/// Registry of declared sounds keyed by id.
#[derive(Debug, Default)]
pub struct AssetRegistry {
    assets: HashMap<String, Arc<SoundAsset>>,
}

impl AssetRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sound.
    ///
    /// Returns `Ok(false)` without touching the existing definition when the id
    /// is already registered.
    pub fn add(&mut self, asset: SoundAsset) -> EngineResult<bool> {
        asset.validate()?;

        if self.assets.contains_key(&asset.id) {
            debug!("Sound '{}' already registered, skipping", asset.id);
            return Ok(false);
        }

        self.assets.insert(asset.id.clone(), Arc::new(asset));
        Ok(true)
    }

    /// Remove a declaration. Cache cleanup is the caller's job.
    pub fn remove(&mut self, id: &str) -> Option<Arc<SoundAsset>> {
        self.assets.remove(id)
    }

    /// Look up a declaration.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<SoundAsset>> {
        self.assets.get(id).cloned()
    }

    /// Check whether an id is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.assets.contains_key(id)
    }

    /// Registered ids, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.assets.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drop every declaration.
    pub fn clear(&mut self) {
        self.assets.clear();
    }

    /// Number of registered sounds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}
