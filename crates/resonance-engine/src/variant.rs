//! Variant selection.
//!
//! Picks which resident variant of an asset a play request uses: an explicit
//! variant when asked for, the implicit default for single-source assets, or
//! a weighted random draw otherwise.

use resonance_common::{SoundAsset, SoundVariant, DEFAULT_VARIANT};

use crate::cache::LoadedEntry;

/// Weighted random variant picker.
#[derive(Debug, Clone)]
pub struct VariantSelector {
    rng: fastrand::Rng,
}

impl Default for VariantSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl VariantSelector {
    /// Create a selector seeded from the thread-local generator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: fastrand::Rng::new(),
        }
    }

    /// Create a deterministic selector.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    /// Pick the variant id for a play.
    ///
    /// Returns `None` when an explicit variant is not resident.
    pub fn select(
        &mut self,
        asset: &SoundAsset,
        entry: &LoadedEntry,
        explicit: Option<&str>,
    ) -> Option<String> {
        if let Some(variant_id) = explicit {
            return entry
                .variant_handles
                .contains_key(variant_id)
                .then(|| variant_id.to_string());
        }

        if !asset.is_multi_source() {
            return Some(DEFAULT_VARIANT.to_string());
        }

        let resident: Vec<&SoundVariant> = asset
            .variants
            .iter()
            .filter(|v| entry.variant_handles.contains_key(&v.id))
            .collect();

        let candidates = if asset.avoid_repeat {
            Self::without_last(&resident, entry.last_variant.as_deref())
        } else {
            resident
        };

        self.weighted(&candidates).map(|v| v.id.clone())
    }

    /// Drop the last played variant if another positive-weight one remains.
    fn without_last<'a>(
        variants: &[&'a SoundVariant],
        last: Option<&str>,
    ) -> Vec<&'a SoundVariant> {
        let Some(last) = last else {
            return variants.to_vec();
        };

        let others: Vec<&SoundVariant> = variants.iter().copied().filter(|v| v.id != last).collect();
        if others.iter().any(|v| v.effective_weight() > 0.0) {
            others
        } else {
            variants.to_vec()
        }
    }

    fn weighted<'a>(&mut self, variants: &[&'a SoundVariant]) -> Option<&'a SoundVariant> {
        let first = variants.first().copied()?;
        let total: f64 = variants.iter().map(|v| v.effective_weight()).sum();
        if total <= 0.0 {
            return Some(first);
        }

        let mut remaining = self.rng.f64() * total;
        let mut picked = first;
        for &variant in variants {
            let weight = variant.effective_weight();
            if weight <= 0.0 {
                continue;
            }
            picked = variant;
            remaining -= weight;
            if remaining <= 0.0 {
                break;
            }
        }
        Some(picked)
    }
}
