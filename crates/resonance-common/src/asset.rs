//! Declarative sound asset model.
//!
//! A [`SoundAsset`] is declared once and never mutated afterwards. It points at
//! either a single [`SoundSource`] or a list of weighted [`SoundVariant`]s, and
//! can carve named [`SpriteRegion`]s out of its audio.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::ids::DEFAULT_VARIANT;
use crate::priority::SoundPriority;

/// Where the backend reads a clip from.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoundSource {
    /// File on disk (or a backend-resolved asset path).
    Path(PathBuf),
    /// Encoded audio already in memory.
    #[serde(skip)]
    Bytes {
        /// Name used in logs and error messages.
        name: String,
        /// Encoded audio bytes.
        data: Arc<[u8]>,
    },
}

impl SoundSource {
    /// Source backed by a file path.
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    /// Source backed by in-memory bytes.
    pub fn bytes(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self::Bytes {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Human-readable description for logs.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Bytes { name, data } => format!("{name} ({} bytes)", data.len()),
        }
    }
}

impl fmt::Debug for SoundSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Bytes { name, data } => f
                .debug_struct("Bytes")
                .field("name", name)
                .field("len", &data.len())
                .finish(),
        }
    }
}

/// Named sub-region of a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpriteRegion {
    /// Offset from the start of the clip in milliseconds.
    pub start_ms: u64,
    /// Length of the region in milliseconds.
    pub duration_ms: u64,
    /// Whether the region loops by default.
    #[serde(default, rename = "loop")]
    pub looped: bool,
}

impl SpriteRegion {
    /// Create a non-looping region.
    #[must_use]
    pub const fn new(start_ms: u64, duration_ms: u64) -> Self {
        Self {
            start_ms,
            duration_ms,
            looped: false,
        }
    }

    /// Set looping.
    #[must_use]
    pub const fn with_loop(mut self, looped: bool) -> Self {
        self.looped = looped;
        self
    }

    /// Region start offset.
    #[must_use]
    pub const fn start(&self) -> Duration {
        Duration::from_millis(self.start_ms)
    }

    /// Region length.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// Sprite name to region mapping.
pub type SpriteMap = BTreeMap<String, SpriteRegion>;

/// One alternative source of a multi-source asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundVariant {
    /// Variant id, unique within its asset.
    pub id: String,
    /// Where the variant's audio lives.
    pub source: SoundSource,
    /// Selection weight; `None` counts as 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

impl SoundVariant {
    /// Create a variant with the default weight.
    pub fn new(id: impl Into<String>, source: SoundSource) -> Self {
        Self {
            id: id.into(),
            source,
            weight: None,
        }
    }

    /// Set the selection weight.
    #[must_use]
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Weight used by the selector.
    #[must_use]
    pub fn effective_weight(&self) -> f64 {
        self.weight.unwrap_or(1.0)
    }
}

/// Sound category, used by callers for volume scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoundCategory {
    /// Sound effects.
    #[default]
    Sfx,
    /// Music.
    Music,
    /// Voice/dialogue.
    Voice,
    /// UI feedback.
    Ui,
}

fn default_volume() -> f32 {
    1.0
}

/// Declared sound definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundAsset {
    /// Unique key.
    pub id: String,
    /// Mixing category.
    #[serde(default)]
    pub category: SoundCategory,
    /// Single source, exclusive with `variants`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SoundSource>,
    /// Weighted alternatives, exclusive with `source`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<SoundVariant>,
    /// Named sub-regions.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sprites: SpriteMap,
    /// Volume used when a request does not set one (0.0-1.0).
    #[serde(default = "default_volume")]
    pub default_volume: f32,
    /// Scheduling and eviction priority.
    #[serde(default)]
    pub priority: SoundPriority,
    /// Cap on simultaneous instances.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_instances: Option<u32>,
    /// Load while registering.
    #[serde(default)]
    pub preload: bool,
    /// Minimum spacing between admitted plays, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_ms: Option<u64>,
    /// Avoid choosing the last played variant twice in a row.
    #[serde(default)]
    pub avoid_repeat: bool,
}

impl SoundAsset {
    /// Create a single-source asset.
    pub fn new(id: impl Into<String>, source: SoundSource) -> Self {
        Self {
            id: id.into(),
            category: SoundCategory::default(),
            source: Some(source),
            variants: Vec::new(),
            sprites: SpriteMap::new(),
            default_volume: default_volume(),
            priority: SoundPriority::default(),
            max_instances: None,
            preload: false,
            cooldown_ms: None,
            avoid_repeat: false,
        }
    }

    /// Create a multi-source asset.
    pub fn with_variants(id: impl Into<String>, variants: Vec<SoundVariant>) -> Self {
        Self {
            source: None,
            variants,
            ..Self::new(id, SoundSource::Path(PathBuf::new()))
        }
    }

    /// Set category.
    #[must_use]
    pub fn with_category(mut self, category: SoundCategory) -> Self {
        self.category = category;
        self
    }

    /// Set priority.
    #[must_use]
    pub fn with_priority(mut self, priority: SoundPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the default volume.
    #[must_use]
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.default_volume = volume;
        self
    }

    /// Cap simultaneous instances.
    #[must_use]
    pub fn with_max_instances(mut self, max: u32) -> Self {
        self.max_instances = Some(max);
        self
    }

    /// Load eagerly on registration.
    #[must_use]
    pub fn with_preload(mut self, preload: bool) -> Self {
        self.preload = preload;
        self
    }

    /// Add a named sprite region.
    #[must_use]
    pub fn with_sprite(mut self, name: impl Into<String>, region: SpriteRegion) -> Self {
        self.sprites.insert(name.into(), region);
        self
    }

    /// Set a replay cooldown.
    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown_ms = Some(cooldown.as_millis() as u64);
        self
    }

    /// Avoid immediate variant repeats.
    #[must_use]
    pub fn with_avoid_repeat(mut self, avoid: bool) -> Self {
        self.avoid_repeat = avoid;
        self
    }

    /// Whether the asset is declared with variants.
    #[must_use]
    pub fn is_multi_source(&self) -> bool {
        !self.variants.is_empty()
    }

    /// Variant ids in declaration order (`default` for single-source assets).
    #[must_use]
    pub fn variant_ids(&self) -> Vec<String> {
        if self.variants.is_empty() {
            vec![DEFAULT_VARIANT.to_string()]
        } else {
            self.variants.iter().map(|v| v.id.clone()).collect()
        }
    }

    /// Source for a variant id.
    #[must_use]
    pub fn source_for(&self, variant_id: &str) -> Option<&SoundSource> {
        if self.variants.is_empty() {
            if variant_id == DEFAULT_VARIANT {
                self.source.as_ref()
            } else {
                None
            }
        } else {
            self.variants
                .iter()
                .find(|v| v.id == variant_id)
                .map(|v| &v.source)
        }
    }

    /// Sprite region by name.
    #[must_use]
    pub fn sprite(&self, name: &str) -> Option<&SpriteRegion> {
        self.sprites.get(name)
    }

    /// Replay cooldown, if any.
    #[must_use]
    pub fn cooldown(&self) -> Option<Duration> {
        self.cooldown_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Check the construction contract.
    pub fn validate(&self) -> EngineResult<()> {
        if self.id.trim().is_empty() {
            return Err(EngineError::invalid("sound id must not be empty"));
        }

        match (&self.source, self.variants.is_empty()) {
            (None, true) => {
                return Err(EngineError::invalid(format!(
                    "'{}' needs a source or at least one variant",
                    self.id
                )));
            },
            (Some(_), false) => {
                return Err(EngineError::invalid(format!(
                    "'{}' declares both a source and variants",
                    self.id
                )));
            },
            _ => {},
        }

        let mut seen = HashSet::new();
        for variant in &self.variants {
            if variant.id.trim().is_empty() {
                return Err(EngineError::invalid(format!(
                    "'{}' has a variant with an empty id",
                    self.id
                )));
            }
            if !seen.insert(variant.id.as_str()) {
                return Err(EngineError::invalid(format!(
                    "'{}' declares variant '{}' twice",
                    self.id, variant.id
                )));
            }
            let weight = variant.effective_weight();
            if !weight.is_finite() || weight < 0.0 {
                return Err(EngineError::invalid(format!(
                    "'{}' variant '{}' has invalid weight {weight}",
                    self.id, variant.id
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.default_volume) {
            return Err(EngineError::invalid(format!(
                "'{}' default volume {} is outside 0.0-1.0",
                self.id, self.default_volume
            )));
        }

        if self.max_instances == Some(0) {
            return Err(EngineError::invalid(format!(
                "'{}' max_instances must be positive",
                self.id
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variants() -> Vec<SoundVariant> {
        vec![
            SoundVariant::new("a", SoundSource::path("hit_a.wav")),
            SoundVariant::new("b", SoundSource::path("hit_b.wav")).with_weight(3.0),
        ]
    }

    #[test]
    fn test_single_source_asset() {
        let asset = SoundAsset::new("click", SoundSource::path("click.wav"));
        assert!(asset.validate().is_ok());
        assert!(!asset.is_multi_source());
        assert!(asset.source_for(DEFAULT_VARIANT).is_some());
        assert!(asset.source_for("other").is_none());
    }

    #[test]
    fn test_variant_asset() {
        let asset = SoundAsset::with_variants("hit", variants());
        assert!(asset.validate().is_ok());
        assert!(asset.is_multi_source());
        assert_eq!(asset.variant_ids(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
            asset.source_for("b"),
            Some(&SoundSource::path("hit_b.wav"))
        );
        assert!(asset.source_for(DEFAULT_VARIANT).is_none());
    }

    #[test]
    fn test_empty_id_rejected() {
        let asset = SoundAsset::new("  ", SoundSource::path("x.wav"));
        assert!(matches!(asset.validate(), Err(EngineError::InvalidAsset(_))));
    }

    #[test]
    fn test_missing_source_rejected() {
        let asset = SoundAsset::with_variants("nothing", Vec::new());
        assert!(matches!(asset.validate(), Err(EngineError::InvalidAsset(_))));
    }

    #[test]
    fn test_source_and_variants_rejected() {
        let mut asset = SoundAsset::with_variants("both", variants());
        asset.source = Some(SoundSource::path("x.wav"));
        assert!(matches!(asset.validate(), Err(EngineError::InvalidAsset(_))));
    }

    #[test]
    fn test_negative_weight_rejected() {
        let asset = SoundAsset::with_variants(
            "neg",
            vec![SoundVariant::new("a", SoundSource::path("a.wav")).with_weight(-1.0)],
        );
        assert!(matches!(asset.validate(), Err(EngineError::InvalidAsset(_))));
    }

    #[test]
    fn test_duplicate_variant_rejected() {
        let asset = SoundAsset::with_variants(
            "dup",
            vec![
                SoundVariant::new("a", SoundSource::path("a.wav")),
                SoundVariant::new("a", SoundSource::path("b.wav")),
            ],
        );
        assert!(matches!(asset.validate(), Err(EngineError::InvalidAsset(_))));
    }

    #[test]
    fn test_zero_max_instances_rejected() {
        let asset = SoundAsset::new("x", SoundSource::path("x.wav")).with_max_instances(0);
        assert!(matches!(asset.validate(), Err(EngineError::InvalidAsset(_))));
    }

    #[test]
    fn test_volume_out_of_range_rejected() {
        let asset = SoundAsset::new("x", SoundSource::path("x.wav")).with_volume(1.5);
        assert!(matches!(asset.validate(), Err(EngineError::InvalidAsset(_))));
    }

    #[test]
    fn test_sprites_and_cooldown() {
        let asset = SoundAsset::new("ui", SoundSource::path("ui_sheet.ogg"))
            .with_sprite("click", SpriteRegion::new(0, 120))
            .with_sprite("hum", SpriteRegion::new(500, 2000).with_loop(true))
            .with_cooldown(Duration::from_millis(80));

        let hum = asset.sprite("hum").expect("sprite should exist");
        assert!(hum.looped);
        assert_eq!(hum.start(), Duration::from_millis(500));
        assert_eq!(asset.cooldown(), Some(Duration::from_millis(80)));
        assert!(asset.sprite("missing").is_none());
    }

    #[test]
    fn test_bytes_source_debug_is_compact() {
        let source = SoundSource::bytes("beep", vec![0u8; 4096]);
        let debug = format!("{source:?}");
        assert!(debug.contains("4096"));
        assert!(source.describe().contains("beep"));
    }

    #[test]
    fn test_toml_round_trip_of_manifest_entry() {
        let text = r#"
            id = "coin"
            priority = "high"
            max_instances = 2
            variants = [
                { id = "a", source = { path = "coin_a.wav" } },
                { id = "b", source = { path = "coin_b.wav" }, weight = 2.0 },
            ]

            [sprites.short]
            start_ms = 0
            duration_ms = 150
            loop = false
        "#;
        let asset: SoundAsset = toml::from_str(text).expect("valid toml");
        assert_eq!(asset.priority, SoundPriority::High);
        assert_eq!(asset.max_instances, Some(2));
        assert_eq!(asset.variants.len(), 2);
        assert!((asset.default_volume - 1.0).abs() < f32::EPSILON);
        assert!(asset.sprite("short").is_some());
        assert!(asset.validate().is_ok());
    }
}
