//! Sound manifest loading.
//!
//! A manifest is a TOML file declaring sounds and preload groups:
//!
//! ```toml
//! [[sounds]]
//! id = "footstep"
//! avoid_repeat = true
//! variants = [
//!     { id = "l", source = { path = "sfx/step_l.wav" } },
//!     { id = "r", source = { path = "sfx/step_r.wav" }, weight = 2.0 },
//! ]
//!
//! [groups]
//! level_1 = ["footstep"]
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use resonance_common::{EngineError, SoundAsset};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Default manifest file name.
pub const DEFAULT_MANIFEST: &str = "sounds.toml";

/// Errors that can occur during manifest loading.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// File not found.
    #[error("Manifest file not found: {0}")]
    NotFound(PathBuf),

    /// Failed to read file.
    #[error("Failed to read manifest: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse TOML.
    #[error("Failed to parse manifest TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// A sound violates the asset contract.
    #[error("Invalid sound in manifest: {0}")]
    InvalidSound(#[from] EngineError),

    /// Two sounds share an id.
    #[error("Duplicate sound ID: {0}")]
    DuplicateId(String),

    /// A group names a sound the manifest does not declare.
    #[error("Group '{group}' references unknown sound '{id}'")]
    UnknownGroupMember {
        /// Group name.
        group: String,
        /// Missing sound id.
        id: String,
    },
}

/// Result type for manifest operations.
pub type ManifestResult<T> = Result<T, ManifestError>;

/// Declared sounds plus named preload groups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SoundManifest {
    /// Sound declarations.
    #[serde(default)]
    pub sounds: Vec<SoundAsset>,
    /// Preload groups by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub groups: BTreeMap<String, Vec<String>>,
}

impl SoundManifest {
    /// Load and validate a manifest file.
    pub fn load_from<P: AsRef<Path>>(path: P) -> ManifestResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ManifestError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let manifest = Self::parse(&content)?;
        info!(
            "Loaded {} sounds and {} groups from {}",
            manifest.sounds.len(),
            manifest.groups.len(),
            path.display()
        );
        Ok(manifest)
    }

    /// Parse and validate manifest text.
    pub fn parse(content: &str) -> ManifestResult<Self> {
        let manifest: Self = toml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check every sound and group reference.
    pub fn validate(&self) -> ManifestResult<()> {
        let mut ids = HashSet::new();
        for sound in &self.sounds {
            sound.validate()?;
            if !ids.insert(sound.id.as_str()) {
                return Err(ManifestError::DuplicateId(sound.id.clone()));
            }
        }

        for (group, members) in &self.groups {
            if let Some(id) = members.iter().find(|id| !ids.contains(id.as_str())) {
                return Err(ManifestError::UnknownGroupMember {
                    group: group.clone(),
                    id: id.clone(),
                });
            }
        }

        Ok(())
    }

    /// Save the manifest as TOML.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(path, contents)
    }

    /// Members of a group.
    #[must_use]
    pub fn group(&self, name: &str) -> Option<&[String]> {
        self.groups.get(name).map(Vec::as_slice)
    }
}
