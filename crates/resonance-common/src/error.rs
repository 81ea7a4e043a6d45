//! Error types for the Resonance engine.

use thiserror::Error;

/// Top-level error type for engine operations.
///
/// The type is `Clone` so a single failed in-flight load can be reported to
/// every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Sound definition violates the asset contract.
    #[error("Invalid sound asset: {0}")]
    InvalidAsset(String),

    /// The backend could not prepare a clip.
    #[error("Failed to load sound '{asset_id}' (variant '{variant_id}'): {cause}")]
    LoadFailed {
        /// Asset being loaded.
        asset_id: String,
        /// Variant whose clip failed.
        variant_id: String,
        /// Backend error message.
        cause: String,
    },

    /// Operation referenced an unregistered asset id.
    #[error("Sound not registered: {0}")]
    NotFound(String),
}

impl EngineError {
    /// Shorthand for an [`EngineError::InvalidAsset`].
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidAsset(reason.into())
    }

    /// Returns the asset id the error refers to, if any.
    #[must_use]
    pub fn asset_id(&self) -> Option<&str> {
        match self {
            Self::InvalidAsset(_) => None,
            Self::LoadFailed { asset_id, .. } | Self::NotFound(asset_id) => Some(asset_id),
        }
    }
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_failed_display() {
        let err = EngineError::LoadFailed {
            asset_id: "boom".to_string(),
            variant_id: "default".to_string(),
            cause: "file missing".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("boom"));
        assert!(msg.contains("default"));
        assert!(msg.contains("file missing"));
        assert_eq!(err.asset_id(), Some("boom"));
    }

    #[test]
    fn test_invalid_has_no_asset_id() {
        let err = EngineError::invalid("empty id");
        assert_eq!(err.asset_id(), None);
        assert!(err.to_string().contains("empty id"));
    }
}
