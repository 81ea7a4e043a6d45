//! # Resonance Common
//!
//! Common types shared by the Resonance sound-effect engine crates.
//!
//! This crate provides:
//! - ID types for clips and playing instances
//! - Playback priorities
//! - The declarative sound asset model (sources, variants, sprites)
//! - The engine error taxonomy
//! - Prelude for convenient imports

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod asset;
pub mod error;
pub mod ids;
pub mod priority;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::asset::*;
    pub use crate::error::*;
    pub use crate::ids::*;
    pub use crate::priority::*;
}

pub use prelude::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prelude_exports() {
        let asset = SoundAsset::new("click", SoundSource::path("ui/click.wav"))
            .with_priority(SoundPriority::High);
        assert!(asset.validate().is_ok());
        assert_eq!(asset.variant_ids(), vec![DEFAULT_VARIANT.to_string()]);
    }

    #[test]
    fn test_instance_id_generation() {
        let gen = IdGenerator::new();
        let a = InstanceId::from_raw(gen.next());
        let b = InstanceId::from_raw(gen.next());
        assert_ne!(a, b);
    }
}
