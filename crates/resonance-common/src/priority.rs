//! Playback priority levels.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Priority of a sound for admission, queueing and eviction.
///
/// Ordering follows the declaration order, so `Low < Normal < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SoundPriority {
    /// Background detail, first to be evicted.
    Low = 0,
    /// Regular sound effects.
    #[default]
    Normal = 1,
    /// Important feedback; queued instead of dropped under load.
    High = 2,
    /// Must-play sounds; queued ahead of everything else.
    Critical = 3,
}

impl SoundPriority {
    /// All priorities, lowest first.
    #[must_use]
    pub const fn all() -> [Self; 4] {
        [Self::Low, Self::Normal, Self::High, Self::Critical]
    }

    /// Numeric level (0-3).
    #[must_use]
    pub const fn level(self) -> u8 {
        self as u8
    }

    /// Whether a request at this priority waits for capacity instead of being dropped.
    #[must_use]
    pub const fn is_queueable(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for SoundPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
