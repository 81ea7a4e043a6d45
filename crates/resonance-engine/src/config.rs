//! Engine configuration.
//!
//! Capacity limits and scheduling policy for the sound engine. Configuration
//! can be loaded from and saved to a TOML file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tracing::{info, warn};

/// Configuration file name.
pub const CONFIG_FILE: &str = "resonance.toml";

/// Bytes per second of 44.1kHz, 16-bit, stereo PCM.
pub const PCM_BYTES_PER_SECOND: u64 = 176_400;

/// Default memory budget (50 MiB).
pub const DEFAULT_MEMORY_BUDGET: u64 = 50 * 1024 * 1024;

/// Engine configuration parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    // === Cache ===
    /// Maximum number of resident (or loading) assets
    pub max_cache_size: usize,
    /// Approximate memory budget in bytes
    pub max_memory_budget_bytes: u64,
    /// Fraction of the cache evicted per capacity pass (0.0-1.0]
    pub eviction_ratio: f64,
    /// Bytes per second of audio used for memory estimates
    pub bytes_per_second: u64,

    // === Scheduling ===
    /// Global ceiling on simultaneously playing instances
    pub max_concurrent_sounds: usize,
    /// Maximum number of queued high-priority requests
    pub max_queue_len: usize,
    /// Seed for variant selection (None = random)
    pub variant_seed: Option<u64>,

    // === Debug ===
    /// Log every admission, queue, and drop decision
    pub debug_logging: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            // Cache
            max_cache_size: 50,
            max_memory_budget_bytes: DEFAULT_MEMORY_BUDGET,
            eviction_ratio: 0.2,
            bytes_per_second: PCM_BYTES_PER_SECOND,

            // Scheduling
            max_concurrent_sounds: 10,
            max_queue_len: 32,
            variant_seed: None,

            // Debug
            debug_logging: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from [`CONFIG_FILE`] in the working directory.
    /// Returns default config if file doesn't exist.
    pub fn load() -> Self {
        Self::load_from(CONFIG_FILE)
    }

    /// Load configuration from a specific path.
    /// Returns default config if file doesn't exist or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Self::default();
        }

        let parsed = fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {e}", path.display()))
            .and_then(|text| {
                toml::from_str::<Self>(&text)
                    .map_err(|e| format!("cannot parse {}: {e}", path.display()))
            });

        match parsed {
            Ok(mut config) => {
                config.validate();
                info!("Loaded config from {}", path.display());
                config
            },
            Err(reason) => {
                warn!("Ignoring config file, {reason}");
                Self::default()
            },
        }
    }

    /// Save configuration to a specific path.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut file = fs::File::create(path)?;
        file.write_all(contents.as_bytes())?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Clamp configuration values to usable ranges.
    pub fn validate(&mut self) {
        self.max_cache_size = self.max_cache_size.max(1);
        self.max_memory_budget_bytes = self.max_memory_budget_bytes.max(1);
        self.max_concurrent_sounds = self.max_concurrent_sounds.max(1);

        self.eviction_ratio = if self.eviction_ratio.is_finite() {
            self.eviction_ratio.clamp(f64::EPSILON, 1.0)
        } else {
            0.2
        };
    }

    /// Set the maximum cache size.
    #[must_use]
    pub const fn with_max_cache_size(mut self, size: usize) -> Self {
        self.max_cache_size = size;
        self
    }

    /// Set the memory budget.
    #[must_use]
    pub const fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.max_memory_budget_bytes = bytes;
        self
    }

    /// Set the eviction ratio.
    #[must_use]
    pub const fn with_eviction_ratio(mut self, ratio: f64) -> Self {
        self.eviction_ratio = ratio;
        self
    }

    /// Set the global concurrency ceiling.
    #[must_use]
    pub const fn with_max_concurrent_sounds(mut self, max: usize) -> Self {
        self.max_concurrent_sounds = max;
        self
    }

    /// Set the queue bound.
    #[must_use]
    pub const fn with_max_queue_len(mut self, len: usize) -> Self {
        self.max_queue_len = len;
        self
    }

    /// Seed variant selection.
    #[must_use]
    pub const fn with_variant_seed(mut self, seed: u64) -> Self {
        self.variant_seed = Some(seed);
        self
    }

    /// Enable decision logging.
    #[must_use]
    pub const fn with_debug_logging(mut self, enabled: bool) -> Self {
        self.debug_logging = enabled;
        self
    }
}
