//! # Configuration
//!
//! Tunables of a `VirtualObjectManager`, loadable from TOML:
//!
//! ```toml
//! cache_size = 3
//! first_export_id = 1
//! first_weak_store_id = 1
//! ```
//!
//! Missing fields take their defaults from `primitives`.

use crate::primitives::{DEFAULT_CACHE_SIZE, FIRST_EXPORT_ID, FIRST_WEAK_STORE_ID};
use crate::{VomError, VomResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VomConfig {
    /// Maximum number of virtual objects with resident state.
    pub cache_size: usize,
    /// First id the export allocator hands out.
    pub first_export_id: u64,
    /// First weak store id. Raise it past the `vom.ws<N>` records already in
    /// a reused store.
    pub first_weak_store_id: u64,
}

impl Default for VomConfig {
    fn default() -> Self {
        Self {
            cache_size: DEFAULT_CACHE_SIZE,
            first_export_id: FIRST_EXPORT_ID,
            first_weak_store_id: FIRST_WEAK_STORE_ID,
        }
    }
}

impl VomConfig {
    /// Default configuration with a different cache size.
    #[must_use]
    pub fn with_cache_size(cache_size: usize) -> Self {
        Self {
            cache_size,
            ..Self::default()
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> VomResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| VomError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the manager cannot run with.
    pub fn validate(&self) -> VomResult<()> {
        if self.cache_size == 0 {
            return Err(VomError::InvalidConfig(
                "cache_size must be at least 1".to_string(),
            ));
        }
        if self.first_export_id == 0 {
            return Err(VomError::InvalidConfig(
                "first_export_id must be at least 1".to_string(),
            ));
        }
        if self.first_weak_store_id == 0 {
            return Err(VomError::InvalidConfig(
                "first_weak_store_id must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
