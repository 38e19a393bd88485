//! Caching Module
//!
//! Bounded LRU caching with optional TTL expiry, used to keep loaded model
//! handles and other derived artifacts resident between requests.

mod bounded;
mod lru;

pub use bounded::{BoundedCache, CacheStats};
pub use lru::{CacheEntry, LruStore};

use serde::{Deserialize, Serialize};

/// Configuration for a [`BoundedCache`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of resident entries
    pub max_size: usize,
    /// Entry lifetime in seconds, `None` disables expiry
    pub ttl_seconds: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            ttl_seconds: Some(3600),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the capacity
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Builder method to set the entry lifetime
    pub fn with_ttl_seconds(mut self, secs: u64) -> Self {
        self.ttl_seconds = Some(secs);
        self
    }

    /// Builder method to disable expiry
    pub fn without_ttl(mut self) -> Self {
        self.ttl_seconds = None;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.max_size, 1000);
        assert_eq!(config.ttl_seconds, Some(3600));
    }

    #[test]
    fn test_config_from_json() {
        let config: CacheConfig = serde_json::from_str(r#"{"max_size": 8, "ttl_seconds": null}"#).unwrap();
        assert_eq!(config, CacheConfig::new().with_max_size(8).without_ttl());
    }
}
