//! Result cache configuration.

use std::time::Duration;

const DEFAULT_MAX_ENTRIES: usize = 20;
const DEFAULT_MAX_BYTES: usize = 50 * 1024 * 1024;
const DEFAULT_TTL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// When false the cache never stores anything and every lookup misses.
    pub enabled: bool,
    /// Maximum number of live entries.
    pub max_entries: usize,
    /// Maximum summed payload size of live entries.
    pub max_bytes: usize,
    /// Age after which an entry is no longer served.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: DEFAULT_MAX_ENTRIES,
            max_bytes: DEFAULT_MAX_BYTES,
            ttl: DEFAULT_TTL,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            max_entries: settings.max_entries.get(),
            max_bytes: settings.max_bytes.get(),
            ttl: settings.ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.max_entries, 20);
        assert_eq!(config.max_bytes, 50 * 1024 * 1024);
        assert_eq!(config.ttl, Duration::from_secs(3));
    }
}
