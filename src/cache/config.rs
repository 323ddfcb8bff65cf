//! Cache engine configuration.
//!
//! Built once at startup (see `crate::config`) and handed to each component.

use std::time::Duration;

use super::partition::{PartitionKind, PartitionNames};

const MIB: u64 = 1024 * 1024;

const DEFAULT_NAMESPACE: &str = "offline-cache";
const DEFAULT_VERSION: &str = "1.0.0";
const DEFAULT_STATIC_LIMIT_BYTES: u64 = 50 * MIB;
const DEFAULT_DYNAMIC_LIMIT_BYTES: u64 = 20 * MIB;
const DEFAULT_API_LIMIT_BYTES: u64 = 5 * MIB;
const DEFAULT_ICON_LIMIT_BYTES: u64 = 10 * MIB;
const DEFAULT_MAX_AGE_DAYS: u64 = 30;

/// Per-partition byte budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionLimits {
    pub static_bytes: u64,
    pub dynamic_bytes: u64,
    pub api_bytes: u64,
    pub icon_bytes: u64,
}

impl PartitionLimits {
    pub fn limit(&self, kind: PartitionKind) -> u64 {
        match kind {
            PartitionKind::Static => self.static_bytes,
            PartitionKind::Dynamic => self.dynamic_bytes,
            PartitionKind::Api => self.api_bytes,
            PartitionKind::Icon => self.icon_bytes,
        }
    }
}

impl Default for PartitionLimits {
    fn default() -> Self {
        Self {
            static_bytes: DEFAULT_STATIC_LIMIT_BYTES,
            dynamic_bytes: DEFAULT_DYNAMIC_LIMIT_BYTES,
            api_bytes: DEFAULT_API_LIMIT_BYTES,
            icon_bytes: DEFAULT_ICON_LIMIT_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Project prefix shared by every partition name.
    pub namespace: String,
    /// Running version, embedded in partition names.
    pub version: String,
    pub limits: PartitionLimits,
    /// Entries older than this are treated as misses and deleted on read.
    pub max_age: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            version: DEFAULT_VERSION.to_string(),
            limits: PartitionLimits::default(),
            max_age: Duration::from_secs(DEFAULT_MAX_AGE_DAYS * 24 * 60 * 60),
        }
    }
}

impl CacheConfig {
    pub fn partition_names(&self) -> PartitionNames {
        PartitionNames::new(self.namespace.clone(), self.version.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert_eq!(config.limits.limit(PartitionKind::Static), 50 * MIB);
        assert_eq!(config.limits.limit(PartitionKind::Dynamic), 20 * MIB);
        assert_eq!(config.limits.limit(PartitionKind::Api), 5 * MIB);
        assert_eq!(config.limits.limit(PartitionKind::Icon), 10 * MIB);
        assert_eq!(config.max_age, Duration::from_secs(30 * 86_400));
    }

    #[test]
    fn partition_names_follow_namespace_and_version() {
        let config = CacheConfig {
            namespace: "game".to_string(),
            version: "2.0.1".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.partition_names().name(PartitionKind::Dynamic),
            "game-dynamic-v2.0.1"
        );
    }
}
