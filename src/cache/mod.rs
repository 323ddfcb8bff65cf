//! Offline cache engine.
//!
//! Responses live in four versioned partitions per namespace:
//!
//! - **static**: the application shell and other high-priority assets
//! - **dynamic**: everything else fetched same-origin
//! - **api**: responses under the API prefix
//! - **icon**: icon images
//!
//! ## Configuration
//!
//! Budgets and naming come from `offline-cache.toml`:
//!
//! ```toml
//! [worker]
//! namespace = "game"
//! version = "1.4.0"
//!
//! [cache]
//! static_limit_bytes = 52428800
//! max_age_days = 30
//! ```

mod config;
mod entry;
mod eviction;
mod fallback;
mod janitor;
mod keys;
mod notifier;
mod partition;
mod revalidation;
mod storage;
mod store;

pub use config::{CacheConfig, PartitionLimits};
pub use entry::{CACHE_TIMESTAMP_HEADER, CachedResponse, FALLBACK_ENTRY_SIZE};
pub use eviction::{
    AGE_WINDOW_MS, EvictionCandidate, EvictionManager, EvictionPlan, EvictionReport,
    eviction_floor, plan_eviction,
};
pub use fallback::{FallbackResolver, OFFLINE_BODY};
pub use janitor::{JanitorReport, VersionJanitor, is_stale};
pub use keys::CacheKey;
pub use notifier::{ChannelClient, Client, ClientNotifier, DeliveryError};
pub use partition::{PartitionKind, PartitionNames, VersionToken};
pub use revalidation::{RevalidationOutcome, RevalidationWorker};
pub use storage::{CacheStorage, MemoryStorage, StorageError};
pub use store::CacheStore;

/// Names of every metric the engine records.
pub(crate) mod metric_names {
    pub(crate) use super::eviction::{METRIC_EVICT_MS, METRIC_EVICT_TOTAL};
    pub(crate) use super::fallback::METRIC_FALLBACK_TOTAL;
    pub(crate) use super::notifier::METRIC_CLIENTS;
    pub(crate) use super::revalidation::METRIC_REVALIDATION_TOTAL;
    pub(crate) use super::store::{
        METRIC_EXPIRED_TOTAL, METRIC_HIT_TOTAL, METRIC_MISS_TOTAL, METRIC_WRITE_FAILED_TOTAL,
    };
}
