//! `CacheStore`: the facade strategies read from and write to.
//!
//! Storage failures never leave this module. Reads degrade to misses and
//! writes to "served but not cached".

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::domain::messages::PartitionStatus;
use crate::domain::strategy::StrategyClassifier;

use super::config::CacheConfig;
use super::entry::CachedResponse;
use super::eviction::{EvictionManager, EvictionReport};
use super::keys::CacheKey;
use super::partition::{PartitionKind, PartitionNames};
use super::storage::CacheStorage;

const SOURCE: &str = "cache::store";

pub(crate) const METRIC_HIT_TOTAL: &str = "offline_cache_hit_total";
pub(crate) const METRIC_MISS_TOTAL: &str = "offline_cache_miss_total";
pub(crate) const METRIC_EXPIRED_TOTAL: &str = "offline_cache_expired_total";
pub(crate) const METRIC_WRITE_FAILED_TOTAL: &str = "offline_cache_write_failed_total";

pub struct CacheStore {
    storage: Arc<dyn CacheStorage>,
    names: PartitionNames,
    classifier: Arc<StrategyClassifier>,
    eviction: EvictionManager,
    max_age: Duration,
}

impl CacheStore {
    pub fn new(
        config: &CacheConfig,
        storage: Arc<dyn CacheStorage>,
        classifier: Arc<StrategyClassifier>,
    ) -> Self {
        Self {
            storage,
            names: config.partition_names(),
            eviction: EvictionManager::new(config.limits, Arc::clone(&classifier)),
            classifier,
            max_age: config.max_age,
        }
    }

    pub fn names(&self) -> &PartitionNames {
        &self.names
    }

    pub fn classifier(&self) -> &StrategyClassifier {
        &self.classifier
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    /// Partition a path is written to.
    pub fn partition_for(&self, path: &str) -> PartitionKind {
        if self.classifier.is_high_priority(path) {
            PartitionKind::Static
        } else if self.classifier.is_api(path) {
            PartitionKind::Api
        } else if self.classifier.is_icon(path) {
            PartitionKind::Icon
        } else {
            PartitionKind::Dynamic
        }
    }

    /// Open every partition of the running version.
    pub async fn open_current(&self) {
        for name in self.names.current() {
            if let Err(err) = self.storage.open(&name).await {
                warn!(target = SOURCE, partition = %name, error = %err, "failed to open partition");
            }
        }
    }

    /// Search static, dynamic, api, icon in order. Expired hits are deleted.
    pub async fn get(&self, key: &CacheKey) -> Option<CachedResponse> {
        let now = OffsetDateTime::now_utc();
        for kind in PartitionKind::LOOKUP_ORDER {
            let partition = self.names.name(kind);
            let hit = match self.storage.get(&partition, key).await {
                Ok(hit) => hit,
                Err(err) => {
                    warn!(target = SOURCE, partition = %partition, key = %key, error = %err, "cache read failed");
                    continue;
                }
            };
            let Some(response) = hit else {
                continue;
            };

            if self.is_expired(&response, now) {
                debug!(target = SOURCE, partition = %partition, key = %key, "expired entry dropped");
                counter!(METRIC_EXPIRED_TOTAL, "partition" => kind.as_str()).increment(1);
                if let Err(err) = self.storage.delete(&partition, key).await {
                    warn!(target = SOURCE, partition = %partition, key = %key, error = %err, "failed to delete expired entry");
                }
                continue;
            }

            counter!(METRIC_HIT_TOTAL, "partition" => kind.as_str()).increment(1);
            return Some(response);
        }
        counter!(METRIC_MISS_TOTAL).increment(1);
        None
    }

    /// Store a response in the partition its path routes to.
    ///
    /// Returns whether the entry was written.
    pub async fn put(&self, key: &CacheKey, response: CachedResponse) -> bool {
        let kind = self.partition_for(key.path());
        self.put_into(kind, key, response).await
    }

    /// Store into an explicit partition of the running version, then enforce
    /// that partition's budget.
    pub async fn put_into(&self, kind: PartitionKind, key: &CacheKey, response: CachedResponse) -> bool {
        let partition = self.names.name(kind);
        let stamped = response.stamped(OffsetDateTime::now_utc());

        if let Err(err) = self.storage.put(&partition, key.clone(), stamped).await {
            warn!(target = SOURCE, partition = %partition, key = %key, error = %err, "cache write failed");
            counter!(METRIC_WRITE_FAILED_TOTAL, "partition" => kind.as_str()).increment(1);
            return false;
        }
        debug!(target = SOURCE, partition = %partition, key = %key, "cached response");

        self.enforce_budget(kind).await;
        true
    }

    /// Remove the key from every partition. Returns whether anything was removed.
    pub async fn delete(&self, key: &CacheKey) -> bool {
        let mut removed = false;
        for partition in self.names.current() {
            match self.storage.delete(&partition, key).await {
                Ok(hit) => removed |= hit,
                Err(err) => {
                    warn!(target = SOURCE, partition = %partition, key = %key, error = %err, "cache delete failed");
                }
            }
        }
        removed
    }

    /// Current budget size of a partition in bytes.
    pub async fn size_of(&self, kind: PartitionKind) -> u64 {
        let partition = self.names.name(kind);
        match self.storage.entries(&partition).await {
            Ok(entries) => entries.iter().map(|(_, response)| response.size()).sum(),
            Err(err) => {
                warn!(target = SOURCE, partition = %partition, error = %err, "failed to size partition");
                0
            }
        }
    }

    pub async fn enforce_budget(&self, kind: PartitionKind) -> EvictionReport {
        let partition = self.names.name(kind);
        match self
            .eviction
            .enforce(self.storage.as_ref(), &partition, kind)
            .await
        {
            Ok(report) => report,
            Err(err) => {
                warn!(target = SOURCE, partition = %partition, error = %err, "eviction pass failed");
                EvictionReport::default()
            }
        }
    }

    /// Every partition name in storage, or empty on failure.
    pub async fn partition_names(&self) -> Vec<String> {
        match self.storage.partition_names().await {
            Ok(names) => names,
            Err(err) => {
                warn!(target = SOURCE, error = %err, "failed to list partitions");
                Vec::new()
            }
        }
    }

    pub async fn delete_partition(&self, name: &str) -> bool {
        match self.storage.delete_partition(name).await {
            Ok(existed) => existed,
            Err(err) => {
                warn!(target = SOURCE, partition = name, error = %err, "failed to delete partition");
                false
            }
        }
    }

    /// Entry count and size for each partition of the running version.
    pub async fn status(&self) -> Vec<PartitionStatus> {
        let mut rows = Vec::with_capacity(PartitionKind::LOOKUP_ORDER.len());
        for kind in PartitionKind::LOOKUP_ORDER {
            let name = self.names.name(kind);
            let entries = match self.storage.entries(&name).await {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(target = SOURCE, partition = %name, error = %err, "failed to read partition");
                    Vec::new()
                }
            };
            rows.push(PartitionStatus {
                kind: kind.as_str().to_string(),
                entries: entries.len(),
                bytes: entries.iter().map(|(_, response)| response.size()).sum(),
                limit_bytes: self.eviction.limit(kind),
                name,
            });
        }
        rows
    }

    fn is_expired(&self, response: &CachedResponse, now: OffsetDateTime) -> bool {
        // Unstamped entries carry no age and are kept.
        response
            .timestamp()
            .is_some_and(|cached_at| now - cached_at > self.max_age)
    }
}
