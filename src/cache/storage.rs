//! Partitioned response storage.
//!
//! `CacheStorage` is the seam between the engine and whatever holds the
//! bytes. Implementations must make `put` and `delete` atomic per key;
//! the engine adds no locking of its own.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

use super::entry::CachedResponse;
use super::keys::CacheKey;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage quota exceeded writing {requested} bytes into `{partition}` ({used}/{quota} used)")]
    QuotaExceeded {
        partition: String,
        requested: u64,
        used: u64,
        quota: u64,
    },
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

/// Named partitions of request → response associations.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Every partition name currently present.
    async fn partition_names(&self) -> Result<Vec<String>, StorageError>;

    /// Create the partition if it does not exist yet.
    async fn open(&self, partition: &str) -> Result<(), StorageError>;

    async fn get(
        &self,
        partition: &str,
        key: &CacheKey,
    ) -> Result<Option<CachedResponse>, StorageError>;

    /// Insert or wholesale replace an entry, opening the partition lazily.
    async fn put(
        &self,
        partition: &str,
        key: CacheKey,
        response: CachedResponse,
    ) -> Result<(), StorageError>;

    /// Returns whether an entry was removed.
    async fn delete(&self, partition: &str, key: &CacheKey) -> Result<bool, StorageError>;

    /// Snapshot of every entry in a partition; empty if it does not exist.
    async fn entries(
        &self,
        partition: &str,
    ) -> Result<Vec<(CacheKey, CachedResponse)>, StorageError>;

    /// Returns whether the partition existed.
    async fn delete_partition(&self, partition: &str) -> Result<bool, StorageError>;
}

type Partition = Arc<DashMap<CacheKey, CachedResponse>>;

/// In-process storage backed by `DashMap`, with an optional byte quota.
///
/// The quota counts body bytes across all partitions, the way a browser
/// origin quota would, and rejects writes that would exceed it.
#[derive(Default)]
pub struct MemoryStorage {
    partitions: DashMap<String, Partition>,
    quota_bytes: Option<u64>,
    used_bytes: AtomicU64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            quota_bytes: Some(quota_bytes),
            ..Self::default()
        }
    }

    /// Body bytes currently held across all partitions.
    pub fn used_bytes(&self) -> u64 {
        self.used_bytes.load(Ordering::Relaxed)
    }

    fn partition(&self, name: &str) -> Option<Partition> {
        self.partitions.get(name).map(|entry| Arc::clone(entry.value()))
    }

    fn partition_or_create(&self, name: &str) -> Partition {
        if let Some(existing) = self.partition(name) {
            return existing;
        }
        Arc::clone(
            self.partitions
                .entry(name.to_string())
                .or_insert_with(|| {
                    debug!(partition = name, "opening partition");
                    Arc::new(DashMap::new())
                })
                .value(),
        )
    }

    fn release(&self, bytes: u64) {
        let _ = self
            .used_bytes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                Some(used.saturating_sub(bytes))
            });
    }
}

fn body_len(response: &CachedResponse) -> u64 {
    response.body().len() as u64
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn partition_names(&self) -> Result<Vec<String>, StorageError> {
        Ok(self
            .partitions
            .iter()
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn open(&self, partition: &str) -> Result<(), StorageError> {
        self.partition_or_create(partition);
        Ok(())
    }

    async fn get(
        &self,
        partition: &str,
        key: &CacheKey,
    ) -> Result<Option<CachedResponse>, StorageError> {
        Ok(self
            .partition(partition)
            .and_then(|entries| entries.get(key).map(|entry| entry.value().clone())))
    }

    async fn put(
        &self,
        partition: &str,
        key: CacheKey,
        response: CachedResponse,
    ) -> Result<(), StorageError> {
        let requested = body_len(&response);
        let entries = self.partition_or_create(partition);
        let replaced = entries.get(&key).map(|entry| body_len(entry.value())).unwrap_or(0);

        if let Some(quota) = self.quota_bytes {
            let reserved = self
                .used_bytes
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                    let next = used.saturating_sub(replaced).checked_add(requested)?;
                    (next <= quota).then_some(next)
                });
            if let Err(used) = reserved {
                return Err(StorageError::QuotaExceeded {
                    partition: partition.to_string(),
                    requested,
                    used,
                    quota,
                });
            }
        } else {
            self.release(replaced);
            self.used_bytes.fetch_add(requested, Ordering::Relaxed);
        }

        entries.insert(key, response);
        Ok(())
    }

    async fn delete(&self, partition: &str, key: &CacheKey) -> Result<bool, StorageError> {
        let Some(entries) = self.partition(partition) else {
            return Ok(false);
        };
        match entries.remove(key) {
            Some((_, removed)) => {
                self.release(body_len(&removed));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn entries(
        &self,
        partition: &str,
    ) -> Result<Vec<(CacheKey, CachedResponse)>, StorageError> {
        Ok(self
            .partition(partition)
            .map(|entries| {
                entries
                    .iter()
                    .map(|entry| (entry.key().clone(), entry.value().clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_partition(&self, partition: &str) -> Result<bool, StorageError> {
        match self.partitions.remove(partition) {
            Some((_, entries)) => {
                let freed: u64 = entries.iter().map(|entry| body_len(entry.value())).sum();
                self.release(freed);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
