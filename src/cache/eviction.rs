//! Byte-budget enforcement for a single partition.
//!
//! When a partition exceeds its limit, entries are deleted until the
//! partition is back down to 80% of the limit. Protected entries are never
//! candidates, so a partition holding only protected entries may stay over
//! budget.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{debug, info, warn};

use crate::domain::strategy::StrategyClassifier;

use super::config::PartitionLimits;
use super::keys::CacheKey;
use super::partition::PartitionKind;
use super::storage::{CacheStorage, StorageError};

pub(crate) const METRIC_EVICT_TOTAL: &str = "offline_cache_evict_total";
pub(crate) const METRIC_EVICT_MS: &str = "offline_cache_eviction_ms";

/// Entries whose write times are within this window are ordered by size.
pub const AGE_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

/// Evict down to `limit * EVICT_TO_NUMERATOR / EVICT_TO_DENOMINATOR`.
const EVICT_TO_NUMERATOR: u128 = 4;
const EVICT_TO_DENOMINATOR: u128 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionCandidate {
    pub key: CacheKey,
    pub size: u64,
    pub cached_at_ms: i64,
    pub protected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionPlan {
    pub total_size: u64,
    pub delete_target: u64,
    /// Entries to delete, in deletion order.
    pub victims: Vec<EvictionCandidate>,
    pub planned_bytes: u64,
}

/// Outcome of one eviction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub total_size: u64,
    pub evicted: usize,
    pub evicted_bytes: u64,
}

/// The size an over-budget partition is trimmed down to.
pub fn eviction_floor(limit: u64) -> u64 {
    (u128::from(limit) * EVICT_TO_NUMERATOR / EVICT_TO_DENOMINATOR) as u64
}

/// Decide which entries to delete. Returns `None` when under budget.
///
/// Candidates are bucketed into 24 hour windows counted from the oldest
/// candidate. Older windows go first; within a window the largest entry goes
/// first. Entries more than 24 hours apart therefore always leave oldest
/// first.
pub fn plan_eviction(candidates: Vec<EvictionCandidate>, limit: u64) -> Option<EvictionPlan> {
    let total_size: u64 = candidates.iter().map(|c| c.size).sum();
    if total_size <= limit {
        return None;
    }
    let delete_target = total_size - eviction_floor(limit);

    let mut evictable: Vec<EvictionCandidate> =
        candidates.into_iter().filter(|c| !c.protected).collect();
    let oldest = evictable
        .iter()
        .map(|c| c.cached_at_ms)
        .min()
        .unwrap_or_default();
    let window = |c: &EvictionCandidate| (c.cached_at_ms - oldest) / AGE_WINDOW_MS;
    evictable.sort_by(|a, b| {
        window(a)
            .cmp(&window(b))
            .then_with(|| b.size.cmp(&a.size))
            .then_with(|| a.cached_at_ms.cmp(&b.cached_at_ms))
    });

    let mut victims = Vec::new();
    let mut planned_bytes = 0u64;
    for candidate in evictable {
        if planned_bytes >= delete_target {
            break;
        }
        planned_bytes += candidate.size;
        victims.push(candidate);
    }

    Some(EvictionPlan {
        total_size,
        delete_target,
        victims,
        planned_bytes,
    })
}

pub struct EvictionManager {
    limits: PartitionLimits,
    classifier: Arc<StrategyClassifier>,
}

impl EvictionManager {
    pub fn new(limits: PartitionLimits, classifier: Arc<StrategyClassifier>) -> Self {
        Self { limits, classifier }
    }

    pub fn limit(&self, kind: PartitionKind) -> u64 {
        self.limits.limit(kind)
    }

    /// Bring `partition` under its budget. Each call recomputes the size.
    pub async fn enforce(
        &self,
        storage: &dyn CacheStorage,
        partition: &str,
        kind: PartitionKind,
    ) -> Result<EvictionReport, StorageError> {
        let started_at = Instant::now();
        let limit = self.limits.limit(kind);
        let protected = self.classifier.protected();

        let candidates: Vec<EvictionCandidate> = storage
            .entries(partition)
            .await?
            .into_iter()
            .map(|(key, response)| EvictionCandidate {
                protected: protected.is_protected(key.path()),
                size: response.size(),
                cached_at_ms: response.timestamp_millis(),
                key,
            })
            .collect();

        let Some(plan) = plan_eviction(candidates, limit) else {
            return Ok(EvictionReport::default());
        };

        let mut report = EvictionReport {
            total_size: plan.total_size,
            ..EvictionReport::default()
        };
        for victim in &plan.victims {
            match storage.delete(partition, &victim.key).await {
                Ok(true) => {
                    report.evicted += 1;
                    report.evicted_bytes += victim.size;
                }
                Ok(false) => debug!(partition, key = %victim.key, "entry already gone"),
                Err(err) => {
                    warn!(partition, key = %victim.key, error = %err, "eviction delete failed")
                }
            }
        }

        if report.evicted_bytes < plan.delete_target {
            warn!(
                partition,
                total_size = plan.total_size,
                limit,
                evicted = report.evicted,
                "partition still over budget after eviction"
            );
        }

        info!(
            partition,
            total_size = plan.total_size,
            limit,
            delete_target = plan.delete_target,
            evicted = report.evicted,
            "evicted entries"
        );
        counter!(METRIC_EVICT_TOTAL, "partition" => kind.as_str()).increment(report.evicted as u64);
        histogram!(METRIC_EVICT_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

        Ok(report)
    }
}
