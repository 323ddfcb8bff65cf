//! Removal of partitions left behind by earlier versions.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use super::partition::PartitionNames;
use super::store::CacheStore;

/// What one janitor pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JanitorReport {
    pub deleted: Vec<String>,
    pub kept: Vec<String>,
}

impl JanitorReport {
    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }
}

/// Whether a namespaced partition outside the allow-list should go.
///
/// Partitions whose version token equals the running version are kept even
/// when their kind is unknown; everything else in the namespace is stale.
pub fn is_stale(names: &PartitionNames, candidate: &str) -> bool {
    if !names.in_namespace(candidate) || names.kind_of(candidate).is_some() {
        return false;
    }
    match (names.version_of(candidate), names.current_version()) {
        (Some(version), Some(current)) => version != current,
        _ => true,
    }
}

pub struct VersionJanitor {
    store: Arc<CacheStore>,
}

impl VersionJanitor {
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self { store }
    }

    /// Delete every stale partition concurrently.
    #[instrument(skip_all, fields(version = self.store.names().version()))]
    pub async fn sweep(&self) -> JanitorReport {
        let names = self.store.names();
        let mut report = JanitorReport::default();
        let mut stale = Vec::new();
        for candidate in self.store.partition_names().await {
            if is_stale(names, &candidate) {
                stale.push(candidate);
            } else if names.in_namespace(&candidate) {
                report.kept.push(candidate);
            } else {
                debug!(partition = %candidate, "ignoring foreign partition");
            }
        }

        let results = join_all(stale.into_iter().map(|name| async move {
            let existed = self.store.delete_partition(&name).await;
            (name, existed)
        }))
        .await;

        for (name, existed) in results {
            if existed {
                info!(partition = %name, "deleted stale partition");
                report.deleted.push(name);
            } else {
                warn!(partition = %name, "stale partition was not deleted");
            }
        }
        report.deleted.sort();
        report
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use url::Url;

    use super::*;
    use crate::cache::config::CacheConfig;
    use crate::cache::entry::CachedResponse;
    use crate::cache::keys::CacheKey;
    use crate::cache::storage::{CacheStorage, MemoryStorage};
    use crate::domain::strategy::{RuleTable, StrategyClassifier};

    #[test]
    fn staleness_rules() {
        let names = PartitionNames::new("game", "1.4.0");
        assert!(is_stale(&names, "game-static-v1.3.0"));
        assert!(is_stale(&names, "game-static"));
        assert!(is_stale(&names, "game-legacy-vnext"));
        assert!(!is_stale(&names, "game-static-v1.4.0"));
        assert!(!is_stale(&names, "game-audio-v1.4.0"));
        assert!(!is_stale(&names, "game-audio-v1.4"));
        assert!(!is_stale(&names, "other-static-v0.1.0"));
    }

    #[tokio::test]
    async fn sweep_deletes_stale_and_is_idempotent() {
        let storage = Arc::new(MemoryStorage::new());
        let config = CacheConfig {
            namespace: "game".to_string(),
            version: "1.4.0".to_string(),
            ..CacheConfig::default()
        };
        let classifier = Arc::new(StrategyClassifier::new(&RuleTable::default()).unwrap());
        let store = Arc::new(CacheStore::new(&config, storage.clone(), classifier));
        store.open_current().await;

        let key = CacheKey::get(&Url::parse("https://game.test/").unwrap());
        for name in ["game-static-v1.3.0", "game-dynamic-v0.9", "game-scratch", "vendor-fonts-v1"] {
            storage
                .put(name, key.clone(), CachedResponse::plain_text(StatusCode::OK, "x"))
                .await
                .unwrap();
        }

        let janitor = VersionJanitor::new(Arc::clone(&store));
        let first = janitor.sweep().await;
        assert_eq!(
            first.deleted,
            vec!["game-dynamic-v0.9", "game-scratch", "game-static-v1.3.0"]
        );
        assert_eq!(first.kept.len(), 4);

        let mut remaining = storage.partition_names().await.unwrap();
        remaining.sort();
        assert!(remaining.contains(&"vendor-fonts-v1".to_string()));
        assert_eq!(remaining.len(), 5);

        let second = janitor.sweep().await;
        assert_eq!(second.deleted_count(), 0);
    }
}
