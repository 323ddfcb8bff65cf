//! `CacheWorker`: lifecycle, fetch interception and client messages.

use std::sync::Arc;

use axum::http::{Method, StatusCode};
use futures::future::join_all;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::application::fetch::{FetchRequest, Origin};
use crate::application::strategies::StrategyExecutor;
use crate::cache::{
    CacheConfig, CacheStorage, CacheStore, CachedResponse, ClientNotifier, FallbackResolver,
    PartitionKind, RevalidationWorker, VersionJanitor,
};
use crate::domain::messages::{CacheStatusReport, CacheUpdate, ClientCommand, WorkerMessage};
use crate::domain::strategy::StrategyClassifier;

const SOURCE: &str = "application::worker::CacheWorker";

/// Worker-level settings that are not about cache storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Origin whose same-origin requests are intercepted.
    pub scope: Url,
    /// Path of the worker script itself, never intercepted.
    pub script_path: String,
    /// Requests under this prefix are internal and never intercepted.
    pub internal_marker: String,
    pub offline_page: String,
    /// Activate right after install instead of waiting for `SKIP_WAITING`.
    pub skip_waiting: bool,
    pub claim_clients: bool,
    /// Paths written to the static partition during install.
    pub manifest: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Parsed => "parsed",
            LifecycleState::Installing => "installing",
            LifecycleState::Installed => "installed",
            LifecycleState::Activating => "activating",
            LifecycleState::Activated => "activated",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub cached: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    pub deleted: Vec<String>,
    pub claimed: usize,
}

pub struct CacheWorker {
    config: WorkerConfig,
    store: Arc<CacheStore>,
    origin: Arc<dyn Origin>,
    executor: StrategyExecutor,
    janitor: VersionJanitor,
    notifier: Arc<ClientNotifier>,
    state: watch::Sender<LifecycleState>,
}

impl CacheWorker {
    pub fn new(
        config: WorkerConfig,
        cache: &CacheConfig,
        classifier: Arc<StrategyClassifier>,
        storage: Arc<dyn CacheStorage>,
        origin: Arc<dyn Origin>,
    ) -> Self {
        let store = Arc::new(CacheStore::new(cache, storage, classifier));
        let revalidation = RevalidationWorker::new(Arc::clone(&origin), Arc::clone(&store));
        let fallback = Arc::new(FallbackResolver::new(
            Arc::clone(&store),
            config.offline_page.clone(),
        ));
        let executor = StrategyExecutor::new(
            Arc::clone(&store),
            Arc::clone(&origin),
            revalidation,
            fallback,
        );
        let (state, _) = watch::channel(LifecycleState::Parsed);

        Self {
            janitor: VersionJanitor::new(Arc::clone(&store)),
            notifier: Arc::new(ClientNotifier::new()),
            config,
            store,
            origin,
            executor,
            state,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn notifier(&self) -> &Arc<ClientNotifier> {
        &self.notifier
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Wait for every background revalidation to finish.
    pub async fn settled(&self) {
        self.executor.revalidation().settled().await;
    }

    /// Install, then activate at once when configured to skip waiting.
    pub async fn start(&self) -> InstallReport {
        let report = self.install().await;
        if self.config.skip_waiting {
            self.activate().await;
        } else {
            info!("installed, waiting for SKIP_WAITING");
        }
        report
    }

    /// Pre-cache the manifest into the static partition.
    #[instrument(skip_all, fields(version = self.store.names().version()))]
    pub async fn install(&self) -> InstallReport {
        self.state.send_replace(LifecycleState::Installing);
        self.store.open_current().await;

        let total = self.config.manifest.len();
        let results = join_all(
            self.config
                .manifest
                .iter()
                .map(|path| self.precache(path)),
        )
        .await;
        let cached = results.into_iter().filter(|stored| *stored).count();

        self.notifier
            .broadcast(&WorkerMessage::CacheUpdated(CacheUpdate::Installed { cached, total }));
        self.state.send_replace(LifecycleState::Installed);
        info!(cached, total, "install finished");
        InstallReport { cached, total }
    }

    /// Sweep stale partitions and start controlling requests.
    ///
    /// Only an installed worker activates; other states return `None`.
    #[instrument(skip_all, fields(version = self.store.names().version()))]
    pub async fn activate(&self) -> Option<ActivationReport> {
        let began = self.state.send_if_modified(|state| {
            if *state == LifecycleState::Installed {
                *state = LifecycleState::Activating;
                true
            } else {
                false
            }
        });
        if !began {
            debug!(state = self.state().as_str(), "activation skipped");
            return None;
        }

        let sweep = self.janitor.sweep().await;
        let version = self.store.names().version().to_string();
        self.notifier
            .broadcast(&WorkerMessage::CacheUpdated(CacheUpdate::Activated {
                message: format!("Cache updated to version {version}"),
                deleted_caches: sweep.deleted_count(),
                version,
            }));
        self.notifier.broadcast(&WorkerMessage::OfflineReady {
            timestamp: now_millis(),
        });
        let claimed = if self.config.claim_clients {
            self.notifier.claim()
        } else {
            0
        };

        self.state.send_replace(LifecycleState::Activated);
        info!(deleted = sweep.deleted_count(), claimed, "activated");
        Some(ActivationReport {
            deleted: sweep.deleted,
            claimed,
        })
    }

    /// Whether a request is ours to answer.
    pub fn intercepts(&self, request: &FetchRequest) -> bool {
        if self.state() != LifecycleState::Activated || request.method != Method::GET {
            return false;
        }
        if request.url.origin() != self.config.scope.origin() {
            return false;
        }
        let path = request.path();
        path != self.config.script_path && !path.starts_with(&self.config.internal_marker)
    }

    /// Answer an intercepted request, or `None` to let it pass through.
    #[instrument(skip_all, fields(method = %request.method, url = %request.url))]
    pub async fn handle_fetch(&self, request: &FetchRequest) -> Option<CachedResponse> {
        if !self.intercepts(request) {
            debug!("passing through");
            return None;
        }
        let strategy = self.store.classifier().classify(request.path());
        let served = self.executor.execute(strategy, request).await;
        Some(served.response)
    }

    /// Handle a client command. Replies go through `reply` when the command
    /// has one; malformed commands are logged and get no reply.
    #[instrument(skip_all)]
    pub async fn handle_message(
        &self,
        raw: Value,
        reply: Option<oneshot::Sender<WorkerMessage>>,
    ) {
        let command = match ClientCommand::from_value(raw) {
            Ok(command) => command,
            Err(err) => {
                warn!(target = SOURCE, error = %err, "ignoring client message");
                return;
            }
        };
        debug!(kind = command.kind(), "client message");

        match command {
            ClientCommand::SkipWaiting => {
                self.activate().await;
            }
            ClientCommand::CacheAsset { url, cache_name } => {
                self.cache_asset(&url, cache_name.as_deref()).await;
            }
            ClientCommand::ClearCache { cache_name } => {
                self.clear_cache(cache_name.as_deref()).await;
            }
            ClientCommand::GetCacheStatus => {
                let status = WorkerMessage::CacheStatus(self.status().await);
                match reply {
                    Some(port) => {
                        if port.send(status).is_err() {
                            debug!("status requester went away");
                        }
                    }
                    None => warn!(target = SOURCE, "GET_CACHE_STATUS without a reply port"),
                }
            }
        }
    }

    pub async fn status(&self) -> CacheStatusReport {
        CacheStatusReport {
            version: self.store.names().version().to_string(),
            state: self.state().as_str().to_string(),
            partitions: self.store.status().await,
            active_revalidations: self.executor.revalidation().active(),
        }
    }

    async fn precache(&self, path: &str) -> bool {
        let Some(url) = self.resolve(path) else {
            return false;
        };
        let probe = self
            .origin
            .fetch(&FetchRequest::new(Method::HEAD, url.clone()))
            .await;
        match probe {
            Ok(response) if response.status().is_success() => {}
            Ok(response) if !head_rejected(response.status()) => {
                warn!(url = %url, status = %response.status(), "manifest entry unavailable");
                return false;
            }
            Ok(_) | Err(_) => debug!(url = %url, "HEAD rejected, probing with GET"),
        }

        let request = FetchRequest::get(url);
        match self.origin.fetch(&request).await {
            Ok(response) if response.is_cacheable() => {
                self.store
                    .put_into(PartitionKind::Static, &request.key(), response)
                    .await
            }
            Ok(response) => {
                warn!(url = %request.url, status = %response.status(), "manifest entry unavailable");
                false
            }
            Err(err) => {
                warn!(url = %request.url, error = %err, "manifest entry unreachable");
                false
            }
        }
    }

    async fn cache_asset(&self, raw_url: &str, cache_name: Option<&str>) {
        let Some(url) = self.resolve(raw_url) else {
            return;
        };
        let request = FetchRequest::get(url);
        let kind = match cache_name.map(|name| self.store.names().kind_of(name)) {
            Some(Some(kind)) => kind,
            Some(None) => {
                warn!(cache_name, "unknown partition, routing by path");
                self.store.partition_for(request.path())
            }
            None => self.store.partition_for(request.path()),
        };

        match self.origin.fetch(&request).await {
            Ok(response) if response.is_cacheable() => {
                if self.store.put_into(kind, &request.key(), response).await {
                    info!(url = %request.url, partition = kind.as_str(), "cached asset on request");
                }
            }
            Ok(response) => {
                warn!(url = %request.url, status = %response.status(), "asset not cacheable");
            }
            Err(err) => warn!(url = %request.url, error = %err, "asset fetch failed"),
        }
    }

    async fn clear_cache(&self, cache_name: Option<&str>) {
        let names = self.store.names();
        let targets: Vec<String> = match cache_name {
            Some(name) => vec![name.to_string()],
            None => self
                .store
                .partition_names()
                .await
                .into_iter()
                .filter(|name| names.in_namespace(name))
                .collect(),
        };

        let mut cleared = 0;
        for name in &targets {
            if self.store.delete_partition(name).await {
                cleared += 1;
            }
        }
        self.store.open_current().await;
        info!(requested = targets.len(), cleared, "cleared partitions");
    }

    /// Resolve a path or URL against the scope, rejecting other origins.
    fn resolve(&self, raw: &str) -> Option<Url> {
        let url = match self.config.scope.join(raw) {
            Ok(url) => url,
            Err(err) => {
                warn!(url = raw, error = %err, "invalid asset url");
                return None;
            }
        };
        if url.origin() != self.config.scope.origin() {
            warn!(url = %url, "refusing cross-origin asset");
            return None;
        }
        Some(url)
    }
}

/// Servers that do not implement HEAD answer with one of these.
fn head_rejected(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED
    )
}

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
