//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::application::worker::WorkerConfig;
use crate::cache::{CacheConfig, PartitionLimits, VersionToken};
use crate::domain::strategy::{RuleTable, StrategyClassifier};

mod cli;

pub use cli::{ClassifyArgs, CliArgs, Command, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "offline-cache";
const ENV_PREFIX: &str = "OFFLINE_CACHE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_ORIGIN_TIMEOUT_SECS: u64 = 15;
const DEFAULT_SCRIPT_PATH: &str = "/sw.js";
const DEFAULT_INTERNAL_MARKER: &str = "/__offline-cache";
const DEFAULT_OFFLINE_PAGE: &str = "/offline.html";

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub origin: OriginSettings,
    pub worker: WorkerSettings,
    pub cache: CacheConfig,
    pub classifier: Arc<StrategyClassifier>,
    pub manifest: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct OriginSettings {
    pub base_url: Option<Url>,
    pub timeout: Duration,
}

impl OriginSettings {
    /// The origin is only needed to serve; other commands run without it.
    pub fn require_base_url(&self) -> Result<&Url, LoadError> {
        self.base_url
            .as_ref()
            .ok_or_else(|| LoadError::invalid("origin.base_url", "required to serve"))
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub script_path: String,
    pub internal_marker: String,
    pub offline_page: String,
    pub skip_waiting: bool,
    pub claim_clients: bool,
}

impl Settings {
    /// Worker settings scoped to the configured origin.
    pub fn worker_config(&self) -> Result<WorkerConfig, LoadError> {
        let scope = self.origin.require_base_url()?.clone();
        Ok(WorkerConfig {
            scope,
            script_path: self.worker.script_path.clone(),
            internal_marker: self.worker.internal_marker.clone(),
            offline_page: self.worker.offline_page.clone(),
            skip_waiting: self.worker.skip_waiting,
            claim_clients: self.worker.claim_clients,
            manifest: self.manifest.clone(),
        })
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    load_from(cli.config_file.as_ref(), cli.command.as_ref())
}

fn load_from(config_file: Option<&PathBuf>, command: Option<&Command>) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("manifest.assets"),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match command {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Classify(_)) => {}
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    origin: RawOriginSettings,
    worker: RawWorkerSettings,
    cache: RawCacheSettings,
    rules: RuleTable,
    manifest: RawManifestSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawOriginSettings {
    base_url: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWorkerSettings {
    namespace: Option<String>,
    version: Option<String>,
    script_path: Option<String>,
    internal_marker: Option<String>,
    offline_page: Option<String>,
    skip_waiting: Option<bool>,
    claim_clients: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    static_limit_bytes: Option<u64>,
    dynamic_limit_bytes: Option<u64>,
    api_limit_bytes: Option<u64>,
    icon_limit_bytes: Option<u64>,
    max_age_days: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct RawManifestSettings {
    assets: Vec<String>,
}

impl Default for RawManifestSettings {
    fn default() -> Self {
        Self {
            assets: [
                "/",
                "/index.html",
                "/manifest.json",
                "/src/main.js",
                "/assets/icons/icon-192x192.png",
                "/assets/icons/icon-512x512.png",
            ]
            .iter()
            .map(|path| path.to_string())
            .collect(),
        }
    }
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.origin_url.as_ref() {
            self.origin.base_url = Some(url.clone());
        }
        if let Some(seconds) = overrides.origin_timeout_seconds {
            self.origin.timeout_seconds = Some(seconds);
        }
        if let Some(version) = overrides.worker_version.as_ref() {
            self.worker.version = Some(version.clone());
        }
        if let Some(skip) = overrides.worker_skip_waiting {
            self.worker.skip_waiting = Some(skip);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            origin,
            worker,
            cache,
            rules,
            manifest,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let origin = build_origin_settings(origin)?;
        let (worker, namespace, version) = build_worker_settings(worker)?;
        let cache = build_cache_config(cache, namespace, version)?;
        let classifier = StrategyClassifier::new(&rules)
            .map_err(|err| LoadError::invalid("rules", err.to_string()))?;
        let manifest = build_manifest(manifest)?;

        Ok(Self {
            server,
            logging,
            origin,
            worker,
            cache,
            classifier: Arc::new(classifier),
            manifest,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_origin_settings(origin: RawOriginSettings) -> Result<OriginSettings, LoadError> {
    let base_url = match origin.base_url.filter(|raw| !raw.trim().is_empty()) {
        Some(raw) => {
            let url = Url::parse(raw.trim()).map_err(|err| {
                LoadError::invalid("origin.base_url", format!("failed to parse `{raw}`: {err}"))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(LoadError::invalid(
                    "origin.base_url",
                    "scheme must be http or https",
                ));
            }
            Some(url)
        }
        None => None,
    };

    let timeout_secs = origin.timeout_seconds.unwrap_or(DEFAULT_ORIGIN_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "origin.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(OriginSettings {
        base_url,
        timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_worker_settings(
    worker: RawWorkerSettings,
) -> Result<(WorkerSettings, String, String), LoadError> {
    let defaults = CacheConfig::default();

    let namespace = worker.namespace.unwrap_or(defaults.namespace);
    if namespace.is_empty() || namespace.chars().any(char::is_whitespace) {
        return Err(LoadError::invalid(
            "worker.namespace",
            "must be non-empty and contain no whitespace",
        ));
    }

    let version = worker.version.unwrap_or(defaults.version);
    if version.parse::<VersionToken>().is_err() {
        return Err(LoadError::invalid(
            "worker.version",
            format!("`{version}` is not a dotted numeric version"),
        ));
    }

    let script_path = absolute_path(
        "worker.script_path",
        worker.script_path.unwrap_or_else(|| DEFAULT_SCRIPT_PATH.to_string()),
    )?;
    let internal_marker = absolute_path(
        "worker.internal_marker",
        worker
            .internal_marker
            .unwrap_or_else(|| DEFAULT_INTERNAL_MARKER.to_string()),
    )?;
    if internal_marker == "/" {
        return Err(LoadError::invalid(
            "worker.internal_marker",
            "must not cover every path",
        ));
    }
    let offline_page = absolute_path(
        "worker.offline_page",
        worker
            .offline_page
            .unwrap_or_else(|| DEFAULT_OFFLINE_PAGE.to_string()),
    )?;

    let settings = WorkerSettings {
        script_path,
        internal_marker,
        offline_page,
        skip_waiting: worker.skip_waiting.unwrap_or(true),
        claim_clients: worker.claim_clients.unwrap_or(true),
    };
    Ok((settings, namespace, version))
}

fn build_cache_config(
    cache: RawCacheSettings,
    namespace: String,
    version: String,
) -> Result<CacheConfig, LoadError> {
    let defaults = PartitionLimits::default();
    let limits = PartitionLimits {
        static_bytes: positive(
            "cache.static_limit_bytes",
            cache.static_limit_bytes.unwrap_or(defaults.static_bytes),
        )?,
        dynamic_bytes: positive(
            "cache.dynamic_limit_bytes",
            cache.dynamic_limit_bytes.unwrap_or(defaults.dynamic_bytes),
        )?,
        api_bytes: positive(
            "cache.api_limit_bytes",
            cache.api_limit_bytes.unwrap_or(defaults.api_bytes),
        )?,
        icon_bytes: positive(
            "cache.icon_limit_bytes",
            cache.icon_limit_bytes.unwrap_or(defaults.icon_bytes),
        )?,
    };

    let max_age = match cache.max_age_days {
        Some(days) => Duration::from_secs(positive("cache.max_age_days", days)? * 86_400),
        None => CacheConfig::default().max_age,
    };

    Ok(CacheConfig {
        namespace,
        version,
        limits,
        max_age,
    })
}

fn build_manifest(manifest: RawManifestSettings) -> Result<Vec<String>, LoadError> {
    let mut assets = Vec::with_capacity(manifest.assets.len());
    for raw in manifest.assets {
        let path = raw.trim();
        if path.is_empty() {
            continue;
        }
        if !path.starts_with('/') {
            return Err(LoadError::invalid(
                "manifest.assets",
                format!("`{path}` must be an absolute path"),
            ));
        }
        if !assets.iter().any(|existing: &String| existing == path) {
            assets.push(path.to_string());
        }
    }
    Ok(assets)
}

fn absolute_path(key: &'static str, value: String) -> Result<String, LoadError> {
    if value.starts_with('/') {
        Ok(value)
    } else {
        Err(LoadError::invalid(key, format!("`{value}` must start with `/`")))
    }
}

fn positive(key: &'static str, value: u64) -> Result<u64, LoadError> {
    if value == 0 {
        Err(LoadError::invalid(key, "must be greater than zero"))
    } else {
        Ok(value)
    }
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
