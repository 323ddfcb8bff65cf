use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the offline-cache binary.
#[derive(Debug, Parser)]
#[command(
    name = "offline-cache",
    version,
    about = "Offline-capable caching proxy"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "OFFLINE_CACHE_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the caching proxy.
    Serve(Box<ServeArgs>),
    /// Show which strategy and partition a path maps to.
    Classify(ClassifyArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct ClassifyArgs {
    /// Request paths to classify, such as `/src/core/GameEngine.js`.
    #[arg(value_name = "PATH", required = true)]
    pub paths: Vec<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the origin base URL.
    #[arg(long = "origin-url", value_name = "URL")]
    pub origin_url: Option<String>,

    /// Override the origin request timeout.
    #[arg(long = "origin-timeout-seconds", value_name = "SECONDS")]
    pub origin_timeout_seconds: Option<u64>,

    /// Override the cache version embedded in partition names.
    #[arg(long = "worker-version", value_name = "VERSION")]
    pub worker_version: Option<String>,

    /// Activate right after install instead of waiting for `SKIP_WAITING`.
    #[arg(
        long = "worker-skip-waiting",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub worker_skip_waiting: Option<bool>,
}
