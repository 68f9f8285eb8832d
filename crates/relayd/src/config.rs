//! Daemon settings: command line and environment over config file over defaults

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use relay_core::HubConfig;
use serde::Deserialize;
use tracing::Level;

pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_WS_PORT: u16 = 8080;
pub const DEFAULT_METRICS_PORT: u16 = 9090;
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 5_000;
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_STATS_INTERVAL_SECS: u64 = 60;

/// collab-relay daemon - real-time collaboration relay
#[derive(Parser, Debug, Default)]
#[command(name = "relayd")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path (TOML)
    #[arg(short, long, env = "RELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long, env = "RELAY_BIND")]
    pub bind: Option<String>,

    /// WebSocket port to listen on [default: 8080]
    #[arg(long, env = "RELAY_WS_PORT")]
    pub ws_port: Option<u16>,

    /// Metrics port, 0 disables the endpoint [default: 9090]
    #[arg(long, env = "RELAY_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Outbound queue capacity per connection [default: 512]
    #[arg(long, env = "RELAY_QUEUE_CAPACITY")]
    pub queue_capacity: Option<usize>,

    /// How long an empty session lingers before removal, in milliseconds [default: 5000]
    #[arg(long, env = "RELAY_GRACE_PERIOD_MS")]
    pub grace_period_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error) [default: info]
    #[arg(long, env = "RELAY_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Seconds between registry statistics log lines, 0 disables [default: 60]
    #[arg(long, env = "RELAY_STATS_INTERVAL_SECS")]
    pub stats_interval_secs: Option<u64>,
}

/// Contents of the `--config` file; every key is optional
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub bind: Option<String>,
    pub ws_port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub queue_capacity: Option<usize>,
    pub grace_period_ms: Option<u64>,
    pub log_level: Option<String>,
    pub stats_interval_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}

/// Fully resolved daemon settings
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub bind: String,
    pub ws_port: u16,
    pub metrics_port: u16,
    pub queue_capacity: usize,
    pub grace_period: Duration,
    pub log_level: String,
    pub stats_interval: Duration,
}

impl Settings {
    /// Load the config file named by `args`, if any, and merge
    pub fn load(args: Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(args, file)
    }

    pub fn merge(args: Args, file: FileConfig) -> Result<Self> {
        let queue_capacity = args
            .queue_capacity
            .or(file.queue_capacity)
            .unwrap_or(relay_core::DEFAULT_QUEUE_CAPACITY);
        if queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be at least 1");
        }

        Ok(Self {
            bind: args
                .bind
                .or(file.bind)
                .unwrap_or_else(|| DEFAULT_BIND.to_string()),
            ws_port: args.ws_port.or(file.ws_port).unwrap_or(DEFAULT_WS_PORT),
            metrics_port: args
                .metrics_port
                .or(file.metrics_port)
                .unwrap_or(DEFAULT_METRICS_PORT),
            queue_capacity,
            grace_period: Duration::from_millis(
                args.grace_period_ms
                    .or(file.grace_period_ms)
                    .unwrap_or(DEFAULT_GRACE_PERIOD_MS),
            ),
            log_level: args
                .log_level
                .or(file.log_level)
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            stats_interval: Duration::from_secs(
                args.stats_interval_secs
                    .or(file.stats_interval_secs)
                    .unwrap_or(DEFAULT_STATS_INTERVAL_SECS),
            ),
        })
    }

    pub fn ws_addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.bind, self.ws_port)
    }

    /// `None` when the metrics endpoint is disabled
    pub fn metrics_addr(&self) -> Result<Option<SocketAddr>> {
        if self.metrics_port == 0 {
            return Ok(None);
        }
        socket_addr(&self.bind, self.metrics_port).map(Some)
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            queue_capacity: self.queue_capacity,
            grace_period: self.grace_period,
        }
    }

    pub fn level(&self) -> Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}

fn socket_addr(bind: &str, port: u16) -> Result<SocketAddr> {
    format!("{}:{}", bind, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", bind, port))
}
