//! collab-relay Daemon (relayd)
//!
//! Relays presence and content edits between participants of named
//! collaboration sessions over WebSocket.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (WebSocket on 8080, metrics on 9090)
//! relayd
//!
//! # Custom ports, metrics disabled
//! relayd --ws-port 7001 --metrics-port 0
//!
//! # With configuration file
//! relayd --config /etc/collab-relay/relay.toml
//! ```
//!
//! Clients connect with `ws://<host>:<port>/?session=<id>&wallet=<user>`.

mod config;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use relay_core::HubRegistry;
use relay_transport::{Gateway, Metrics, MetricsServer};
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

use crate::config::{Args, Settings};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load(Args::parse())?;

    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(settings.level())
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    print_banner();

    let ws_addr = settings.ws_addr()?;
    let metrics_addr = settings.metrics_addr()?;

    info!(
        ws = %ws_addr,
        metrics = ?metrics_addr,
        queue_capacity = settings.queue_capacity,
        grace_period_ms = settings.grace_period.as_millis() as u64,
        "Starting collab-relay daemon"
    );

    let registry = HubRegistry::new(settings.hub_config());
    let metrics = Arc::new(Metrics::new()?);

    let gateway = Gateway::new(registry.clone(), ws_addr).with_metrics(metrics.clone());
    let mut gateway_task = tokio::spawn(async move { gateway.run().await });

    if let Some(addr) = metrics_addr {
        let server = MetricsServer::new(metrics.clone(), registry.clone(), addr);
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!(error = %e, "Metrics server error");
            }
        });
    }

    if !settings.stats_interval.is_zero() {
        let stats_registry = registry.clone();
        let period = settings.stats_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let stats = stats_registry.stats();
                info!(
                    sessions = stats.sessions,
                    members = stats.members,
                    evictions = stats.evictions,
                    delivered = stats.delivered,
                    "Registry stats"
                );
            }
        });
    }

    // Wait for shutdown signal, or the gateway failing to start
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutting down...");
        }
        result = &mut gateway_task => {
            result??;
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        r#"
  ╦═╗╔═╗╦  ╔═╗╦ ╦
  ╠╦╝║╣ ║  ╠═╣╚╦╝
  ╩╚═╚═╝╩═╝╩ ╩ ╩
  collab-relay: real-time collaboration relay
  Version {}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
