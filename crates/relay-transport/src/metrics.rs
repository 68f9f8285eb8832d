//! Prometheus metrics for the relay
//!
//! Counters are recorded by the gateway as connections come and go; the
//! hub gauges are refreshed from `RegistryStats` whenever metrics are scraped.
//! Metrics are exposed in Prometheus text format via HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use relay_core::{HubRegistry, RegistryStats};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use crate::error::TransportResult;

/// Relay metrics collector
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    // Connection metrics
    pub connections_total: IntCounter,
    pub connections_active: IntGauge,
    pub handshakes_rejected: IntCounterVec,

    // Frame metrics
    pub frames_received: IntCounterVec,
    pub content_dropped: IntCounter,
    pub frames_malformed: IntCounter,

    // Hub metrics
    pub sessions_active: IntGauge,
    pub members_active: IntGauge,
    pub evictions_total: IntCounter,
    pub frames_delivered: IntCounter,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let connections_total =
            IntCounter::new("relay_connections_total", "Total number of accepted connections")?;
        let connections_active =
            IntGauge::new("relay_connections_active", "Number of open connections")?;
        let handshakes_rejected = IntCounterVec::new(
            Opts::new("relay_handshakes_rejected_total", "Connect requests rejected before upgrade"),
            &["reason"],
        )?;

        let frames_received = IntCounterVec::new(
            Opts::new("relay_frames_received_total", "Text frames received from participants"),
            &["kind"],
        )?;
        let content_dropped = IntCounter::new(
            "relay_content_dropped_total",
            "Content frames dropped because the sender was alone",
        )?;
        let frames_malformed =
            IntCounter::new("relay_frames_malformed_total", "Frames that were not valid envelopes")?;

        let sessions_active = IntGauge::new("relay_sessions_active", "Number of live session hubs")?;
        let members_active =
            IntGauge::new("relay_members_active", "Number of members across all hubs")?;
        let evictions_total = IntCounter::new(
            "relay_evictions_total",
            "Participants dropped because their outbound queue was full",
        )?;
        let frames_delivered = IntCounter::new(
            "relay_frames_delivered_total",
            "Frames accepted into outbound queues",
        )?;

        registry.register(Box::new(connections_total.clone()))?;
        registry.register(Box::new(connections_active.clone()))?;
        registry.register(Box::new(handshakes_rejected.clone()))?;
        registry.register(Box::new(frames_received.clone()))?;
        registry.register(Box::new(content_dropped.clone()))?;
        registry.register(Box::new(frames_malformed.clone()))?;
        registry.register(Box::new(sessions_active.clone()))?;
        registry.register(Box::new(members_active.clone()))?;
        registry.register(Box::new(evictions_total.clone()))?;
        registry.register(Box::new(frames_delivered.clone()))?;

        Ok(Self {
            registry,
            connections_total,
            connections_active,
            handshakes_rejected,
            frames_received,
            content_dropped,
            frames_malformed,
            sessions_active,
            members_active,
            evictions_total,
            frames_delivered,
        })
    }

    /// Record a new connection
    pub fn record_connection(&self) {
        self.connections_total.inc();
        self.connections_active.inc();
    }

    /// Record a connection closed
    pub fn record_disconnection(&self) {
        self.connections_active.dec();
    }

    pub fn record_rejection(&self, reason: &str) {
        self.handshakes_rejected.with_label_values(&[reason]).inc();
    }

    pub fn record_frame(&self, kind: &str) {
        self.frames_received.with_label_values(&[kind]).inc();
    }

    /// Bring the hub gauges and counters up to date
    pub fn refresh(&self, stats: &RegistryStats) {
        self.sessions_active.set(stats.sessions as i64);
        self.members_active.set(stats.members as i64);
        catch_up(&self.evictions_total, stats.evictions);
        catch_up(&self.frames_delivered, stats.delivered);
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            error!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

fn catch_up(counter: &IntCounter, total: u64) {
    let seen = counter.get();
    if total > seen {
        counter.inc_by(total - seen);
    }
}

/// HTTP server for metrics endpoint
pub struct MetricsServer {
    metrics: Arc<Metrics>,
    hubs: HubRegistry,
    addr: SocketAddr,
}

impl MetricsServer {
    pub fn new(metrics: Arc<Metrics>, hubs: HubRegistry, addr: SocketAddr) -> Self {
        Self {
            metrics,
            hubs,
            addr,
        }
    }

    /// Run the metrics HTTP server
    pub async fn run(&self) -> TransportResult<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "Metrics server listening on http://{}/metrics", self.addr);
        self.serve(listener).await
    }

    /// Serve metrics on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> TransportResult<()> {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let metrics = self.metrics.clone();
                    let hubs = self.hubs.clone();
                    tokio::spawn(async move {
                        if let Err(e) = respond(stream, &metrics, &hubs).await {
                            debug!(error = %e, "Metrics request failed");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept metrics connection");
                }
            }
        }
    }
}

async fn respond(mut stream: TcpStream, metrics: &Metrics, hubs: &HubRegistry) -> std::io::Result<()> {
    let mut buf = [0u8; 1024];
    let n = stream.read(&mut buf).await?;
    if n == 0 {
        return Ok(());
    }
    let request = String::from_utf8_lossy(&buf[..n]);

    // Simple HTTP request parsing
    let response = if request.starts_with("GET /metrics") || request.starts_with("GET / ") {
        metrics.refresh(&hubs.stats());
        let body = metrics.export();
        format!(
            "HTTP/1.1 200 OK\r\n\
             Content-Type: text/plain; version=0.0.4; charset=utf-8\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\
             \r\n\
             {}",
            body.len(),
            body
        )
    } else if request.starts_with("GET /health") {
        "HTTP/1.1 200 OK\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: 2\r\n\
         Connection: close\r\n\
         \r\n\
         OK"
            .to_string()
    } else {
        "HTTP/1.1 404 Not Found\r\n\
         Content-Length: 0\r\n\
         Connection: close\r\n\
         \r\n"
            .to_string()
    };

    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}
