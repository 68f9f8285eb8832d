//! Relay Transport Layer
//!
//! Network surface of the relay:
//! - Gateway: WebSocket upgrade, connect parameters, per-connection pumps
//! - Metrics: Prometheus metrics (optional feature)

pub mod error;
pub mod gateway;
pub mod handshake;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod pump;
mod telemetry;

pub use error::{TransportError, TransportResult};
pub use gateway::Gateway;
pub use handshake::ConnectParams;
#[cfg(feature = "metrics")]
pub use metrics::{Metrics, MetricsServer};
pub use pump::Disposition;
