//! Transport error types

use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Connection rejected: {0}")]
    Rejected(#[from] relay_core::Error),

    #[cfg(feature = "metrics")]
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub type TransportResult<T> = Result<T, TransportError>;
