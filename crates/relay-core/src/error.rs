//! Error types for Relay Core

use thiserror::Error;

/// Core error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Session ID required")]
    MissingSessionId,

    #[error("User identifier required")]
    MissingUserId,

    #[error("{what} exceeds {limit} bytes")]
    IdentifierTooLong { what: &'static str, limit: usize },
}

/// Result type alias for Relay Core operations
pub type Result<T> = std::result::Result<T, Error>;
