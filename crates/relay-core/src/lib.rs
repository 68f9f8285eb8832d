//! Relay Core - Session Hubs and Hub Registry
//!
//! This crate provides the concurrency core of the relay:
//! - Connections with bounded outbound queues and presence records
//! - One serialized event loop per session hub (membership and fan-out)
//! - A registry creating hubs on first join and reaping them once idle

pub mod connection;
pub mod error;
pub mod hub;
pub mod id;
pub mod registry;

pub use connection::{Connection, ConnectionId, OutboundQueue, DEFAULT_QUEUE_CAPACITY};
pub use error::{Error, Result};
pub use hub::SessionHub;
pub use id::{SessionId, UserId, MAX_IDENTIFIER_LEN};
pub use registry::{HubConfig, HubRegistry, RegistryStats, DEFAULT_GRACE_PERIOD};

pub use relay_protocol::{Frame, Presence};
