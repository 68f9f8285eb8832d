//! Per-participant connection state

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use relay_protocol::{Frame, Presence};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::id::UserId;

/// Default outbound queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 512;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier.
///
/// The same user may hold several connections to one session, so
/// membership is keyed by this rather than by user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Why a frame could not be queued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rejected {
    /// Queue at capacity: the participant is not keeping up
    Full,
    /// Write side already gone
    Closed,
}

/// One participant as seen by its hub.
///
/// Owns the sending half of the outbound queue; dropping the connection
/// closes the queue, which ends the participant's write pump.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    user_id: UserId,
    presence: Presence,
    outbound: mpsc::Sender<Frame>,
}

impl Connection {
    /// Create a connection with a freshly generated presence record
    pub fn open(user_id: UserId, capacity: usize) -> (Self, OutboundQueue) {
        let presence = Presence::generate(user_id.as_str());
        Self::with_presence(user_id, presence, capacity)
    }

    pub fn with_presence(
        user_id: UserId,
        presence: Presence,
        capacity: usize,
    ) -> (Self, OutboundQueue) {
        let (outbound, frames) = mpsc::channel(capacity.max(1));
        let id = ConnectionId::next();

        let connection = Self {
            id,
            user_id,
            presence,
            outbound,
        };
        (connection, OutboundQueue { id, frames })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    /// Queue a frame without waiting
    pub(crate) fn offer(&self, frame: Frame) -> Result<(), Rejected> {
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => Rejected::Full,
            TrySendError::Closed(_) => Rejected::Closed,
        })
    }
}

/// Receiving half of a connection's outbound queue, drained by the write pump
#[derive(Debug)]
pub struct OutboundQueue {
    id: ConnectionId,
    frames: mpsc::Receiver<Frame>,
}

impl OutboundQueue {
    pub fn connection_id(&self) -> ConnectionId {
        self.id
    }

    /// Next frame in FIFO order; `None` once the hub has closed the queue
    /// and everything queued before that has been taken.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.frames.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Frame> {
        self.frames.try_recv().ok()
    }
}
