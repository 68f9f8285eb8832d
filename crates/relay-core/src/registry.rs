//! Hub Registry - maps session identifiers to live hubs

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::connection::{Connection, DEFAULT_QUEUE_CAPACITY};
use crate::hub::{HubCounters, Occupancy, SessionHub};
use crate::id::SessionId;

/// Default delay between a hub emptying and its removal
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Settings applied to every hub of a registry
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Outbound queue capacity per connection
    pub queue_capacity: usize,
    /// How long a hub must stay empty before it is removed
    pub grace_period: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

pub(crate) struct RegistryInner {
    hubs: RwLock<HashMap<SessionId, SessionHub>>,
    config: HubConfig,
    counters: Arc<HubCounters>,
}

/// Process-wide session registry.
///
/// Cheap to clone; every clone refers to the same map. Hubs are created on
/// first join and removed once they have stayed empty for the grace period.
#[derive(Clone)]
pub struct HubRegistry {
    inner: Arc<RegistryInner>,
}

impl HubRegistry {
    pub fn new(config: HubConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                hubs: RwLock::new(HashMap::new()),
                config,
                counters: Arc::new(HubCounters::default()),
            }),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Return the hub for a session, starting one if none is live
    pub fn get_or_create(&self, session_id: &SessionId) -> SessionHub {
        if let Some(hub) = self.inner.hubs.read().get(session_id) {
            return hub.clone();
        }

        let mut hubs = self.inner.hubs.write();
        self.entry(&mut hubs, session_id).clone()
    }

    /// Look up the hub for a session and admit a connection to it.
    ///
    /// Both steps happen under the registry lock, so an idle hub cannot be
    /// removed between lookup and admission.
    pub fn join(&self, session_id: &SessionId, connection: Connection) -> SessionHub {
        {
            let hubs = self.inner.hubs.read();
            if let Some(hub) = hubs.get(session_id) {
                hub.admit(connection);
                return hub.clone();
            }
        }

        let mut hubs = self.inner.hubs.write();
        let hub = self.entry(&mut hubs, session_id).clone();
        hub.admit(connection);
        hub
    }

    fn entry<'a>(
        &self,
        hubs: &'a mut HashMap<SessionId, SessionHub>,
        session_id: &SessionId,
    ) -> &'a SessionHub {
        hubs.entry(session_id.clone()).or_insert_with(|| {
            info!(session = %session_id, "Created session hub");
            SessionHub::spawn(session_id.clone(), self.reaper(), self.inner.counters.clone())
        })
    }

    /// Live hub for a session, if any
    pub fn get(&self, session_id: &str) -> Option<SessionHub> {
        self.inner.hubs.read().get(session_id).cloned()
    }

    /// Remove a session's hub if it has no members. Returns whether it was removed.
    pub fn remove_if_empty(&self, session_id: &str) -> bool {
        let mut hubs = self.inner.hubs.write();
        match hubs.get(session_id) {
            Some(hub) if hub.member_count() == 0 => {
                hubs.remove(session_id);
                info!(session = %session_id, "Removed empty session hub");
                true
            }
            _ => false,
        }
    }

    /// Second phase of deferred removal: only removes the very hub that
    /// scheduled it, and only if nobody joined since.
    fn remove_idle(&self, session_id: &SessionId, occupancy: &Arc<Occupancy>, seen: u64) -> bool {
        let mut hubs = self.inner.hubs.write();
        let idle = match hubs.get(session_id) {
            Some(hub) => {
                Arc::ptr_eq(hub.occupancy(), occupancy)
                    && occupancy.members() == 0
                    && occupancy.admissions() == seen
            }
            None => false,
        };

        if idle {
            hubs.remove(session_id);
            info!(session = %session_id, "Removed idle session hub");
        } else {
            debug!(session = %session_id, "Session hub in use again, keeping it");
        }
        idle
    }

    fn reaper(&self) -> Reaper {
        Reaper {
            registry: Arc::downgrade(&self.inner),
            grace_period: self.inner.config.grace_period,
        }
    }

    /// Number of live hubs
    pub fn len(&self) -> usize {
        self.inner.hubs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get statistics
    pub fn stats(&self) -> RegistryStats {
        let hubs = self.inner.hubs.read();
        RegistryStats {
            sessions: hubs.len(),
            members: hubs.values().map(SessionHub::member_count).sum(),
            evictions: self.inner.counters.evictions.load(Ordering::Relaxed),
            delivered: self.inner.counters.delivered.load(Ordering::Relaxed),
        }
    }
}

impl Default for HubRegistry {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

/// Registry statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub sessions: usize,
    pub members: usize,
    /// Participants dropped because their outbound queue was full
    pub evictions: u64,
    /// Frames accepted into outbound queues
    pub delivered: u64,
}

/// Schedules deferred removal of hubs that became empty.
///
/// Holds the registry weakly so running hubs do not keep it alive.
#[derive(Clone)]
pub(crate) struct Reaper {
    registry: Weak<RegistryInner>,
    grace_period: Duration,
}

impl Reaper {
    pub(crate) fn schedule(&self, session_id: SessionId, occupancy: Arc<Occupancy>) {
        let seen = occupancy.admissions();
        let registry = self.registry.clone();
        let grace_period = self.grace_period;

        tokio::spawn(async move {
            tokio::time::sleep(grace_period).await;
            if let Some(inner) = registry.upgrade() {
                HubRegistry { inner }.remove_idle(&session_id, &occupancy, seen);
            }
        });
    }
}
