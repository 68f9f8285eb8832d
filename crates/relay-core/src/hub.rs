//! Session hub - the per-session actor owning membership and fan-out

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use relay_protocol::{Frame, Presence, PresenceMessage};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::connection::{Connection, ConnectionId, Rejected};
use crate::id::SessionId;
use crate::registry::Reaper;

/// Occupancy of one hub, readable without going through its event loop
#[derive(Debug, Default)]
pub(crate) struct Occupancy {
    /// Admitted (including still queued) minus removed
    members: AtomicUsize,
    /// Total admissions ever; lets the reaper detect a rejoin during the grace period
    admissions: AtomicU64,
}

impl Occupancy {
    pub(crate) fn members(&self) -> usize {
        self.members.load(Ordering::SeqCst)
    }

    pub(crate) fn admissions(&self) -> u64 {
        self.admissions.load(Ordering::SeqCst)
    }
}

/// Counters shared by every hub of a registry
#[derive(Debug, Default)]
pub(crate) struct HubCounters {
    pub(crate) evictions: AtomicU64,
    pub(crate) delivered: AtomicU64,
}

/// Events serialized through a hub's loop
enum HubEvent {
    Register(Connection),
    Unregister(ConnectionId),
    Publish {
        origin: Option<ConnectionId>,
        frame: Frame,
    },
    Roster(oneshot::Sender<Vec<Presence>>),
}

/// Handle to a running session hub.
///
/// Every operation only enqueues an event; the member set itself lives
/// inside the hub's event loop. The loop stops once all handles are dropped.
#[derive(Clone)]
pub struct SessionHub {
    session_id: SessionId,
    events: mpsc::UnboundedSender<HubEvent>,
    occupancy: Arc<Occupancy>,
}

impl SessionHub {
    pub(crate) fn spawn(session_id: SessionId, reaper: Reaper, counters: Arc<HubCounters>) -> Self {
        let (events, rx) = mpsc::unbounded_channel();
        let occupancy = Arc::new(Occupancy::default());

        let event_loop = HubLoop {
            session_id: session_id.clone(),
            members: HashMap::new(),
            occupancy: occupancy.clone(),
            counters,
            reaper,
        };
        tokio::spawn(event_loop.run(rx));

        Self {
            session_id,
            events,
            occupancy,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Hand a connection over to the hub
    pub fn admit(&self, connection: Connection) {
        self.occupancy.members.fetch_add(1, Ordering::SeqCst);
        self.occupancy.admissions.fetch_add(1, Ordering::SeqCst);

        if let Err(mpsc::error::SendError(HubEvent::Register(connection))) =
            self.events.send(HubEvent::Register(connection))
        {
            self.occupancy.members.fetch_sub(1, Ordering::SeqCst);
            warn!(
                session = %self.session_id,
                connection = %connection.id(),
                "Hub loop is gone, dropping connection"
            );
        }
    }

    /// Remove a member. Dismissing a non-member is a no-op.
    pub fn dismiss(&self, id: ConnectionId) {
        self.send(HubEvent::Unregister(id));
    }

    /// Fan a frame out to every member
    pub fn publish(&self, frame: Frame) {
        self.send(HubEvent::Publish {
            origin: None,
            frame,
        });
    }

    /// Fan a frame out to every member except its sender.
    ///
    /// Frames from a connection that is no longer a member are dropped.
    pub fn relay(&self, origin: ConnectionId, frame: Frame) {
        self.send(HubEvent::Publish {
            origin: Some(origin),
            frame,
        });
    }

    /// Current occupancy, counting admissions the loop has not processed yet
    pub fn member_count(&self) -> usize {
        self.occupancy.members()
    }

    /// Presence records of the current members, as seen by the event loop.
    ///
    /// Diagnostic query; the reply comes after every event queued before it,
    /// so awaiting it also waits for those events to be handled.
    pub async fn roster(&self) -> Vec<Presence> {
        let (reply, rx) = oneshot::channel();
        if !self.send(HubEvent::Roster(reply)) {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Whether both handles refer to the same hub instance
    #[cfg(test)]
    pub(crate) fn same_hub(&self, other: &SessionHub) -> bool {
        Arc::ptr_eq(&self.occupancy, &other.occupancy)
    }

    pub(crate) fn occupancy(&self) -> &Arc<Occupancy> {
        &self.occupancy
    }

    fn send(&self, event: HubEvent) -> bool {
        let sent = self.events.send(event).is_ok();
        if !sent {
            debug!(session = %self.session_id, "Hub loop is gone, event dropped");
        }
        sent
    }
}

impl std::fmt::Debug for SessionHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHub")
            .field("session_id", &self.session_id)
            .field("members", &self.member_count())
            .finish()
    }
}

/// State owned by the hub's event loop task
struct HubLoop {
    session_id: SessionId,
    members: HashMap<ConnectionId, Connection>,
    occupancy: Arc<Occupancy>,
    counters: Arc<HubCounters>,
    reaper: Reaper,
}

impl HubLoop {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<HubEvent>) {
        debug!(session = %self.session_id, "Hub loop started");

        while let Some(event) = events.recv().await {
            match event {
                HubEvent::Register(connection) => self.register(connection),
                HubEvent::Unregister(id) => match self.members.remove(&id) {
                    Some(connection) => self.depart(vec![connection]),
                    None => trace!(session = %self.session_id, connection = %id, "Dismissed non-member"),
                },
                HubEvent::Publish { origin: Some(id), .. } if !self.members.contains_key(&id) => {
                    trace!(session = %self.session_id, connection = %id, "Dropped frame from non-member");
                }
                HubEvent::Publish { origin, frame } => {
                    let evicted = self.fan_out(&frame, origin);
                    self.depart(evicted);
                }
                HubEvent::Roster(reply) => {
                    let roster = self.members.values().map(|m| m.presence().clone()).collect();
                    let _ = reply.send(roster);
                }
            }
        }

        debug!(session = %self.session_id, "Hub loop stopped");
    }

    /// Admit a newcomer: its own record, then the roster, then announce it to peers
    fn register(&mut self, connection: Connection) {
        let id = connection.id();

        let mut greeting = Vec::with_capacity(self.members.len() + 1);
        greeting.push(PresenceMessage::own(connection.presence()));
        greeting.extend(self.members.values().map(|m| PresenceMessage::added(m.presence())));
        let announcement = PresenceMessage::added(connection.presence());
        let has_peers = !self.members.is_empty();

        info!(
            session = %self.session_id,
            connection = %id,
            user = %connection.user_id(),
            members = self.members.len() + 1,
            "Participant joined"
        );
        self.members.insert(id, connection);

        for message in &greeting {
            let Some(frame) = encode(message) else { continue };
            if let Err(connection) = self.deliver(id, frame) {
                // not yet announced to peers
                self.withdraw(connection);
                return;
            }
        }

        if has_peers {
            if let Some(frame) = encode(&announcement) {
                let evicted = self.fan_out(&frame, Some(id));
                self.depart(evicted);
            }
        } else {
            trace!(session = %self.session_id, "Skipping join announcement, no peers");
        }
    }

    /// Queue a frame for one member, evicting it if it cannot take the frame
    fn deliver(&mut self, id: ConnectionId, frame: Frame) -> Result<(), Connection> {
        let Some(member) = self.members.get(&id) else {
            return Ok(());
        };

        match member.offer(frame) {
            Ok(()) => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(reason) => {
                self.note_rejection(id, reason);
                match self.members.remove(&id) {
                    Some(connection) => Err(connection),
                    None => Ok(()),
                }
            }
        }
    }

    /// Queue a frame for every member but `except`; returns the evicted members
    fn fan_out(&mut self, frame: &Frame, except: Option<ConnectionId>) -> Vec<Connection> {
        let mut rejected = Vec::new();
        let mut delivered = 0u64;

        for (id, member) in &self.members {
            if Some(*id) == except {
                continue;
            }
            match member.offer(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(reason) => rejected.push((*id, reason)),
            }
        }

        self.counters.delivered.fetch_add(delivered, Ordering::Relaxed);
        trace!(session = %self.session_id, delivered = delivered, "Fanned out frame");

        let mut evicted = Vec::with_capacity(rejected.len());
        for (id, reason) in rejected {
            self.note_rejection(id, reason);
            if let Some(connection) = self.members.remove(&id) {
                evicted.push(connection);
            }
        }
        evicted
    }

    fn note_rejection(&self, id: ConnectionId, reason: Rejected) {
        match reason {
            Rejected::Full => {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                warn!(session = %self.session_id, connection = %id, "Outbound queue full, evicting participant");
            }
            Rejected::Closed => {
                debug!(session = %self.session_id, connection = %id, "Outbound queue closed, removing participant");
            }
        }
    }

    /// Finish removing members already taken out of the member set.
    ///
    /// Each departure closes the member's queue and is announced to the
    /// remaining members; announcing can evict further members, which are
    /// handled in the same pass.
    fn depart(&mut self, mut departed: Vec<Connection>) {
        if departed.is_empty() {
            return;
        }

        while let Some(connection) = departed.pop() {
            self.occupancy.members.fetch_sub(1, Ordering::SeqCst);
            info!(
                session = %self.session_id,
                connection = %connection.id(),
                user = %connection.user_id(),
                members = self.members.len(),
                "Participant left"
            );

            let farewell = PresenceMessage::removed(connection.presence());
            drop(connection);

            if self.members.is_empty() {
                continue;
            }
            if let Some(frame) = encode(&farewell) {
                departed.extend(self.fan_out(&frame, None));
            }
        }

        self.reap_if_empty();
    }

    /// Drop a newcomer that could not take its own greeting
    fn withdraw(&mut self, connection: Connection) {
        self.occupancy.members.fetch_sub(1, Ordering::SeqCst);
        info!(
            session = %self.session_id,
            connection = %connection.id(),
            "Participant dropped during admission"
        );
        drop(connection);
        self.reap_if_empty();
    }

    fn reap_if_empty(&self) {
        if self.members.is_empty() {
            debug!(session = %self.session_id, "Hub is empty, scheduling removal");
            self.reaper.schedule(self.session_id.clone(), self.occupancy.clone());
        }
    }
}

fn encode(message: &PresenceMessage) -> Option<Frame> {
    match message.encode() {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!(error = %e, "Failed to encode presence message");
            None
        }
    }
}
