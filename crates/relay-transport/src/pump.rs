//! Read and write pumps of one participant connection

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use relay_core::{ConnectionId, OutboundQueue, SessionHub};
use relay_protocol::{Frame, Inbound};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, trace};

use crate::telemetry::Telemetry;

/// What became of one inbound text frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handed to the hub for fan-out to the other members
    Relayed,
    /// Content edit from a participant that is alone in its session
    DroppedAlone,
    /// Not a valid envelope
    Malformed,
}

/// Drain the outbound queue into the socket, then close it.
///
/// Ends when the hub closes the queue (departure or eviction) or a write fails.
pub async fn write_pump<S>(mut sink: S, mut queue: OutboundQueue)
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let id = queue.connection_id();

    while let Some(frame) = queue.recv().await {
        if let Err(e) = sink.send(Message::Text(frame.to_string())).await {
            debug!(connection = %id, error = %e, "WebSocket write error");
            return;
        }
    }

    trace!(connection = %id, "Outbound queue closed");
    let _ = sink.close().await;
}

/// Read frames until the participant closes the socket or a read fails
pub(crate) async fn read_pump<S>(
    mut stream: S,
    hub: &SessionHub,
    id: ConnectionId,
    telemetry: &Telemetry,
) where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                accept_text(hub, id, text, telemetry);
            }
            Ok(Message::Binary(data)) => {
                debug!(connection = %id, size = data.len(), "Ignoring binary frame");
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {
                // ping/pong are answered by tungstenite
            }
            Err(e) => {
                debug!(connection = %id, error = %e, "WebSocket read error");
                break;
            }
        }
    }
}

/// Classify one text frame and relay it verbatim if it should go out
pub(crate) fn accept_text(
    hub: &SessionHub,
    id: ConnectionId,
    text: String,
    telemetry: &Telemetry,
) -> Disposition {
    let inbound = match Inbound::parse(&text) {
        Ok(inbound) => inbound,
        Err(e) => {
            debug!(session = %hub.session_id(), connection = %id, error = %e, "Dropping malformed frame");
            telemetry.malformed();
            return Disposition::Malformed;
        }
    };

    telemetry.frame_received(inbound.is_content());

    if inbound.is_content() && hub.member_count() <= 1 {
        trace!(session = %hub.session_id(), connection = %id, "Sender is alone, dropping content");
        telemetry.content_dropped();
        return Disposition::DroppedAlone;
    }

    trace!(session = %hub.session_id(), connection = %id, kind = inbound.kind(), "Relaying frame");
    hub.relay(id, Frame::from(text));
    Disposition::Relayed
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use relay_core::{Connection, HubConfig, HubRegistry, Presence, SessionId, UserId};
    use relay_protocol::{ContentMessage, Position};

    use super::*;

    fn join(registry: &HubRegistry, user: &str) -> (SessionHub, ConnectionId, OutboundQueue) {
        let user = UserId::new(user).unwrap();
        let presence = Presence::new(user.as_str(), "🦊", 30);
        let (connection, queue) = Connection::with_presence(user, presence, 16);
        let id = connection.id();
        let hub = registry.join(&SessionId::new("pump").unwrap(), connection);
        (hub, id, queue)
    }

    fn content_frame() -> String {
        let sender = Presence::new("alice", "🦊", 30);
        let message = ContentMessage::new("hello", Position { x: 1.0, y: 2.0 }, sender.user_data());
        message.encode().unwrap().to_string()
    }

    fn registry() -> HubRegistry {
        HubRegistry::new(HubConfig {
            queue_capacity: 16,
            grace_period: Duration::from_secs(60),
        })
    }

    #[tokio::test]
    async fn test_content_from_lone_sender_is_dropped() {
        let registry = registry();
        let (hub, id, _queue) = join(&registry, "alice");

        let disposition = accept_text(&hub, id, content_frame(), &Telemetry::default());
        assert_eq!(disposition, Disposition::DroppedAlone);
    }

    #[tokio::test]
    async fn test_content_relayed_verbatim() {
        let registry = registry();
        let (_, alice, mut qa) = join(&registry, "alice");
        let (hub, _, mut qb) = join(&registry, "bob");
        hub.roster().await;
        while qa.try_recv().is_some() {}
        while qb.try_recv().is_some() {}

        let text = content_frame();
        let disposition = accept_text(&hub, alice, text.clone(), &Telemetry::default());
        assert_eq!(disposition, Disposition::Relayed);

        hub.roster().await;
        assert_eq!(qb.try_recv().as_deref(), Some(text.as_str()));
        assert!(qa.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_other_kinds_relayed_without_inspection() {
        let registry = registry();
        let (_, alice, _qa) = join(&registry, "alice");
        let (hub, _, mut qb) = join(&registry, "bob");
        hub.roster().await;
        while qb.try_recv().is_some() {}

        let text = r#"{"type":"cursor","data":{"anything":true}}"#.to_string();
        assert_eq!(
            accept_text(&hub, alice, text.clone(), &Telemetry::default()),
            Disposition::Relayed
        );
        hub.roster().await;
        assert_eq!(qb.try_recv().as_deref(), Some(text.as_str()));
    }

    #[tokio::test]
    async fn test_malformed_frames_dropped() {
        let registry = registry();
        let (_, alice, _qa) = join(&registry, "alice");
        let (hub, _, mut qb) = join(&registry, "bob");
        hub.roster().await;
        while qb.try_recv().is_some() {}

        let telemetry = Telemetry::default();
        assert_eq!(
            accept_text(&hub, alice, "{not json".into(), &telemetry),
            Disposition::Malformed
        );
        assert_eq!(
            accept_text(&hub, alice, r#"{"type":"content","data":{}}"#.into(), &telemetry),
            Disposition::Malformed
        );

        hub.roster().await;
        assert!(qb.try_recv().is_none());
    }
}
