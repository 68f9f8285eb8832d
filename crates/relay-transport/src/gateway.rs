//! WebSocket gateway: upgrades connect requests and runs one participant per task

use std::net::SocketAddr;
#[cfg(feature = "metrics")]
use std::sync::Arc;

use futures_util::StreamExt;
use relay_core::{Connection, HubRegistry};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tracing::{debug, error, info, warn};

use crate::error::{TransportError, TransportResult};
use crate::handshake::{reason_label, rejection, ConnectParams};
#[cfg(feature = "metrics")]
use crate::metrics::Metrics;
use crate::pump::{read_pump, write_pump};
use crate::telemetry::Telemetry;

/// WebSocket gateway for the relay
pub struct Gateway {
    registry: HubRegistry,
    addr: SocketAddr,
    telemetry: Telemetry,
}

impl Gateway {
    pub fn new(registry: HubRegistry, addr: SocketAddr) -> Self {
        Self {
            registry,
            addr,
            telemetry: Telemetry::default(),
        }
    }

    /// Record connection and frame metrics into the given collector
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.telemetry = Telemetry::new(metrics);
        self
    }

    /// Bind the configured address and accept connections forever
    pub async fn run(&self) -> TransportResult<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "Relay WebSocket gateway listening");
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> TransportResult<()> {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let registry = self.registry.clone();
                    let telemetry = self.telemetry.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, registry, telemetry).await {
                            error!(peer = %peer, error = %e, "WebSocket connection error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: HubRegistry,
    telemetry: Telemetry,
) -> TransportResult<()> {
    let mut parsed = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let params = ConnectParams::from_query(request.uri().query());
        let reply = match &params {
            Ok(_) => Ok(response),
            Err(e) => Err(rejection(e)),
        };
        parsed = Some(params);
        reply
    };

    let handshake = accept_hdr_async(stream, callback).await;
    let (ws, params) = match (handshake, parsed) {
        (Ok(ws), Some(Ok(params))) => (ws, params),
        (_, Some(Err(reason))) => {
            warn!(peer = %peer, reason = reason_label(&reason), "Rejected connect request: {}", reason);
            telemetry.handshake_rejected(&reason);
            return Ok(());
        }
        (Err(e), _) => return Err(TransportError::WebSocket(e)),
        (Ok(_), None) => {
            debug!(peer = %peer, "Upgrade finished without connect parameters");
            return Ok(());
        }
    };

    let (connection, queue) = Connection::open(params.user, registry.config().queue_capacity);
    let id = connection.id();
    info!(
        peer = %peer,
        session = %params.session,
        connection = %id,
        user = %connection.user_id(),
        "Participant connected"
    );

    let hub = registry.join(&params.session, connection);
    telemetry.connection_opened();

    let (sink, stream) = ws.split();
    let mut writer = tokio::spawn(write_pump(sink, queue));

    tokio::select! {
        _ = read_pump(stream, &hub, id, &telemetry) => {
            debug!(connection = %id, "Read side finished");
        }
        _ = &mut writer => {
            debug!(connection = %id, "Write side finished");
        }
    }

    hub.dismiss(id);
    telemetry.connection_closed();
    info!(session = %params.session, connection = %id, "Participant disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::SinkExt;
    use relay_core::HubConfig;
    use relay_protocol::{ContentMessage, Position, PresenceMessage};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::{self, Message};
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    use super::*;

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn start() -> (SocketAddr, HubRegistry) {
        let registry = HubRegistry::new(HubConfig {
            queue_capacity: 64,
            grace_period: Duration::from_millis(200),
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let gateway = Gateway::new(registry.clone(), addr);
        tokio::spawn(async move { gateway.serve(listener).await });
        (addr, registry)
    }

    async fn connect(addr: SocketAddr, query: &str) -> Client {
        let (ws, _) = connect_async(format!("ws://{}/ws?{}", addr, query))
            .await
            .unwrap();
        ws
    }

    async fn next_text(ws: &mut Client) -> String {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("stream ended")
                .unwrap();
            if let Message::Text(text) = message {
                return text;
            }
        }
    }

    async fn next_presence(ws: &mut Client) -> PresenceMessage {
        PresenceMessage::parse(&next_text(ws).await).unwrap()
    }

    async fn assert_silent(ws: &mut Client) {
        let next = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
        assert!(next.is_err(), "unexpected frame: {:?}", next);
    }

    fn content(text: &str) -> String {
        let sender = relay_core::Presence::new("bob", "🐼", 10);
        ContentMessage::new(text, Position { x: 4.0, y: 2.0 }, sender.user_data())
            .encode()
            .unwrap()
            .to_string()
    }

    async fn rejected_status(addr: SocketAddr, query: &str) -> u16 {
        match connect_async(format!("ws://{}/?{}", addr, query)).await {
            Err(tungstenite::Error::Http(response)) => response.status().as_u16(),
            other => panic!("expected HTTP rejection, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_rejects_missing_identifiers() {
        let (addr, registry) = start().await;

        assert_eq!(rejected_status(addr, "wallet=0xABC").await, 400);
        assert_eq!(rejected_status(addr, "session=doc-1").await, 401);
        assert_eq!(rejected_status(addr, "session=&wallet=0xABC").await, 400);
        let long = format!("session=doc-1&wallet={}", "x".repeat(513));
        assert_eq!(rejected_status(addr, &long).await, 400);

        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_presence_on_join_and_leave() {
        let (addr, _registry) = start().await;

        let mut alice = connect(addr, "session=doc-1&wallet=0xABCDEF1234567890").await;
        let own = next_presence(&mut alice).await;
        assert!(matches!(own, PresenceMessage::UserData(_)));
        assert_eq!(own.user_data().user_id, "0xABCDEF1234567890");
        assert!(own.user_data().user_name.starts_with("0xABCD...7890 "));
        assert_silent(&mut alice).await;

        let mut bob = connect(addr, "session=doc-1&user=bob").await;
        assert!(matches!(next_presence(&mut bob).await, PresenceMessage::UserData(_)));
        let roster = next_presence(&mut bob).await;
        assert!(matches!(roster, PresenceMessage::UserAdded(_)));
        assert_eq!(roster.user_data().user_id, "0xABCDEF1234567890");

        let joined = next_presence(&mut alice).await;
        assert!(matches!(joined, PresenceMessage::UserAdded(_)));
        assert_eq!(joined.user_data().user_id, "bob");

        bob.close(None).await.unwrap();
        let left = next_presence(&mut alice).await;
        assert!(matches!(left, PresenceMessage::UserRemoved(_)));
        assert_eq!(left.user_data().user_id, "bob");
    }

    #[tokio::test]
    async fn test_content_relayed_to_peer_unmodified() {
        let (addr, _registry) = start().await;

        let mut alice = connect(addr, "session=board&wallet=alice").await;
        next_text(&mut alice).await;
        let mut bob = connect(addr, "session=board&wallet=bob").await;
        next_text(&mut bob).await;
        next_text(&mut bob).await;
        next_text(&mut alice).await;

        let frame = content("hello");
        bob.send(Message::Text(frame.clone())).await.unwrap();

        assert_eq!(next_text(&mut alice).await, frame);
        assert_silent(&mut bob).await;
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let (addr, _registry) = start().await;

        let mut alice = connect(addr, "session=one&wallet=alice").await;
        next_text(&mut alice).await;
        let mut bob = connect(addr, "session=two&wallet=bob").await;
        next_text(&mut bob).await;
        let mut carol = connect(addr, "session=two&wallet=carol").await;
        next_text(&mut carol).await;
        next_text(&mut carol).await;
        next_text(&mut bob).await;

        carol.send(Message::Text(content("two only"))).await.unwrap();
        assert!(next_text(&mut bob).await.contains("two only"));
        assert_silent(&mut alice).await;
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_connection() {
        let (addr, _registry) = start().await;

        let mut alice = connect(addr, "session=doc&wallet=alice").await;
        next_text(&mut alice).await;
        let mut bob = connect(addr, "session=doc&wallet=bob").await;
        next_text(&mut bob).await;
        next_text(&mut bob).await;
        next_text(&mut alice).await;

        bob.send(Message::Text("{broken".into())).await.unwrap();
        bob.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
        let cursor = r#"{"type":"cursor","data":{"x":1}}"#.to_string();
        bob.send(Message::Text(cursor.clone())).await.unwrap();

        assert_eq!(next_text(&mut alice).await, cursor);
    }

    #[tokio::test]
    async fn test_hub_removed_after_last_participant_leaves() {
        let (addr, registry) = start().await;

        let mut alice = connect(addr, "session=brief&wallet=alice").await;
        next_text(&mut alice).await;
        assert!(registry.get("brief").is_some());

        alice.close(None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(registry.get("brief").is_none());
    }
}
