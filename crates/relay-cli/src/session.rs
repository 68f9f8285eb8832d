//! Client-side view of a session: own presence, roster, incoming frames

use relay_protocol::{
    ContentData, ContentMessage, Frame, Inbound, Position, PresenceMessage, ProtocolResult,
    UserData,
};

/// What an incoming frame meant for the local view
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Welcome(UserData),
    Joined(UserData),
    Left(UserData),
    Content(ContentData),
    Other { kind: String, raw: String },
    Unreadable(String),
}

/// Local roster kept from presence messages
#[derive(Debug, Default)]
pub struct LocalSession {
    me: Option<UserData>,
    peers: Vec<UserData>,
    position: Position,
}

impl LocalSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn me(&self) -> Option<&UserData> {
        self.me.as_ref()
    }

    /// Peers in the order they became known
    pub fn peers(&self) -> &[UserData] {
        &self.peers
    }

    pub fn move_to(&mut self, position: Position) {
        self.position = position;
    }

    /// Fold one frame from the relay into the local view
    pub fn apply(&mut self, text: &str) -> Event {
        if let Ok(message) = PresenceMessage::parse(text) {
            return match message {
                PresenceMessage::UserData(p) => {
                    self.me = Some(p.user_data.clone());
                    Event::Welcome(p.user_data)
                }
                PresenceMessage::UserAdded(p) => {
                    self.peers.push(p.user_data.clone());
                    Event::Joined(p.user_data)
                }
                PresenceMessage::UserRemoved(p) => {
                    // a user may hold several connections; forget one of them
                    if let Some(index) = self.peers.iter().position(|u| *u == p.user_data) {
                        self.peers.remove(index);
                    }
                    Event::Left(p.user_data)
                }
            };
        }

        match Inbound::parse(text) {
            Ok(Inbound::Content(message)) => Event::Content(message.data),
            Ok(Inbound::Opaque { kind }) => Event::Other {
                kind,
                raw: text.to_string(),
            },
            Err(e) => Event::Unreadable(e.to_string()),
        }
    }

    /// Content edit carrying our own presence; `None` until the relay has greeted us
    pub fn compose(&self, content: &str) -> Option<ProtocolResult<Frame>> {
        let me = self.me.clone()?;
        Some(ContentMessage::new(content, self.position, me).encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_protocol::Presence;

    fn frame(message: PresenceMessage) -> String {
        message.encode().unwrap().to_string()
    }

    #[test]
    fn test_roster_follows_presence() {
        let mut session = LocalSession::new();
        let me = Presence::new("me", "🐸", 1);
        let alice = Presence::new("alice", "🐨", 2);
        let bob = Presence::new("bob", "🐻", 3);

        assert!(matches!(session.apply(&frame(PresenceMessage::own(&me))), Event::Welcome(_)));
        session.apply(&frame(PresenceMessage::added(&alice)));
        session.apply(&frame(PresenceMessage::added(&bob)));
        assert_eq!(session.me().map(|u| u.user_id.as_str()), Some("me"));
        assert_eq!(session.peers().len(), 2);

        let left = session.apply(&frame(PresenceMessage::removed(&alice)));
        assert_eq!(left, Event::Left(alice.user_data()));
        assert_eq!(session.peers(), &[bob.user_data()]);
    }

    #[test]
    fn test_content_and_opaque_frames() {
        let mut session = LocalSession::new();
        let alice = Presence::new("alice", "🐨", 2);
        let text = ContentMessage::new("hi", Position { x: 1.0, y: 1.0 }, alice.user_data())
            .encode()
            .unwrap();

        match session.apply(&text) {
            Event::Content(data) => {
                assert_eq!(data.content, "hi");
                assert_eq!(data.user_data.user_id, "alice");
            }
            other => panic!("expected content, got {:?}", other),
        }

        assert!(matches!(
            session.apply(r#"{"type":"cursor","data":{}}"#),
            Event::Other { ref kind, .. } if kind == "cursor"
        ));
        assert!(matches!(session.apply("garbage"), Event::Unreadable(_)));
    }

    #[test]
    fn test_compose_needs_greeting() {
        let mut session = LocalSession::new();
        assert!(session.compose("early").is_none());

        let me = Presence::new("me", "🐸", 1);
        session.apply(&frame(PresenceMessage::own(&me)));
        session.move_to(Position { x: 3.0, y: 4.0 });

        let text = session.compose("hello").unwrap().unwrap();
        let value: Inbound = Inbound::parse(&text).unwrap();
        match value {
            Inbound::Content(message) => {
                assert_eq!(message.data.position, Position { x: 3.0, y: 4.0 });
                assert_eq!(message.data.user_data, me.user_data());
            }
            other => panic!("expected content, got {:?}", other),
        }
    }
}
