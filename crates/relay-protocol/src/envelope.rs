//! Envelope types and inbound classification

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};
use crate::presence::UserData;

/// A serialized envelope, shared between every queue it is fanned out to
pub type Frame = Arc<str>;

/// Type tag of content-edit messages
pub const CONTENT: &str = "content";

/// 2D position attached to a content edit
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Payload of a `content` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentData {
    pub content: String,
    pub position: Position,
    pub user_data: UserData,
}

/// A complete `content` message as sent by clients
#[derive(Debug, Clone, PartialEq)]
pub struct ContentMessage {
    pub data: ContentData,
}

impl ContentMessage {
    pub fn new(content: impl Into<String>, position: Position, user_data: UserData) -> Self {
        Self {
            data: ContentData {
                content: content.into(),
                position,
                user_data,
            },
        }
    }

    pub fn encode(&self) -> ProtocolResult<Frame> {
        encode(CONTENT, &self.data)
    }
}

/// Classification of a frame received from a participant
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A content edit; the only kind the relay looks inside
    Content(ContentMessage),
    /// Any other kind, relayed verbatim
    Opaque { kind: String },
}

#[derive(Deserialize)]
struct TypeTag {
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Deserialize)]
struct ContentBody {
    data: ContentData,
}

impl Inbound {
    /// Parse a text frame.
    ///
    /// Frames without a `type` field are treated as opaque with an empty kind.
    pub fn parse(text: &str) -> ProtocolResult<Self> {
        let tag: TypeTag =
            serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

        if tag.kind != CONTENT {
            return Ok(Inbound::Opaque { kind: tag.kind });
        }

        let body: ContentBody =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed {
                kind: CONTENT.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Inbound::Content(ContentMessage { data: body.data }))
    }

    pub fn kind(&self) -> &str {
        match self {
            Inbound::Content(_) => CONTENT,
            Inbound::Opaque { kind } => kind,
        }
    }

    pub fn is_content(&self) -> bool {
        matches!(self, Inbound::Content(_))
    }
}

#[derive(Serialize)]
struct Outgoing<'a, T: Serialize> {
    #[serde(rename = "type")]
    kind: &'a str,
    data: &'a T,
}

/// Serialize `data` under the given type tag
pub(crate) fn encode<T: Serialize>(kind: &str, data: &T) -> ProtocolResult<Frame> {
    serde_json::to_string(&Outgoing { kind, data })
        .map(Frame::from)
        .map_err(|e| ProtocolError::Encode(e.to_string()))
}
