//! Presence records and the join/leave/roster messages built from them

use rand::seq::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::envelope::Frame;
use crate::error::{ProtocolError, ProtocolResult};

/// Decorative glyphs appended to display labels
const GLYPHS: [&str; 20] = [
    "🦁", "🐮", "🐯", "🐰", "🐻", "🐼", "🐨", "🐸", "🐷", "🐵",
    "🦊", "🐺", "🐴", "🦄", "🐧", "🐦", "🦅", "🦆", "🐔", "🐢",
];

/// Identifiers longer than this are shortened for display
const LABEL_MAX_CHARS: usize = 10;
const LABEL_HEAD: usize = 6;
const LABEL_TAIL: usize = 4;

/// Shorten a user identifier for display.
///
/// `"0xABCDEF1234567890"` becomes `"0xABCD...7890"`; identifiers of ten
/// characters or fewer are returned unchanged.
pub fn display_label(user_id: &str) -> String {
    let len = user_id.chars().count();
    if len <= LABEL_MAX_CHARS {
        return user_id.to_string();
    }

    let head: String = user_id.chars().take(LABEL_HEAD).collect();
    let tail: String = user_id.chars().skip(len - LABEL_TAIL).collect();
    format!("{}...{}", head, tail)
}

/// Display identity of one connection, fixed for its lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presence {
    user_id: String,
    label: String,
    glyph: String,
    hue: u16,
}

impl Presence {
    /// Build a presence record with a random glyph and hue
    pub fn generate(user_id: impl Into<String>) -> Self {
        let mut rng = rand::rng();
        let glyph = GLYPHS.choose(&mut rng).copied().unwrap_or(GLYPHS[0]);
        let hue = rng.random_range(0..360);
        Self::new(user_id, glyph, hue)
    }

    pub fn new(user_id: impl Into<String>, glyph: impl Into<String>, hue: u16) -> Self {
        let user_id = user_id.into();
        Self {
            label: display_label(&user_id),
            user_id,
            glyph: glyph.into(),
            hue: hue % 360,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn glyph(&self) -> &str {
        &self.glyph
    }

    pub fn hue(&self) -> u16 {
        self.hue
    }

    pub fn color(&self) -> String {
        format!("hsl({}, 100%, 50%)", self.hue)
    }

    /// Wire form of this record
    pub fn user_data(&self) -> UserData {
        UserData {
            user_id: self.user_id.clone(),
            user_name: format!("{} {}", self.label, self.glyph),
            user_color: self.color(),
        }
    }
}

/// Presence triplet as it appears on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    pub user_id: String,
    pub user_name: String,
    pub user_color: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresencePayload {
    #[serde(rename = "userData")]
    pub user_data: UserData,
}

/// Messages the relay itself originates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum PresenceMessage {
    /// Sent once to a newcomer with its own record
    UserData(PresencePayload),
    /// Roster entry for a newcomer, or join announcement for existing members
    UserAdded(PresencePayload),
    /// Departure announcement
    UserRemoved(PresencePayload),
}

impl PresenceMessage {
    pub fn own(presence: &Presence) -> Self {
        PresenceMessage::UserData(Self::payload(presence))
    }

    pub fn added(presence: &Presence) -> Self {
        PresenceMessage::UserAdded(Self::payload(presence))
    }

    pub fn removed(presence: &Presence) -> Self {
        PresenceMessage::UserRemoved(Self::payload(presence))
    }

    fn payload(presence: &Presence) -> PresencePayload {
        PresencePayload {
            user_data: presence.user_data(),
        }
    }

    pub fn user_data(&self) -> &UserData {
        match self {
            PresenceMessage::UserData(p)
            | PresenceMessage::UserAdded(p)
            | PresenceMessage::UserRemoved(p) => &p.user_data,
        }
    }

    pub fn encode(&self) -> ProtocolResult<Frame> {
        serde_json::to_string(self)
            .map(Frame::from)
            .map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Parse a frame sent by the relay
    pub fn parse(text: &str) -> ProtocolResult<Self> {
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))
    }
}
