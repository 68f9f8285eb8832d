//! Relay wire protocol
//!
//! JSON envelopes exchanged between participants and the relay.
//!
//! ## Envelope
//! ```text
//! {"type": "<kind>", "data": <payload>}
//! ```
//!
//! ## Kinds
//! ```text
//! user-data       # relay -> client: your own presence record
//! user-added      # relay -> client: a peer is present / has joined
//! user-removed    # relay -> client: a peer has left
//! content         # client -> peers: content edit with position and sender presence
//! <anything else> # relayed verbatim
//! ```

pub mod envelope;
pub mod error;
pub mod presence;

pub use envelope::{ContentData, ContentMessage, Frame, Inbound, Position, CONTENT};
pub use error::{ProtocolError, ProtocolResult};
pub use presence::{display_label, Presence, PresenceMessage, UserData};
