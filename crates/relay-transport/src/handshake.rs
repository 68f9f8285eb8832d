//! Connect parameters carried in the upgrade request's query string

use std::borrow::Cow;

use percent_encoding::percent_decode_str;
use relay_core::{Error, SessionId, UserId};
use tokio_tungstenite::tungstenite::handshake::server::ErrorResponse;
use tokio_tungstenite::tungstenite::http::StatusCode;

/// Identifiers a participant connects with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub session: SessionId,
    pub user: UserId,
}

impl ConnectParams {
    /// Parse `session=<id>&wallet=<user>` (or `user=<user>`).
    ///
    /// The first occurrence of a key wins; `wallet` is preferred over `user`.
    pub fn from_query(query: Option<&str>) -> Result<Self, Error> {
        let query = query.unwrap_or("");

        let session = lookup(query, "session").unwrap_or_default();
        let session = SessionId::new(session)?;

        let user = lookup(query, "wallet")
            .filter(|v| !v.is_empty())
            .or_else(|| lookup(query, "user"))
            .unwrap_or_default();
        let user = UserId::new(user)?;

        Ok(Self { session, user })
    }
}

fn lookup(query: &str, key: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (decode(k) == key).then(|| decode(v).into_owned())
        })
        .next()
}

fn decode(raw: &str) -> Cow<'_, str> {
    if raw.contains('+') {
        let spaced = raw.replace('+', " ");
        Cow::Owned(percent_decode_str(&spaced).decode_utf8_lossy().into_owned())
    } else {
        percent_decode_str(raw).decode_utf8_lossy()
    }
}

/// HTTP status a rejected connect request is answered with
pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::MissingUserId => StatusCode::UNAUTHORIZED,
        Error::MissingSessionId | Error::IdentifierTooLong { .. } => StatusCode::BAD_REQUEST,
    }
}

/// Short label used in logs and metrics
pub fn reason_label(error: &Error) -> &'static str {
    match error {
        Error::MissingSessionId => "missing_session",
        Error::MissingUserId => "missing_user",
        Error::IdentifierTooLong { .. } => "identifier_too_long",
    }
}

pub(crate) fn rejection(error: &Error) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(error.to_string()));
    *response.status_mut() = status_for(error);
    response
}
