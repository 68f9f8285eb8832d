//! Session and user identifiers

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Maximum identifier length in bytes
pub const MAX_IDENTIFIER_LEN: usize = 512;

/// Caller-named collaboration session.
///
/// Opaque apart from being non-empty and at most 512 bytes. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Arc<str>);

impl SessionId {
    pub fn new(id: impl AsRef<str>) -> Result<Self> {
        let id = id.as_ref();

        if id.is_empty() {
            return Err(Error::MissingSessionId);
        }

        if id.len() > MAX_IDENTIFIER_LEN {
            return Err(Error::IdentifierTooLong {
                what: "Session ID",
                limit: MAX_IDENTIFIER_LEN,
            });
        }

        Ok(Self(Arc::from(id)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque user identifier supplied at connect time, not verified
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();

        if id.is_empty() {
            return Err(Error::MissingUserId);
        }

        if id.len() > MAX_IDENTIFIER_LEN {
            return Err(Error::IdentifierTooLong {
                what: "User identifier",
                limit: MAX_IDENTIFIER_LEN,
            });
        }

        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_validation() {
        assert_eq!(SessionId::new(""), Err(Error::MissingSessionId));
        assert!(SessionId::new("x".repeat(MAX_IDENTIFIER_LEN)).is_ok());
        assert!(matches!(
            SessionId::new("x".repeat(MAX_IDENTIFIER_LEN + 1)),
            Err(Error::IdentifierTooLong { .. })
        ));
        // anything else is opaque
        assert_eq!(SessionId::new("doc/42 ✏️").unwrap().as_str(), "doc/42 ✏️");
    }

    #[test]
    fn test_user_id_validation() {
        assert_eq!(UserId::new(""), Err(Error::MissingUserId));
        assert_eq!(UserId::new("0xABC").unwrap().to_string(), "0xABC");
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(Error::MissingSessionId.to_string(), "Session ID required");
        assert_eq!(Error::MissingUserId.to_string(), "User identifier required");
    }
}
