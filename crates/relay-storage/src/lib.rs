//! Relay Storage Backends
//!
//! Boundaries to the collaborators that persist what a session produces:
//! - `ContentStore`: owner-scoped documents and drawings
//! - `ObjectStore`: opaque blobs addressed by key
//! - `IdentityService`: wallet registration and session tokens
//!
//! Backends:
//! - Memory (default): fast, volatile storage
//! - SQLite: embedded persistence for content

#[cfg(feature = "memory")]
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Kind of content a record holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Document,
    Drawing,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Document => "document",
            ContentKind::Drawing => "drawing",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "document" => Ok(ContentKind::Document),
            "drawing" => Ok(ContentKind::Drawing),
            other => Err(StorageError::Serialization(format!(
                "unknown content kind: {}",
                other
            ))),
        }
    }
}

/// A stored document or drawing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRecord {
    pub owner: String,
    pub kind: ContentKind,
    pub key: String,
    pub body: String,
    /// Milliseconds since the Unix epoch
    pub created_at: i64,
    /// Milliseconds since the Unix epoch
    pub updated_at: i64,
}

/// Where a stored object can be fetched from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectLocator {
    pub key: String,
    /// Backend-assigned content identifier
    pub cid: String,
    pub url: String,
}

/// Owner-scoped content persistence.
///
/// Another owner's key behaves exactly like a missing key.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Create or replace a record, keeping `created_at` of an existing one
    async fn upsert(
        &self,
        owner: &str,
        kind: ContentKind,
        key: &str,
        body: &str,
    ) -> Result<ContentRecord, StorageError>;

    async fn get(&self, owner: &str, kind: ContentKind, key: &str)
        -> Result<ContentRecord, StorageError>;

    /// All records of one kind for an owner, most recently updated first
    async fn list_by_owner(
        &self,
        owner: &str,
        kind: ContentKind,
    ) -> Result<Vec<ContentRecord>, StorageError>;

    async fn delete(&self, owner: &str, kind: ContentKind, key: &str) -> Result<(), StorageError>;
}

/// Blob persistence
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<ObjectLocator, StorageError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;
}

/// A registered user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub wallet_address: String,
    pub name: String,
    pub email: String,
}

/// What a client presents to the identity service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Credentials {
    /// Sign in with an already registered wallet
    #[serde(rename_all = "camelCase")]
    Wallet { wallet_address: String },
    /// First sign-in: register the wallet with a profile
    #[serde(rename_all = "camelCase")]
    Register {
        wallet_address: String,
        name: String,
        email: String,
    },
}

/// Bearer token handed out for an identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthToken(pub String);

impl AuthToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolves credentials to identities and issues tokens for them.
///
/// The relay itself never calls this; it only sees the user identifier
/// a client resolved beforehand.
#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn validate_credentials(&self, credentials: &Credentials) -> Result<Identity, AuthError>;

    async fn issue_token(&self, identity: &Identity) -> Result<AuthToken, AuthError>;

    /// Identity a previously issued, unexpired token belongs to
    async fn resolve_token(&self, token: &AuthToken) -> Result<Identity, AuthError>;
}

/// Identity service errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Wallet not registered: {0}")]
    NotRegistered(String),

    #[error("{0} already registered")]
    AlreadyRegistered(&'static str),

    #[error("Invalid or expired token")]
    InvalidToken,
}

/// Storage error types
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Database error: {0}")]
    Database(String),
}

pub(crate) fn validate(owner: &str, key: &str) -> Result<(), StorageError> {
    if owner.is_empty() {
        return Err(StorageError::InvalidKey("owner cannot be empty".into()));
    }
    if key.is_empty() {
        return Err(StorageError::InvalidKey("key cannot be empty".into()));
    }
    Ok(())
}

/// Millisecond timestamps that never repeat or go backwards within one store
#[derive(Debug, Default)]
pub(crate) struct Clock {
    last: AtomicI64,
}

impl Clock {
    pub(crate) fn now(&self) -> i64 {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();

        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(wall.max(last + 1))
            })
            .unwrap_or(wall);
        wall.max(previous + 1)
    }
}

#[cfg(feature = "memory")]
pub use memory::{MemoryContentStore, MemoryIdentityService, MemoryObjectStore};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteContentStore;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_strictly_increasing() {
        let clock = Clock::default();
        let mut last = clock.now();
        for _ in 0..1_000 {
            let next = clock.now();
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn test_content_kind_names() {
        assert_eq!(ContentKind::Drawing.to_string(), "drawing");
        assert_eq!("document".parse::<ContentKind>().unwrap(), ContentKind::Document);
        assert!("video".parse::<ContentKind>().is_err());
    }

    #[test]
    fn test_credentials_wire_shape() {
        let credentials: Credentials = serde_json::from_str(
            r#"{"kind":"register","walletAddress":"0xabc","name":"Alice","email":"a@b.com"}"#,
        )
        .unwrap();
        assert_eq!(
            credentials,
            Credentials::Register {
                wallet_address: "0xabc".into(),
                name: "Alice".into(),
                email: "a@b.com".into(),
            }
        );

        let value = serde_json::to_value(Credentials::Wallet {
            wallet_address: "0xabc".into(),
        })
        .unwrap();
        assert_eq!(value["kind"], "wallet");
        assert_eq!(value["walletAddress"], "0xabc");
    }

    #[test]
    fn test_record_wire_shape() {
        let record = ContentRecord {
            owner: "alice@example.com".into(),
            kind: ContentKind::Document,
            key: "doc-1".into(),
            body: "<p>hi</p>".into(),
            created_at: 1,
            updated_at: 2,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["kind"], "document");
        assert_eq!(value["updatedAt"], 2);
    }
}
