//! In-memory storage backends

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    validate, AuthError, AuthToken, Clock, ContentKind, ContentRecord, ContentStore, Credentials,
    Identity, IdentityService, ObjectLocator, ObjectStore, StorageError,
};

/// Lifetime of issued tokens unless configured otherwise
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

type ContentKey = (String, ContentKind, String);

/// In-memory content store
///
/// Fast, volatile storage suitable for development and tests.
/// Data is lost when the process exits.
#[derive(Default)]
pub struct MemoryContentStore {
    records: DashMap<ContentKey, ContentRecord>,
    clock: Clock,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn content_key(owner: &str, kind: ContentKind, key: &str) -> ContentKey {
    (owner.to_string(), kind, key.to_string())
}

fn not_found(kind: ContentKind, key: &str) -> StorageError {
    StorageError::NotFound(format!("{} {}", kind, key))
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn upsert(
        &self,
        owner: &str,
        kind: ContentKind,
        key: &str,
        body: &str,
    ) -> Result<ContentRecord, StorageError> {
        validate(owner, key)?;
        let now = self.clock.now();

        let record = self
            .records
            .entry(content_key(owner, kind, key))
            .and_modify(|record| {
                record.body = body.to_string();
                record.updated_at = now;
            })
            .or_insert_with(|| ContentRecord {
                owner: owner.to_string(),
                kind,
                key: key.to_string(),
                body: body.to_string(),
                created_at: now,
                updated_at: now,
            })
            .clone();

        debug!(owner = %owner, kind = %kind, key = %key, "Stored content");
        Ok(record)
    }

    async fn get(
        &self,
        owner: &str,
        kind: ContentKind,
        key: &str,
    ) -> Result<ContentRecord, StorageError> {
        self.records
            .get(&content_key(owner, kind, key))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| not_found(kind, key))
    }

    async fn list_by_owner(
        &self,
        owner: &str,
        kind: ContentKind,
    ) -> Result<Vec<ContentRecord>, StorageError> {
        let mut records: Vec<ContentRecord> = self
            .records
            .iter()
            .filter(|entry| entry.owner == owner && entry.kind == kind)
            .map(|entry| entry.value().clone())
            .collect();

        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records)
    }

    async fn delete(&self, owner: &str, kind: ContentKind, key: &str) -> Result<(), StorageError> {
        self.records
            .remove(&content_key(owner, kind, key))
            .map(|_| ())
            .ok_or_else(|| not_found(kind, key))
    }
}

/// In-memory object store
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: DashMap<String, (ObjectLocator, Vec<u8>)>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<ObjectLocator, StorageError> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey("key cannot be empty".into()));
        }

        let cid = Uuid::new_v4().simple().to_string();
        let locator = ObjectLocator {
            key: key.to_string(),
            url: format!("memory://{}", cid),
            cid,
        };

        self.objects
            .insert(key.to_string(), (locator.clone(), bytes.to_vec()));
        debug!(key = %key, size = bytes.len(), "Stored object");
        Ok(locator)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .get(key)
            .map(|entry| entry.value().1.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }
}

/// In-memory identity service
///
/// Users are keyed by wallet address; e-mail addresses are unique too.
/// Tokens are random and only valid for this instance.
pub struct MemoryIdentityService {
    users: DashMap<String, Identity>,
    /// e-mail -> wallet address
    emails: DashMap<String, String>,
    tokens: DashMap<AuthToken, (String, Instant)>,
    token_ttl: Duration,
}

impl MemoryIdentityService {
    pub fn new() -> Self {
        Self::with_token_ttl(DEFAULT_TOKEN_TTL)
    }

    pub fn with_token_ttl(token_ttl: Duration) -> Self {
        Self {
            users: DashMap::new(),
            emails: DashMap::new(),
            tokens: DashMap::new(),
            token_ttl,
        }
    }

    fn register(&self, wallet_address: &str, name: &str, email: &str) -> Result<Identity, AuthError> {
        if name.trim().is_empty() || email.trim().is_empty() {
            return Err(AuthError::InvalidCredentials("name and email are required".into()));
        }

        // wallet shard first, then e-mail shard; nothing locks them in the other order
        let Entry::Vacant(wallet_slot) = self.users.entry(wallet_address.to_string()) else {
            return Err(AuthError::AlreadyRegistered("Wallet address"));
        };
        match self.emails.entry(email.to_string()) {
            Entry::Occupied(_) => return Err(AuthError::AlreadyRegistered("Email")),
            Entry::Vacant(email_slot) => {
                email_slot.insert(wallet_address.to_string());
            }
        }

        let identity = Identity {
            wallet_address: wallet_address.to_string(),
            name: name.to_string(),
            email: email.to_string(),
        };
        wallet_slot.insert(identity.clone());
        info!(wallet = %wallet_address, "Registered wallet");
        Ok(identity)
    }
}

impl Default for MemoryIdentityService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityService for MemoryIdentityService {
    async fn validate_credentials(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        match credentials {
            Credentials::Wallet { wallet_address } if !wallet_address.is_empty() => self
                .users
                .get(wallet_address)
                .map(|entry| entry.value().clone())
                .ok_or_else(|| AuthError::NotRegistered(wallet_address.clone())),
            Credentials::Register {
                wallet_address,
                name,
                email,
            } if !wallet_address.is_empty() => self.register(wallet_address, name, email),
            _ => Err(AuthError::InvalidCredentials("wallet address is required".into())),
        }
    }

    async fn issue_token(&self, identity: &Identity) -> Result<AuthToken, AuthError> {
        if !self.users.contains_key(&identity.wallet_address) {
            return Err(AuthError::NotRegistered(identity.wallet_address.clone()));
        }

        let token = AuthToken(Uuid::new_v4().simple().to_string());
        let expires_at = Instant::now() + self.token_ttl;
        self.tokens
            .insert(token.clone(), (identity.wallet_address.clone(), expires_at));
        debug!(wallet = %identity.wallet_address, "Issued token");
        Ok(token)
    }

    async fn resolve_token(&self, token: &AuthToken) -> Result<Identity, AuthError> {
        let wallet_address = match self.tokens.get(token) {
            Some(entry) if entry.value().1 > Instant::now() => entry.value().0.clone(),
            Some(entry) => {
                drop(entry);
                self.tokens.remove(token);
                return Err(AuthError::InvalidToken);
            }
            None => return Err(AuthError::InvalidToken),
        };

        self.users
            .get(&wallet_address)
            .map(|entry| entry.value().clone())
            .ok_or(AuthError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(wallet: &str, email: &str) -> Credentials {
        Credentials::Register {
            wallet_address: wallet.into(),
            name: "Alice".into(),
            email: email.into(),
        }
    }

    #[tokio::test]
    async fn test_upsert_creates_then_replaces() {
        let store = MemoryContentStore::new();

        let first = store
            .upsert("alice", ContentKind::Document, "doc-1", "v1")
            .await
            .unwrap();
        let second = store
            .upsert("alice", ContentKind::Document, "doc-1", "v2")
            .await
            .unwrap();

        assert_eq!(second.body, "v2");
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at > first.updated_at);
        assert_eq!(store.len(), 1);

        let loaded = store.get("alice", ContentKind::Document, "doc-1").await.unwrap();
        assert_eq!(loaded, second);
    }

    #[tokio::test]
    async fn test_records_are_owner_scoped() {
        let store = MemoryContentStore::new();
        store
            .upsert("alice", ContentKind::Drawing, "sketch", "{}")
            .await
            .unwrap();

        assert!(matches!(
            store.get("bob", ContentKind::Drawing, "sketch").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            store.delete("bob", ContentKind::Drawing, "sketch").await,
            Err(StorageError::NotFound(_))
        ));
        // kinds are separate namespaces too
        assert!(store.get("alice", ContentKind::Document, "sketch").await.is_err());
    }

    #[tokio::test]
    async fn test_list_by_owner_most_recent_first() {
        let store = MemoryContentStore::new();
        for key in ["a", "b", "c"] {
            store
                .upsert("alice", ContentKind::Document, key, "x")
                .await
                .unwrap();
        }
        store
            .upsert("bob", ContentKind::Document, "d", "x")
            .await
            .unwrap();
        // touching "a" moves it to the front
        store
            .upsert("alice", ContentKind::Document, "a", "y")
            .await
            .unwrap();

        let keys: Vec<_> = store
            .list_by_owner("alice", ContentKind::Document)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec!["a", "c", "b"]);

        assert!(store
            .list_by_owner("alice", ContentKind::Drawing)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryContentStore::new();
        store
            .upsert("alice", ContentKind::Document, "doc", "x")
            .await
            .unwrap();

        store.delete("alice", ContentKind::Document, "doc").await.unwrap();
        assert!(store.is_empty());
        assert!(store.delete("alice", ContentKind::Document, "doc").await.is_err());
    }

    #[tokio::test]
    async fn test_empty_keys_rejected() {
        let store = MemoryContentStore::new();
        assert!(matches!(
            store.upsert("", ContentKind::Document, "doc", "x").await,
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(
            store.upsert("alice", ContentKind::Document, "", "x").await,
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_object_put_get() {
        let store = MemoryObjectStore::new();
        let locator = store.put("notes.txt", b"hello").await.unwrap();

        assert_eq!(locator.key, "notes.txt");
        assert!(locator.url.ends_with(&locator.cid));
        assert_eq!(store.get("notes.txt").await.unwrap(), b"hello");
        assert!(matches!(
            store.get("missing").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_register_then_sign_in() {
        let identities = MemoryIdentityService::new();
        let wallet = Credentials::Wallet {
            wallet_address: "0xabc".into(),
        };

        assert_eq!(
            identities.validate_credentials(&wallet).await,
            Err(AuthError::NotRegistered("0xabc".into()))
        );

        let registered = identities
            .validate_credentials(&register("0xabc", "alice@example.com"))
            .await
            .unwrap();
        assert_eq!(registered.wallet_address, "0xabc");
        assert_eq!(identities.validate_credentials(&wallet).await.unwrap(), registered);
    }

    #[tokio::test]
    async fn test_registration_conflicts() {
        let identities = MemoryIdentityService::new();
        identities
            .validate_credentials(&register("0xabc", "alice@example.com"))
            .await
            .unwrap();

        assert_eq!(
            identities
                .validate_credentials(&register("0xabc", "other@example.com"))
                .await,
            Err(AuthError::AlreadyRegistered("Wallet address"))
        );
        assert_eq!(
            identities
                .validate_credentials(&register("0xdef", "alice@example.com"))
                .await,
            Err(AuthError::AlreadyRegistered("Email"))
        );
        // the rejected wallet was not half-registered
        assert!(matches!(
            identities
                .validate_credentials(&Credentials::Wallet {
                    wallet_address: "0xdef".into()
                })
                .await,
            Err(AuthError::NotRegistered(_))
        ));
    }

    #[tokio::test]
    async fn test_incomplete_credentials_rejected() {
        let identities = MemoryIdentityService::new();
        assert!(matches!(
            identities
                .validate_credentials(&Credentials::Wallet {
                    wallet_address: String::new()
                })
                .await,
            Err(AuthError::InvalidCredentials(_))
        ));
        assert!(matches!(
            identities.validate_credentials(&register("0xabc", " ")).await,
            Err(AuthError::InvalidCredentials(_))
        ));
    }

    #[tokio::test]
    async fn test_tokens_resolve_to_identity() {
        let identities = MemoryIdentityService::new();
        let alice = identities
            .validate_credentials(&register("0xabc", "alice@example.com"))
            .await
            .unwrap();

        let token = identities.issue_token(&alice).await.unwrap();
        assert_eq!(identities.resolve_token(&token).await.unwrap(), alice);
        assert_eq!(
            identities.resolve_token(&AuthToken("forged".into())).await,
            Err(AuthError::InvalidToken)
        );

        let stranger = Identity {
            wallet_address: "0xdef".into(),
            name: "Mallory".into(),
            email: "m@example.com".into(),
        };
        assert!(matches!(
            identities.issue_token(&stranger).await,
            Err(AuthError::NotRegistered(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let identities = MemoryIdentityService::with_token_ttl(Duration::ZERO);
        let alice = identities
            .validate_credentials(&register("0xabc", "alice@example.com"))
            .await
            .unwrap();

        let token = identities.issue_token(&alice).await.unwrap();
        assert_eq!(identities.resolve_token(&token).await, Err(AuthError::InvalidToken));
    }
}
