//! Secure Key Store
//!
//! Authentication-gated persistence for wallet records. The platform boundary
//! is the [`SecureStorage`] trait; [`SecureKeyStore`] layers the wallet's
//! record layout on top of it:
//!
//! - `index`: unauthenticated list of `{id, public_key, name}` plus the
//!   selected wallet id. Safe to read without prompting the user.
//! - `wallet.<id>`: one authenticated record per wallet holding its secret.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::address::Pubkey;
use crate::error::{Result, WalletError};
use crate::keys::SecretMaterial;

/// Key of the unauthenticated wallet index
pub const INDEX_KEY: &str = "index";

/// Key used by the availability probe
pub const PROBE_KEY: &str = "probe";

/// Current index format version
const INDEX_VERSION: u32 = 1;

/// Failures reported by a storage backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Declined, cancelled or wrong credentials
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("stored entry is corrupt: {0}")]
    Corrupt(String),
}

impl From<StorageError> for WalletError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Unavailable(msg) => WalletError::StorageUnavailable(msg),
            StorageError::AuthenticationFailed(msg) => WalletError::AuthenticationFailed(msg),
            StorageError::Corrupt(msg) => WalletError::CorruptRecord(msg),
        }
    }
}

/// Per-call access requirements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    pub require_authentication: bool,
    /// Reason shown to the user when authentication is requested
    pub prompt: Option<String>,
}

impl AccessPolicy {
    pub fn open() -> Self {
        Self::default()
    }

    pub fn authenticated(prompt: impl Into<String>) -> Self {
        Self {
            require_authentication: true,
            prompt: Some(prompt.into()),
        }
    }
}

/// A key-value store whose entries may require user authentication to read.
///
/// Authenticated calls may suspend while the user is prompted.
#[async_trait]
pub trait SecureStorage: Send + Sync {
    async fn put(
        &self,
        key: &str,
        value: &[u8],
        policy: &AccessPolicy,
    ) -> std::result::Result<(), StorageError>;

    async fn get(
        &self,
        key: &str,
        policy: &AccessPolicy,
    ) -> std::result::Result<Option<Zeroizing<Vec<u8>>>, StorageError>;

    async fn delete(&self, key: &str) -> std::result::Result<(), StorageError>;

    /// Throwaway write/read/delete round-trip.
    async fn probe(&self) -> std::result::Result<(), StorageError> {
        let token = rand::random::<u64>().to_le_bytes();
        let open = AccessPolicy::open();
        self.put(PROBE_KEY, &token, &open).await?;
        let read = self.get(PROBE_KEY, &open).await?;
        self.delete(PROBE_KEY).await?;
        match read {
            Some(bytes) if bytes.as_slice() == token => Ok(()),
            _ => Err(StorageError::Unavailable(
                "probe value did not round-trip".into(),
            )),
        }
    }
}

/// One entry of the public wallet index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub public_key: Pubkey,
    pub name: String,
}

/// Unauthenticated list of known wallets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletIndex {
    pub version: u32,
    #[serde(default)]
    pub selected: Option<String>,
    #[serde(default)]
    pub wallets: Vec<IndexEntry>,
}

impl Default for WalletIndex {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            selected: None,
            wallets: Vec::new(),
        }
    }
}

/// The authenticated per-wallet record.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletRecord {
    pub id: String,
    pub name: String,
    pub public_key: Pubkey,
    pub secret: SecretMaterial,
    pub created_at: DateTime<Utc>,
}

/// Storage key of a wallet's authenticated record.
pub fn record_key(id: &str) -> String {
    format!("wallet.{}", id)
}

/// Wallet-shaped view over a [`SecureStorage`] backend.
pub struct SecureKeyStore {
    backend: Arc<dyn SecureStorage>,
    available: OnceCell<bool>,
}

impl SecureKeyStore {
    pub fn new(backend: Arc<dyn SecureStorage>) -> Self {
        Self {
            backend,
            available: OnceCell::new(),
        }
    }

    /// Probe the backend once; the answer is cached for the process lifetime.
    pub async fn is_available(&self) -> bool {
        *self
            .available
            .get_or_init(|| async {
                match self.backend.probe().await {
                    Ok(()) => {
                        debug!("Secure storage probe succeeded");
                        true
                    }
                    Err(e) => {
                        warn!("Secure storage unavailable: {}", e);
                        false
                    }
                }
            })
            .await
    }

    pub async fn ensure_available(&self) -> Result<()> {
        if self.is_available().await {
            Ok(())
        } else {
            Err(WalletError::StorageUnavailable(
                "secure storage failed its availability probe".into(),
            ))
        }
    }

    pub async fn put_wallet_record(&self, record: &WalletRecord) -> Result<()> {
        let bytes = Zeroizing::new(
            serde_json::to_vec(record)
                .map_err(|e| WalletError::CorruptRecord(format!("encode record: {}", e)))?,
        );
        let policy = AccessPolicy::authenticated(format!("Save wallet \"{}\"", record.name));
        self.backend
            .put(&record_key(&record.id), &bytes, &policy)
            .await?;
        Ok(())
    }

    pub async fn get_wallet_record(
        &self,
        id: &str,
        prompt: &str,
    ) -> Result<Option<WalletRecord>> {
        let policy = AccessPolicy::authenticated(prompt);
        let bytes = match self.backend.get(&record_key(id), &policy).await? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let record: WalletRecord = serde_json::from_slice(&bytes)
            .map_err(|e| WalletError::CorruptRecord(format!("wallet {}: {}", id, e)))?;
        if record.id != id {
            return Err(WalletError::CorruptRecord(format!(
                "record stored under {} claims id {}",
                id, record.id
            )));
        }
        Ok(Some(record))
    }

    pub async fn delete_wallet_record(&self, id: &str) -> Result<()> {
        self.backend.delete(&record_key(id)).await?;
        Ok(())
    }

    /// Read the index; a missing index is an empty one.
    pub async fn load_index(&self) -> Result<WalletIndex> {
        match self.backend.get(INDEX_KEY, &AccessPolicy::open()).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| WalletError::CorruptRecord(format!("wallet index: {}", e))),
            None => Ok(WalletIndex::default()),
        }
    }

    pub async fn save_index(&self, index: &WalletIndex) -> Result<()> {
        let bytes = serde_json::to_vec(index)
            .map_err(|e| WalletError::CorruptRecord(format!("encode index: {}", e)))?;
        self.backend
            .put(INDEX_KEY, &bytes, &AccessPolicy::open())
            .await?;
        Ok(())
    }

    pub async fn delete_index(&self) -> Result<()> {
        self.backend.delete(INDEX_KEY).await?;
        Ok(())
    }
}

/// What an authenticated read does in [`MemorySecureStorage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResponse {
    Approve,
    Deny,
    Cancel,
}

struct MemoryEntry {
    value: Zeroizing<Vec<u8>>,
    require_authentication: bool,
}

/// In-process storage with switchable availability and authentication.
pub struct MemorySecureStorage {
    entries: Mutex<HashMap<String, MemoryEntry>>,
    available: AtomicBool,
    auth_response: Mutex<AuthResponse>,
    auth_prompts: AtomicUsize,
    failing_key: Mutex<Option<String>>,
}

impl Default for MemorySecureStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySecureStorage {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            auth_response: Mutex::new(AuthResponse::Approve),
            auth_prompts: AtomicUsize::new(0),
            failing_key: Mutex::new(None),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_auth_response(&self, response: AuthResponse) {
        if let Ok(mut current) = self.auth_response.lock() {
            *current = response;
        }
    }

    /// Make every `put` to `key` fail as unavailable.
    pub fn fail_writes_to(&self, key: Option<&str>) {
        if let Ok(mut failing) = self.failing_key.lock() {
            *failing = key.map(str::to_string);
        }
    }

    /// Number of authentication prompts shown so far.
    pub fn auth_prompt_count(&self) -> usize {
        self.auth_prompts.load(Ordering::SeqCst)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn is_protected(&self, key: &str) -> Option<bool> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(key).map(|e| e.require_authentication))
    }

    fn check_available(&self) -> std::result::Result<(), StorageError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable("device storage disabled".into()))
        }
    }

    fn authenticate(&self, policy: &AccessPolicy) -> std::result::Result<(), StorageError> {
        self.auth_prompts.fetch_add(1, Ordering::SeqCst);
        let response = self
            .auth_response
            .lock()
            .map(|r| *r)
            .map_err(|_| StorageError::Unavailable("auth state poisoned".into()))?;
        let prompt = policy.prompt.as_deref().unwrap_or("access wallet");
        match response {
            AuthResponse::Approve => Ok(()),
            AuthResponse::Deny => Err(StorageError::AuthenticationFailed(format!(
                "denied: {}",
                prompt
            ))),
            AuthResponse::Cancel => Err(StorageError::AuthenticationFailed(format!(
                "cancelled: {}",
                prompt
            ))),
        }
    }

    fn lock_entries(
        &self,
    ) -> std::result::Result<std::sync::MutexGuard<'_, HashMap<String, MemoryEntry>>, StorageError>
    {
        self.entries
            .lock()
            .map_err(|_| StorageError::Unavailable("storage state poisoned".into()))
    }
}

#[async_trait]
impl SecureStorage for MemorySecureStorage {
    async fn put(
        &self,
        key: &str,
        value: &[u8],
        policy: &AccessPolicy,
    ) -> std::result::Result<(), StorageError> {
        self.check_available()?;
        let failing = self.failing_key.lock().ok().and_then(|f| f.clone());
        if failing.as_deref() == Some(key) {
            return Err(StorageError::Unavailable(format!("write to {} failed", key)));
        }
        self.lock_entries()?.insert(
            key.to_string(),
            MemoryEntry {
                value: Zeroizing::new(value.to_vec()),
                require_authentication: policy.require_authentication,
            },
        );
        Ok(())
    }

    async fn get(
        &self,
        key: &str,
        policy: &AccessPolicy,
    ) -> std::result::Result<Option<Zeroizing<Vec<u8>>>, StorageError> {
        self.check_available()?;
        let protected = match self.lock_entries()?.get(key) {
            Some(entry) => entry.require_authentication,
            None => return Ok(None),
        };
        if protected || policy.require_authentication {
            self.authenticate(policy)?;
        }
        Ok(self
            .lock_entries()?
            .get(key)
            .map(|entry| Zeroizing::new(entry.value.to_vec())))
    }

    async fn delete(&self, key: &str) -> std::result::Result<(), StorageError> {
        self.check_available()?;
        self.lock_entries()?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{derive_from_input, DerivationPath};

    const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn sample_record(id: &str) -> WalletRecord {
        let (keypair, secret) =
            derive_from_input(TEST_MNEMONIC, &DerivationPath::default()).unwrap();
        WalletRecord {
            id: id.to_string(),
            name: "Main".to_string(),
            public_key: keypair.pubkey(),
            secret,
            created_at: Utc::now(),
        }
    }

    fn store() -> (Arc<MemorySecureStorage>, SecureKeyStore) {
        let backend = Arc::new(MemorySecureStorage::new());
        let store = SecureKeyStore::new(backend.clone());
        (backend, store)
    }

    #[tokio::test]
    async fn test_record_roundtrip() {
        let (backend, store) = store();
        let record = sample_record("a1");
        store.put_wallet_record(&record).await.unwrap();

        assert_eq!(backend.is_protected("wallet.a1"), Some(true));
        let loaded = store.get_wallet_record("a1", "test").await.unwrap().unwrap();
        assert_eq!(loaded, record);
        assert_eq!(backend.auth_prompt_count(), 1);
    }

    #[tokio::test]
    async fn test_index_is_unauthenticated() {
        let (backend, store) = store();
        assert_eq!(store.load_index().await.unwrap(), WalletIndex::default());

        let mut index = WalletIndex::default();
        index.wallets.push(IndexEntry {
            id: "a1".into(),
            public_key: Pubkey::new([1; 32]),
            name: "Main".into(),
        });
        index.selected = Some("a1".into());
        store.save_index(&index).await.unwrap();

        backend.set_auth_response(AuthResponse::Deny);
        assert_eq!(store.load_index().await.unwrap(), index);
        assert_eq!(backend.is_protected(INDEX_KEY), Some(false));
        assert_eq!(backend.auth_prompt_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_auth_is_authentication_failed() {
        let (backend, store) = store();
        store.put_wallet_record(&sample_record("a1")).await.unwrap();

        backend.set_auth_response(AuthResponse::Cancel);
        let err = store.get_wallet_record("a1", "test").await.unwrap_err();
        assert!(matches!(err, WalletError::AuthenticationFailed(_)));
    }

    #[tokio::test]
    async fn test_availability_is_cached() {
        let (backend, store) = store();
        assert!(store.is_available().await);
        assert!(backend.keys().is_empty());

        backend.set_available(false);
        assert!(store.is_available().await);

        let (backend, store) = self::store();
        backend.set_available(false);
        assert!(!store.is_available().await);
        assert!(matches!(
            store.ensure_available().await,
            Err(WalletError::StorageUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_mismatched_record_id_is_corrupt() {
        let (backend, store) = store();
        let record = sample_record("a1");
        let bytes = serde_json::to_vec(&record).unwrap();
        backend
            .put("wallet.b2", &bytes, &AccessPolicy::authenticated("x"))
            .await
            .unwrap();

        let err = store.get_wallet_record("b2", "test").await.unwrap_err();
        assert!(matches!(err, WalletError::CorruptRecord(_)));
    }

    #[tokio::test]
    async fn test_delete_record() {
        let (_backend, store) = store();
        store.put_wallet_record(&sample_record("a1")).await.unwrap();
        store.delete_wallet_record("a1").await.unwrap();
        assert!(store.get_wallet_record("a1", "test").await.unwrap().is_none());
    }
}
