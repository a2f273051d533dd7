//! Wallet Registry
//!
//! The in-memory set of wallets and the selected-wallet pointer, kept in step
//! with the secure store:
//!
//! - Lifecycle mutations (create, import, rename, delete, select, disconnect)
//!   are serialized by an async mutex held across their storage calls.
//! - Readers get cloned [`Wallet`] snapshots and never wait on storage.
//! - Key material is never cached here. It is re-read from the store and
//!   re-derived whenever a signature or an export is needed.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::address::Pubkey;
use crate::amount;
use crate::config::WalletConfig;
use crate::error::{Result, WalletError};
use crate::keys::{self, DerivationPath, Keypair, SecretMaterial};
use crate::rpc::RpcGateway;
use crate::secure_store::{IndexEntry, SecureKeyStore, WalletIndex, WalletRecord};

/// Longest accepted wallet name, in characters
pub const MAX_NAME_LEN: usize = 64;

/// How a wallet's key was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    Mnemonic,
    RawSecret,
}

/// Snapshot of one wallet. Holds no key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Wallet {
    pub id: String,
    pub name: String,
    pub public_key: Pubkey,
    pub source: KeySource,
    /// Set for mnemonic wallets only
    pub derivation_path: Option<DerivationPath>,
    /// Last balance the network reported; `None` until the first refresh
    pub balance_lamports: Option<u64>,
    pub last_balance_refresh: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Wallet {
    fn from_record(record: &WalletRecord) -> Self {
        let source = match record.secret {
            SecretMaterial::Mnemonic { .. } => KeySource::Mnemonic,
            SecretMaterial::RawKeypair { .. } => KeySource::RawSecret,
        };
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            public_key: record.public_key,
            source,
            derivation_path: record.secret.derivation_path().cloned(),
            balance_lamports: None,
            last_balance_refresh: None,
            created_at: record.created_at,
        }
    }

    /// Cached balance in SOL
    pub fn balance_sol(&self) -> Option<f64> {
        self.balance_lamports.map(amount::to_display)
    }

    pub fn address(&self) -> String {
        self.public_key.to_string()
    }
}

/// Whether the registry is bound to at least one wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone)]
struct RegistryState {
    wallets: Vec<Wallet>,
    selected: Option<String>,
    connection: ConnectionState,
}

impl RegistryState {
    fn empty() -> Self {
        Self {
            wallets: Vec::new(),
            selected: None,
            connection: ConnectionState::Disconnected,
        }
    }

    fn find(&self, id: &str) -> Option<&Wallet> {
        self.wallets.iter().find(|w| w.id == id)
    }

    fn index(&self) -> WalletIndex {
        WalletIndex {
            selected: self.selected.clone(),
            wallets: self
                .wallets
                .iter()
                .map(|w| IndexEntry {
                    id: w.id.clone(),
                    public_key: w.public_key,
                    name: w.name.clone(),
                })
                .collect(),
            ..WalletIndex::default()
        }
    }

    fn default_name(&self) -> String {
        let mut n = self.wallets.len() + 1;
        loop {
            let candidate = format!("Wallet {}", n);
            if !self.wallets.iter().any(|w| w.name == candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// Validate and normalize a user-supplied wallet name.
pub fn normalize_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(WalletError::InvalidConfig("wallet name cannot be empty".into()));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(WalletError::InvalidConfig(format!(
            "wallet name is longer than {} characters",
            MAX_NAME_LEN
        )));
    }
    Ok(trimmed.to_string())
}

/// Manages the set of wallets.
pub struct WalletRegistry {
    store: Arc<SecureKeyStore>,
    rpc: Arc<RpcGateway>,
    derivation_path: DerivationPath,
    mnemonic_words: usize,
    refresh_concurrency: usize,
    state: RwLock<RegistryState>,
    lifecycle: Mutex<()>,
}

impl WalletRegistry {
    pub fn new(store: Arc<SecureKeyStore>, rpc: Arc<RpcGateway>, config: &WalletConfig) -> Self {
        Self {
            store,
            rpc,
            derivation_path: config.derivation_path.clone(),
            mnemonic_words: config.mnemonic_words,
            refresh_concurrency: config.refresh_concurrency.max(1),
            state: RwLock::new(RegistryState::empty()),
            lifecycle: Mutex::new(()),
        }
    }

    // The lock is never held across an await, so a poisoned guard still
    // holds consistent data.
    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn snapshot(&self) -> RegistryState {
        self.read().clone()
    }

    /// Install a lifecycle result. Balances are refreshed outside the
    /// lifecycle lock, so the live values win over the caller's copy.
    fn commit(&self, mut next: RegistryState) {
        let mut state = self.write();
        for wallet in &mut next.wallets {
            if let Some(live) = state.find(&wallet.id) {
                wallet.balance_lamports = live.balance_lamports;
                wallet.last_balance_refresh = live.last_balance_refresh;
            }
        }
        *state = next;
    }

    /// Forget a cached balance so the next check must ask the network.
    pub(crate) fn invalidate_balance(&self, id: &str) {
        let mut state = self.write();
        if let Some(wallet) = state.wallets.iter_mut().find(|w| w.id == id) {
            wallet.balance_lamports = None;
        }
    }

    /// Load every wallet listed in the index, re-deriving each key.
    ///
    /// Records that are missing, undecodable or re-derive to a different
    /// public key are left out with a warning. Authentication and storage
    /// failures abort the load.
    pub async fn load(&self) -> Result<Vec<Wallet>> {
        let _guard = self.lifecycle.lock().await;

        let index = self.store.load_index().await?;
        let mut wallets = Vec::with_capacity(index.wallets.len());

        for entry in &index.wallets {
            let record = match self
                .store
                .get_wallet_record(&entry.id, "Unlock your wallets")
                .await
            {
                Ok(Some(record)) => record,
                Ok(None) => {
                    warn!("Wallet {} is listed but has no stored record; skipping", entry.id);
                    continue;
                }
                Err(WalletError::CorruptRecord(detail)) => {
                    warn!("Skipping corrupt wallet {}: {}", entry.id, detail);
                    continue;
                }
                Err(e) => return Err(e),
            };

            match record.secret.reconstruct() {
                Ok(keypair)
                    if keypair.pubkey() == record.public_key
                        && record.public_key == entry.public_key =>
                {
                    let mut wallet = Wallet::from_record(&record);
                    wallet.name = entry.name.clone();
                    wallets.push(wallet);
                }
                Ok(_) => warn!(
                    "Skipping wallet {}: stored key does not derive its public key",
                    entry.id
                ),
                Err(e) => warn!("Skipping wallet {}: {}", entry.id, e),
            }
        }

        let selected = index
            .selected
            .filter(|id| wallets.iter().any(|w| &w.id == id))
            .or_else(|| wallets.first().map(|w| w.id.clone()));
        let connection = if wallets.is_empty() {
            ConnectionState::Disconnected
        } else {
            ConnectionState::Connected
        };

        info!("Loaded {} wallet(s)", wallets.len());
        self.commit(RegistryState {
            wallets: wallets.clone(),
            selected,
            connection,
        });
        Ok(wallets)
    }

    /// Create a wallet from a freshly generated recovery phrase.
    pub async fn create_wallet(&self, name: Option<&str>) -> Result<Wallet> {
        self.store.ensure_available().await?;
        let name = name.map(normalize_name).transpose()?;

        let phrase = keys::generate_mnemonic(self.mnemonic_words)?;
        let (keypair, material) = keys::derive_from_input(&phrase, &self.derivation_path)?;

        let _guard = self.lifecycle.lock().await;
        self.insert(keypair, material, name).await
    }

    /// Import a wallet from a recovery phrase or a private key.
    pub async fn import_wallet(&self, input: &str, name: Option<&str>) -> Result<Wallet> {
        self.store.ensure_available().await?;
        let name = name.map(normalize_name).transpose()?;

        let (keypair, material) = keys::derive_from_input(input, &self.derivation_path)?;

        let _guard = self.lifecycle.lock().await;
        self.insert(keypair, material, name).await
    }

    /// Persist a new wallet. Caller holds the lifecycle lock.
    async fn insert(
        &self,
        keypair: Keypair,
        material: SecretMaterial,
        name: Option<String>,
    ) -> Result<Wallet> {
        let public_key = keypair.pubkey();
        let mut next = self.snapshot();

        if let Some(existing) = next.wallets.iter().find(|w| w.public_key == public_key) {
            return Err(WalletError::DuplicateWallet {
                existing_id: existing.id.clone(),
                existing_name: existing.name.clone(),
                public_key: public_key.to_string(),
            });
        }

        let record = WalletRecord {
            id: Uuid::new_v4().to_string(),
            name: name.unwrap_or_else(|| next.default_name()),
            public_key,
            secret: material,
            created_at: Utc::now(),
        };
        let wallet = Wallet::from_record(&record);

        self.store.put_wallet_record(&record).await?;

        next.wallets.push(wallet.clone());
        next.selected = Some(wallet.id.clone());
        next.connection = ConnectionState::Connected;

        if let Err(e) = self.store.save_index(&next.index()).await {
            if let Err(cleanup) = self.store.delete_wallet_record(&record.id).await {
                warn!(
                    "Could not roll back record for wallet {}: {}",
                    record.id, cleanup
                );
            }
            return Err(e);
        }

        self.commit(next);
        info!("Added wallet {} ({})", wallet.name, wallet.public_key);
        Ok(wallet)
    }

    /// Rename a wallet. Returns false if no such wallet exists.
    pub async fn rename_wallet(&self, id: &str, new_name: &str) -> Result<bool> {
        let new_name = normalize_name(new_name)?;
        let _guard = self.lifecycle.lock().await;

        let mut next = self.snapshot();
        let Some(position) = next.wallets.iter().position(|w| w.id == id) else {
            return Ok(false);
        };
        let old_name = next.wallets[position].name.clone();
        if old_name == new_name {
            return Ok(true);
        }

        let mut record = self
            .store
            .get_wallet_record(id, "Rename wallet")
            .await?
            .ok_or_else(|| WalletError::CorruptRecord(format!("wallet {} has no record", id)))?;
        record.name = new_name.clone();
        self.store.put_wallet_record(&record).await?;

        next.wallets[position].name = new_name.clone();
        if let Err(e) = self.store.save_index(&next.index()).await {
            record.name = old_name;
            if let Err(restore) = self.store.put_wallet_record(&record).await {
                warn!("Could not restore name of wallet {}: {}", id, restore);
            }
            return Err(e);
        }

        self.commit(next);
        info!("Renamed wallet {} to {}", id, new_name);
        Ok(true)
    }

    /// Delete a wallet and its stored key.
    ///
    /// Returns false when the wallet is the only one left or does not exist.
    /// If the deleted wallet was selected, the first remaining one is selected.
    pub async fn delete_wallet(&self, id: &str) -> Result<bool> {
        let _guard = self.lifecycle.lock().await;

        let mut next = self.snapshot();
        if next.find(id).is_none() {
            return Ok(false);
        }
        if next.wallets.len() == 1 {
            info!("Refusing to delete the only wallet; disconnect instead");
            return Ok(false);
        }

        next.wallets.retain(|w| w.id != id);
        if next.selected.as_deref() == Some(id) {
            next.selected = next.wallets.first().map(|w| w.id.clone());
        }

        // Index first: a failure after this leaves an orphan record, never a
        // listed wallet without a key.
        self.store.save_index(&next.index()).await?;
        if let Err(e) = self.store.delete_wallet_record(id).await {
            warn!("Wallet {} removed from index but its record remains: {}", id, e);
        }

        self.commit(next);
        info!("Deleted wallet {}", id);
        Ok(true)
    }

    pub async fn select_wallet(&self, id: &str) -> Result<Wallet> {
        let _guard = self.lifecycle.lock().await;

        let mut next = self.snapshot();
        let wallet = next
            .find(id)
            .cloned()
            .ok_or_else(|| WalletError::WalletNotFound(id.to_string()))?;
        if next.selected.as_deref() != Some(id) {
            next.selected = Some(id.to_string());
            self.store.save_index(&next.index()).await?;
            self.commit(next);
            debug!("Selected wallet {}", id);
        }
        Ok(wallet)
    }

    /// Remove every wallet and its key material.
    pub async fn disconnect(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        let mut next = self.snapshot();
        let mut failures = Vec::new();
        let ids: Vec<String> = next.wallets.iter().map(|w| w.id.clone()).collect();

        for id in ids {
            match self.store.delete_wallet_record(&id).await {
                Ok(()) => next.wallets.retain(|w| w.id != id),
                Err(e) => failures.push(format!("{}: {}", id, e)),
            }
        }

        if failures.is_empty() {
            self.store.delete_index().await?;
            self.commit(RegistryState::empty());
            info!("Disconnected; all wallets removed");
            return Ok(());
        }

        if next
            .selected
            .as_ref()
            .map_or(true, |s| next.find(s).is_none())
        {
            next.selected = next.wallets.first().map(|w| w.id.clone());
        }
        let index = next.index();
        self.commit(next);
        self.store.save_index(&index).await?;
        Err(WalletError::StorageUnavailable(format!(
            "could not remove every wallet: {}",
            failures.join("; ")
        )))
    }

    /// Base58 private keypair. Requires authentication; never logged.
    pub async fn export_private_key(&self, id: &str) -> Result<Zeroizing<String>> {
        let keypair = self.signing_keypair(id, "Export private key").await?;
        Ok(keypair.to_base58_keypair())
    }

    /// Recovery phrase, or `None` for wallets imported from a raw key.
    pub async fn export_mnemonic(&self, id: &str) -> Result<Option<Zeroizing<String>>> {
        let record = self.verified_record(id, "Show recovery phrase").await?;
        Ok(record.secret.mnemonic().map(|p| Zeroizing::new(p.to_string())))
    }

    /// Reconstruct a wallet's keypair for signing.
    pub(crate) async fn signing_keypair(&self, id: &str, prompt: &str) -> Result<Keypair> {
        let record = self.verified_record(id, prompt).await?;
        record.secret.reconstruct()
    }

    async fn verified_record(&self, id: &str, prompt: &str) -> Result<WalletRecord> {
        let wallet = self
            .wallet(id)
            .ok_or_else(|| WalletError::WalletNotFound(id.to_string()))?;
        let record = self
            .store
            .get_wallet_record(id, prompt)
            .await?
            .ok_or_else(|| WalletError::CorruptRecord(format!("wallet {} has no record", id)))?;

        let derived = record.secret.reconstruct()?.pubkey();
        if derived != wallet.public_key || record.public_key != wallet.public_key {
            return Err(WalletError::CorruptRecord(format!(
                "wallet {} no longer derives {}",
                id, wallet.public_key
            )));
        }
        Ok(record)
    }

    /// Fetch one wallet's balance. On failure the cached value is kept.
    pub async fn refresh_balance(&self, id: &str) -> Result<u64> {
        let public_key = self
            .wallet(id)
            .map(|w| w.public_key)
            .ok_or_else(|| WalletError::WalletNotFound(id.to_string()))?;

        let lamports = match self.rpc.get_balance(&public_key).await {
            Ok(lamports) => lamports,
            Err(e) => {
                warn!("Balance refresh for {} failed: {}", id, e);
                return Err(e);
            }
        };

        {
            let mut state = self.write();
            if let Some(wallet) = state.wallets.iter_mut().find(|w| w.id == id) {
                wallet.balance_lamports = Some(lamports);
                wallet.last_balance_refresh = Some(Utc::now());
            }
        }
        debug!("Balance of {} is {} lamports", id, lamports);
        Ok(lamports)
    }

    /// Refresh every wallet with at most `refresh_concurrency` queries in
    /// flight. Results are per wallet; one failure does not stop the others.
    pub async fn refresh_all_balances(&self) -> Vec<(String, Result<u64>)> {
        let ids: Vec<String> = self.read().wallets.iter().map(|w| w.id.clone()).collect();
        stream::iter(ids)
            .map(|id| async move {
                let result = self.refresh_balance(&id).await;
                (id, result)
            })
            .buffer_unordered(self.refresh_concurrency)
            .collect()
            .await
    }

    pub fn wallets(&self) -> Vec<Wallet> {
        self.read().wallets.clone()
    }

    pub fn wallet(&self, id: &str) -> Option<Wallet> {
        self.read().find(id).cloned()
    }

    pub fn selected(&self) -> Option<Wallet> {
        let state = self.read();
        state.selected.as_deref().and_then(|id| state.find(id)).cloned()
    }

    /// Find a wallet by id, exact name or address.
    pub fn find(&self, query: &str) -> Option<Wallet> {
        let query = query.trim();
        let state = self.read();
        state
            .wallets
            .iter()
            .find(|w| w.id == query || w.name == query || w.address() == query)
            .cloned()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.read().connection
    }

    pub fn len(&self) -> usize {
        self.read().wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().wallets.is_empty()
    }
}
