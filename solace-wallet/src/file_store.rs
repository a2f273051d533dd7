//! Encrypted File Store
//!
//! A [`SecureStorage`] backend that keeps one file per entry in the wallet
//! data directory:
//! - Argon2id for passphrase-based vault key derivation
//! - ChaCha20-Poly1305 for authenticated encryption of protected entries
//!
//! The entry key is bound as associated data, so a sealed record moved to a
//! different file fails to open. Unprotected entries (the wallet index) are
//! stored hex encoded and never prompt.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHasher,
};
use async_trait::async_trait;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::secure_store::{AccessPolicy, SecureStorage, StorageError};

/// Current on-disk format version
const STORE_VERSION: u32 = 1;

/// Vault metadata file name
const VAULT_FILE: &str = "vault.json";

/// Extension of entry files
const ENTRY_EXT: &str = "entry";

/// Plaintext sealed into the vault verifier
const VERIFIER_PLAINTEXT: &[u8] = b"solace-vault-verifier";

/// Associated data for the vault verifier
const VERIFIER_AAD: &[u8] = b"vault";

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_kb: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    /// Tuned for security vs. usability: 64 MB, 3 passes, 4 lanes.
    fn default() -> Self {
        Self {
            memory_kb: 65536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

/// Supplies the vault passphrase when an operation needs authentication.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// `first_use` is set when the vault is being created, so implementations
    /// can ask for confirmation. Cancellation maps to
    /// [`StorageError::AuthenticationFailed`].
    async fn passphrase(
        &self,
        prompt: &str,
        first_use: bool,
    ) -> Result<Zeroizing<String>, StorageError>;
}

/// Vault metadata: salt plus a sealed verifier for wrong-passphrase detection.
#[derive(Serialize, Deserialize)]
struct VaultFile {
    version: u32,
    kdf: KdfParams,
    /// Argon2 salt (base64, PHC string format)
    salt: String,
    /// ChaCha20-Poly1305 nonce (12 bytes, hex encoded)
    nonce: String,
    /// Sealed verifier (hex encoded)
    verifier: String,
}

/// One stored entry.
#[derive(Serialize, Deserialize)]
struct EntryFile {
    version: u32,
    protected: bool,
    /// Present only for protected entries
    #[serde(default)]
    nonce: Option<String>,
    /// Hex of the ciphertext (protected) or the raw value
    data: String,
}

struct Session {
    key: Zeroizing<[u8; 32]>,
    opened_at: Instant,
}

/// Passphrase-protected directory of entries.
pub struct EncryptedFileStore {
    dir: PathBuf,
    authenticator: Arc<dyn Authenticator>,
    session_ttl: Duration,
    kdf: KdfParams,
    session: Mutex<Option<Session>>,
}

impl EncryptedFileStore {
    pub fn new(dir: impl Into<PathBuf>, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            dir: dir.into(),
            authenticator,
            session_ttl: Duration::from_secs(300),
            kdf: KdfParams::default(),
            session: Mutex::new(None),
        }
    }

    /// How long a successful authentication is remembered; zero prompts on
    /// every protected call.
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Cost parameters used when a new vault is created.
    pub fn with_kdf_params(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Forget the cached vault key.
    pub async fn lock(&self) {
        if self.session.lock().await.take().is_some() {
            debug!("Vault session closed");
        }
    }

    pub fn vault_exists(&self) -> bool {
        self.dir.join(VAULT_FILE).exists()
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid {
            return Err(StorageError::Unavailable(format!(
                "invalid storage key: {:?}",
                key
            )));
        }
        Ok(self.dir.join(format!("{}.{}", key, ENTRY_EXT)))
    }

    /// Return the vault key, prompting the user if no session is open.
    async fn vault_key(&self, policy: &AccessPolicy) -> Result<Zeroizing<[u8; 32]>, StorageError> {
        let mut session = self.session.lock().await;

        if let Some(open) = session.as_ref() {
            if !self.session_ttl.is_zero() && open.opened_at.elapsed() < self.session_ttl {
                return Ok(open.key.clone());
            }
        }
        *session = None;

        let prompt = policy.prompt.as_deref().unwrap_or("Unlock wallet vault");
        let vault_path = self.dir.join(VAULT_FILE);

        let key = if vault_path.exists() {
            let vault: VaultFile = read_json(&vault_path)?;
            if vault.version != STORE_VERSION {
                return Err(StorageError::Corrupt(format!(
                    "unsupported vault version: {} (expected {})",
                    vault.version, STORE_VERSION
                )));
            }
            let passphrase = self.authenticator.passphrase(prompt, false).await?;
            let key = derive_key_blocking(passphrase, vault.salt.clone(), vault.kdf).await?;
            open_verifier(&vault, &key)?;
            key
        } else {
            let passphrase = self.authenticator.passphrase(prompt, true).await?;
            let salt = SaltString::generate(&mut OsRng);
            let key = derive_key_blocking(passphrase, salt.to_string(), self.kdf).await?;
            self.create_vault(&key, salt.as_str())?;
            info!("Created wallet vault in {}", self.dir.display());
            key
        };

        if !self.session_ttl.is_zero() {
            *session = Some(Session {
                key: key.clone(),
                opened_at: Instant::now(),
            });
        }
        Ok(key)
    }

    fn create_vault(&self, key: &[u8; 32], salt: &str) -> Result<(), StorageError> {
        let (nonce, verifier) = seal(key, VERIFIER_PLAINTEXT, VERIFIER_AAD)?;
        let vault = VaultFile {
            version: STORE_VERSION,
            kdf: self.kdf,
            salt: salt.to_string(),
            nonce: hex::encode(nonce),
            verifier: hex::encode(verifier),
        };
        write_json(&self.dir.join(VAULT_FILE), &vault)
    }
}

#[async_trait]
impl SecureStorage for EncryptedFileStore {
    async fn put(
        &self,
        key: &str,
        value: &[u8],
        policy: &AccessPolicy,
    ) -> Result<(), StorageError> {
        let path = self.entry_path(key)?;

        let entry = if policy.require_authentication {
            let vault_key = self.vault_key(policy).await?;
            let (nonce, ciphertext) = seal(&vault_key, value, key.as_bytes())?;
            EntryFile {
                version: STORE_VERSION,
                protected: true,
                nonce: Some(hex::encode(nonce)),
                data: hex::encode(ciphertext),
            }
        } else {
            EntryFile {
                version: STORE_VERSION,
                protected: false,
                nonce: None,
                data: hex::encode(value),
            }
        };

        write_json(&path, &entry)?;
        debug!("Stored entry {}", key);
        Ok(())
    }

    async fn get(
        &self,
        key: &str,
        policy: &AccessPolicy,
    ) -> Result<Option<Zeroizing<Vec<u8>>>, StorageError> {
        let path = self.entry_path(key)?;
        if !path.exists() {
            return Ok(None);
        }

        let entry: EntryFile = read_json(&path)?;
        if entry.version != STORE_VERSION {
            return Err(StorageError::Corrupt(format!(
                "unsupported entry version: {}",
                entry.version
            )));
        }

        let data = hex::decode(&entry.data)
            .map_err(|_| StorageError::Corrupt(format!("{}: invalid data encoding", key)))?;

        if !entry.protected {
            return Ok(Some(Zeroizing::new(data)));
        }

        let nonce = entry
            .nonce
            .as_deref()
            .map(hex::decode)
            .transpose()
            .map_err(|_| StorageError::Corrupt(format!("{}: invalid nonce encoding", key)))?
            .ok_or_else(|| StorageError::Corrupt(format!("{}: missing nonce", key)))?;

        let vault_key = self.vault_key(policy).await?;
        let plaintext = open(&vault_key, &nonce, &data, key.as_bytes())
            .map_err(|_| StorageError::Corrupt(format!("{}: decryption failed", key)))?;
        Ok(Some(plaintext))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.entry_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Unavailable(format!(
                "failed to delete {}: {}",
                key, e
            ))),
        }
    }
}

/// Derive a 32-byte vault key from a passphrase using Argon2id
fn derive_key(
    passphrase: &str,
    salt: &str,
    params: KdfParams,
) -> Result<Zeroizing<[u8; 32]>, StorageError> {
    let salt = SaltString::from_b64(salt)
        .map_err(|_| StorageError::Corrupt("invalid vault salt".into()))?;

    let argon2 = Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2::Params::new(
            params.memory_kb,
            params.iterations,
            params.parallelism,
            Some(32),
        )
        .map_err(|_| StorageError::Corrupt("invalid Argon2 parameters".into()))?,
    );

    let hash = argon2
        .hash_password(passphrase.as_bytes(), &salt)
        .map_err(|_| StorageError::Unavailable("key derivation failed".into()))?;

    let output = hash
        .hash
        .ok_or_else(|| StorageError::Unavailable("no hash output".into()))?;

    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&output.as_bytes()[..32]);
    Ok(key)
}

/// Argon2 is memory-hard; keep it off the async workers.
async fn derive_key_blocking(
    passphrase: Zeroizing<String>,
    salt: String,
    params: KdfParams,
) -> Result<Zeroizing<[u8; 32]>, StorageError> {
    tokio::task::spawn_blocking(move || derive_key(&passphrase, &salt, params))
        .await
        .map_err(|e| StorageError::Unavailable(format!("key derivation task failed: {}", e)))?
}

fn open_verifier(vault: &VaultFile, key: &[u8; 32]) -> Result<(), StorageError> {
    let nonce = hex::decode(&vault.nonce)
        .map_err(|_| StorageError::Corrupt("invalid vault nonce".into()))?;
    let verifier = hex::decode(&vault.verifier)
        .map_err(|_| StorageError::Corrupt("invalid vault verifier".into()))?;

    match open(key, &nonce, &verifier, VERIFIER_AAD) {
        Ok(plain) if plain.as_slice() == VERIFIER_PLAINTEXT => Ok(()),
        _ => Err(StorageError::AuthenticationFailed(
            "wrong passphrase".into(),
        )),
    }
}

fn seal(key: &[u8; 32], plaintext: &[u8], aad: &[u8]) -> Result<([u8; 12], Vec<u8>), StorageError> {
    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill(&mut nonce_bytes);

    let cipher = ChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| StorageError::Unavailable("failed to create cipher".into()))?;
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| StorageError::Unavailable("encryption failed".into()))?;

    Ok((nonce_bytes, ciphertext))
}

fn open(
    key: &[u8; 32],
    nonce: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, StorageError> {
    if nonce.len() != 12 {
        return Err(StorageError::Corrupt("invalid nonce length".into()));
    }
    let cipher = ChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| StorageError::Unavailable("failed to create cipher".into()))?;
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map(Zeroizing::new)
        .map_err(|_| StorageError::Corrupt("decryption failed".into()))
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, StorageError> {
    let json = fs::read_to_string(path).map_err(|e| {
        StorageError::Unavailable(format!("failed to read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&json)
        .map_err(|e| StorageError::Corrupt(format!("failed to parse {}: {}", path.display(), e)))
}

/// Write JSON with owner-only permissions. The data goes to a sibling
/// temp file first and is renamed over `path`, so readers see either the
/// old or the new contents.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let unavailable =
        |e: std::io::Error| StorageError::Unavailable(format!("{}: {}", path.display(), e));

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(unavailable)?;
    }

    let json = serde_json::to_string_pretty(value)
        .map_err(|e| StorageError::Unavailable(format!("serialize: {}", e)))?;

    let tmp = temp_path(path);
    if let Err(e) = write_synced(&tmp, json.as_bytes()).and_then(|()| fs::rename(&tmp, path)) {
        let _ = fs::remove_file(&tmp);
        return Err(unavailable(e));
    }
    Ok(())
}

/// `.<name>.tmp` next to `path`. Entry keys never start with a dot.
fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp", name))
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
