//! Key Derivation
//!
//! Turns user input into Ed25519 signing keys for the ledger:
//!
//! - BIP39 mnemonics (12 or 24 words) are expanded to a seed and derived with
//!   SLIP-0010 along an all-hardened path, `m/44'/501'/0'/0'` by default.
//! - Raw secrets are the ledger's native 64-byte `secret || public` keypair,
//!   base58 encoded, or the JSON byte-array form written by the CLI keygen.
//!
//! Everything here is a pure function of its input. Secret buffers are wrapped
//! in `Zeroizing` and the signing key itself is boxed and memory-locked.

use std::fmt;
use std::str::FromStr;

use bip39::{Language, Mnemonic, MnemonicType, Seed};
use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::{Zeroize, Zeroizing};

use crate::address::Pubkey;
use crate::error::{Result, WalletError};
use crate::secmem::LockedRegion;

/// Length of an Ed25519 secret seed in bytes
pub const SECRET_KEY_LEN: usize = 32;

/// Length of the native keypair encoding (`secret || public`)
pub const KEYPAIR_LEN: usize = 64;

/// Length of an Ed25519 signature
pub const SIGNATURE_LEN: usize = 64;

/// Raw secrets shorter than this are not even considered
const MIN_RAW_SECRET_CHARS: usize = 32;

/// Accepted mnemonic lengths
const MNEMONIC_WORD_COUNTS: [usize; 2] = [12, 24];

/// Solana's registered BIP44 coin type
const SOLANA_COIN_TYPE: u32 = 501;

/// What a piece of free-form input looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Mnemonic,
    RawSecret,
}

/// Classify trimmed user input without validating it.
pub fn classify(input: &str) -> Result<InputKind> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(WalletError::InvalidKeyFormat("input is empty".into()));
    }

    let words = trimmed.split_whitespace().count();
    if MNEMONIC_WORD_COUNTS.contains(&words) {
        return Ok(InputKind::Mnemonic);
    }

    if trimmed.chars().count() >= MIN_RAW_SECRET_CHARS {
        return Ok(InputKind::RawSecret);
    }

    Err(WalletError::InvalidKeyFormat(format!(
        "expected a 12 or 24 word phrase or a private key, got {} word(s)",
        words
    )))
}

/// A BIP44-style derivation path where every segment is hardened.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DerivationPath {
    /// Segment indexes without the hardened bit
    indexes: Vec<u32>,
}

impl DerivationPath {
    /// `m/44'/501'/account'/change'`
    pub fn solana(account: u32, change: u32) -> Self {
        Self {
            indexes: vec![44, SOLANA_COIN_TYPE, account, change],
        }
    }

    pub fn indexes(&self) -> &[u32] {
        &self.indexes
    }
}

impl Default for DerivationPath {
    fn default() -> Self {
        Self::solana(0, 0)
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("m")?;
        for index in &self.indexes {
            write!(f, "/{}'", index)?;
        }
        Ok(())
    }
}

impl FromStr for DerivationPath {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |why: &str| WalletError::InvalidKeyFormat(format!("derivation path {}: {}", s, why));

        let mut parts = s.trim().split('/');
        if parts.next() != Some("m") {
            return Err(invalid("must start with 'm'"));
        }

        let mut indexes = Vec::new();
        for part in parts {
            let digits = part
                .strip_suffix('\'')
                .or_else(|| part.strip_suffix('h'))
                .ok_or_else(|| invalid("ed25519 supports hardened segments only"))?;
            let index: u32 = digits.parse().map_err(|_| invalid("bad segment"))?;
            if index >= 0x8000_0000 {
                return Err(invalid("segment out of range"));
            }
            indexes.push(index);
        }

        if indexes.is_empty() {
            return Err(invalid("no segments"));
        }
        Ok(Self { indexes })
    }
}

impl Serialize for DerivationPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DerivationPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An Ed25519 signing keypair.
///
/// The signing key lives in its own heap allocation so the memory lock covers
/// a stable address. `Debug` never prints secret bytes.
pub struct Keypair {
    /// Must be declared before `signing_key` so it is dropped first.
    _lock: LockedRegion,
    signing_key: Box<SigningKey>,
}

impl Keypair {
    fn from_signing_key(signing_key: SigningKey) -> Self {
        let signing_key = Box::new(signing_key);
        // SAFETY: the box is owned by Self and never moves its allocation
        let lock = unsafe { LockedRegion::covering(&*signing_key) };
        Self {
            _lock: lock,
            signing_key,
        }
    }

    /// Build a keypair from a 32-byte secret seed.
    pub fn from_secret_bytes(secret: &[u8; SECRET_KEY_LEN]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(secret))
    }

    pub fn pubkey(&self) -> Pubkey {
        Pubkey::new(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign a message, returning the raw 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Native 64-byte keypair encoding, base58. Only for authenticated export.
    pub fn to_base58_keypair(&self) -> Zeroizing<String> {
        let bytes = Zeroizing::new(self.signing_key.to_keypair_bytes());
        Zeroizing::new(bs58::encode(bytes.as_slice()).into_string())
    }

    /// Clamped X25519 scalar for Diffie-Hellman (memo encryption).
    pub(crate) fn x25519_secret(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing_key.to_scalar_bytes())
    }

    pub fn is_memory_locked(&self) -> bool {
        self._lock.is_locked()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("pubkey", &self.pubkey())
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// The persisted secret from which a wallet's keypair is reconstructed.
#[derive(Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SecretMaterial {
    /// Normalized BIP39 phrase plus the path it is derived along
    Mnemonic {
        phrase: String,
        derivation_path: DerivationPath,
    },
    /// Base58 of the native 64-byte keypair
    RawKeypair { keypair: String },
}

impl SecretMaterial {
    /// Re-derive the keypair this material describes.
    pub fn reconstruct(&self) -> Result<Keypair> {
        match self {
            Self::Mnemonic {
                phrase,
                derivation_path,
            } => keypair_from_mnemonic(phrase, derivation_path),
            Self::RawKeypair { keypair } => keypair_from_raw_secret(keypair),
        }
    }

    pub fn mnemonic(&self) -> Option<&str> {
        match self {
            Self::Mnemonic { phrase, .. } => Some(phrase),
            Self::RawKeypair { .. } => None,
        }
    }

    pub fn derivation_path(&self) -> Option<&DerivationPath> {
        match self {
            Self::Mnemonic {
                derivation_path, ..
            } => Some(derivation_path),
            Self::RawKeypair { .. } => None,
        }
    }
}

impl Drop for SecretMaterial {
    fn drop(&mut self) {
        match self {
            Self::Mnemonic { phrase, .. } => phrase.zeroize(),
            Self::RawKeypair { keypair } => keypair.zeroize(),
        }
    }
}

impl fmt::Debug for SecretMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mnemonic {
                derivation_path, ..
            } => f
                .debug_struct("Mnemonic")
                .field("phrase", &"<redacted>")
                .field("derivation_path", derivation_path)
                .finish(),
            Self::RawKeypair { .. } => f
                .debug_struct("RawKeypair")
                .field("keypair", &"<redacted>")
                .finish(),
        }
    }
}

/// Classify and derive in one step, returning the keypair and the normalized
/// material that should be persisted for it.
pub fn derive_from_input(
    input: &str,
    path: &DerivationPath,
) -> Result<(Keypair, SecretMaterial)> {
    match classify(input)? {
        InputKind::Mnemonic => {
            let phrase = normalize_phrase(input);
            let keypair = keypair_from_mnemonic(&phrase, path)?;
            let material = SecretMaterial::Mnemonic {
                phrase: phrase.to_string(),
                derivation_path: path.clone(),
            };
            Ok((keypair, material))
        }
        InputKind::RawSecret => {
            let keypair = keypair_from_raw_secret(input)?;
            let material = SecretMaterial::RawKeypair {
                keypair: keypair.to_base58_keypair().to_string(),
            };
            Ok((keypair, material))
        }
    }
}

/// Derive a keypair from any supported input along `path`.
pub fn derive_keypair(input: &str, path: &DerivationPath) -> Result<Keypair> {
    derive_from_input(input, path).map(|(keypair, _)| keypair)
}

/// Generate a fresh English mnemonic of 12 or 24 words.
pub fn generate_mnemonic(words: usize) -> Result<Zeroizing<String>> {
    let mnemonic_type = match words {
        12 => MnemonicType::Words12,
        24 => MnemonicType::Words24,
        other => {
            return Err(WalletError::InvalidConfig(format!(
                "mnemonic length must be 12 or 24 words, not {}",
                other
            )))
        }
    };
    let mnemonic = Mnemonic::new(mnemonic_type, Language::English);
    Ok(Zeroizing::new(mnemonic.phrase().to_string()))
}

/// Derive from a BIP39 phrase (wordlist and checksum validated).
pub fn keypair_from_mnemonic(phrase: &str, path: &DerivationPath) -> Result<Keypair> {
    let phrase = normalize_phrase(phrase);
    let word_count = phrase.split(' ').count();
    if !MNEMONIC_WORD_COUNTS.contains(&word_count) {
        return Err(WalletError::InvalidKeyFormat(format!(
            "expected 12 or 24 words, got {}",
            word_count
        )));
    }

    let mnemonic = Mnemonic::from_phrase(&phrase, Language::English)
        .map_err(|e| WalletError::InvalidKeyFormat(format!("invalid mnemonic: {}", e)))?;

    let seed = Seed::new(&mnemonic, "");
    let secret = Zeroizing::new(slip10_ed25519::derive_ed25519_private_key(
        seed.as_bytes(),
        path.indexes(),
    ));

    Ok(Keypair::from_secret_bytes(&secret))
}

/// Decode a raw keypair (base58 or JSON byte array) and check its public half.
pub fn keypair_from_raw_secret(input: &str) -> Result<Keypair> {
    let trimmed = input.trim();

    let bytes: Zeroizing<Vec<u8>> = if trimmed.starts_with('[') {
        let parsed: Vec<u8> = serde_json::from_str(trimmed).map_err(|_| {
            WalletError::InvalidKeyFormat("byte array must contain values 0-255".into())
        })?;
        Zeroizing::new(parsed)
    } else {
        Zeroizing::new(bs58::decode(trimmed).into_vec().map_err(|_| {
            WalletError::InvalidKeyFormat("private key contains non-base58 characters".into())
        })?)
    };

    if bytes.len() != KEYPAIR_LEN {
        return Err(WalletError::InvalidKeyFormat(format!(
            "private key must decode to {} bytes, got {}",
            KEYPAIR_LEN,
            bytes.len()
        )));
    }

    let mut secret = Zeroizing::new([0u8; SECRET_KEY_LEN]);
    secret.copy_from_slice(&bytes[..SECRET_KEY_LEN]);
    let keypair = Keypair::from_secret_bytes(&secret);

    if keypair.pubkey().as_bytes()[..] != bytes[SECRET_KEY_LEN..] {
        return Err(WalletError::InvalidKeyFormat(
            "public half of the keypair does not match its secret".into(),
        ));
    }

    Ok(keypair)
}

fn normalize_phrase(phrase: &str) -> Zeroizing<String> {
    Zeroizing::new(
        phrase
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .collect::<Vec<_>>()
            .join(" "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    const TEST_MNEMONIC_24: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon art";

    fn raw_from_seed(seed: u8) -> String {
        let keypair = Keypair::from_secret_bytes(&[seed; 32]);
        keypair.to_base58_keypair().to_string()
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(TEST_MNEMONIC).unwrap(), InputKind::Mnemonic);
        assert_eq!(classify(TEST_MNEMONIC_24).unwrap(), InputKind::Mnemonic);
        assert_eq!(classify(&raw_from_seed(1)).unwrap(), InputKind::RawSecret);
        assert!(classify("   ").is_err());
        assert!(classify("short").is_err());
    }

    #[test]
    fn test_mnemonic_derivation_is_deterministic() {
        let path = DerivationPath::default();
        let a = derive_keypair(TEST_MNEMONIC, &path).unwrap();
        let b = derive_keypair(TEST_MNEMONIC, &path).unwrap();
        assert_eq!(a.pubkey(), b.pubkey());
    }

    #[test]
    fn test_mnemonic_normalization() {
        let path = DerivationPath::default();
        let messy = format!("  {}  ", TEST_MNEMONIC.to_uppercase().replace(' ', "   "));
        let a = derive_keypair(TEST_MNEMONIC, &path).unwrap();
        let b = derive_keypair(&messy, &path).unwrap();
        assert_eq!(a.pubkey(), b.pubkey());
    }

    #[test]
    fn test_different_paths_different_keys() {
        let a = derive_keypair(TEST_MNEMONIC, &DerivationPath::solana(0, 0)).unwrap();
        let b = derive_keypair(TEST_MNEMONIC, &DerivationPath::solana(1, 0)).unwrap();
        assert_ne!(a.pubkey(), b.pubkey());
    }

    #[test]
    fn test_invalid_mnemonics() {
        let path = DerivationPath::default();
        // Bad checksum: 12 valid words, wrong last word
        let bad_checksum =
            "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon";
        assert!(matches!(
            derive_keypair(bad_checksum, &path),
            Err(WalletError::InvalidKeyFormat(_))
        ));

        // Not in the wordlist
        let bad_word =
            "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon zzzzz";
        assert!(derive_keypair(bad_word, &path).is_err());
    }

    #[test]
    fn test_raw_secret_base58() {
        let raw = raw_from_seed(42);
        let expected = Keypair::from_secret_bytes(&[42u8; 32]).pubkey();
        let keypair = keypair_from_raw_secret(&raw).unwrap();
        assert_eq!(keypair.pubkey(), expected);
    }

    #[test]
    fn test_raw_secret_json_array() {
        let expected = Keypair::from_secret_bytes(&[9u8; 32]);
        let bytes = bs58::decode(expected.to_base58_keypair().as_str())
            .into_vec()
            .unwrap();
        let json = serde_json::to_string(&bytes).unwrap();
        let keypair = derive_keypair(&json, &DerivationPath::default()).unwrap();
        assert_eq!(keypair.pubkey(), expected.pubkey());
    }

    #[test]
    fn test_raw_secret_rejects_bad_input() {
        // 32 bytes is not the native keypair length
        let short = bs58::encode([1u8; 32]).into_string();
        assert!(matches!(
            keypair_from_raw_secret(&short),
            Err(WalletError::InvalidKeyFormat(_))
        ));

        // Mismatched public half
        let mut bytes = [3u8; 64];
        bytes[63] ^= 0xff;
        let mismatched = bs58::encode(bytes).into_string();
        assert!(keypair_from_raw_secret(&mismatched).is_err());

        // Characters outside the base58 alphabet
        assert!(keypair_from_raw_secret(&"0".repeat(88)).is_err());
    }

    #[test]
    fn test_secret_material_roundtrip() {
        let path = DerivationPath::default();
        let (keypair, material) = derive_from_input(TEST_MNEMONIC, &path).unwrap();
        assert_eq!(material.mnemonic(), Some(TEST_MNEMONIC));
        assert_eq!(material.derivation_path(), Some(&path));
        assert_eq!(material.reconstruct().unwrap().pubkey(), keypair.pubkey());

        let (raw_keypair, raw_material) = derive_from_input(&raw_from_seed(5), &path).unwrap();
        assert!(raw_material.mnemonic().is_none());
        assert_eq!(
            raw_material.reconstruct().unwrap().pubkey(),
            raw_keypair.pubkey()
        );
    }

    #[test]
    fn test_generate_mnemonic() {
        let phrase = generate_mnemonic(12).unwrap();
        assert_eq!(phrase.split(' ').count(), 12);
        assert!(keypair_from_mnemonic(&phrase, &DerivationPath::default()).is_ok());
        assert_eq!(generate_mnemonic(24).unwrap().split(' ').count(), 24);
        assert!(generate_mnemonic(15).is_err());
    }

    #[test]
    fn test_derivation_path_parse_and_display() {
        let path: DerivationPath = "m/44'/501'/3'/0'".parse().unwrap();
        assert_eq!(path, DerivationPath::solana(3, 0));
        assert_eq!(path.to_string(), "m/44'/501'/3'/0'");
        assert_eq!(DerivationPath::default().to_string(), "m/44'/501'/0'/0'");

        assert!("44'/501'".parse::<DerivationPath>().is_err());
        assert!("m/44/501".parse::<DerivationPath>().is_err());
        assert!("m".parse::<DerivationPath>().is_err());
    }

    #[test]
    fn test_debug_is_redacted() {
        let (keypair, material) =
            derive_from_input(TEST_MNEMONIC, &DerivationPath::default()).unwrap();
        let debug = format!("{:?} {:?}", keypair, material);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("abandon"));
        assert!(!debug.contains(keypair.to_base58_keypair().as_str()));
    }

    #[test]
    fn test_signature_verifies() {
        use ed25519_dalek::{Signature, Verifier, VerifyingKey};

        let keypair = Keypair::from_secret_bytes(&[11u8; 32]);
        let sig = keypair.sign(b"transfer");
        let vk = VerifyingKey::from_bytes(keypair.pubkey().as_bytes()).unwrap();
        assert!(vk.verify(b"transfer", &Signature::from_bytes(&sig)).is_ok());
    }
}
