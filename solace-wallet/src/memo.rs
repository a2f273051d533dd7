//! Transfer memos.
//!
//! A memo is either attached as plain UTF-8 or encrypted so that only the
//! sender and the recipient can read it. Encrypted memos are
//! `enc1:` + base64(nonce || ciphertext), sealed with ChaCha20-Poly1305 under
//! a key derived by HKDF-SHA256 from the X25519 shared secret of the two
//! wallets' Ed25519 keys.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use ed25519_dalek::VerifyingKey;
use hkdf::Hkdf;
use rand::Rng;
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroizing;

use crate::address::Pubkey;
use crate::error::{Result, WalletError};
use crate::keys::Keypair;
use crate::transaction::MAX_MEMO_LEN;

/// Marks an encrypted memo on the ledger
pub const ENCRYPTED_PREFIX: &str = "enc1:";

const HKDF_INFO: &[u8] = b"solace-memo-v1";
const NONCE_LEN: usize = 12;

/// A memo to attach to a transfer.
#[derive(Clone, PartialEq, Eq)]
pub enum Memo {
    Plain(String),
    /// Readable only by the sender and the recipient
    EncryptedForRecipient(String),
}

impl Memo {
    pub fn text(&self) -> &str {
        match self {
            Self::Plain(text) | Self::EncryptedForRecipient(text) => text,
        }
    }

    /// Bytes of the memo instruction for a transfer from `sender` to
    /// `recipient`.
    pub fn to_instruction_data(&self, sender: &Keypair, recipient: &Pubkey) -> Result<Vec<u8>> {
        if self.text().trim().is_empty() {
            return Err(WalletError::InvalidTransfer("memo is empty".into()));
        }
        let data = match self {
            Self::Plain(text) => text.as_bytes().to_vec(),
            Self::EncryptedForRecipient(text) => {
                encrypt_memo(text, sender, recipient)?.into_bytes()
            }
        };
        if data.len() > MAX_MEMO_LEN {
            return Err(WalletError::InvalidTransfer(format!(
                "memo is {} bytes on the ledger, limit is {}",
                data.len(),
                MAX_MEMO_LEN
            )));
        }
        Ok(data)
    }
}

impl std::fmt::Debug for Memo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain(text) => f.debug_tuple("Plain").field(text).finish(),
            Self::EncryptedForRecipient(_) => f.write_str("EncryptedForRecipient(..)"),
        }
    }
}

/// Encrypt `plaintext` from `sender` to `recipient`.
pub fn encrypt_memo(plaintext: &str, sender: &Keypair, recipient: &Pubkey) -> Result<String> {
    let key = shared_key(sender, recipient)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill(&mut nonce_bytes);

    let cipher = ChaCha20Poly1305::new_from_slice(&key[..])
        .map_err(|_| WalletError::InvalidTransfer("failed to create memo cipher".into()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
        .map_err(|_| WalletError::InvalidTransfer("memo encryption failed".into()))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(format!("{}{}", ENCRYPTED_PREFIX, BASE64.encode(sealed)))
}

/// Decrypt a memo exchanged between `keypair` and `counterparty`, whichever
/// side sent it.
pub fn decrypt_memo(memo: &str, keypair: &Keypair, counterparty: &Pubkey) -> Result<String> {
    let encoded = memo
        .strip_prefix(ENCRYPTED_PREFIX)
        .ok_or_else(|| WalletError::InvalidTransfer("memo is not encrypted".into()))?;
    let sealed = BASE64
        .decode(encoded)
        .map_err(|_| WalletError::InvalidTransfer("encrypted memo is not base64".into()))?;
    if sealed.len() < NONCE_LEN {
        return Err(WalletError::InvalidTransfer("encrypted memo too short".into()));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

    let key = shared_key(keypair, counterparty)?;
    let cipher = ChaCha20Poly1305::new_from_slice(&key[..])
        .map_err(|_| WalletError::InvalidTransfer("failed to create memo cipher".into()))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| WalletError::InvalidTransfer("memo decryption failed".into()))?;

    String::from_utf8(plaintext)
        .map_err(|_| WalletError::InvalidTransfer("memo is not valid UTF-8".into()))
}

pub fn is_encrypted(memo: &str) -> bool {
    memo.starts_with(ENCRYPTED_PREFIX)
}

/// Symmetric key for the pair; identical from either side.
fn shared_key(own: &Keypair, other: &Pubkey) -> Result<Zeroizing<[u8; 32]>> {
    let other_ed = VerifyingKey::from_bytes(other.as_bytes()).map_err(|_| {
        WalletError::InvalidAddress("recipient is not an Ed25519 public key".into())
    })?;
    let other_x = X25519Public::from(other_ed.to_montgomery().to_bytes());
    let secret = StaticSecret::from(*own.x25519_secret());

    let shared = secret.diffie_hellman(&other_x);
    if !shared.was_contributory() {
        return Err(WalletError::InvalidAddress(
            "recipient key cannot receive encrypted memos".into(),
        ));
    }

    // Order the keys so both sides derive the same context
    let own_pub = own.pubkey();
    let (first, second) = if own_pub <= *other {
        (own_pub, *other)
    } else {
        (*other, own_pub)
    };
    let mut info = Vec::with_capacity(HKDF_INFO.len() + 64);
    info.extend_from_slice(HKDF_INFO);
    info.extend_from_slice(first.as_bytes());
    info.extend_from_slice(second.as_bytes());

    let hkdf = Hkdf::<Sha256>::new(None, shared.as_bytes());
    let mut key = Zeroizing::new([0u8; 32]);
    hkdf.expand(&info, &mut key[..])
        .map_err(|_| WalletError::InvalidTransfer("memo key derivation failed".into()))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_sides_can_read() {
        let alice = Keypair::from_secret_bytes(&[1u8; 32]);
        let bob = Keypair::from_secret_bytes(&[2u8; 32]);

        let sealed = encrypt_memo("dinner on friday", &alice, &bob.pubkey()).unwrap();
        assert!(is_encrypted(&sealed));
        assert!(!sealed.contains("dinner"));

        assert_eq!(
            decrypt_memo(&sealed, &bob, &alice.pubkey()).unwrap(),
            "dinner on friday"
        );
        assert_eq!(
            decrypt_memo(&sealed, &alice, &bob.pubkey()).unwrap(),
            "dinner on friday"
        );
    }

    #[test]
    fn test_third_party_cannot_read() {
        let alice = Keypair::from_secret_bytes(&[1u8; 32]);
        let bob = Keypair::from_secret_bytes(&[2u8; 32]);
        let eve = Keypair::from_secret_bytes(&[3u8; 32]);

        let sealed = encrypt_memo("secret", &alice, &bob.pubkey()).unwrap();
        assert!(decrypt_memo(&sealed, &eve, &alice.pubkey()).is_err());
    }

    #[test]
    fn test_nonce_is_fresh() {
        let alice = Keypair::from_secret_bytes(&[1u8; 32]);
        let bob = Keypair::from_secret_bytes(&[2u8; 32]);
        let a = encrypt_memo("same", &alice, &bob.pubkey()).unwrap();
        let b = encrypt_memo("same", &alice, &bob.pubkey()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_instruction_data() {
        let alice = Keypair::from_secret_bytes(&[1u8; 32]);
        let bob = Keypair::from_secret_bytes(&[2u8; 32]).pubkey();

        let plain = Memo::Plain("invoice 42".into());
        assert_eq!(plain.to_instruction_data(&alice, &bob).unwrap(), b"invoice 42");

        let sealed = Memo::EncryptedForRecipient("invoice 42".into())
            .to_instruction_data(&alice, &bob)
            .unwrap();
        assert!(sealed.starts_with(ENCRYPTED_PREFIX.as_bytes()));

        assert!(Memo::Plain("   ".into()).to_instruction_data(&alice, &bob).is_err());
        assert!(Memo::Plain("x".repeat(MAX_MEMO_LEN + 1))
            .to_instruction_data(&alice, &bob)
            .is_err());
    }

    #[test]
    fn test_debug_hides_encrypted_text() {
        let memo = Memo::EncryptedForRecipient("private".into());
        assert!(!format!("{:?}", memo).contains("private"));
    }

    #[test]
    fn test_rejects_malformed() {
        let alice = Keypair::from_secret_bytes(&[1u8; 32]);
        let bob = Keypair::from_secret_bytes(&[2u8; 32]).pubkey();
        assert!(decrypt_memo("plain text", &alice, &bob).is_err());
        assert!(decrypt_memo("enc1:!!!", &alice, &bob).is_err());
        assert!(decrypt_memo("enc1:AAAA", &alice, &bob).is_err());
    }
}
