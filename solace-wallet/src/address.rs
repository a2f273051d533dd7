//! Ledger Addresses
//!
//! A Solana address is the base58 encoding of a 32-byte Ed25519 public key.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::WalletError;

/// Length of a public key / address in bytes
pub const PUBKEY_LEN: usize = 32;

/// A 32-byte ledger public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Pubkey([u8; PUBKEY_LEN]);

/// The System Program, owner of every plain SOL account.
pub const SYSTEM_PROGRAM_ID: Pubkey = Pubkey([0u8; PUBKEY_LEN]);

/// SPL Memo program (v2).
pub const MEMO_PROGRAM_ID: &str = "MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr";

impl Pubkey {
    pub const fn new(bytes: [u8; PUBKEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn to_bytes(&self) -> [u8; PUBKEY_LEN] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; PUBKEY_LEN] {
        &self.0
    }

    /// Parse and validate a recipient address string.
    ///
    /// Surrounding whitespace is ignored. Anything that is not base58 or does
    /// not decode to exactly 32 bytes is rejected.
    pub fn parse(address: &str) -> Result<Self, WalletError> {
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Err(WalletError::InvalidAddress("address is empty".into()));
        }
        // 32 bytes encode to between 32 and 44 base58 characters
        if trimmed.len() > 44 {
            return Err(WalletError::InvalidAddress(format!(
                "address too long ({} characters)",
                trimmed.len()
            )));
        }

        let bytes = bs58::decode(trimmed)
            .into_vec()
            .map_err(|e| WalletError::InvalidAddress(format!("not base58: {}", e)))?;

        let bytes: [u8; PUBKEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
            WalletError::InvalidAddress(format!(
                "expected {} bytes, got {}",
                PUBKEY_LEN,
                bytes.len()
            ))
        })?;

        Ok(Self(bytes))
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pubkey({})", self)
    }
}

impl FromStr for Pubkey {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<[u8; PUBKEY_LEN]> for Pubkey {
    fn from(bytes: [u8; PUBKEY_LEN]) -> Self {
        Self(bytes)
    }
}

impl Serialize for Pubkey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Pubkey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Pubkey::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Returns the memo program id as a [`Pubkey`].
pub fn memo_program_id() -> Pubkey {
    // The constant is a valid 32-byte base58 key.
    Pubkey::parse(MEMO_PROGRAM_ID).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_program_encoding() {
        assert_eq!(
            SYSTEM_PROGRAM_ID.to_string(),
            "11111111111111111111111111111111"
        );
    }

    #[test]
    fn test_parse_valid_address() {
        let addr = Pubkey::parse(MEMO_PROGRAM_ID).unwrap();
        assert_eq!(addr.to_string(), MEMO_PROGRAM_ID);
        assert_eq!(memo_program_id(), addr);
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let addr = Pubkey::parse("  11111111111111111111111111111111\n").unwrap();
        assert_eq!(addr, SYSTEM_PROGRAM_ID);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Pubkey::parse("").is_err());
        // '0', 'O', 'I' and 'l' are not in the base58 alphabet
        assert!(Pubkey::parse("0OIl0OIl0OIl0OIl0OIl0OIl0OIl0OIl").is_err());
        // Valid base58, wrong length
        assert!(Pubkey::parse("3yZe7d").is_err());
        assert!(Pubkey::parse(&"1".repeat(45)).is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&SYSTEM_PROGRAM_ID).unwrap();
        assert_eq!(json, "\"11111111111111111111111111111111\"");
        let back: Pubkey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SYSTEM_PROGRAM_ID);
    }
}
