//! Transaction Building and Signing
//!
//! Builds legacy-format ledger transactions for a SOL transfer, optionally
//! followed by a memo instruction, and signs them locally. Private keys never
//! leave the wallet.
//!
//! Wire layout of the message:
//!
//! ```text
//! header            [num_signers=1, readonly_signed=0, readonly_unsigned=#programs]
//! account keys      compact-u16 len, 32-byte keys: from, to, system, [memo]
//! recent blockhash  32 bytes
//! instructions      compact-u16 len, each: program index, account indexes, data
//! ```

use std::fmt;

use crate::address::{memo_program_id, Pubkey, SYSTEM_PROGRAM_ID};
use crate::error::{Result, WalletError};
use crate::keys::{Keypair, SIGNATURE_LEN};

/// Largest memo the wallet will attach, in bytes
pub const MAX_MEMO_LEN: usize = 566;

/// Largest serialized transaction accepted by the network
pub const PACKET_DATA_SIZE: usize = 1232;

/// Index of the System Program's `Transfer` instruction
const SYSTEM_TRANSFER: u32 = 2;

/// A recent ledger blockhash; transactions referencing it expire after
/// roughly 150 blocks.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Blockhash([u8; 32]);

impl Blockhash {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn parse(s: &str) -> Result<Self> {
        let bytes = bs58::decode(s.trim())
            .into_vec()
            .map_err(|e| WalletError::InvalidTransfer(format!("blockhash not base58: {}", e)))?;
        let bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            WalletError::InvalidTransfer(format!("blockhash must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Blockhash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Blockhash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blockhash({})", self)
    }
}

/// Append `value` as a compact-u16 (7 bits per byte, little-endian).
pub fn encode_compact_u16(mut value: u16, out: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        byte |= 0x80;
        out.push(byte);
    }
}

fn compact_len(len: usize, out: &mut Vec<u8>) -> Result<()> {
    let len = u16::try_from(len)
        .map_err(|_| WalletError::InvalidTransfer("too many elements in transaction".into()))?;
    encode_compact_u16(len, out);
    Ok(())
}

/// An unsigned SOL transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferMessage {
    pub from: Pubkey,
    pub to: Pubkey,
    pub lamports: u64,
    /// Memo instruction payload (UTF-8 for plain memos)
    pub memo: Option<Vec<u8>>,
    pub recent_blockhash: Blockhash,
}

impl TransferMessage {
    pub fn new(from: Pubkey, to: Pubkey, lamports: u64, recent_blockhash: Blockhash) -> Self {
        Self {
            from,
            to,
            lamports,
            memo: None,
            recent_blockhash,
        }
    }

    pub fn with_memo(mut self, memo: Vec<u8>) -> Self {
        self.memo = Some(memo);
        self
    }

    /// Reject transfers the network would refuse or that make no sense.
    pub fn validate(&self) -> Result<()> {
        if self.lamports == 0 {
            return Err(WalletError::InvalidTransfer(
                "amount must be greater than zero".into(),
            ));
        }
        if self.from == self.to {
            return Err(WalletError::InvalidTransfer(
                "cannot transfer to the sending wallet".into(),
            ));
        }
        if let Some(memo) = &self.memo {
            if memo.is_empty() {
                return Err(WalletError::InvalidTransfer("memo is empty".into()));
            }
            if memo.len() > MAX_MEMO_LEN {
                return Err(WalletError::InvalidTransfer(format!(
                    "memo is {} bytes, limit is {}",
                    memo.len(),
                    MAX_MEMO_LEN
                )));
            }
        }
        Ok(())
    }

    /// Serialize the message bytes that get signed.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        self.validate()?;

        let mut keys = vec![self.from, self.to, SYSTEM_PROGRAM_ID];
        if self.memo.is_some() {
            keys.push(memo_program_id());
        }
        let num_programs = (keys.len() - 2) as u8;

        let mut out = Vec::with_capacity(256);

        // Header: the sender is the only signer and is writable
        out.extend_from_slice(&[1, 0, num_programs]);

        compact_len(keys.len(), &mut out)?;
        for key in &keys {
            out.extend_from_slice(key.as_bytes());
        }

        out.extend_from_slice(self.recent_blockhash.as_bytes());

        compact_len(keys.len() - 2, &mut out)?;

        // System transfer: program 2, accounts [from, to]
        out.push(2);
        compact_len(2, &mut out)?;
        out.extend_from_slice(&[0, 1]);
        let mut data = Vec::with_capacity(12);
        data.extend_from_slice(&SYSTEM_TRANSFER.to_le_bytes());
        data.extend_from_slice(&self.lamports.to_le_bytes());
        compact_len(data.len(), &mut out)?;
        out.extend_from_slice(&data);

        // Memo: program 3, no accounts
        if let Some(memo) = &self.memo {
            out.push(3);
            compact_len(0, &mut out)?;
            compact_len(memo.len(), &mut out)?;
            out.extend_from_slice(memo);
        }

        Ok(out)
    }

    /// Serialize and sign with `keypair`, which must own `from`.
    pub fn sign(&self, keypair: &Keypair) -> Result<SignedTransaction> {
        if keypair.pubkey() != self.from {
            return Err(WalletError::InvalidTransfer(
                "signing key does not match the sending wallet".into(),
            ));
        }

        let message = self.serialize()?;
        let signature = keypair.sign(&message);

        let mut wire = Vec::with_capacity(1 + SIGNATURE_LEN + message.len());
        encode_compact_u16(1, &mut wire);
        wire.extend_from_slice(&signature);
        wire.extend_from_slice(&message);

        if wire.len() > PACKET_DATA_SIZE {
            return Err(WalletError::InvalidTransfer(format!(
                "transaction is {} bytes, limit is {}",
                wire.len(),
                PACKET_DATA_SIZE
            )));
        }

        Ok(SignedTransaction { signature, wire })
    }
}

/// A fully signed transaction ready for submission.
#[derive(Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    signature: [u8; SIGNATURE_LEN],
    wire: Vec<u8>,
}

impl SignedTransaction {
    /// Transaction id: base58 of the fee payer's signature.
    pub fn signature(&self) -> String {
        bs58::encode(self.signature).into_string()
    }

    pub fn wire(&self) -> &[u8] {
        &self.wire
    }

    /// Message bytes (everything after the signature section)
    pub fn message(&self) -> &[u8] {
        &self.wire[1 + SIGNATURE_LEN..]
    }
}

impl fmt::Debug for SignedTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedTransaction")
            .field("signature", &self.signature())
            .field("size", &self.wire.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};

    fn sender() -> Keypair {
        Keypair::from_secret_bytes(&[7u8; 32])
    }

    fn message(from: Pubkey) -> TransferMessage {
        TransferMessage::new(from, Pubkey::new([9; 32]), 1_500_000_000, Blockhash::new([4; 32]))
    }

    #[test]
    fn test_compact_u16() {
        let cases: [(u16, &[u8]); 6] = [
            (0, &[0x00]),
            (0x7f, &[0x7f]),
            (0x80, &[0x80, 0x01]),
            (0xff, &[0xff, 0x01]),
            (0x3fff, &[0xff, 0x7f]),
            (0xffff, &[0xff, 0xff, 0x03]),
        ];
        for (value, expected) in cases {
            let mut out = Vec::new();
            encode_compact_u16(value, &mut out);
            assert_eq!(out, expected, "value {:#x}", value);
        }
    }

    #[test]
    fn test_transfer_layout() {
        let keypair = sender();
        let msg = message(keypair.pubkey()).serialize().unwrap();

        assert_eq!(&msg[..3], &[1, 0, 1]);
        assert_eq!(msg[3], 3);
        assert_eq!(&msg[4..36], keypair.pubkey().as_bytes());
        assert_eq!(&msg[36..68], &[9u8; 32]);
        assert_eq!(&msg[68..100], SYSTEM_PROGRAM_ID.as_bytes());
        assert_eq!(&msg[100..132], &[4u8; 32]);

        // One instruction: program 2, accounts [0, 1], 12 bytes of data
        assert_eq!(&msg[132..137], &[1, 2, 2, 0, 1]);
        assert_eq!(msg[137], 12);
        assert_eq!(&msg[138..142], &2u32.to_le_bytes());
        assert_eq!(&msg[142..150], &1_500_000_000u64.to_le_bytes());
        assert_eq!(msg.len(), 150);
    }

    #[test]
    fn test_memo_instruction() {
        let keypair = sender();
        let msg = message(keypair.pubkey())
            .with_memo(b"rent".to_vec())
            .serialize()
            .unwrap();

        assert_eq!(&msg[..3], &[1, 0, 2]);
        assert_eq!(msg[3], 4);
        assert_eq!(&msg[100..132], memo_program_id().as_bytes());
        assert_eq!(&msg[132..164], &[4u8; 32]);
        assert_eq!(msg[164], 2);
        // Memo follows the transfer: program 3, no accounts, 4 data bytes
        assert_eq!(&msg[msg.len() - 7..], &[3, 0, 4, b'r', b'e', b'n', b't']);
    }

    #[test]
    fn test_signature_covers_message() {
        let keypair = sender();
        let signed = message(keypair.pubkey()).sign(&keypair).unwrap();

        assert_eq!(signed.wire()[0], 1);
        let sig_bytes: [u8; 64] = signed.wire()[1..65].try_into().unwrap();
        let vk = VerifyingKey::from_bytes(keypair.pubkey().as_bytes()).unwrap();
        assert!(vk
            .verify(signed.message(), &Signature::from_bytes(&sig_bytes))
            .is_ok());
        assert_eq!(signed.signature(), bs58::encode(sig_bytes).into_string());
    }

    #[test]
    fn test_rejects_invalid_transfers() {
        let keypair = sender();
        let from = keypair.pubkey();

        let zero = TransferMessage::new(from, Pubkey::new([9; 32]), 0, Blockhash::default());
        assert!(matches!(zero.serialize(), Err(WalletError::InvalidTransfer(_))));

        let to_self = TransferMessage::new(from, from, 1, Blockhash::default());
        assert!(to_self.serialize().is_err());

        let long_memo = message(from).with_memo(vec![b'x'; MAX_MEMO_LEN + 1]);
        assert!(long_memo.serialize().is_err());

        let other = Keypair::from_secret_bytes(&[8u8; 32]);
        assert!(message(from).sign(&other).is_err());
    }

    #[test]
    fn test_max_memo_fits_packet() {
        let keypair = sender();
        let signed = message(keypair.pubkey())
            .with_memo(vec![b'x'; MAX_MEMO_LEN])
            .sign(&keypair)
            .unwrap();
        assert!(signed.wire().len() <= PACKET_DATA_SIZE);
    }

    #[test]
    fn test_blockhash_parse() {
        assert_eq!(
            Blockhash::parse("11111111111111111111111111111111").unwrap(),
            Blockhash::default()
        );
        assert!(Blockhash::parse("abc").is_err());
    }
}
