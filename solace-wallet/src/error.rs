//! Wallet Error Taxonomy
//!
//! Every fallible core operation returns a [`WalletError`]. Each variant maps
//! to a stable [`ErrorKind`] that callers can match on, and carries a
//! human-readable detail string for display.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used throughout the wallet core.
pub type Result<T> = std::result::Result<T, WalletError>;

/// Errors produced by the wallet core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// Input is neither a well-formed mnemonic nor a well-formed raw secret.
    #[error("invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// A wallet with the same public key already exists.
    #[error("wallet already exists as \"{existing_name}\" ({public_key})")]
    DuplicateWallet {
        existing_id: String,
        existing_name: String,
        public_key: String,
    },

    /// Secure storage is missing or failed its probe.
    #[error("secure storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The user declined, cancelled or failed device authentication.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Every configured RPC endpoint failed for a network reason.
    #[error("all RPC endpoints failed: {0}")]
    RpcEndpointFailure(String),

    /// The ledger itself rejected the transaction.
    #[error("transaction rejected: {0}")]
    TransactionRejected(String),

    /// Local pre-check: amount plus fee exceeds the cached balance.
    #[error("insufficient balance: need {required} lamports, have {available}")]
    InsufficientBalance { required: u64, available: u64 },

    /// Recipient is not a well-formed ledger address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Amount, memo or recipient combination is not a valid transfer.
    #[error("invalid transfer: {0}")]
    InvalidTransfer(String),

    /// No wallet with the given id is registered.
    #[error("wallet not found: {0}")]
    WalletNotFound(String),

    /// The network never reported the transaction at the target commitment.
    #[error("confirmation timed out: {0}")]
    ConfirmationTimeout(String),

    /// A stored record could not be decoded or re-derived.
    #[error("corrupt wallet record: {0}")]
    CorruptRecord(String),

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Stable, matchable classification of a [`WalletError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidKeyFormat,
    DuplicateWallet,
    StorageUnavailable,
    AuthenticationFailed,
    RpcEndpointFailure,
    TransactionRejected,
    InsufficientBalance,
    InvalidAddress,
    InvalidTransfer,
    WalletNotFound,
    ConfirmationTimeout,
    CorruptRecord,
    InvalidConfig,
}

impl ErrorKind {
    /// Stable identifier, suitable for logs and UI string tables.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidKeyFormat => "InvalidKeyFormat",
            Self::DuplicateWallet => "DuplicateWallet",
            Self::StorageUnavailable => "StorageUnavailable",
            Self::AuthenticationFailed => "AuthenticationFailed",
            Self::RpcEndpointFailure => "RpcEndpointFailure",
            Self::TransactionRejected => "TransactionRejected",
            Self::InsufficientBalance => "InsufficientBalance",
            Self::InvalidAddress => "InvalidAddress",
            Self::InvalidTransfer => "InvalidTransfer",
            Self::WalletNotFound => "WalletNotFound",
            Self::ConfirmationTimeout => "ConfirmationTimeout",
            Self::CorruptRecord => "CorruptRecord",
            Self::InvalidConfig => "InvalidConfig",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl WalletError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidKeyFormat(_) => ErrorKind::InvalidKeyFormat,
            Self::DuplicateWallet { .. } => ErrorKind::DuplicateWallet,
            Self::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
            Self::AuthenticationFailed(_) => ErrorKind::AuthenticationFailed,
            Self::RpcEndpointFailure(_) => ErrorKind::RpcEndpointFailure,
            Self::TransactionRejected(_) => ErrorKind::TransactionRejected,
            Self::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            Self::InvalidAddress(_) => ErrorKind::InvalidAddress,
            Self::InvalidTransfer(_) => ErrorKind::InvalidTransfer,
            Self::WalletNotFound(_) => ErrorKind::WalletNotFound,
            Self::ConfirmationTimeout(_) => ErrorKind::ConfirmationTimeout,
            Self::CorruptRecord(_) => ErrorKind::CorruptRecord,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
        }
    }

    /// Whether re-invoking the same operation can succeed without new input.
    ///
    /// Endpoint failures are retryable by the caller with backoff; the core
    /// never retries them automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed(_)
                | Self::RpcEndpointFailure(_)
                | Self::ConfirmationTimeout(_)
        )
    }

    /// Message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidKeyFormat(_) => {
                "That doesn't look like a valid recovery phrase or private key".to_string()
            }
            Self::DuplicateWallet { existing_name, .. } => {
                format!("This wallet is already imported as \"{}\"", existing_name)
            }
            Self::StorageUnavailable(_) => {
                "Secure storage is not available on this device".to_string()
            }
            Self::AuthenticationFailed(_) => "Authentication was not completed".to_string(),
            Self::RpcEndpointFailure(_) => {
                "Could not reach the network. Please try again shortly".to_string()
            }
            Self::TransactionRejected(msg) => format!("The network rejected the transfer: {}", msg),
            Self::InsufficientBalance { .. } => {
                "Not enough SOL to cover the amount and network fee".to_string()
            }
            other => other.to_string(),
        }
    }
}
