//! Solace Wallet
//!
//! Key management and transfer execution for a personal Solana wallet.
//! Keys are derived and held locally and every transaction is signed on the
//! device; nodes are only asked for balances, blockhashes and confirmations.
//!
//! ## Security Model
//!
//! - Private keys never leave the wallet and are never logged
//! - Key material is stored behind user authentication and re-derived on use
//! - Duplicate or corrupted wallets are rejected before they are persisted
//! - A transfer either confirms or fails cleanly; it is never replayed

pub mod address;
pub mod amount;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod file_store;
pub mod keys;
pub mod memo;
pub mod registry;
pub mod rpc;
pub mod secmem;
pub mod secure_store;
pub mod transaction;

pub use address::Pubkey;
pub use config::{Cluster, Commitment, EndpointConfig, WalletConfig};
pub use context::WalletContext;
pub use error::{ErrorKind, Result, WalletError};
pub use executor::{
    ErrorDetail, TransactionExecutor, TransactionOutcome, TransactionStatus, TransferPhase, TransferRequest,
};
pub use file_store::{Authenticator, EncryptedFileStore};
pub use keys::{DerivationPath, Keypair};
pub use memo::Memo;
pub use registry::{ConnectionState, KeySource, Wallet, WalletRegistry};
pub use rpc::{HttpTransport, RpcGateway, RpcTransport};
pub use secure_store::{AccessPolicy, MemorySecureStorage, SecureKeyStore, SecureStorage, StorageError};
