//! Transaction Executor
//!
//! Drives one transfer through `Building → Signing → Submitting → Pending`
//! and on to `Success` or `Failed`, reporting each step as a
//! [`TransactionOutcome`] on a stream.
//!
//! Transfers from the same wallet are serialized: the wallet's lock is held
//! from Building until the terminal outcome. A submitted payload is never
//! resubmitted; retrying means building and signing a new transaction.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures::channel::mpsc;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::address::Pubkey;
use crate::config::{Commitment, WalletConfig};
use crate::error::{ErrorKind, Result, WalletError};
use crate::memo::Memo;
use crate::registry::WalletRegistry;
use crate::rpc::RpcGateway;
use crate::transaction::{Blockhash, SignedTransaction, TransferMessage};

/// A transfer to execute. Ephemeral; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Id of the sending wallet
    pub from_wallet: String,
    /// Recipient address as entered by the user
    pub to_address: String,
    pub amount_lamports: u64,
    pub memo: Option<Memo>,
    /// Fee used for the balance check; the configured default when unset
    pub fee_estimate_lamports: Option<u64>,
}

impl TransferRequest {
    pub fn new(from_wallet: impl Into<String>, to_address: impl Into<String>, amount_lamports: u64) -> Self {
        Self {
            from_wallet: from_wallet.into(),
            to_address: to_address.into(),
            amount_lamports,
            memo: None,
            fee_estimate_lamports: None,
        }
    }

    pub fn with_memo(mut self, memo: Memo) -> Self {
        self.memo = Some(memo);
        self
    }

    pub fn with_fee_estimate(mut self, lamports: u64) -> Self {
        self.fee_estimate_lamports = Some(lamports);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

/// Pipeline step an outcome was produced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransferPhase {
    Building,
    Signing,
    Submitting,
    Confirming,
}

/// Error kind plus human-readable text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&WalletError> for ErrorDetail {
    fn from(err: &WalletError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// One report on the progress of a transfer.
///
/// `signature` is set only on `Success`; `error` only on `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionOutcome {
    pub status: TransactionStatus,
    pub phase: TransferPhase,
    pub signature: Option<String>,
    pub error: Option<ErrorDetail>,
}

impl TransactionOutcome {
    fn pending() -> Self {
        Self {
            status: TransactionStatus::Pending,
            phase: TransferPhase::Confirming,
            signature: None,
            error: None,
        }
    }

    fn success(signature: String) -> Self {
        Self {
            status: TransactionStatus::Success,
            phase: TransferPhase::Confirming,
            signature: Some(signature),
            error: None,
        }
    }

    fn failed(phase: TransferPhase, err: &WalletError) -> Self {
        Self {
            status: TransactionStatus::Failed,
            phase,
            signature: None,
            error: Some(err.into()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != TransactionStatus::Pending
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Builds, signs, submits and confirms transfers.
#[derive(Clone)]
pub struct TransactionExecutor {
    registry: Arc<WalletRegistry>,
    rpc: Arc<RpcGateway>,
    default_fee: u64,
    poll_interval: Duration,
    confirmation_timeout: Duration,
    commitment: Commitment,
    wallet_locks: Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl TransactionExecutor {
    pub fn new(registry: Arc<WalletRegistry>, rpc: Arc<RpcGateway>, config: &WalletConfig) -> Self {
        Self {
            registry,
            rpc,
            default_fee: config.default_fee_lamports,
            poll_interval: config.confirmation_poll_interval(),
            confirmation_timeout: config.confirmation_timeout(),
            commitment: config.commitment,
            wallet_locks: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// Start a transfer; outcomes arrive on the returned stream, which ends
    /// after the terminal outcome.
    pub fn execute(&self, request: TransferRequest) -> mpsc::UnboundedReceiver<TransactionOutcome> {
        let (tx, rx) = mpsc::unbounded();
        let executor = self.clone();
        tokio::spawn(async move {
            executor.run(request, tx).await;
        });
        rx
    }

    /// Execute and wait for the terminal outcome.
    pub async fn execute_and_wait(&self, request: TransferRequest) -> TransactionOutcome {
        let mut outcomes = self.execute(request);
        let mut last = None;
        while let Some(outcome) = outcomes.next().await {
            if outcome.is_terminal() {
                return outcome;
            }
            last = Some(outcome);
        }
        unfinished(last)
    }

    /// Network fee for a transfer; the configured default when the network
    /// cannot say.
    pub async fn estimate_fee(&self, request: &TransferRequest) -> u64 {
        match self.query_fee(request).await {
            Ok(Some(fee)) => fee,
            Ok(None) => self.default_fee,
            Err(e) => {
                debug!("Fee estimate unavailable, using default: {}", e);
                self.default_fee
            }
        }
    }

    async fn query_fee(&self, request: &TransferRequest) -> Result<Option<u64>> {
        let wallet = self
            .registry
            .wallet(&request.from_wallet)
            .ok_or_else(|| WalletError::WalletNotFound(request.from_wallet.clone()))?;
        let to = Pubkey::parse(&request.to_address)?;
        let blockhash = self.rpc.get_latest_blockhash().await?;

        // The fee depends on the accounts and signatures, not the memo text
        let mut message = TransferMessage::new(
            wallet.public_key,
            to,
            request.amount_lamports.max(1),
            blockhash,
        );
        if let Some(memo) = &request.memo {
            message = message.with_memo(memo.text().as_bytes().to_vec());
        }
        self.rpc.get_fee_for_message(&message.serialize()?).await
    }

    fn wallet_lock(&self, wallet_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.wallet_locks.lock().unwrap_or_else(|e| e.into_inner());
        // Drop idle locks of deleted wallets
        locks.retain(|id, lock| Arc::strong_count(lock) > 1 || self.registry.wallet(id).is_some());
        locks
            .entry(wallet_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn run(&self, request: TransferRequest, tx: mpsc::UnboundedSender<TransactionOutcome>) {
        let emit = |outcome: TransactionOutcome| {
            // A dropped receiver does not cancel the transfer
            let _ = tx.unbounded_send(outcome);
        };

        let _guard = self.wallet_lock(&request.from_wallet).lock_owned().await;

        let (to, blockhash) = match self.build(&request).await {
            Ok(built) => built,
            Err(e) => {
                info!("Transfer rejected while building: {}", e);
                emit(TransactionOutcome::failed(TransferPhase::Building, &e));
                return;
            }
        };

        let signed = match self.sign(&request, to, blockhash).await {
            Ok(signed) => signed,
            Err(e) => {
                info!("Transfer not signed: {}", e);
                emit(TransactionOutcome::failed(TransferPhase::Signing, &e));
                return;
            }
        };

        let signature = signed.signature();
        match self.rpc.submit_transaction(signed.wire()).await {
            Ok(reported) => {
                if reported != signature {
                    warn!("Node reported signature {} for {}", reported, signature);
                }
                info!("Submitted transaction {}", signature);
            }
            Err(e) => {
                warn!("Submission failed: {}", e);
                emit(TransactionOutcome::failed(TransferPhase::Submitting, &e));
                return;
            }
        }

        emit(TransactionOutcome::pending());

        match self.confirm(&signature).await {
            Ok(()) => {
                info!("Transaction {} confirmed", signature);
                emit(TransactionOutcome::success(signature));
                if let Err(e) = self.registry.refresh_balance(&request.from_wallet).await {
                    debug!("Post-transfer balance refresh failed: {}", e);
                    self.registry.invalidate_balance(&request.from_wallet);
                }
            }
            Err(e) => {
                warn!("Transaction {} failed: {}", signature, e);
                // The payload may still land
                self.registry.invalidate_balance(&request.from_wallet);
                emit(TransactionOutcome::failed(TransferPhase::Confirming, &e));
            }
        }
    }

    /// Validate the request against the cached balance and fetch a blockhash.
    async fn build(&self, request: &TransferRequest) -> Result<(Pubkey, Blockhash)> {
        let wallet = self
            .registry
            .wallet(&request.from_wallet)
            .ok_or_else(|| WalletError::WalletNotFound(request.from_wallet.clone()))?;

        let to = Pubkey::parse(&request.to_address)?;
        if request.amount_lamports == 0 {
            return Err(WalletError::InvalidTransfer(
                "amount must be greater than zero".into(),
            ));
        }
        if to == wallet.public_key {
            return Err(WalletError::InvalidTransfer(
                "cannot transfer to the sending wallet".into(),
            ));
        }

        let fee = request.fee_estimate_lamports.unwrap_or(self.default_fee);
        let required = request
            .amount_lamports
            .checked_add(fee)
            .ok_or_else(|| WalletError::InvalidTransfer("amount too large".into()))?;

        let available = match wallet.balance_lamports {
            Some(balance) => balance,
            None => self.registry.refresh_balance(&wallet.id).await?,
        };
        if required > available {
            return Err(WalletError::InsufficientBalance {
                required,
                available,
            });
        }

        let blockhash = self.rpc.get_latest_blockhash().await?;
        Ok((to, blockhash))
    }

    async fn sign(
        &self,
        request: &TransferRequest,
        to: Pubkey,
        blockhash: Blockhash,
    ) -> Result<SignedTransaction> {
        let keypair = self
            .registry
            .signing_keypair(&request.from_wallet, "Approve transfer")
            .await?;

        let mut message = TransferMessage::new(keypair.pubkey(), to, request.amount_lamports, blockhash);
        if let Some(memo) = &request.memo {
            message = message.with_memo(memo.to_instruction_data(&keypair, &to)?);
        }
        message.sign(&keypair)
    }

    /// Poll until the configured commitment is reached, an on-chain error is
    /// reported, or the deadline passes.
    async fn confirm(&self, signature: &str) -> Result<()> {
        let deadline = Instant::now() + self.confirmation_timeout;

        let last_error = loop {
            let current = match self.rpc.get_signature_status(signature).await {
                Ok(Some(status)) => {
                    if let Some(err) = &status.err {
                        return Err(WalletError::TransactionRejected(format!(
                            "failed on-chain: {}",
                            err
                        )));
                    }
                    if status.reached(self.commitment) {
                        return Ok(());
                    }
                    None
                }
                Ok(None) => None,
                Err(e) => Some(e),
            };

            if Instant::now() + self.poll_interval > deadline {
                break current;
            }
            tokio::time::sleep(self.poll_interval).await;
        };

        match last_error {
            Some(e @ WalletError::RpcEndpointFailure(_)) => Err(e),
            _ => Err(WalletError::ConfirmationTimeout(format!(
                "{} not {} within {}s",
                signature,
                self.commitment.as_str(),
                self.confirmation_timeout.as_secs()
            ))),
        }
    }
}

/// Terminal report for a stream that closed without one.
fn unfinished(last: Option<TransactionOutcome>) -> TransactionOutcome {
    let phase = last.as_ref().map_or(TransferPhase::Building, |o| o.phase);
    let err = match last {
        Some(outcome) if outcome.status == TransactionStatus::Pending => {
            WalletError::ConfirmationTimeout("transfer task ended while confirming".into())
        }
        _ => WalletError::InvalidTransfer("transfer task ended without an outcome".into()),
    };
    TransactionOutcome::failed(phase, &err)
}
