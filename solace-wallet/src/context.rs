//! Process-wide wallet services, built once at startup and passed explicitly.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::WalletConfig;
use crate::error::Result;
use crate::executor::TransactionExecutor;
use crate::registry::WalletRegistry;
use crate::rpc::{RpcGateway, RpcTransport};
use crate::secure_store::{SecureKeyStore, SecureStorage};

/// Owns the store, the gateway, the registry and the executor.
pub struct WalletContext {
    config: WalletConfig,
    store: Arc<SecureKeyStore>,
    rpc: Arc<RpcGateway>,
    registry: Arc<WalletRegistry>,
    executor: TransactionExecutor,
}

impl WalletContext {
    /// Wire up services without touching storage or the network.
    pub fn new(
        config: WalletConfig,
        storage: Arc<dyn SecureStorage>,
        transport: Arc<dyn RpcTransport>,
    ) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(SecureKeyStore::new(storage));
        let rpc = Arc::new(RpcGateway::from_config(&config, transport));
        let registry = Arc::new(WalletRegistry::new(store.clone(), rpc.clone(), &config));
        let executor = TransactionExecutor::new(registry.clone(), rpc.clone(), &config);

        Ok(Self {
            config,
            store,
            rpc,
            registry,
            executor,
        })
    }

    /// Build the context, probe storage once and load stored wallets.
    ///
    /// Unavailable storage is not an error here; creation and import will
    /// refuse later. Loading prompts for authentication only when the index
    /// lists at least one wallet.
    pub async fn open(
        config: WalletConfig,
        storage: Arc<dyn SecureStorage>,
        transport: Arc<dyn RpcTransport>,
    ) -> Result<Self> {
        let context = Self::new(config, storage, transport)?;

        if !context.store.is_available().await {
            warn!("Secure storage is unavailable; wallets cannot be created or loaded");
            return Ok(context);
        }

        if context.has_stored_wallets().await? {
            context.registry.load().await?;
        }

        info!(
            "Wallet context ready ({}, {} endpoint(s))",
            context.config.cluster,
            context.rpc.endpoint_count()
        );
        Ok(context)
    }

    /// Whether the unauthenticated index lists any wallet.
    pub async fn has_stored_wallets(&self) -> Result<bool> {
        Ok(!self.store.load_index().await?.wallets.is_empty())
    }

    pub async fn storage_available(&self) -> bool {
        self.store.is_available().await
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<WalletRegistry> {
        &self.registry
    }

    pub fn rpc(&self) -> &Arc<RpcGateway> {
        &self.rpc
    }

    pub fn executor(&self) -> &TransactionExecutor {
        &self.executor
    }
}
