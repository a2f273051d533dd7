//! CLI Commands
//!
//! Implementation of all wallet CLI commands.

pub mod balance;
pub mod create;
pub mod export;
pub mod import;
pub mod manage;
pub mod nodes;
pub mod send;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::io::{self, Write};
use std::sync::Arc;
use tracing::debug;
use zeroize::Zeroizing;

use solace_wallet::{
    Authenticator, EncryptedFileStore, HttpTransport, StorageError, Wallet, WalletConfig,
    WalletContext, WalletError,
};

/// Minimum passphrase length accepted when a vault is created
const MIN_PASSPHRASE_LEN: usize = 8;

/// Prompt for password input (hidden)
pub fn prompt_password(prompt: &str) -> Result<Zeroizing<String>> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let password = rpassword::read_password()?;
    Ok(Zeroizing::new(password))
}

/// Prompt for confirmation
pub fn prompt_confirm(message: &str) -> Result<bool> {
    print!("{} [y/N]: ", message);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    Ok(input.trim().eq_ignore_ascii_case("y") || input.trim().eq_ignore_ascii_case("yes"))
}

/// Read one visible line, e.g. a recovery phrase typed in full
pub fn prompt_line(prompt: &str) -> Result<Zeroizing<String>> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut input = Zeroizing::new(String::new());
    io::stdin().read_line(&mut input)?;
    Ok(Zeroizing::new(input.trim().to_string()))
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("\x1b[31mError:\x1b[0m {}", message);
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("\x1b[32m{}\x1b[0m", message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("\x1b[33mWarning:\x1b[0m {}", message);
}

/// Asks for the vault passphrase on the terminal.
///
/// An empty answer cancels the operation.
pub struct TerminalAuthenticator;

#[async_trait]
impl Authenticator for TerminalAuthenticator {
    async fn passphrase(
        &self,
        prompt: &str,
        first_use: bool,
    ) -> std::result::Result<Zeroizing<String>, StorageError> {
        let prompt = prompt.to_string();
        tokio::task::spawn_blocking(move || read_passphrase(&prompt, first_use))
            .await
            .map_err(|e| StorageError::Unavailable(format!("prompt task failed: {}", e)))?
    }
}

fn read_passphrase(
    prompt: &str,
    first_use: bool,
) -> std::result::Result<Zeroizing<String>, StorageError> {
    let terminal = |e: anyhow::Error| StorageError::Unavailable(format!("terminal: {}", e));

    println!("{}", prompt);
    if !first_use {
        let passphrase = prompt_password("Vault passphrase: ").map_err(terminal)?;
        if passphrase.is_empty() {
            return Err(StorageError::AuthenticationFailed("cancelled".into()));
        }
        return Ok(passphrase);
    }

    println!("Choose a passphrase to protect your wallets on this device.");
    loop {
        let passphrase = prompt_password("New vault passphrase: ").map_err(terminal)?;
        if passphrase.is_empty() {
            return Err(StorageError::AuthenticationFailed("cancelled".into()));
        }
        if passphrase.len() < MIN_PASSPHRASE_LEN {
            print_error(&format!(
                "Passphrase must be at least {} characters",
                MIN_PASSPHRASE_LEN
            ));
            continue;
        }

        let confirm = prompt_password("Confirm passphrase: ").map_err(terminal)?;
        if *passphrase != *confirm {
            print_error("Passphrases do not match");
            continue;
        }
        return Ok(passphrase);
    }
}

/// Build the wallet context on the encrypted vault and public RPC.
pub async fn open_context(config: WalletConfig) -> Result<WalletContext> {
    let data_dir = config.data_dir()?;
    let ttl = config.auth_session();
    let store = EncryptedFileStore::new(data_dir, Arc::new(TerminalAuthenticator))
        .with_session_ttl(ttl);
    let transport = HttpTransport::new()?;

    let context = WalletContext::open(config, Arc::new(store), Arc::new(transport))
        .await
        .map_err(describe)?;
    Ok(context)
}

/// Wallet named by `query` (id, name or address), or the selected one.
pub fn resolve_wallet(context: &WalletContext, query: Option<&str>) -> Result<Wallet> {
    let registry = context.registry();
    match query {
        Some(query) => registry
            .find(query)
            .ok_or_else(|| anyhow!("No wallet matches '{}'", query)),
        None => registry
            .selected()
            .ok_or_else(|| anyhow!("No wallet found. Run 'solace-wallet create' first.")),
    }
}

/// Turn a wallet error into its user-facing text.
pub fn describe(err: WalletError) -> anyhow::Error {
    debug!("{} ({})", err, err.kind().as_str());
    anyhow!(err.user_message())
}
