//! Wallet import command

use anyhow::Result;

use solace_wallet::{KeySource, WalletContext, WalletError};

use super::{describe, print_error, print_success, prompt_line, prompt_password};

/// Run the import command
///
/// Reads a recovery phrase, or a base58 / JSON-array keypair when `raw` is
/// set. Raw keys are read without echo.
pub async fn run(context: &WalletContext, name: Option<String>, raw: bool) -> Result<()> {
    let input = if raw {
        prompt_password("Paste private key: ")?
    } else {
        println!();
        println!("Enter your 12 or 24-word recovery phrase on one line:");
        prompt_line("> ")?
    };

    let result = context
        .registry()
        .import_wallet(&input, name.as_deref())
        .await;

    let wallet = match result {
        Ok(wallet) => wallet,
        Err(WalletError::DuplicateWallet {
            existing_name,
            public_key,
            ..
        }) => {
            print_error(&format!(
                "This wallet is already imported as \"{}\" ({})",
                existing_name, public_key
            ));
            return Ok(());
        }
        Err(e) => return Err(describe(e)),
    };

    println!();
    print_success(&format!("Wallet \"{}\" imported", wallet.name));
    println!("  Address: {}", wallet.address());
    match wallet.source {
        KeySource::Mnemonic => {
            if let Some(path) = &wallet.derivation_path {
                println!("  Path:    {}", path);
            }
        }
        KeySource::RawSecret => println!("  Source:  private key"),
    }

    Ok(())
}
