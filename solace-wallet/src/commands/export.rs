//! Wallet export/backup command

use anyhow::Result;
use std::fs;
use std::path::Path;

use solace_wallet::WalletContext;

use super::{describe, print_error, print_success, print_warning, prompt_confirm, resolve_wallet};

/// Run the export command
///
/// Exports the base58 keypair by default, or the recovery phrase with
/// `mnemonic`. Output goes to the screen unless a file is given.
pub async fn run(
    context: &WalletContext,
    wallet: Option<String>,
    mnemonic: bool,
    output: Option<String>,
) -> Result<()> {
    let wallet = resolve_wallet(context, wallet.as_deref())?;
    let registry = context.registry();
    let what = if mnemonic { "recovery phrase" } else { "private key" };

    println!();
    print_warning(&format!("IMPORTANT: Keep your {} secret!", what));
    print_warning("Anyone with it can access your funds.");
    println!();

    if !prompt_confirm(&format!("Export the {} of \"{}\"?", what, wallet.name))? {
        println!("Aborted.");
        return Ok(());
    }

    let secret = if mnemonic {
        match registry.export_mnemonic(&wallet.id).await.map_err(describe)? {
            Some(phrase) => phrase,
            None => {
                print_error("This wallet was imported from a private key and has no recovery phrase");
                return Ok(());
            }
        }
    } else {
        registry.export_private_key(&wallet.id).await.map_err(describe)?
    };

    if let Some(output_path) = output {
        let output_path = Path::new(&output_path);

        if output_path.exists() && !prompt_confirm("Output file exists. Overwrite?")? {
            println!("Aborted.");
            return Ok(());
        }

        let backup = zeroize::Zeroizing::new(format!(
            "# Solace Wallet Backup\n\
             # Created: {}\n\
             # Wallet: {}\n\
             # Address: {}\n\
             #\n\
             # KEEP THIS FILE SAFE AND SECRET!\n\
             \n\
             {}\n",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
            wallet.name,
            wallet.address(),
            secret.as_str()
        ));

        // Write with restricted permissions
        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(output_path)?;
            file.write_all(backup.as_bytes())?;
        }

        #[cfg(not(unix))]
        {
            fs::write(output_path, backup.as_bytes())?;
        }

        println!();
        print_success(&format!("Backup saved to: {}", output_path.display()));
        print_warning("Keep this file safe and secret!");
    } else {
        println!();
        println!("{}", secret.as_str());
        println!();
        println!("Address: {}", wallet.address());
    }

    Ok(())
}
