//! Wallet list, select, rename and delete commands

use anyhow::Result;

use solace_wallet::{amount, WalletContext};

use super::{describe, print_error, print_success, print_warning, prompt_confirm, resolve_wallet};

/// List known wallets, marking the selected one
pub async fn list(context: &WalletContext) -> Result<()> {
    let registry = context.registry();
    let wallets = registry.wallets();

    if wallets.is_empty() {
        println!("No wallets yet. Run 'solace-wallet create' or 'solace-wallet import'.");
        return Ok(());
    }

    let selected = registry.selected().map(|w| w.id);

    println!();
    println!("{:<2} {:<20} {:<44} {:>18}", "", "Name", "Address", "Balance");
    println!("{}", "-".repeat(87));
    for wallet in &wallets {
        let marker = if selected.as_deref() == Some(wallet.id.as_str()) {
            "*"
        } else {
            ""
        };
        let balance = wallet
            .balance_lamports
            .map(amount::format_sol)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<2} {:<20} {:<44} {:>18}",
            marker,
            wallet.name,
            wallet.address(),
            balance
        );
    }
    println!();
    println!("{} wallet(s); run 'solace-wallet balance --all' to refresh", wallets.len());

    Ok(())
}

/// Make a wallet the active one
pub async fn select(context: &WalletContext, query: &str) -> Result<()> {
    let wallet = resolve_wallet(context, Some(query))?;
    let wallet = context
        .registry()
        .select_wallet(&wallet.id)
        .await
        .map_err(describe)?;

    print_success(&format!("Selected \"{}\"", wallet.name));
    println!("  {}", wallet.address());
    Ok(())
}

/// Rename a wallet
pub async fn rename(context: &WalletContext, query: &str, new_name: &str) -> Result<()> {
    let wallet = resolve_wallet(context, Some(query))?;
    let renamed = context
        .registry()
        .rename_wallet(&wallet.id, new_name)
        .await
        .map_err(describe)?;

    if renamed {
        print_success(&format!("Renamed \"{}\" to \"{}\"", wallet.name, new_name.trim()));
    } else {
        print_error("Wallet not found");
    }
    Ok(())
}

/// Delete a wallet and its stored key
pub async fn delete(context: &WalletContext, query: &str, skip_confirm: bool) -> Result<()> {
    let registry = context.registry();
    let wallet = resolve_wallet(context, Some(query))?;

    if registry.len() <= 1 {
        print_error("Cannot delete the only wallet");
        return Ok(());
    }

    if !skip_confirm {
        print_warning(&format!(
            "Deleting \"{}\" removes its key from this device.",
            wallet.name
        ));
        print_warning("Funds stay on-chain but are lost without the recovery phrase or key.");
        if !prompt_confirm("Delete this wallet?")? {
            println!("Aborted.");
            return Ok(());
        }
    }

    if registry.delete_wallet(&wallet.id).await.map_err(describe)? {
        print_success(&format!("Deleted \"{}\"", wallet.name));
        if let Some(selected) = registry.selected() {
            println!("Selected wallet is now \"{}\"", selected.name);
        }
    } else {
        print_error("Wallet could not be deleted");
    }
    Ok(())
}
