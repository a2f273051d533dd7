//! Balance check command

use anyhow::Result;

use solace_wallet::{amount, WalletContext};

use super::{describe, print_error, print_success, resolve_wallet};

/// Run the balance command
pub async fn run(context: &WalletContext, wallet: Option<String>, all: bool) -> Result<()> {
    let registry = context.registry();

    if all {
        println!("Refreshing {} wallet(s)...", registry.len());
        let results = registry.refresh_all_balances().await;

        println!();
        for (id, result) in results {
            let name = registry.wallet(&id).map(|w| w.name).unwrap_or(id);
            match result {
                Ok(lamports) => println!("  {:<20} {:>20}", name, amount::format_sol(lamports)),
                Err(e) => println!("  {:<20} {:>20}", name, e.user_message()),
            }
        }
        return Ok(());
    }

    let wallet = resolve_wallet(context, wallet.as_deref())?;

    println!();
    println!("Checking balance on {}...", context.config().cluster);

    match registry.refresh_balance(&wallet.id).await {
        Ok(lamports) => {
            println!();
            print_success(&format!("Balance: {}", amount::format_sol(lamports)));
            println!("  {} ({})", wallet.name, wallet.address());
            Ok(())
        }
        Err(e) => {
            if let Some(cached) = wallet.balance_lamports {
                print_error(&e.user_message());
                println!("Last known balance: {}", amount::format_sol(cached));
                Ok(())
            } else {
                Err(describe(e))
            }
        }
    }
}
