//! Wallet creation command

use anyhow::{anyhow, Result};

use solace_wallet::WalletContext;

use super::{describe, print_success, print_warning, prompt_confirm, prompt_line};

/// Run the create command
pub async fn run(context: &WalletContext, name: Option<String>) -> Result<()> {
    let registry = context.registry();
    let wallet = registry
        .create_wallet(name.as_deref())
        .await
        .map_err(describe)?;

    let phrase = registry
        .export_mnemonic(&wallet.id)
        .await
        .map_err(describe)?
        .ok_or_else(|| anyhow!("New wallet has no recovery phrase"))?;
    let words: Vec<&str> = phrase.split_whitespace().collect();

    println!();
    println!("Your recovery phrase ({} words):", words.len());
    println!();

    // Display in 4 columns
    for (i, word) in words.iter().enumerate() {
        print!("{:>2}. {:<12}", i + 1, word);
        if (i + 1) % 4 == 0 {
            println!();
        }
    }
    println!();

    println!();
    print_warning("IMPORTANT: Write down your recovery phrase and store it safely!");
    print_warning("Anyone with this phrase can access your funds.");

    if prompt_confirm("Have you written down your recovery phrase?")? {
        // Verify by asking for a random word
        let verify_index = rand::random::<usize>() % words.len();
        let answer = prompt_line(&format!("Verify: Enter word #{}: ", verify_index + 1))?;
        if answer.as_str() != words[verify_index] {
            print_warning("That word does not match. Export the phrase again before funding.");
        }
    } else {
        print_warning("You can show it again with 'solace-wallet export --mnemonic'.");
    }

    println!();
    print_success(&format!("Wallet \"{}\" created", wallet.name));
    println!();
    println!("Your receiving address:");
    println!("  {}", wallet.address());
    if let Some(path) = &wallet.derivation_path {
        println!("Derivation path: {}", path);
    }

    Ok(())
}
