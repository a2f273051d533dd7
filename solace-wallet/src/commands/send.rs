//! Send transaction command

use anyhow::{anyhow, Result};
use futures::StreamExt;

use solace_wallet::{
    amount, Memo, Pubkey, TransactionOutcome, TransactionStatus, TransferPhase, TransferRequest,
    WalletContext,
};

use super::{describe, print_success, print_warning, prompt_confirm, resolve_wallet};

/// Options for one transfer
pub struct SendArgs {
    pub from: Option<String>,
    pub address: String,
    pub amount: String,
    pub memo: Option<String>,
    pub encrypt_memo: bool,
    pub skip_confirm: bool,
}

/// Run the send command
pub async fn run(context: &WalletContext, args: SendArgs) -> Result<()> {
    let wallet = resolve_wallet(context, args.from.as_deref())?;
    let registry = context.registry();
    let executor = context.executor();

    let lamports = amount::parse_sol(&args.amount).map_err(describe)?;
    let recipient = Pubkey::parse(&args.address).map_err(describe)?;

    let mut request = TransferRequest::new(wallet.id.clone(), recipient.to_string(), lamports);
    if let Some(text) = args.memo {
        let memo = if args.encrypt_memo {
            Memo::EncryptedForRecipient(text)
        } else {
            Memo::Plain(text)
        };
        request = request.with_memo(memo);
    } else if args.encrypt_memo {
        print_warning("--encrypt-memo has no effect without --memo");
    }

    println!();
    println!("Checking balance...");
    let balance = registry.refresh_balance(&wallet.id).await.map_err(describe)?;
    let fee = executor.estimate_fee(&request).await;
    request = request.with_fee_estimate(fee);

    let total = lamports.saturating_add(fee);
    ensure_funded(balance, total)?;

    // Show transaction details
    println!();
    println!("Transaction details:");
    println!("  From:      {} ({})", wallet.name, wallet.address());
    println!("  Recipient: {}", recipient);
    println!("  Amount:    {}", amount::format_sol(lamports));
    println!("  Fee:       {}", amount::format_sol(fee));
    println!("  Total:     {}", amount::format_sol(total));
    if let Some(memo) = &request.memo {
        match memo {
            Memo::Plain(text) => println!("  Memo:      {}", text),
            Memo::EncryptedForRecipient(_) => println!("  Memo:      (encrypted for recipient)"),
        }
    }
    println!();
    println!("  Balance after: {}", amount::format_sol(balance - total));

    if !args.skip_confirm {
        println!();
        if !prompt_confirm("Send this transaction?")? {
            println!("Aborted.");
            return Ok(());
        }
    }

    println!();
    println!("Signing and submitting...");

    let mut outcomes = executor.execute(request);
    while let Some(outcome) = outcomes.next().await {
        match outcome.status {
            TransactionStatus::Pending => {
                println!("Submitted; waiting for {} commitment...", context.rpc().commitment().as_str());
            }
            TransactionStatus::Success => {
                println!();
                print_success("Transaction confirmed!");
                println!();
                if let Some(signature) = &outcome.signature {
                    println!("Signature: {}", signature);
                }
            }
            TransactionStatus::Failed => return Err(transfer_failure(&outcome)),
        }
    }

    Ok(())
}

fn ensure_funded(balance: u64, total: u64) -> Result<()> {
    if balance < total {
        return Err(anyhow!(
            "Insufficient funds. Balance: {}, needed: {}",
            amount::format_sol(balance),
            amount::format_sol(total)
        ));
    }
    Ok(())
}

fn transfer_failure(outcome: &TransactionOutcome) -> anyhow::Error {
    let stage = match outcome.phase {
        TransferPhase::Building => "preparing the transfer",
        TransferPhase::Signing => "signing",
        TransferPhase::Submitting => "submitting",
        TransferPhase::Confirming => "confirming",
    };
    let message = outcome
        .error
        .as_ref()
        .map(|e| e.message.as_str())
        .unwrap_or("unknown error");
    anyhow!("Transfer failed while {}: {}", stage, message)
}
