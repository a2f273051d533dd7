//! Solace Wallet CLI
//!
//! A personal Solana wallet that keeps keys on this device.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use solace_wallet::{config, Cluster, WalletConfig};

mod commands;

#[derive(Parser)]
#[command(name = "solace-wallet")]
#[command(about = "Solace wallet - manage your SOL with keys that never leave this device")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Custom config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the cluster from the config file
    #[arg(long, global = true, value_parser = parse_cluster)]
    cluster: Option<Cluster>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new wallet with a fresh recovery phrase
    Create {
        /// Wallet name
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Import a wallet from a recovery phrase or private key
    Import {
        /// Wallet name
        #[arg(short, long)]
        name: Option<String>,

        /// Import a base58 or JSON-array private key instead of a phrase
        #[arg(long)]
        private_key: bool,
    },

    /// List wallets
    List,

    /// Select the active wallet
    Select {
        /// Wallet id, name or address
        wallet: String,
    },

    /// Rename a wallet
    Rename {
        /// Wallet id, name or address
        wallet: String,

        /// New name
        name: String,
    },

    /// Delete a wallet from this device
    Delete {
        /// Wallet id, name or address
        wallet: String,

        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Export a private key or recovery phrase
    Export {
        /// Wallet id, name or address (defaults to the selected wallet)
        #[arg(short, long)]
        wallet: Option<String>,

        /// Export the recovery phrase instead of the private key
        #[arg(long)]
        mnemonic: bool,

        /// Output file path
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Check wallet balance
    Balance {
        /// Wallet id, name or address (defaults to the selected wallet)
        #[arg(short, long)]
        wallet: Option<String>,

        /// Refresh every wallet
        #[arg(long)]
        all: bool,
    },

    /// Send SOL to an address
    Send {
        /// Recipient address
        address: String,

        /// Amount to send in SOL
        amount: String,

        /// Sending wallet (defaults to the selected wallet)
        #[arg(short, long)]
        from: Option<String>,

        /// Attach a memo
        #[arg(long)]
        memo: Option<String>,

        /// Encrypt the memo so only the recipient can read it
        #[arg(long)]
        encrypt_memo: bool,

        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Show RPC endpoints and their health
    Nodes {
        /// Contact the endpoints before printing
        #[arg(long)]
        check: bool,
    },
}

fn parse_cluster(value: &str) -> std::result::Result<Cluster, String> {
    match value.to_ascii_lowercase().as_str() {
        "mainnet" | "mainnet-beta" => Ok(Cluster::Mainnet),
        "devnet" => Ok(Cluster::Devnet),
        "testnet" => Ok(Cluster::Testnet),
        other => Err(format!("unknown cluster '{}'", other)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config_path = match cli.config {
        Some(path) => path,
        None => config::default_config_path()?,
    };
    let mut wallet_config = WalletConfig::from_file(&config_path)?;
    if let Some(cluster) = cli.cluster {
        if cluster != wallet_config.cluster {
            // Configured endpoints belong to the configured cluster
            wallet_config.endpoints.clear();
        }
        wallet_config.cluster = cluster;
    }

    let context = commands::open_context(wallet_config).await?;

    let result = match cli.command {
        Commands::Create { name } => commands::create::run(&context, name).await,
        Commands::Import { name, private_key } => {
            commands::import::run(&context, name, private_key).await
        }
        Commands::List => commands::manage::list(&context).await,
        Commands::Select { wallet } => commands::manage::select(&context, &wallet).await,
        Commands::Rename { wallet, name } => {
            commands::manage::rename(&context, &wallet, &name).await
        }
        Commands::Delete { wallet, yes } => {
            commands::manage::delete(&context, &wallet, yes).await
        }
        Commands::Export {
            wallet,
            mnemonic,
            output,
        } => commands::export::run(&context, wallet, mnemonic, output).await,
        Commands::Balance { wallet, all } => commands::balance::run(&context, wallet, all).await,
        Commands::Send {
            address,
            amount,
            from,
            memo,
            encrypt_memo,
            yes,
        } => {
            let args = commands::send::SendArgs {
                from,
                address,
                amount,
                memo,
                encrypt_memo,
                skip_confirm: yes,
            };
            commands::send::run(&context, args).await
        }
        Commands::Nodes { check } => commands::nodes::run(&context, check).await,
    };

    if let Err(e) = &result {
        commands::print_error(&e.to_string());
        std::process::exit(1);
    }
    Ok(())
}
