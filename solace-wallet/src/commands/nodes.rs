//! Endpoint status command

use anyhow::Result;

use solace_wallet::WalletContext;

use super::{print_error, print_success};

/// Run the nodes command
///
/// With `check`, asks the endpoints for a blockhash first so the health
/// table reflects a fresh attempt.
pub async fn run(context: &WalletContext, check: bool) -> Result<()> {
    let rpc = context.rpc();

    if check {
        println!();
        println!("Checking endpoints...");
        match rpc.get_latest_blockhash().await {
            Ok(blockhash) => print_success(&format!("Network reachable (blockhash {})", blockhash)),
            Err(e) => print_error(&e.user_message()),
        }
    }

    let health = rpc.endpoint_health();

    println!();
    println!(
        "Endpoints for {} ({}, commitment {}):",
        context.config().cluster,
        health.len(),
        rpc.commitment().as_str()
    );
    println!();

    for endpoint in &health {
        let status = if endpoint.failures >= 3 {
            "\x1b[31munreachable\x1b[0m"
        } else if endpoint.failures > 0 {
            "\x1b[33mflaky\x1b[0m"
        } else if endpoint.last_success.is_some() {
            "\x1b[32mhealthy\x1b[0m"
        } else {
            "unknown"
        };
        let preferred = if endpoint.preferred { " (preferred)" } else { "" };

        println!("  {}{} [{}]", endpoint.display_url, preferred, status);

        let mut info = Vec::new();
        if let Some(latency) = endpoint.latency_ms {
            info.push(format!("latency: {}ms", latency));
        }
        if endpoint.total_failures > 0 {
            info.push(format!("failures: {}", endpoint.total_failures));
        }
        if let Some(err) = &endpoint.last_error {
            info.push(format!("last error: {}", err));
        }
        if !info.is_empty() {
            println!("    {}", info.join(", "));
        }
    }

    Ok(())
}
