//! Lamport / SOL conversion and formatting.

use crate::error::{Result, WalletError};

/// Lamports per SOL
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Convert lamports to the display unit (SOL).
pub fn to_display(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

/// Convert a display amount (SOL) to lamports, rounding to the nearest lamport.
pub fn to_lamports(sol: f64) -> Result<u64> {
    if !sol.is_finite() {
        return Err(WalletError::InvalidTransfer("amount is not a number".into()));
    }
    if sol < 0.0 {
        return Err(WalletError::InvalidTransfer(
            "amount cannot be negative".into(),
        ));
    }

    let lamports = (sol * LAMPORTS_PER_SOL as f64).round();
    if lamports > u64::MAX as f64 {
        return Err(WalletError::InvalidTransfer("amount too large".into()));
    }
    Ok(lamports as u64)
}

/// Format lamports as SOL with full precision, trimming trailing zeros.
pub fn format_sol(lamports: u64) -> String {
    let whole = lamports / LAMPORTS_PER_SOL;
    let frac = lamports % LAMPORTS_PER_SOL;
    if frac == 0 {
        return format!("{} SOL", whole);
    }
    let frac = format!("{:09}", frac);
    format!("{}.{} SOL", whole, frac.trim_end_matches('0'))
}

/// Parse a SOL amount string ("1.5", "0.25 SOL") into lamports.
///
/// Parsing is exact on the decimal digits; more than nine fractional digits
/// is rejected rather than silently rounded.
pub fn parse_sol(input: &str) -> Result<u64> {
    let s = input
        .trim()
        .trim_end_matches("SOL")
        .trim_end_matches("sol")
        .trim();

    if s.is_empty() {
        return Err(WalletError::InvalidTransfer("empty amount".into()));
    }
    if s.starts_with('-') {
        return Err(WalletError::InvalidTransfer(
            "amount cannot be negative".into(),
        ));
    }

    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if frac.len() > 9 {
        return Err(WalletError::InvalidTransfer(
            "amount has more than 9 decimal places".into(),
        ));
    }
    let all_digits = |p: &str| p.chars().all(|c| c.is_ascii_digit());
    if !all_digits(whole) || !all_digits(frac) || (whole.is_empty() && frac.is_empty()) {
        return Err(WalletError::InvalidTransfer(format!(
            "invalid amount format: {}",
            input.trim()
        )));
    }

    let whole: u64 = if whole.is_empty() {
        0
    } else {
        whole
            .parse()
            .map_err(|_| WalletError::InvalidTransfer("amount too large".into()))?
    };
    let frac_lamports: u64 = if frac.is_empty() {
        0
    } else {
        format!("{:0<9}", frac)
            .parse()
            .map_err(|_| WalletError::InvalidTransfer("invalid fraction".into()))?
    };

    whole
        .checked_mul(LAMPORTS_PER_SOL)
        .and_then(|w| w.checked_add(frac_lamports))
        .ok_or_else(|| WalletError::InvalidTransfer("amount too large".into()))
}
