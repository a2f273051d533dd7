//! Wallet configuration.
//!
//! Loaded from `~/.solace-wallet/config.toml`. Every field has a default, so
//! an empty or missing file yields a working mainnet configuration.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WalletError};
use crate::keys::DerivationPath;

/// Name of the directory under `$HOME` holding wallet data
pub const DATA_DIR_NAME: &str = ".solace-wallet";

/// Name of the configuration file inside the data directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Upper bound for `refresh_concurrency`
const MAX_REFRESH_CONCURRENCY: usize = 16;

/// Ledger cluster the wallet talks to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Cluster {
    #[default]
    Mainnet,
    Devnet,
    Testnet,
}

impl Cluster {
    /// Public RPC endpoints used when none are configured.
    pub fn default_endpoints(&self) -> Vec<EndpointConfig> {
        let url = match self {
            Self::Mainnet => "https://api.mainnet-beta.solana.com",
            Self::Devnet => "https://api.devnet.solana.com",
            Self::Testnet => "https://api.testnet.solana.com",
        };
        vec![EndpointConfig::public(url)]
    }
}

impl fmt::Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mainnet => write!(f, "mainnet"),
            Self::Devnet => write!(f, "devnet"),
            Self::Testnet => write!(f, "testnet"),
        }
    }
}

/// How final a ledger state must be before the wallet trusts it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    #[default]
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Confirmed => "confirmed",
            Self::Finalized => "finalized",
        }
    }

    /// Parse a `confirmationStatus` string reported by a node.
    pub fn from_status(status: &str) -> Option<Self> {
        match status {
            "processed" => Some(Self::Processed),
            "confirmed" => Some(Self::Confirmed),
            "finalized" => Some(Self::Finalized),
            _ => None,
        }
    }
}

/// One RPC endpoint.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointConfig {
    pub url: String,

    /// Preferred endpoints are always tried before public ones
    #[serde(default)]
    pub preferred: bool,

    /// Bearer token sent to this endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl EndpointConfig {
    pub fn public(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            preferred: false,
            auth_token: None,
        }
    }

    pub fn preferred(url: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            url: url.into(),
            preferred: true,
            auth_token,
        }
    }
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("url", &self.url)
            .field("preferred", &self.preferred)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Wallet configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalletConfig {
    #[serde(default)]
    pub cluster: Cluster,

    /// RPC endpoints; empty means the cluster's public defaults
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,

    /// Per-attempt RPC timeout
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default)]
    pub commitment: Commitment,

    /// Path new mnemonic wallets are derived along
    #[serde(default)]
    pub derivation_path: DerivationPath,

    /// Length of generated recovery phrases (12 or 24)
    #[serde(default = "default_mnemonic_words")]
    pub mnemonic_words: usize,

    /// Maximum balance queries in flight during a refresh-all
    #[serde(default = "default_refresh_concurrency")]
    pub refresh_concurrency: usize,

    /// Fee assumed when the network cannot be asked
    #[serde(default = "default_fee_lamports")]
    pub default_fee_lamports: u64,

    #[serde(default = "default_confirmation_poll_ms")]
    pub confirmation_poll_ms: u64,

    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,

    /// How long an unlocked vault stays open; 0 prompts on every access
    #[serde(default = "default_auth_session_secs")]
    pub auth_session_secs: u64,

    /// Wallet data directory; defaults to `~/.solace-wallet`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_mnemonic_words() -> usize {
    12
}

fn default_refresh_concurrency() -> usize {
    4
}

fn default_fee_lamports() -> u64 {
    5_000
}

fn default_confirmation_poll_ms() -> u64 {
    1_000
}

fn default_confirmation_timeout_secs() -> u64 {
    60
}

fn default_auth_session_secs() -> u64 {
    300
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            cluster: Cluster::default(),
            endpoints: Vec::new(),
            request_timeout_ms: default_request_timeout_ms(),
            commitment: Commitment::default(),
            derivation_path: DerivationPath::default(),
            mnemonic_words: default_mnemonic_words(),
            refresh_concurrency: default_refresh_concurrency(),
            default_fee_lamports: default_fee_lamports(),
            confirmation_poll_ms: default_confirmation_poll_ms(),
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
            auth_session_secs: default_auth_session_secs(),
            data_dir: None,
        }
    }
}

impl WalletConfig {
    /// Configuration for a cluster with explicit endpoints, in priority order.
    pub fn with_endpoints(cluster: Cluster, endpoints: Vec<EndpointConfig>) -> Self {
        Self {
            cluster,
            endpoints,
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file; a missing file yields defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|e| {
            WalletError::InvalidConfig(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: WalletConfig = toml::from_str(&content)
            .map_err(|e| WalletError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as TOML with owner-only permissions.
    pub fn save(&self, path: &Path) -> Result<()> {
        let io_err =
            |e: std::io::Error| WalletError::InvalidConfig(format!("{}: {}", path.display(), e));

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| WalletError::InvalidConfig(format!("serialize: {}", e)))?;

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(path)
                .map_err(io_err)?;
            file.write_all(content.as_bytes()).map_err(io_err)?;
        }

        #[cfg(not(unix))]
        {
            fs::write(path, content).map_err(io_err)?;
        }

        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(WalletError::InvalidConfig(msg));

        for endpoint in &self.endpoints {
            let url = endpoint.url.trim();
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return invalid(format!("endpoint must be an http(s) URL: {}", url));
            }
            if endpoint.auth_token.as_deref().map_or(false, str::is_empty) {
                return invalid(format!("empty auth_token for {}", url));
            }
        }

        if self.request_timeout_ms == 0 {
            return invalid("request_timeout_ms must be greater than 0".into());
        }

        if self.mnemonic_words != 12 && self.mnemonic_words != 24 {
            return invalid(format!(
                "mnemonic_words must be 12 or 24, got {}",
                self.mnemonic_words
            ));
        }

        if self.refresh_concurrency == 0 || self.refresh_concurrency > MAX_REFRESH_CONCURRENCY {
            return invalid(format!(
                "refresh_concurrency must be between 1 and {}, got {}",
                MAX_REFRESH_CONCURRENCY, self.refresh_concurrency
            ));
        }

        if self.confirmation_poll_ms == 0 {
            return invalid("confirmation_poll_ms must be greater than 0".into());
        }

        if self.confirmation_timeout_secs * 1000 < self.confirmation_poll_ms {
            return invalid("confirmation_timeout_secs must cover at least one poll".into());
        }

        Ok(())
    }

    /// Endpoints in the order they are tried: preferred first, then public,
    /// each group keeping its configured order.
    pub fn ordered_endpoints(&self) -> Vec<EndpointConfig> {
        let configured = if self.endpoints.is_empty() {
            self.cluster.default_endpoints()
        } else {
            self.endpoints.clone()
        };
        let (mut preferred, public): (Vec<_>, Vec<_>) =
            configured.into_iter().partition(|e| e.preferred);
        preferred.extend(public);
        preferred
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn confirmation_poll_interval(&self) -> Duration {
        Duration::from_millis(self.confirmation_poll_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn auth_session(&self) -> Duration {
        Duration::from_secs(self.auth_session_secs)
    }

    /// Resolved data directory.
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_data_dir(),
        }
    }
}

/// `~/.solace-wallet`
pub fn default_data_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(DATA_DIR_NAME))
        .ok_or_else(|| WalletError::InvalidConfig("could not find home directory".into()))
}

/// `~/.solace-wallet/config.toml`
pub fn default_config_path() -> Result<PathBuf> {
    Ok(default_data_dir()?.join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = WalletConfig::default();
        assert_eq!(config.cluster, Cluster::Mainnet);
        assert_eq!(config.commitment, Commitment::Confirmed);
        assert_eq!(config.mnemonic_words, 12);
        assert_eq!(config.default_fee_lamports, 5_000);
        assert_eq!(config.derivation_path.to_string(), "m/44'/501'/0'/0'");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: WalletConfig = toml::from_str("").unwrap();
        assert_eq!(config, WalletConfig::default());
    }

    #[test]
    fn test_parse_toml() {
        let config: WalletConfig = toml::from_str(
            r#"
            cluster = "devnet"
            commitment = "finalized"
            derivation_path = "m/44'/501'/1'/0'"
            refresh_concurrency = 8

            [[endpoints]]
            url = "https://api.devnet.solana.com"

            [[endpoints]]
            url = "https://rpc.example.com"
            preferred = true
            auth_token = "secret-token"
            "#,
        )
        .unwrap();

        assert_eq!(config.cluster, Cluster::Devnet);
        assert_eq!(config.commitment, Commitment::Finalized);
        assert_eq!(config.derivation_path, DerivationPath::solana(1, 0));
        assert!(config.validate().is_ok());

        let ordered = config.ordered_endpoints();
        assert_eq!(ordered[0].url, "https://rpc.example.com");
        assert_eq!(ordered[1].url, "https://api.devnet.solana.com");
    }

    #[test]
    fn test_cluster_default_endpoints() {
        let config = WalletConfig {
            cluster: Cluster::Testnet,
            ..WalletConfig::default()
        };
        let endpoints = config.ordered_endpoints();
        assert_eq!(endpoints.len(), 1);
        assert!(endpoints[0].url.contains("testnet"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            WalletConfig {
                mnemonic_words: 18,
                ..WalletConfig::default()
            },
            WalletConfig {
                refresh_concurrency: 0,
                ..WalletConfig::default()
            },
            WalletConfig {
                refresh_concurrency: 64,
                ..WalletConfig::default()
            },
            WalletConfig {
                request_timeout_ms: 0,
                ..WalletConfig::default()
            },
            WalletConfig::with_endpoints(
                Cluster::Mainnet,
                vec![EndpointConfig::public("ftp://nope")],
            ),
        ];
        for config in bad {
            assert!(matches!(
                config.validate(),
                Err(WalletError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_token_is_redacted_in_debug() {
        let endpoint = EndpointConfig::preferred("https://rpc.example.com", Some("hunter2".into()));
        let debug = format!("{:?}", endpoint);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);

        assert_eq!(WalletConfig::from_file(&path).unwrap(), WalletConfig::default());

        let config = WalletConfig {
            cluster: Cluster::Devnet,
            confirmation_timeout_secs: 30,
            data_dir: Some(dir.path().to_path_buf()),
            ..WalletConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(WalletConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_commitment_ordering() {
        assert!(Commitment::Finalized > Commitment::Confirmed);
        assert!(Commitment::Confirmed > Commitment::Processed);
        assert_eq!(Commitment::from_status("finalized"), Some(Commitment::Finalized));
        assert_eq!(Commitment::from_status("bogus"), None);
    }
}
