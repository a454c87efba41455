//! Layered configuration: built-in defaults, an optional TOML file, then
//! `COURIER_*` environment variables.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use bitcoin::Network;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Prefix of environment overrides, e.g. `COURIER_LEDGER_URL`.
pub const ENV_PREFIX: &str = "COURIER";

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("courier")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    /// Base URL of the transfer ledger (`POST {ledger_url}/transfer`).
    pub ledger_url: String,
    /// Client id sent with every ledger request.
    pub ledger_client_id: String,
    pub eth_rpc_url: String,
    pub chain_id: u64,
    /// Esplora-compatible indexer base URL.
    pub btc_indexer_url: String,
    /// `bitcoin`, `testnet`, `signet` or `regtest`.
    pub btc_network: String,
    /// Confirmation target (blocks) used when reading the fee oracle.
    pub btc_fee_target: u16,
    /// Holds the backup blob store.
    pub data_dir: PathBuf,
    pub log_level: String,
    pub request_timeout_secs: u64,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            ledger_url: "http://127.0.0.1:8080".to_string(),
            ledger_client_id: "test-client".to_string(),
            eth_rpc_url: "http://127.0.0.1:8545".to_string(),
            chain_id: 11_155_111,
            btc_indexer_url: "https://blockstream.info/testnet/api".to_string(),
            btc_network: "testnet".to_string(),
            btc_fee_target: 6,
            data_dir: default_data_dir(),
            log_level: "info".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl CourierConfig {
    /// Load from `path` (if given and present) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ClientError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path.to_path_buf()).required(false));
        }
        let layered = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()?;
        let config: Self = layered.try_deserialize()?;
        config.network()?;
        Ok(config)
    }

    pub fn network(&self) -> Result<Network, ClientError> {
        Network::from_str(&self.btc_network)
            .map_err(|e| ClientError::Config(format!("btc_network {:?}: {e}", self.btc_network)))
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.data_dir.join("backups")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Shared HTTP client honoring the request timeout.
    pub fn http_client(&self) -> Result<reqwest::Client, ClientError> {
        reqwest::Client::builder()
            .timeout(self.request_timeout())
            .build()
            .map_err(|e| ClientError::Config(format!("http client: {e}")))
    }
}
