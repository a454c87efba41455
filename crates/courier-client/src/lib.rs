//! # courier-client — network and storage collaborators for Courier.
//!
//! Concrete implementations of the `courier-core` traits: the HTTP ledger,
//! file and in-memory blob stores, an alloy-backed Ethereum RPC, an
//! Esplora Bitcoin indexer and a mnemonic-backed local signer.
//!
//! # Modules
//!
//! - [`config`] — layered file/env configuration
//! - [`error`] — `ClientError` enum
//! - [`ledger`] — transfer ledger over HTTP
//! - [`blob`] — backup blob stores
//! - [`eth`] — Ethereum JSON-RPC
//! - [`btc`] — Esplora indexer
//! - [`signer`] — local BIP-32 signer

pub mod blob;
pub mod btc;
pub mod config;
pub mod error;
pub mod eth;
pub mod ledger;
pub mod signer;

use std::sync::Arc;

use courier_wallet::{EscrowKeyManager, EscrowWallet};
use tracing::info;

// Re-exports for convenient access
pub use blob::{FileBlobStore, MemoryBlobStore};
pub use btc::HttpBtcIndexer;
pub use config::CourierConfig;
pub use error::ClientError;
pub use eth::AlloyEthRpc;
pub use ledger::HttpLedgerClient;
pub use signer::LocalKeySigner;

/// A wired escrow wallet plus the RPC handle local signers share.
pub struct Courier {
    pub wallet: EscrowWallet,
    pub rpc: Arc<AlloyEthRpc>,
}

impl Courier {
    /// Build every collaborator from `config`. Fails before any network
    /// traffic when a URL or the network name is malformed.
    pub fn connect(config: &CourierConfig) -> Result<Self, ClientError> {
        let network = config.network()?;
        let http = config.http_client()?;
        let rpc = Arc::new(AlloyEthRpc::connect(&config.eth_rpc_url)?);
        let indexer = Arc::new(HttpBtcIndexer::new(
            http.clone(),
            &config.btc_indexer_url,
            config.btc_fee_target,
        ));
        let ledger = Arc::new(HttpLedgerClient::new(
            http,
            &config.ledger_url,
            config.ledger_client_id.clone(),
        ));
        let backups = Arc::new(FileBlobStore::new(config.backup_dir()));
        let keys = EscrowKeyManager::new(network)?;

        info!(
            ledger = %config.ledger_url,
            eth_rpc = %config.eth_rpc_url,
            btc_network = %network,
            "courier client configured"
        );
        let wallet = EscrowWallet::new(keys, rpc.clone(), indexer, ledger, backups);
        Ok(Self { wallet, rpc })
    }

    /// Confirm the Ethereum node serves the configured chain.
    pub async fn verify(&self, config: &CourierConfig) -> Result<(), ClientError> {
        self.rpc.verify_chain_id(config.chain_id).await
    }
}
