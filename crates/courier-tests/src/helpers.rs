//! Shared fixtures for the end-to-end tests.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use bitcoin::Network;
use courier_client::{LocalKeySigner, MemoryBlobStore};
use courier_core::traits::Signer;
use courier_core::types::{CryptoType, Password, TransferRequest, WalletType};
use courier_wallet::{EscrowKeyManager, EscrowWallet};

use crate::chain::FakeChain;
use crate::ledger::MemoryLedger;

/// BIP-39 test mnemonic. Account 0 is `0xf39F…2266`.
pub const PHRASE: &str = "test test test test test test test test test test test junk";
pub const CHAIN_ID: u64 = 11_155_111;
/// 1 gwei.
pub const GAS_PRICE: u128 = 1_000_000_000;
/// Rate the fake indexer recommends for payouts.
pub const BTC_FEE_RATE: u64 = 10;

pub const SENDER: &str = "alice@x.com";
pub const DESTINATION: &str = "bob@x.com";

/// Whole ether (or 18-decimal token units) in basic units.
pub fn ether(n: u64) -> U256 {
    U256::from(n) * U256::from(10u64).pow(U256::from(18u64))
}

/// A wallet wired to in-memory collaborators, plus a funded-on-demand
/// custodial signer.
pub struct Harness {
    pub chain: Arc<FakeChain>,
    pub ledger: Arc<MemoryLedger>,
    pub backups: Arc<MemoryBlobStore>,
    pub signer: LocalKeySigner,
    pub wallet: EscrowWallet,
}

impl Harness {
    pub fn new() -> Self {
        let chain = Arc::new(FakeChain::new(CHAIN_ID, GAS_PRICE, BTC_FEE_RATE));
        let ledger = Arc::new(MemoryLedger::new());
        let backups = Arc::new(MemoryBlobStore::new());
        let signer = LocalKeySigner::from_mnemonic(PHRASE, Network::Testnet, chain.clone()).unwrap();
        let keys = EscrowKeyManager::new(Network::Testnet).unwrap();
        let wallet = EscrowWallet::new(keys, chain.clone(), chain.clone(), ledger.clone(), backups.clone());
        Self {
            chain,
            ledger,
            backups,
            signer,
            wallet,
        }
    }

    /// The signer's first Ethereum account.
    pub async fn sender_address(&self) -> Address {
        self.signer.eth_address(0).await.unwrap()
    }

    pub async fn btc_address(&self, path: &str) -> String {
        self.signer.btc_address(path).await.unwrap()
    }

    pub fn request(&self, crypto: CryptoType, amount: &str, password: &str) -> TransferRequest {
        TransferRequest::new(
            SENDER,
            DESTINATION,
            crypto,
            amount,
            Password::new(password),
            WalletType::Custodial,
        )
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
