//! # courier-wallet — escrow wallet for email-addressed transfers.
//!
//! Generates a throwaway escrow account per transfer, seals its key with
//! the transfer password and the recipient's identifier, funds it from the
//! sender's signer, and later drains it to the recipient or back to the
//! sender.
//!
//! # Modules
//!
//! - [`error`] — `WalletError` enum
//! - [`fees`] — gas and UTXO fee estimation
//! - [`coin_selection`] — greedy UTXO selection
//! - [`discovery`] — UTXO discovery and gap-limit account scan
//! - [`encryption`] — AES-256-GCM sealing with argon2 key derivation
//! - [`worker`] — background crypto thread
//! - [`keys`] — escrow keypairs and encrypted envelopes
//! - [`builder`] — transaction construction and local signing
//! - [`chain`] — per-chain funding and payout strategies
//! - [`backup`] — escrow backups in the sender's blob store
//! - [`escrow`] — the transfer state machine
//! - [`passphrase`] — random word passphrases

pub mod backup;
pub mod builder;
pub mod chain;
pub mod coin_selection;
pub mod discovery;
pub mod encryption;
pub mod erc20;
pub mod error;
pub mod escrow;
pub mod fees;
pub mod keys;
pub mod passphrase;
pub mod worker;

// Re-exports for convenient access
pub use builder::{BtcTxBuilder, EthTxBuilder, SignedBtcTx};
pub use chain::{Chain, ChainClients, Payout};
pub use coin_selection::{CoinSelection, CoinSelector};
pub use error::WalletError;
pub use escrow::{EscrowWallet, FundingReceipt, PasswordSource, PayoutOutcome, SendOutcome, TransferStatus};
pub use fees::FeeEstimator;
pub use keys::{EncryptedEscrow, EscrowAccount, EscrowKeyManager, KeyScheme};
pub use worker::CryptoWorker;
