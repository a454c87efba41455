//! Wallet error types.

use alloy::primitives::U256;
use courier_core::error::{CoreError, ErrorKind, SignerError, TransportError};
use courier_core::types::TxHash;
use thiserror::Error;

use crate::escrow::FundingReceipt;

/// Errors that can occur in escrow wallet operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// Available value cannot cover the amount plus fees.
    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds {
        /// Available value in basic units.
        have: U256,
        /// Required value in basic units.
        need: U256,
    },

    /// No UTXOs available for spending.
    #[error("no UTXOs available")]
    NoUtxos,

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Escrow key generation or parsing failure.
    #[error("key material: {0}")]
    KeyMaterial(String),

    #[error("encryption: {0}")]
    Encryption(String),

    /// Wrong password or destination for an encrypted escrow.
    #[error("escrow decryption failed")]
    DecryptionFailed,

    /// Encrypted escrow envelope is malformed.
    #[error("corrupted escrow envelope: {0}")]
    CorruptedEnvelope(String),

    #[error("build error: {0}")]
    BuildError(String),

    /// The crypto worker thread has shut down.
    #[error("crypto worker unavailable")]
    WorkerUnavailable,

    /// Token funding stopped after the gas prepayment was broadcast.
    #[error("escrow partially funded (gas prepayment {prepay_tx_hash}): {reason}")]
    PartiallyFunded {
        prepay_tx_hash: TxHash,
        reason: String,
    },

    /// Funds are on chain but the ledger was not told. Retry with
    /// `EscrowWallet::renotify_send`.
    #[error("ledger notification failed after broadcast: {reason}")]
    NotifyFailed {
        receipt: Box<FundingReceipt>,
        reason: TransportError,
    },

    /// A payout was broadcast but the ledger rejected the accept or cancel.
    #[error("ledger notification failed after payout {tx_hash}: {reason}")]
    LegNotifyFailed { tx_hash: TxHash, reason: TransportError },

    #[error("serialization: {0}")]
    Serialization(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl WalletError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InsufficientFunds { .. } | Self::NoUtxos => ErrorKind::InsufficientFunds,
            Self::InvalidAmount(_) | Self::InvalidAddress(_) => ErrorKind::InvalidParameter,
            Self::DecryptionFailed => ErrorKind::WalletDecryptionFailed,
            Self::CorruptedEnvelope(_) => ErrorKind::DataConsistency,
            Self::PartiallyFunded { .. } => ErrorKind::PartiallyFunded,
            Self::NotifyFailed { .. } | Self::LegNotifyFailed { .. } | Self::Transport(_) => ErrorKind::Transport,
            Self::Core(e) => e.kind(),
            Self::Signer(e) => e.kind(),
            Self::KeyMaterial(_)
            | Self::Encryption(_)
            | Self::BuildError(_)
            | Self::WorkerUnavailable
            | Self::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// Hashes already on chain when this error was raised.
    pub fn broadcast_hashes(&self) -> Vec<TxHash> {
        match self {
            Self::PartiallyFunded { prepay_tx_hash, .. } => vec![prepay_tx_hash.clone()],
            Self::NotifyFailed { receipt, .. } => receipt.send_tx_hashes.clone(),
            Self::LegNotifyFailed { tx_hash, .. } => vec![tx_hash.clone()],
            _ => Vec::new(),
        }
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
