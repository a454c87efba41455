//! Collaborator interfaces consumed by the escrow wallet.
//!
//! - [`Signer`]: the sender's signing capability (hardware device, extension, local key)
//! - [`LedgerService`]: durable transfer records (courier-client `HttpLedgerClient`)
//! - [`BlobStore`]: backup copies of encrypted escrows
//! - [`EthRpc`]: account-chain node access
//! - [`BtcIndexer`]: Bitcoin address history, broadcast and fee oracle

use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;

use crate::error::{SignerError, TransportError};
use crate::transfer::{
    AcceptSubmission, CancelSubmission, LegReceipt, SendReceipt, SendSubmission, TransferRecord,
};
use crate::types::{BtcPaymentRequest, BtcTransaction, BtcTxInput, EthCall, EthTx, TxHash, WalletType};

/// The sender's signing capability. Borrowed for one leg, never owned.
///
/// Bitcoin methods default to unsupported so account-only signers need not
/// implement them.
#[async_trait]
pub trait Signer: Send + Sync {
    fn wallet_type(&self) -> WalletType;

    /// Account-chain address of the given account.
    async fn eth_address(&self, account_index: u32) -> Result<Address, SignerError>;

    /// Sign and broadcast. Returns once the hash is known, not on confirmation.
    async fn sign_and_send(&self, tx: &EthTx) -> Result<TxHash, SignerError>;

    /// Bitcoin address at a derivation path such as `49'/1'/0'/0/3`.
    async fn btc_address(&self, key_path: &str) -> Result<String, SignerError> {
        Err(SignerError::Other(format!(
            "{:?} signer cannot derive bitcoin address {key_path}",
            self.wallet_type()
        )))
    }

    /// Build and sign a Bitcoin payment, returning the raw transaction hex.
    async fn sign_btc_payment(&self, _payment: &BtcPaymentRequest) -> Result<String, SignerError> {
        Err(SignerError::Other(format!(
            "{:?} signer cannot sign bitcoin payments",
            self.wallet_type()
        )))
    }
}

/// Identifies a transfer from either party's side.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TransferLookup {
    TransferId(String),
    ReceivingId(String),
}

/// Durable transfer-record service. Failures are transport errors.
#[async_trait]
pub trait LedgerService: Send + Sync {
    async fn submit_send(&self, submission: &SendSubmission) -> Result<SendReceipt, TransportError>;

    async fn submit_accept(&self, submission: &AcceptSubmission) -> Result<LegReceipt, TransportError>;

    async fn submit_cancel(&self, submission: &CancelSubmission) -> Result<LegReceipt, TransportError>;

    async fn get_transfer(&self, lookup: &TransferLookup) -> Result<TransferRecord, TransportError>;

    /// Fetch several records. Unknown ids are skipped.
    ///
    /// Default implementation issues one [`get_transfer`](Self::get_transfer) per id.
    async fn get_transfers(&self, lookups: &[TransferLookup]) -> Result<Vec<TransferRecord>, TransportError> {
        let mut records = Vec::with_capacity(lookups.len());
        for lookup in lookups {
            match self.get_transfer(lookup).await {
                Ok(record) => records.push(record),
                Err(TransportError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(records)
    }
}

/// Named blob storage for backup documents.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, name: &str, content: &[u8]) -> Result<(), TransportError>;

    /// `None` when nothing was stored under `name`.
    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>, TransportError>;
}

/// Account-chain node RPC. One instance is shared per session.
#[async_trait]
pub trait EthRpc: Send + Sync {
    async fn chain_id(&self) -> Result<u64, TransportError>;

    async fn gas_price(&self) -> Result<u128, TransportError>;

    /// Gas a call would consume against current chain state.
    async fn estimate_gas(&self, call: &EthCall) -> Result<u64, TransportError>;

    async fn balance(&self, address: Address) -> Result<U256, TransportError>;

    async fn transaction_count(&self, address: Address) -> Result<u64, TransportError>;

    /// Read-only contract call returning the raw output.
    async fn call(&self, call: &EthCall) -> Result<Bytes, TransportError>;

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, TransportError>;

    /// The `from` of a mined or pending transaction.
    async fn transaction_sender(&self, hash: &TxHash) -> Result<Address, TransportError>;
}

/// Bitcoin chain indexer.
#[async_trait]
pub trait BtcIndexer: Send + Sync {
    /// Every transaction touching `address`, oldest first.
    async fn address_transactions(&self, address: &str) -> Result<Vec<BtcTransaction>, TransportError>;

    async fn transaction_inputs(&self, hash: &TxHash) -> Result<Vec<BtcTxInput>, TransportError>;

    async fn broadcast(&self, raw_hex: &str) -> Result<TxHash, TransportError>;

    /// Recommended fee rate in sat/byte.
    async fn fee_per_byte(&self) -> Result<u64, TransportError>;
}
