//! The escrow wallet: ties key generation, funding, ledger notification and
//! payout together for one transfer at a time.
//!
//! Send: `Created → EscrowFunded → Notified`. Accept and cancel move a
//! funded transfer to `Claimed` or `Cancelled`. Nothing reaches the ledger
//! before the escrow is funded on chain.

use std::sync::Arc;

use bitcoin::Network;
use courier_core::constants::DEFAULT_PRECISION;
use courier_core::error::{CoreError, TransportError};
use courier_core::traits::{BlobStore, BtcIndexer, EthRpc, LedgerService, Signer, TransferLookup};
use courier_core::transfer::{
    AcceptSubmission, CancelSubmission, LegReceipt, SendSubmission, TransferPhase, TransferRecord,
    TransferState,
};
use courier_core::types::{CryptoType, Password, TransferRequest, TxCost, TxHash};
use courier_core::units::to_human_readable_unit;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backup::{BackupEntry, BackupFile, decode_password, encode_password, unix_now};
use crate::chain::{Chain, ChainClients, Payout};
use crate::error::WalletError;
use crate::fees::FeeEstimator;
use crate::keys::{EscrowAccount, EscrowKeyManager, escrow_secret};

/// What is on chain after a successful funding broadcast. Enough to
/// notify the ledger again if the first notification failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingReceipt {
    pub escrow_address: String,
    pub crypto_type: CryptoType,
    pub sender: String,
    pub destination: String,
    pub transfer_amount: String,
    pub encrypted_escrow: String,
    pub send_tx_hashes: Vec<TxHash>,
}

/// Result of a completed send leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub transfer_id: String,
    pub receiving_id: Option<String>,
    pub escrow_address: String,
    pub send_tx_hashes: Vec<TxHash>,
    pub send_timestamp: u64,
    pub phase: TransferPhase,
}

/// Result of an accept or cancel leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutOutcome {
    pub transfer_id: String,
    pub tx_hash: TxHash,
    /// Delivered amount in standard units.
    pub amount: String,
    pub timestamp: u64,
    pub phase: TransferPhase,
}

/// A ledger record with its derived state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferStatus {
    pub record: TransferRecord,
    pub state: TransferState,
}

/// How the caller proves the right to open an escrow.
#[derive(Debug, Clone)]
pub enum PasswordSource {
    Password(Password),
    /// The sender's own transfer id; the password is recovered from the
    /// ledger record or the backup.
    SendingId(String),
}

pub struct EscrowWallet {
    keys: EscrowKeyManager,
    chains: ChainClients,
    ledger: Arc<dyn LedgerService>,
    backups: Arc<dyn BlobStore>,
}

impl EscrowWallet {
    pub fn new(
        keys: EscrowKeyManager,
        rpc: Arc<dyn EthRpc>,
        indexer: Arc<dyn BtcIndexer>,
        ledger: Arc<dyn LedgerService>,
        backups: Arc<dyn BlobStore>,
    ) -> Self {
        let chains = ChainClients::new(rpc, indexer, keys.network());
        Self {
            keys,
            chains,
            ledger,
            backups,
        }
    }

    pub fn keys(&self) -> &EscrowKeyManager {
        &self.keys
    }

    pub fn fees(&self) -> &FeeEstimator {
        self.chains.fees()
    }

    pub fn network(&self) -> Network {
        self.chains.network()
    }

    /// Cost of funding an escrow for `request`, before one exists.
    pub async fn estimate_send_cost(
        &self,
        signer: &dyn Signer,
        request: &TransferRequest,
    ) -> Result<TxCost, WalletError> {
        let chain = Chain::from(&request.crypto_type);
        self.chains.send_cost(&chain, signer, request).await
    }

    /// Run the send leg.
    ///
    /// On [`WalletError::NotifyFailed`] the funds are in escrow; pass the
    /// carried receipt to [`renotify_send`](Self::renotify_send).
    pub async fn submit_transfer(
        &self,
        signer: &dyn Signer,
        request: &TransferRequest,
    ) -> Result<SendOutcome, WalletError> {
        request.validate()?;
        if signer.wallet_type() != request.wallet_type {
            return Err(CoreError::InvalidParameter(format!(
                "request names a {:?} wallet, signer is {:?}",
                request.wallet_type,
                signer.wallet_type()
            ))
            .into());
        }
        let chain = Chain::from(&request.crypto_type);
        chain.basic_amount(&request.transfer_amount)?;

        let mut phase = TransferPhase::Created;
        let escrow = self.keys.generate(chain.key_scheme())?;
        let secret = escrow_secret(&request.password, &request.destination);
        let encrypted_escrow = self.keys.encrypt(&escrow, &secret).await?;

        let mut backup = BackupFile::load(self.backups.as_ref()).await?;
        backup.add_pending(
            escrow.address(),
            BackupEntry {
                transfer_amount: request.transfer_amount.clone(),
                crypto_type: request.crypto_type.clone(),
                sender: request.sender.clone(),
                destination: request.destination.clone(),
                encrypted_escrow: encrypted_escrow.clone(),
                password: encode_password(&request.password),
                timestamp: unix_now(),
                send_tx_hashes: Vec::new(),
                receiving_id: None,
            },
        );
        backup.save(self.backups.as_ref()).await?;
        info!(
            escrow = %escrow.address(),
            crypto_type = %request.crypto_type,
            amount = %request.transfer_amount,
            "escrow created"
        );

        let send_tx_hashes = self
            .chains
            .fund_escrow(&chain, signer, request, escrow.address())
            .await?;
        phase.advance(TransferPhase::EscrowFunded)?;
        info!(escrow = %escrow.address(), hashes = send_tx_hashes.len(), "escrow funded");

        let receipt = FundingReceipt {
            escrow_address: escrow.address().to_string(),
            crypto_type: request.crypto_type.clone(),
            sender: request.sender.clone(),
            destination: request.destination.clone(),
            transfer_amount: request.transfer_amount.clone(),
            encrypted_escrow,
            send_tx_hashes,
        };
        self.notify_send(receipt, phase).await
    }

    /// Retry the ledger notification for an escrow that is already funded.
    pub async fn renotify_send(&self, receipt: &FundingReceipt) -> Result<SendOutcome, WalletError> {
        if receipt.send_tx_hashes.is_empty() {
            return Err(CoreError::DataConsistency(format!(
                "escrow {} has no send hash to report",
                receipt.escrow_address
            ))
            .into());
        }
        self.notify_send(receipt.clone(), TransferPhase::EscrowFunded).await
    }

    async fn notify_send(&self, receipt: FundingReceipt, mut phase: TransferPhase) -> Result<SendOutcome, WalletError> {
        let submission = SendSubmission {
            sender: receipt.sender.clone(),
            destination: receipt.destination.clone(),
            transfer_amount: receipt.transfer_amount.clone(),
            crypto_type: receipt.crypto_type.clone(),
            send_tx_hashes: receipt.send_tx_hashes.clone(),
            encrypted_escrow: receipt.encrypted_escrow.clone(),
            send_message: None,
        };
        let sent = match self.ledger.submit_send(&submission).await {
            Ok(sent) => sent,
            Err(reason) => {
                warn!(escrow = %receipt.escrow_address, error = %reason, "ledger notification failed, funds are in escrow");
                return Err(WalletError::NotifyFailed {
                    receipt: Box::new(receipt),
                    reason,
                });
            }
        };
        phase.advance(TransferPhase::Notified)?;
        info!(transfer_id = %sent.transfer_id, escrow = %receipt.escrow_address, "send leg notified");

        // Best effort: the ledger record is authoritative from here on.
        if let Err(e) = self.promote_backup(&receipt, &sent.transfer_id, sent.receiving_id.clone()).await {
            warn!(transfer_id = %sent.transfer_id, error = %e, "backup not promoted");
        }

        Ok(SendOutcome {
            transfer_id: sent.transfer_id,
            receiving_id: sent.receiving_id,
            escrow_address: receipt.escrow_address,
            send_tx_hashes: receipt.send_tx_hashes,
            send_timestamp: sent.send_timestamp,
            phase,
        })
    }

    async fn promote_backup(
        &self,
        receipt: &FundingReceipt,
        transfer_id: &str,
        receiving_id: Option<String>,
    ) -> Result<(), WalletError> {
        let mut backup = BackupFile::load(self.backups.as_ref()).await?;
        backup.promote(&receipt.escrow_address, transfer_id, receiving_id, &receipt.send_tx_hashes)?;
        backup.save(self.backups.as_ref()).await
    }

    pub async fn get_transfer(&self, lookup: &TransferLookup) -> Result<TransferStatus, WalletError> {
        let record = self.ledger.get_transfer(lookup).await?;
        let state = record.state()?;
        Ok(TransferStatus { record, state })
    }

    /// Records for several ids. Unknown ids are skipped; a corrupt record
    /// fails the whole call.
    pub async fn get_transfer_history(&self, lookups: &[TransferLookup]) -> Result<Vec<TransferStatus>, WalletError> {
        let records = self.ledger.get_transfers(lookups).await?;
        records
            .into_iter()
            .map(|record| {
                let state = record.state()?;
                Ok(TransferStatus { record, state })
            })
            .collect()
    }

    /// Open the escrow of `record`.
    pub async fn verify_password(
        &self,
        record: &TransferRecord,
        source: &PasswordSource,
    ) -> Result<EscrowAccount, WalletError> {
        let password = match source {
            PasswordSource::Password(password) => password.clone(),
            PasswordSource::SendingId(transfer_id) => self.recover_password(record, transfer_id).await?,
        };
        let secret = escrow_secret(&password, &record.destination);
        self.keys.decrypt(&record.encrypted_escrow, &secret).await
    }

    async fn recover_password(&self, record: &TransferRecord, transfer_id: &str) -> Result<Password, WalletError> {
        if record.transfer_id != transfer_id {
            return Err(CoreError::InvalidParameter(format!(
                "sending id {transfer_id} does not match transfer {}",
                record.transfer_id
            ))
            .into());
        }
        if let Some(encoded) = &record.password {
            return decode_password(encoded);
        }
        let backup = BackupFile::load(self.backups.as_ref()).await?;
        let entry = backup.transfer(transfer_id).or_else(|| {
            backup
                .pending
                .values()
                .find(|entry| entry.encrypted_escrow == record.encrypted_escrow)
        });
        match entry {
            Some(entry) => entry.password(),
            None => {
                warn!(transfer_id, "no stored password for transfer");
                Err(WalletError::DecryptionFailed)
            }
        }
    }

    /// Drain the escrow to `to`, the recipient's own address.
    ///
    /// On [`WalletError::LegNotifyFailed`] the payout is on chain; report it
    /// with [`renotify_accept`](Self::renotify_accept).
    pub async fn accept_transfer(
        &self,
        receiving_id: &str,
        source: &PasswordSource,
        to: &str,
    ) -> Result<PayoutOutcome, WalletError> {
        let status = self
            .get_transfer(&TransferLookup::ReceivingId(receiving_id.to_string()))
            .await?;
        let mut phase = payable_phase(&status, TransferPhase::Claimed)?;
        let escrow = self.verify_password(&status.record, source).await?;
        let chain = Chain::from(&status.record.crypto_type);

        let payout = self.chains.pay_out(&chain, &escrow, to).await?;
        phase.advance(TransferPhase::Claimed)?;
        info!(
            transfer_id = %status.record.transfer_id,
            tx_hash = %payout.tx_hash,
            crypto_type = %status.record.crypto_type,
            "escrow claimed"
        );

        let submission = AcceptSubmission {
            receiving_id: receiving_id.to_string(),
            receive_tx_hash: payout.tx_hash.clone(),
            receive_message: None,
        };
        let leg = self.ledger.submit_accept(&submission).await;
        self.finish_payout(&status.record, payout, phase, leg.map(|r| r.timestamp))
    }

    /// Return the escrow to whoever funded it.
    ///
    /// A refund the ledger did not record is reported with
    /// [`renotify_cancel`](Self::renotify_cancel).
    pub async fn cancel_transfer(
        &self,
        transfer_id: &str,
        source: &PasswordSource,
    ) -> Result<PayoutOutcome, WalletError> {
        let status = self
            .get_transfer(&TransferLookup::TransferId(transfer_id.to_string()))
            .await?;
        let mut phase = payable_phase(&status, TransferPhase::Cancelled)?;
        let escrow = self.verify_password(&status.record, source).await?;
        let chain = Chain::from(&status.record.crypto_type);

        let funding = status.record.funding_tx_hash()?;
        let refund_to = self.chains.funder_of(&chain, funding).await?;
        let payout = self.chains.pay_out(&chain, &escrow, &refund_to).await?;
        phase.advance(TransferPhase::Cancelled)?;
        info!(transfer_id, tx_hash = %payout.tx_hash, refund_to = %refund_to, "escrow cancelled");

        let submission = CancelSubmission {
            transfer_id: transfer_id.to_string(),
            cancel_tx_hash: payout.tx_hash.clone(),
            cancel_message: None,
        };
        let leg = self.ledger.submit_cancel(&submission).await;
        self.finish_payout(&status.record, payout, phase, leg.map(|r| r.timestamp))
    }

    /// Report an accept payout that is already on chain. Nothing is written
    /// when the record already carries `tx_hash`.
    pub async fn renotify_accept(&self, receiving_id: &str, tx_hash: &TxHash) -> Result<LegReceipt, WalletError> {
        let status = self
            .get_transfer(&TransferLookup::ReceivingId(receiving_id.to_string()))
            .await?;
        let record = &status.record;
        if let Some(done) = recorded_leg(record, record.receive_tx_hash.as_ref(), record.receive_timestamp, tx_hash) {
            return Ok(done);
        }
        payable_phase(&status, TransferPhase::Claimed)?;
        let submission = AcceptSubmission {
            receiving_id: receiving_id.to_string(),
            receive_tx_hash: tx_hash.clone(),
            receive_message: None,
        };
        let leg = self.ledger.submit_accept(&submission).await;
        renotified(record, tx_hash, leg)
    }

    /// Report a refund that is already on chain.
    pub async fn renotify_cancel(&self, transfer_id: &str, tx_hash: &TxHash) -> Result<LegReceipt, WalletError> {
        let status = self
            .get_transfer(&TransferLookup::TransferId(transfer_id.to_string()))
            .await?;
        let record = &status.record;
        if let Some(done) = recorded_leg(record, record.cancel_tx_hash.as_ref(), record.cancel_timestamp, tx_hash) {
            return Ok(done);
        }
        payable_phase(&status, TransferPhase::Cancelled)?;
        let submission = CancelSubmission {
            transfer_id: transfer_id.to_string(),
            cancel_tx_hash: tx_hash.clone(),
            cancel_message: None,
        };
        let leg = self.ledger.submit_cancel(&submission).await;
        renotified(record, tx_hash, leg)
    }

    fn finish_payout(
        &self,
        record: &TransferRecord,
        payout: Payout,
        phase: TransferPhase,
        notified: Result<u64, TransportError>,
    ) -> Result<PayoutOutcome, WalletError> {
        let timestamp = match notified {
            Ok(timestamp) => timestamp,
            Err(reason) => {
                warn!(transfer_id = %record.transfer_id, tx_hash = %payout.tx_hash, error = %reason, "payout broadcast but ledger not updated");
                return Err(WalletError::LegNotifyFailed {
                    tx_hash: payout.tx_hash,
                    reason,
                });
            }
        };
        Ok(PayoutOutcome {
            transfer_id: record.transfer_id.clone(),
            tx_hash: payout.tx_hash,
            amount: to_human_readable_unit(payout.amount, record.crypto_type.decimals(), DEFAULT_PRECISION)?,
            timestamp,
            phase,
        })
    }
}

/// The leg as the ledger already has it, when it matches `tx_hash`.
fn recorded_leg(
    record: &TransferRecord,
    recorded: Option<&TxHash>,
    timestamp: Option<u64>,
    tx_hash: &TxHash,
) -> Option<LegReceipt> {
    (recorded == Some(tx_hash)).then(|| LegReceipt {
        transfer_id: record.transfer_id.clone(),
        tx_hash: tx_hash.clone(),
        timestamp: timestamp.unwrap_or_default(),
    })
}

fn renotified(
    record: &TransferRecord,
    tx_hash: &TxHash,
    leg: Result<LegReceipt, TransportError>,
) -> Result<LegReceipt, WalletError> {
    match leg {
        Ok(receipt) => {
            info!(transfer_id = %record.transfer_id, tx_hash = %tx_hash, "payout recorded");
            Ok(receipt)
        }
        Err(reason) => {
            warn!(transfer_id = %record.transfer_id, tx_hash = %tx_hash, error = %reason, "ledger still not updated");
            Err(WalletError::LegNotifyFailed {
                tx_hash: tx_hash.clone(),
                reason,
            })
        }
    }
}

/// Phase a pending record is in, or an error naming the blocked transition.
fn payable_phase(status: &TransferStatus, target: TransferPhase) -> Result<TransferPhase, WalletError> {
    let current = match status.state {
        TransferState::Pending => TransferPhase::Notified,
        TransferState::Received => TransferPhase::Claimed,
        TransferState::Cancelled => TransferPhase::Cancelled,
    };
    if current.is_terminal() {
        return Err(CoreError::InvalidTransition {
            from: format!("{current:?}"),
            to: format!("{target:?}"),
        }
        .into());
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, Bytes, U256};
    use async_trait::async_trait;
    use courier_core::constants::BACKUP_FILE_NAME;
    use courier_core::error::{ErrorKind, SignerError};
    use courier_core::transfer::{LegReceipt, SendReceipt};
    use courier_core::types::{BtcTransaction, BtcTxInput, EthCall, EthTx, WalletType};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    use crate::keys::KeyScheme;

    // ------------------------------------------------------------------
    // Mock: LedgerService recording submissions
    // ------------------------------------------------------------------

    #[derive(Default)]
    struct MockLedger {
        sends: Mutex<Vec<SendSubmission>>,
        fail_sends: Mutex<u32>,
        records: Mutex<HashMap<String, TransferRecord>>,
    }

    #[async_trait]
    impl LedgerService for MockLedger {
        async fn submit_send(&self, submission: &SendSubmission) -> Result<SendReceipt, TransportError> {
            let mut failures = self.fail_sends.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(TransportError::Status {
                    status: 503,
                    body: "unavailable".into(),
                });
            }
            self.sends.lock().push(submission.clone());
            Ok(SendReceipt {
                transfer_id: "t-1".into(),
                receiving_id: Some("r-1".into()),
                send_timestamp: 42,
            })
        }

        async fn submit_accept(&self, _: &AcceptSubmission) -> Result<LegReceipt, TransportError> {
            Err(TransportError::Request("unused".into()))
        }

        async fn submit_cancel(&self, _: &CancelSubmission) -> Result<LegReceipt, TransportError> {
            Err(TransportError::Request("unused".into()))
        }

        async fn get_transfer(&self, lookup: &TransferLookup) -> Result<TransferRecord, TransportError> {
            let key = match lookup {
                TransferLookup::TransferId(id) | TransferLookup::ReceivingId(id) => id,
            };
            self.records
                .lock()
                .get(key)
                .cloned()
                .ok_or_else(|| TransportError::NotFound(key.clone()))
        }
    }

    // ------------------------------------------------------------------
    // Mock: chain endpoints that are unreachable
    // ------------------------------------------------------------------

    struct OfflineRpc;

    fn offline<T>() -> Result<T, TransportError> {
        Err(TransportError::Request("offline".into()))
    }

    #[async_trait]
    impl EthRpc for OfflineRpc {
        async fn chain_id(&self) -> Result<u64, TransportError> {
            offline()
        }
        async fn gas_price(&self) -> Result<u128, TransportError> {
            offline()
        }
        async fn estimate_gas(&self, _: &EthCall) -> Result<u64, TransportError> {
            offline()
        }
        async fn balance(&self, _: Address) -> Result<U256, TransportError> {
            offline()
        }
        async fn transaction_count(&self, _: Address) -> Result<u64, TransportError> {
            offline()
        }
        async fn call(&self, _: &EthCall) -> Result<Bytes, TransportError> {
            offline()
        }
        async fn send_raw_transaction(&self, _: &[u8]) -> Result<TxHash, TransportError> {
            offline()
        }
        async fn transaction_sender(&self, _: &TxHash) -> Result<Address, TransportError> {
            offline()
        }
    }

    struct OfflineIndexer;

    #[async_trait]
    impl BtcIndexer for OfflineIndexer {
        async fn address_transactions(&self, _: &str) -> Result<Vec<BtcTransaction>, TransportError> {
            offline()
        }
        async fn transaction_inputs(&self, _: &TxHash) -> Result<Vec<BtcTxInput>, TransportError> {
            offline()
        }
        async fn broadcast(&self, _: &str) -> Result<TxHash, TransportError> {
            offline()
        }
        async fn fee_per_byte(&self) -> Result<u64, TransportError> {
            offline()
        }
    }

    #[derive(Default)]
    struct MockStore {
        blobs: Mutex<HashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl BlobStore for MockStore {
        async fn put(&self, name: &str, content: &[u8]) -> Result<(), TransportError> {
            self.blobs.lock().insert(name.to_string(), content.to_vec());
            Ok(())
        }
        async fn get(&self, name: &str) -> Result<Option<Vec<u8>>, TransportError> {
            Ok(self.blobs.lock().get(name).cloned())
        }
    }

    struct CustodialSigner;

    #[async_trait]
    impl Signer for CustodialSigner {
        fn wallet_type(&self) -> WalletType {
            WalletType::Custodial
        }
        async fn eth_address(&self, _: u32) -> Result<Address, SignerError> {
            Ok(Address::ZERO)
        }
        async fn sign_and_send(&self, _: &EthTx) -> Result<TxHash, SignerError> {
            Err(SignerError::UserRejected)
        }
    }

    struct Fixture {
        wallet: EscrowWallet,
        ledger: Arc<MockLedger>,
        store: Arc<MockStore>,
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(MockLedger::default());
        let store = Arc::new(MockStore::default());
        let wallet = EscrowWallet::new(
            EscrowKeyManager::new(Network::Testnet).unwrap(),
            Arc::new(OfflineRpc),
            Arc::new(OfflineIndexer),
            ledger.clone(),
            store.clone(),
        );
        Fixture { wallet, ledger, store }
    }

    fn request(password: &str) -> TransferRequest {
        TransferRequest::new(
            "alice@x.com",
            "bob@x.com",
            CryptoType::Ethereum,
            "0.5",
            Password::new(password),
            WalletType::Custodial,
        )
    }

    async fn sealed_record(wallet: &EscrowWallet, password: &str) -> (TransferRecord, EscrowAccount) {
        let escrow = wallet.keys().generate(KeyScheme::Ethereum).unwrap();
        let secret = escrow_secret(&Password::new(password), "bob@x.com");
        let encrypted_escrow = wallet.keys().encrypt(&escrow, &secret).await.unwrap();
        let record = TransferRecord {
            transfer_id: "t-1".into(),
            receiving_id: Some("r-1".into()),
            sender: "alice@x.com".into(),
            destination: "bob@x.com".into(),
            transfer_amount: "0.5".into(),
            crypto_type: CryptoType::Ethereum,
            send_tx_hashes: vec![TxHash("0xaa".into())],
            receive_tx_hash: None,
            cancel_tx_hash: None,
            send_timestamp: Some(1),
            receive_timestamp: None,
            cancel_timestamp: None,
            send_tx_state: None,
            receive_tx_state: None,
            cancel_tx_state: None,
            encrypted_escrow,
            password: None,
        };
        (record, escrow)
    }

    #[tokio::test]
    async fn invalid_request_touches_nothing() {
        let f = fixture();
        let err = f.wallet.submit_transfer(&CustodialSigner, &request("")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert!(f.ledger.sends.lock().is_empty());
        assert!(f.store.blobs.lock().is_empty());
    }

    #[tokio::test]
    async fn funding_failure_keeps_pending_backup_only() {
        let f = fixture();
        let err = f.wallet.submit_transfer(&CustodialSigner, &request("abc")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(f.ledger.sends.lock().is_empty());

        let backup = BackupFile::load(f.store.as_ref()).await.unwrap();
        assert_eq!(backup.pending.len(), 1);
        assert!(backup.transfers.is_empty());
        assert!(f.store.blobs.lock().contains_key(BACKUP_FILE_NAME));
    }

    #[tokio::test]
    async fn wallet_type_must_match_signer() {
        let f = fixture();
        let mut req = request("abc");
        req.wallet_type = WalletType::Ledger;
        assert!(matches!(
            f.wallet.submit_transfer(&CustodialSigner, &req).await,
            Err(WalletError::Core(CoreError::InvalidParameter(_)))
        ));
    }

    #[tokio::test]
    async fn renotify_after_ledger_outage() {
        let f = fixture();
        *f.ledger.fail_sends.lock() = 1;
        let receipt = FundingReceipt {
            escrow_address: "0xescrow".into(),
            crypto_type: CryptoType::Ethereum,
            sender: "alice@x.com".into(),
            destination: "bob@x.com".into(),
            transfer_amount: "0.5".into(),
            encrypted_escrow: "{}".into(),
            send_tx_hashes: vec![TxHash("0xaa".into())],
        };

        let err = f.wallet.renotify_send(&receipt).await.unwrap_err();
        assert_eq!(err.broadcast_hashes(), vec![TxHash("0xaa".into())]);
        let WalletError::NotifyFailed { receipt: carried, .. } = err else {
            panic!("expected NotifyFailed");
        };

        let outcome = f.wallet.renotify_send(&carried).await.unwrap();
        assert_eq!(outcome.transfer_id, "t-1");
        assert_eq!(outcome.phase, TransferPhase::Notified);
        assert_eq!(f.ledger.sends.lock().len(), 1);
    }

    #[tokio::test]
    async fn renotify_requires_hashes() {
        let f = fixture();
        let receipt = FundingReceipt {
            escrow_address: "0xescrow".into(),
            crypto_type: CryptoType::Bitcoin,
            sender: "a".into(),
            destination: "b".into(),
            transfer_amount: "1".into(),
            encrypted_escrow: "{}".into(),
            send_tx_hashes: Vec::new(),
        };
        let err = f.wallet.renotify_send(&receipt).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataConsistency);
    }

    #[tokio::test]
    async fn password_opens_escrow() {
        let f = fixture();
        let (record, escrow) = sealed_record(&f.wallet, "abc").await;

        let opened = f
            .wallet
            .verify_password(&record, &PasswordSource::Password(Password::new("abc")))
            .await
            .unwrap();
        assert_eq!(opened.address(), escrow.address());
        assert_eq!(opened.key_material().expose(), escrow.key_material().expose());

        let err = f
            .wallet
            .verify_password(&record, &PasswordSource::Password(Password::new("abd")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WalletDecryptionFailed);
    }

    #[tokio::test]
    async fn sending_id_uses_record_password() {
        let f = fixture();
        let (mut record, escrow) = sealed_record(&f.wallet, "abc").await;
        record.password = Some(encode_password(&Password::new("abc")));
        let opened = f
            .wallet
            .verify_password(&record, &PasswordSource::SendingId("t-1".into()))
            .await
            .unwrap();
        assert_eq!(opened.address(), escrow.address());
    }

    #[tokio::test]
    async fn sending_id_without_stored_password_fails() {
        let f = fixture();
        let (record, _) = sealed_record(&f.wallet, "abc").await;
        let err = f
            .wallet
            .verify_password(&record, &PasswordSource::SendingId("t-1".into()))
            .await
            .unwrap_err();
        assert_eq!(err, WalletError::DecryptionFailed);
    }

    #[tokio::test]
    async fn settled_transfer_cannot_be_accepted() {
        let f = fixture();
        let (mut record, _) = sealed_record(&f.wallet, "abc").await;
        record.cancel_tx_hash = Some(TxHash("0xcc".into()));
        f.ledger.records.lock().insert("r-1".into(), record);

        let err = f
            .wallet
            .accept_transfer("r-1", &PasswordSource::Password(Password::new("abc")), "0x0")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    #[tokio::test]
    async fn history_skips_unknown_ids() {
        let f = fixture();
        let (record, _) = sealed_record(&f.wallet, "abc").await;
        f.ledger.records.lock().insert("t-1".into(), record);
        let lookups = [
            TransferLookup::TransferId("t-1".into()),
            TransferLookup::TransferId("t-2".into()),
        ];
        let history = f.wallet.get_transfer_history(&lookups).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].state, TransferState::Pending);
    }
}
