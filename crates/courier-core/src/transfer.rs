//! Transfer records, their lifecycle, and the payloads exchanged with the ledger.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;
use crate::types::{CryptoType, TxHash};

/// Observable status of a transfer, derived from the ledger record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    Pending,
    Received,
    Cancelled,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Received => f.write_str("received"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Derive the status from the payout hashes.
///
/// A record carrying both a receive and a cancel hash is corrupt: the escrow
/// can only be drained once.
pub fn derive_transfer_state(
    receive_tx_hash: Option<&TxHash>,
    cancel_tx_hash: Option<&TxHash>,
) -> Result<TransferState, CoreError> {
    match (receive_tx_hash, cancel_tx_hash) {
        (Some(r), Some(c)) => Err(CoreError::DataConsistency(format!(
            "transfer has both receive hash {r} and cancel hash {c}"
        ))),
        (Some(_), None) => Ok(TransferState::Received),
        (None, Some(_)) => Ok(TransferState::Cancelled),
        (None, None) => Ok(TransferState::Pending),
    }
}

/// Lifecycle of one transfer as driven by the escrow wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferPhase {
    Created,
    EscrowFunded,
    Notified,
    Claimed,
    Cancelled,
}

impl TransferPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Claimed | Self::Cancelled)
    }

    fn can_advance_to(self, next: Self) -> bool {
        use TransferPhase::*;
        matches!(
            (self, next),
            (Created, EscrowFunded)
                | (EscrowFunded, Notified)
                | (EscrowFunded | Notified, Claimed)
                | (EscrowFunded | Notified, Cancelled)
        )
    }

    /// Move to `next`, rejecting anything outside the send/payout graph.
    pub fn advance(&mut self, next: Self) -> Result<(), CoreError> {
        if !self.can_advance_to(next) {
            return Err(CoreError::InvalidTransition {
                from: format!("{self:?}"),
                to: format!("{next:?}"),
            });
        }
        *self = next;
        Ok(())
    }
}

/// Normalized ledger view of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub transfer_id: String,
    #[serde(default)]
    pub receiving_id: Option<String>,
    pub sender: String,
    pub destination: String,
    pub transfer_amount: String,
    pub crypto_type: CryptoType,
    /// One hash, or two for token transfers (gas prepayment then token call).
    pub send_tx_hashes: Vec<TxHash>,
    #[serde(default)]
    pub receive_tx_hash: Option<TxHash>,
    #[serde(default)]
    pub cancel_tx_hash: Option<TxHash>,
    #[serde(default)]
    pub send_timestamp: Option<u64>,
    #[serde(default)]
    pub receive_timestamp: Option<u64>,
    #[serde(default)]
    pub cancel_timestamp: Option<u64>,
    #[serde(default)]
    pub send_tx_state: Option<String>,
    #[serde(default)]
    pub receive_tx_state: Option<String>,
    #[serde(default)]
    pub cancel_tx_state: Option<String>,
    /// Encrypted escrow key envelope.
    pub encrypted_escrow: String,
    /// Base64 password, present only on the sender's own records.
    #[serde(default)]
    pub password: Option<String>,
}

impl TransferRecord {
    pub fn state(&self) -> Result<TransferState, CoreError> {
        derive_transfer_state(self.receive_tx_hash.as_ref(), self.cancel_tx_hash.as_ref())
    }

    /// The hash whose sender funded the escrow. For token transfers this is
    /// the gas prepayment, sent from the same account as the token call.
    pub fn funding_tx_hash(&self) -> Result<&TxHash, CoreError> {
        self.send_tx_hashes.first().ok_or_else(|| {
            CoreError::DataConsistency(format!("transfer {} has no send hash", self.transfer_id))
        })
    }
}

/// Send-leg notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendSubmission {
    pub sender: String,
    pub destination: String,
    pub transfer_amount: String,
    pub crypto_type: CryptoType,
    pub send_tx_hashes: Vec<TxHash>,
    pub encrypted_escrow: String,
    pub send_message: Option<String>,
}

/// Ledger answer to a send notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub transfer_id: String,
    #[serde(default)]
    pub receiving_id: Option<String>,
    pub send_timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptSubmission {
    pub receiving_id: String,
    pub receive_tx_hash: TxHash,
    pub receive_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelSubmission {
    pub transfer_id: String,
    pub cancel_tx_hash: TxHash,
    pub cancel_message: Option<String>,
}

/// Ledger answer to an accept or cancel notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegReceipt {
    pub transfer_id: String,
    pub tx_hash: TxHash,
    pub timestamp: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(s: &str) -> TxHash {
        TxHash(s.to_string())
    }

    fn record() -> TransferRecord {
        TransferRecord {
            transfer_id: "t-1".into(),
            receiving_id: Some("r-1".into()),
            sender: "alice@x.com".into(),
            destination: "bob@x.com".into(),
            transfer_amount: "0.5".into(),
            crypto_type: CryptoType::Ethereum,
            send_tx_hashes: vec![hash("0xaa")],
            receive_tx_hash: None,
            cancel_tx_hash: None,
            send_timestamp: Some(1),
            receive_timestamp: None,
            cancel_timestamp: None,
            send_tx_state: None,
            receive_tx_state: None,
            cancel_tx_state: None,
            encrypted_escrow: "{}".into(),
            password: None,
        }
    }

    #[test]
    fn state_derivation_table() {
        let r = hash("0xr");
        let c = hash("0xc");
        assert_eq!(derive_transfer_state(None, None).unwrap(), TransferState::Pending);
        assert_eq!(derive_transfer_state(Some(&r), None).unwrap(), TransferState::Received);
        assert_eq!(derive_transfer_state(None, Some(&c)).unwrap(), TransferState::Cancelled);
        let err = derive_transfer_state(Some(&r), Some(&c)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::DataConsistency);
    }

    #[test]
    fn record_state_follows_hashes() {
        let mut rec = record();
        assert_eq!(rec.state().unwrap(), TransferState::Pending);
        rec.cancel_tx_hash = Some(hash("0xc"));
        assert_eq!(rec.state().unwrap(), TransferState::Cancelled);
        rec.receive_tx_hash = Some(hash("0xr"));
        assert!(rec.state().is_err());
    }

    #[test]
    fn funding_hash_requires_send_hash() {
        let mut rec = record();
        assert_eq!(rec.funding_tx_hash().unwrap(), &hash("0xaa"));
        rec.send_tx_hashes.clear();
        assert!(matches!(rec.funding_tx_hash(), Err(CoreError::DataConsistency(_))));
    }

    #[test]
    fn send_path_transitions() {
        let mut phase = TransferPhase::Created;
        phase.advance(TransferPhase::EscrowFunded).unwrap();
        phase.advance(TransferPhase::Notified).unwrap();
        phase.advance(TransferPhase::Claimed).unwrap();
        assert!(phase.is_terminal());
    }

    #[test]
    fn terminal_phases_do_not_move() {
        let mut phase = TransferPhase::Cancelled;
        let err = phase.advance(TransferPhase::Claimed).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidTransition);
        assert_eq!(phase, TransferPhase::Cancelled);
    }

    #[test]
    fn cannot_skip_funding() {
        let mut phase = TransferPhase::Created;
        assert!(phase.advance(TransferPhase::Notified).is_err());
        assert!(phase.advance(TransferPhase::Claimed).is_err());
        assert_eq!(phase, TransferPhase::Created);
    }

    #[test]
    fn record_json_uses_camel_case() {
        let json = serde_json::to_value(record()).unwrap();
        assert_eq!(json["transferId"], "t-1");
        assert_eq!(json["cryptoType"], "ethereum");
        assert_eq!(json["sendTxHashes"][0], "0xaa");
    }
}
