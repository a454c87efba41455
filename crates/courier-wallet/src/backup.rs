//! Escrow backups kept in the sender's blob store.
//!
//! An entry is written under `pending` (keyed by escrow address) before the
//! funding transaction is broadcast, then moved to `transfers` (keyed by
//! transfer id) once the ledger has been notified. A sender who loses the
//! password can still reclaim funds from either table.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use courier_core::constants::BACKUP_FILE_NAME;
use courier_core::traits::BlobStore;
use courier_core::types::{CryptoType, Password, TxHash};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::WalletError;

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub fn encode_password(password: &Password) -> String {
    STANDARD.encode(password.expose())
}

pub fn decode_password(encoded: &str) -> Result<Password, WalletError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| WalletError::Serialization(format!("password encoding: {e}")))?;
    let text = String::from_utf8(bytes).map_err(|_| WalletError::Serialization("password is not utf-8".into()))?;
    Ok(Password::new(text))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEntry {
    pub transfer_amount: String,
    pub crypto_type: CryptoType,
    pub sender: String,
    pub destination: String,
    pub encrypted_escrow: String,
    /// Base64 of the transfer password.
    pub password: String,
    pub timestamp: u64,
    #[serde(default)]
    pub send_tx_hashes: Vec<TxHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiving_id: Option<String>,
}

impl BackupEntry {
    pub fn password(&self) -> Result<Password, WalletError> {
        decode_password(&self.password)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupFile {
    #[serde(default)]
    pub pending: BTreeMap<String, BackupEntry>,
    #[serde(default)]
    pub transfers: BTreeMap<String, BackupEntry>,
}

impl BackupFile {
    /// Read the backup document. A missing blob is an empty backup.
    pub async fn load(store: &dyn BlobStore) -> Result<Self, WalletError> {
        match store.get(BACKUP_FILE_NAME).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Self::default()),
        }
    }

    pub async fn save(&self, store: &dyn BlobStore) -> Result<(), WalletError> {
        let bytes = serde_json::to_vec_pretty(self)?;
        store.put(BACKUP_FILE_NAME, &bytes).await?;
        debug!(pending = self.pending.len(), transfers = self.transfers.len(), "backup saved");
        Ok(())
    }

    pub fn add_pending(&mut self, escrow_address: &str, entry: BackupEntry) {
        self.pending.insert(escrow_address.to_string(), entry);
    }

    /// Move a pending entry under its ledger id, recording the send hashes.
    /// Re-promoting an already promoted transfer only refreshes the hashes.
    pub fn promote(
        &mut self,
        escrow_address: &str,
        transfer_id: &str,
        receiving_id: Option<String>,
        send_tx_hashes: &[TxHash],
    ) -> Result<(), WalletError> {
        let mut entry = match self.pending.remove(escrow_address) {
            Some(entry) => entry,
            None => self.transfers.remove(transfer_id).ok_or_else(|| {
                courier_core::error::CoreError::DataConsistency(format!(
                    "no backup for escrow {escrow_address} or transfer {transfer_id}"
                ))
            })?,
        };
        entry.send_tx_hashes = send_tx_hashes.to_vec();
        if receiving_id.is_some() {
            entry.receiving_id = receiving_id;
        }
        self.transfers.insert(transfer_id.to_string(), entry);
        Ok(())
    }

    pub fn transfer(&self, transfer_id: &str) -> Option<&BackupEntry> {
        self.transfers.get(transfer_id)
    }

    pub fn pending(&self, escrow_address: &str) -> Option<&BackupEntry> {
        self.pending.get(escrow_address)
    }
}
