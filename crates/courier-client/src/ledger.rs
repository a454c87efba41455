//! HTTP client for the transfer ledger.
//!
//! Every call is a `POST {base}/transfer` carrying `clientId` and an
//! `action` (`SEND`, `RECEIVE`, `CANCEL`, `GET`, `BATCH_GET`). Records come
//! back with per-stage data nested under `senderToChainsfer`,
//! `chainsferToReceiver` and `chainsferToSender`; [`normalize`] flattens
//! them into a [`TransferRecord`]. The encrypted escrow travels as base64
//! in `data`.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use courier_core::error::TransportError;
use courier_core::traits::{LedgerService, TransferLookup};
use courier_core::transfer::{
    AcceptSubmission, CancelSubmission, LegReceipt, SendReceipt, SendSubmission, TransferRecord,
};
use courier_core::types::{CryptoType, TxHash};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::request_error;

/// A hash field the ledger sends either bare or as a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(TxHash),
    Many(Vec<TxHash>),
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<TxHash> {
        match self {
            Self::One(hash) => vec![hash],
            Self::Many(hashes) => hashes,
        }
    }

    fn first(self) -> Option<TxHash> {
        self.into_vec().into_iter().next()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireStage {
    #[serde(default)]
    pub tx_timestamp: Option<u64>,
    #[serde(default)]
    pub tx_state: Option<String>,
    #[serde(default)]
    pub tx_hash: Option<OneOrMany>,
}

/// A transfer as the ledger returns it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTransfer {
    pub transfer_id: String,
    #[serde(default)]
    pub receiving_id: Option<String>,
    pub sender: String,
    pub destination: String,
    pub transfer_amount: String,
    pub crypto_type: CryptoType,
    #[serde(default)]
    pub send_tx_hash: Option<OneOrMany>,
    /// Base64 of the encrypted escrow.
    pub data: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub sender_to_chainsfer: Option<WireStage>,
    #[serde(default)]
    pub chainsfer_to_receiver: Option<WireStage>,
    #[serde(default)]
    pub chainsfer_to_sender: Option<WireStage>,
}

fn encode_data(encrypted_escrow: &str) -> String {
    STANDARD.encode(encrypted_escrow)
}

fn decode_data(data: &str) -> Result<String, TransportError> {
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| TransportError::Decode(format!("transfer data: {e}")))?;
    String::from_utf8(bytes).map_err(|_| TransportError::Decode("transfer data is not utf-8".into()))
}

/// Flatten the per-stage layout into a [`TransferRecord`].
pub fn normalize(wire: WireTransfer) -> Result<TransferRecord, TransportError> {
    let encrypted_escrow = decode_data(&wire.data)?;
    let (send, receive, cancel) = (
        wire.sender_to_chainsfer,
        wire.chainsfer_to_receiver,
        wire.chainsfer_to_sender,
    );

    let mut send_tx_hashes = wire.send_tx_hash.map(OneOrMany::into_vec).unwrap_or_default();
    if send_tx_hashes.is_empty() {
        if let Some(hashes) = send.as_ref().and_then(|s| s.tx_hash.clone()) {
            send_tx_hashes = hashes.into_vec();
        }
    }

    let (send_timestamp, send_tx_state) = stage_meta(send.as_ref());
    let (receive_timestamp, receive_tx_state) = stage_meta(receive.as_ref());
    let (cancel_timestamp, cancel_tx_state) = stage_meta(cancel.as_ref());

    Ok(TransferRecord {
        transfer_id: wire.transfer_id,
        receiving_id: wire.receiving_id,
        sender: wire.sender,
        destination: wire.destination,
        transfer_amount: wire.transfer_amount,
        crypto_type: wire.crypto_type,
        send_tx_hashes,
        receive_tx_hash: receive.and_then(|s| s.tx_hash).and_then(OneOrMany::first),
        cancel_tx_hash: cancel.and_then(|s| s.tx_hash).and_then(OneOrMany::first),
        send_timestamp,
        receive_timestamp,
        cancel_timestamp,
        send_tx_state,
        receive_tx_state,
        cancel_tx_state,
        encrypted_escrow,
        password: wire.password,
    })
}

fn stage_meta(stage: Option<&WireStage>) -> (Option<u64>, Option<String>) {
    match stage {
        Some(stage) => (stage.tx_timestamp, stage.tx_state.clone()),
        None => (None, None),
    }
}

/// Decode a `BATCH_GET` answer, skipping entries the ledger flags with `error`.
pub fn normalize_batch(items: Vec<Value>) -> Result<Vec<TransferRecord>, TransportError> {
    let mut records = Vec::with_capacity(items.len());
    for item in items {
        if let Some(error) = item.get("error") {
            warn!(%error, "transfer detail not found");
            continue;
        }
        let wire: WireTransfer =
            serde_json::from_value(item).map_err(|e| TransportError::Decode(e.to_string()))?;
        records.push(normalize(wire)?);
    }
    Ok(records)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSendReceipt {
    transfer_id: String,
    #[serde(default)]
    receiving_id: Option<String>,
    send_timestamp: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireLegReceipt {
    transfer_id: String,
    #[serde(alias = "receiveTimestamp", alias = "cancelTimestamp")]
    timestamp: u64,
}

pub struct HttpLedgerClient {
    http: reqwest::Client,
    endpoint: String,
    client_id: String,
}

impl HttpLedgerClient {
    pub fn new(http: reqwest::Client, base_url: &str, client_id: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: format!("{}/transfer", base_url.trim_end_matches('/')),
            client_id: client_id.into(),
        }
    }

    /// Body of a request: `clientId`, `action`, then the action's fields.
    pub fn envelope(&self, action: &str, fields: Value) -> Value {
        let mut body = json!({ "clientId": self.client_id, "action": action });
        if let (Some(body), Value::Object(fields)) = (body.as_object_mut(), fields) {
            body.extend(fields);
        }
        body
    }

    async fn post<T: DeserializeOwned>(&self, action: &str, fields: Value) -> Result<T, TransportError> {
        let body = self.envelope(action, fields);
        debug!(action, endpoint = %self.endpoint, "ledger request");
        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(TransportError::NotFound(format!("{action} {}", body)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response.json().await.map_err(request_error)
    }
}

fn lookup_fields(lookup: &TransferLookup) -> Value {
    match lookup {
        TransferLookup::TransferId(id) => json!({ "transferId": id }),
        TransferLookup::ReceivingId(id) => json!({ "receivingId": id }),
    }
}

pub fn send_fields(submission: &SendSubmission) -> Value {
    json!({
        "sender": submission.sender,
        "destination": submission.destination,
        "transferAmount": submission.transfer_amount,
        "cryptoType": submission.crypto_type,
        "sendTxHash": submission.send_tx_hashes,
        "data": encode_data(&submission.encrypted_escrow),
        "sendMessage": submission.send_message,
    })
}

#[async_trait]
impl LedgerService for HttpLedgerClient {
    async fn submit_send(&self, submission: &SendSubmission) -> Result<SendReceipt, TransportError> {
        let wire: WireSendReceipt = self.post("SEND", send_fields(submission)).await?;
        Ok(SendReceipt {
            transfer_id: wire.transfer_id,
            receiving_id: wire.receiving_id,
            send_timestamp: wire.send_timestamp,
        })
    }

    async fn submit_accept(&self, submission: &AcceptSubmission) -> Result<LegReceipt, TransportError> {
        let fields = json!({
            "receivingId": submission.receiving_id,
            "receiveTxHash": submission.receive_tx_hash,
            "receiveMessage": submission.receive_message,
        });
        let wire: WireLegReceipt = self.post("RECEIVE", fields).await?;
        Ok(LegReceipt {
            transfer_id: wire.transfer_id,
            tx_hash: submission.receive_tx_hash.clone(),
            timestamp: wire.timestamp,
        })
    }

    async fn submit_cancel(&self, submission: &CancelSubmission) -> Result<LegReceipt, TransportError> {
        let fields = json!({
            "transferId": submission.transfer_id,
            "cancelTxHash": submission.cancel_tx_hash,
            "cancelMessage": submission.cancel_message,
        });
        let wire: WireLegReceipt = self.post("CANCEL", fields).await?;
        Ok(LegReceipt {
            transfer_id: wire.transfer_id,
            tx_hash: submission.cancel_tx_hash.clone(),
            timestamp: wire.timestamp,
        })
    }

    async fn get_transfer(&self, lookup: &TransferLookup) -> Result<TransferRecord, TransportError> {
        let wire: WireTransfer = self.post("GET", lookup_fields(lookup)).await?;
        normalize(wire)
    }

    async fn get_transfers(&self, lookups: &[TransferLookup]) -> Result<Vec<TransferRecord>, TransportError> {
        let mut transfer_ids = Vec::new();
        let mut receiving_ids = Vec::new();
        for lookup in lookups {
            match lookup {
                TransferLookup::TransferId(id) => transfer_ids.push(id),
                TransferLookup::ReceivingId(id) => receiving_ids.push(id),
            }
        }
        let fields = json!({ "transferIds": transfer_ids, "receivingIds": receiving_ids });
        let items: Vec<Value> = self.post("BATCH_GET", fields).await?;
        normalize_batch(items)
    }
}
