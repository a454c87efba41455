//! Bitcoin indexer client for Esplora-compatible REST endpoints.
//!
//! Address history is paged: the first request returns mempool entries and
//! the newest [`CHAIN_PAGE`] confirmed ones, then
//! `/txs/chain/{last_txid}` continues backwards.

use std::collections::HashMap;

use async_trait::async_trait;
use courier_core::error::TransportError;
use courier_core::traits::BtcIndexer;
use courier_core::types::{BtcTransaction, BtcTxInput, BtcTxOutput, TxHash};
use courier_wallet::fees::cap_fee_rate;
use serde::Deserialize;
use tracing::debug;

use crate::error::request_error;

/// Confirmed transactions per history page.
pub const CHAIN_PAGE: usize = 25;

#[derive(Debug, Clone, Deserialize)]
pub struct EsploraPrevout {
    #[serde(default)]
    pub scriptpubkey_address: Option<String>,
    pub value: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EsploraVin {
    pub txid: String,
    pub vout: u32,
    #[serde(default)]
    pub prevout: Option<EsploraPrevout>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EsploraVout {
    #[serde(default)]
    pub scriptpubkey_address: Option<String>,
    pub value: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EsploraStatus {
    #[serde(default)]
    pub confirmed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EsploraTx {
    pub txid: String,
    pub vin: Vec<EsploraVin>,
    pub vout: Vec<EsploraVout>,
    #[serde(default)]
    pub status: EsploraStatus,
}

impl EsploraTx {
    fn inputs(&self) -> Vec<BtcTxInput> {
        self.vin
            .iter()
            .map(|vin| BtcTxInput {
                prev_hash: vin.txid.clone(),
                prev_index: vin.vout,
                address: vin.prevout.as_ref().and_then(|p| p.scriptpubkey_address.clone()),
            })
            .collect()
    }
}

impl From<EsploraTx> for BtcTransaction {
    fn from(tx: EsploraTx) -> Self {
        let inputs = tx.inputs();
        let outputs = tx
            .vout
            .into_iter()
            .enumerate()
            .map(|(index, out)| BtcTxOutput {
                index: index as u32,
                value: out.value,
                address: out.scriptpubkey_address,
            })
            .collect();
        Self {
            hash: tx.txid,
            inputs,
            outputs,
        }
    }
}

/// Pick the rate for `target` blocks, falling back to the nearest slower
/// target the oracle reports. Rounded up and capped.
pub fn fee_rate_for_target(estimates: &HashMap<String, f64>, target: u16) -> Option<u64> {
    let mut targets: Vec<(u16, f64)> = estimates
        .iter()
        .filter_map(|(k, v)| k.parse::<u16>().ok().map(|t| (t, *v)))
        .collect();
    targets.sort_by_key(|(t, _)| *t);
    let rate = targets
        .iter()
        .find(|(t, _)| *t >= target)
        .or_else(|| targets.last())
        .map(|(_, rate)| *rate)?;
    if !rate.is_finite() || rate < 0.0 {
        return None;
    }
    Some(cap_fee_rate(rate.ceil() as u64).max(1))
}

pub struct HttpBtcIndexer {
    http: reqwest::Client,
    base_url: String,
    fee_target: u16,
}

impl HttpBtcIndexer {
    pub fn new(http: reqwest::Client, base_url: &str, fee_target: u16) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            fee_target,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, TransportError> {
        let url = format!("{}{path}", self.base_url);
        let response = self.http.get(&url).send().await.map_err(request_error)?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(TransportError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        response.json().await.map_err(request_error)
    }
}

#[async_trait]
impl BtcIndexer for HttpBtcIndexer {
    async fn address_transactions(&self, address: &str) -> Result<Vec<BtcTransaction>, TransportError> {
        let mut txs: Vec<EsploraTx> = self.get_json(&format!("/address/{address}/txs")).await?;
        let mut page_len = txs.iter().filter(|tx| tx.status.confirmed).count();
        let mut cursor = txs.iter().rev().find(|tx| tx.status.confirmed).map(|tx| tx.txid.clone());
        let mut pages = Vec::new();
        while page_len >= CHAIN_PAGE {
            let Some(last_seen) = cursor.take() else { break };
            let page: Vec<EsploraTx> = self
                .get_json(&format!("/address/{address}/txs/chain/{last_seen}"))
                .await?;
            page_len = page.len();
            cursor = page.last().map(|tx| tx.txid.clone());
            pages.push(page);
        }
        txs.extend(pages.into_iter().flatten());
        debug!(address, count = txs.len(), "address history fetched");
        // Esplora lists newest first.
        Ok(txs.into_iter().rev().map(BtcTransaction::from).collect())
    }

    async fn transaction_inputs(&self, hash: &TxHash) -> Result<Vec<BtcTxInput>, TransportError> {
        let tx: EsploraTx = self.get_json(&format!("/tx/{hash}")).await?;
        Ok(tx.inputs())
    }

    async fn broadcast(&self, raw_hex: &str) -> Result<TxHash, TransportError> {
        let response = self
            .http
            .post(format!("{}/tx", self.base_url))
            .body(raw_hex.to_string())
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status();
        let body = response.text().await.map_err(request_error)?;
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(TxHash(body.trim().to_string()))
    }

    async fn fee_per_byte(&self) -> Result<u64, TransportError> {
        let estimates: HashMap<String, f64> = self.get_json("/fee-estimates").await?;
        fee_rate_for_target(&estimates, self.fee_target)
            .ok_or_else(|| TransportError::Decode("fee oracle returned no usable estimate".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_tx() -> EsploraTx {
        serde_json::from_value(json!({
            "txid": "bb",
            "vin": [{
                "txid": "aa",
                "vout": 1,
                "prevout": { "scriptpubkey_address": "2Nfunder", "value": 120000 }
            }],
            "vout": [
                { "scriptpubkey_address": "2Nescrow", "value": 100000 },
                { "scriptpubkey_address": "2Nchange", "value": 17525 },
                { "value": 0 }
            ],
            "status": { "confirmed": true }
        }))
        .unwrap()
    }

    #[test]
    fn esplora_tx_converts() {
        let tx = BtcTransaction::from(sample_tx());
        assert_eq!(tx.hash, "bb");
        assert_eq!(tx.inputs[0].prev_hash, "aa");
        assert_eq!(tx.inputs[0].address.as_deref(), Some("2Nfunder"));
        assert_eq!(tx.outputs.len(), 3);
        assert_eq!(tx.outputs[1].index, 1);
        assert_eq!(tx.outputs[2].address, None);
    }

    #[test]
    fn funding_inputs_name_the_funder() {
        let inputs = sample_tx().inputs();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].prev_index, 1);
    }

    #[test]
    fn fee_target_selection() {
        let estimates: HashMap<String, f64> =
            [("1", 40.2), ("3", 20.5), ("6", 12.1), ("144", 1.0)]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect();
        assert_eq!(fee_rate_for_target(&estimates, 6), Some(13));
        assert_eq!(fee_rate_for_target(&estimates, 2), Some(21));
        assert_eq!(fee_rate_for_target(&estimates, 500), Some(1));
        assert_eq!(fee_rate_for_target(&HashMap::new(), 6), None);
    }

    #[test]
    fn abnormal_fee_capped() {
        let estimates: HashMap<String, f64> = [("6".to_string(), 950.0)].into_iter().collect();
        assert_eq!(fee_rate_for_target(&estimates, 6), Some(200));
    }

    #[test]
    fn base_url_trimmed() {
        let indexer = HttpBtcIndexer::new(reqwest::Client::new(), "https://blockstream.info/testnet/api/", 6);
        assert_eq!(indexer.base_url, "https://blockstream.info/testnet/api");
    }
}
