//! Account-chain node access over an alloy HTTP provider.

use std::str::FromStr;
use std::sync::Arc;

use alloy::network::TransactionResponse;
use alloy::primitives::{Address, Bytes, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::transports::http::reqwest::Url;
use async_trait::async_trait;
use courier_core::error::TransportError;
use courier_core::traits::EthRpc;
use courier_core::types::{EthCall, TxHash};
use tracing::{debug, info, warn};

use crate::error::ClientError;

fn rpc_error(e: impl std::fmt::Display) -> TransportError {
    TransportError::Request(e.to_string())
}

#[derive(Clone)]
pub struct AlloyEthRpc {
    provider: Arc<dyn Provider + Send + Sync>,
}

impl AlloyEthRpc {
    pub fn connect(rpc_url: &str) -> Result<Self, ClientError> {
        let url = rpc_url.parse::<Url>().map_err(|e| ClientError::InvalidUrl {
            url: rpc_url.to_string(),
            reason: e.to_string(),
        })?;
        let provider = ProviderBuilder::new().connect_http(url);
        Ok(Self {
            provider: Arc::new(provider),
        })
    }

    /// Fail when the node serves a different chain than configured.
    pub async fn verify_chain_id(&self, expected: u64) -> Result<(), ClientError> {
        let actual = self.chain_id().await?;
        if actual != expected {
            warn!(expected, actual, "rpc chain id mismatch");
            return Err(ClientError::Config(format!(
                "rpc serves chain {actual}, configured for {expected}"
            )));
        }
        info!(chain_id = actual, "ethereum rpc connected");
        Ok(())
    }
}

fn parse_hash(hash: &TxHash) -> Result<alloy::primitives::TxHash, TransportError> {
    alloy::primitives::TxHash::from_str(hash.as_str())
        .map_err(|e| TransportError::Decode(format!("tx hash {hash}: {e}")))
}

#[async_trait]
impl EthRpc for AlloyEthRpc {
    async fn chain_id(&self) -> Result<u64, TransportError> {
        self.provider.get_chain_id().await.map_err(rpc_error)
    }

    async fn gas_price(&self) -> Result<u128, TransportError> {
        self.provider.get_gas_price().await.map_err(rpc_error)
    }

    async fn estimate_gas(&self, call: &EthCall) -> Result<u64, TransportError> {
        let gas = self.provider.estimate_gas(call.to_request()).await.map_err(rpc_error)?;
        debug!(gas, to = %call.to, "estimated gas");
        Ok(gas)
    }

    async fn balance(&self, address: Address) -> Result<U256, TransportError> {
        self.provider.get_balance(address).await.map_err(rpc_error)
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, TransportError> {
        self.provider.get_transaction_count(address).await.map_err(rpc_error)
    }

    async fn call(&self, call: &EthCall) -> Result<Bytes, TransportError> {
        self.provider.call(call.to_request()).await.map_err(rpc_error)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, TransportError> {
        let pending = self.provider.send_raw_transaction(raw).await.map_err(rpc_error)?;
        Ok((*pending.tx_hash()).into())
    }

    async fn transaction_sender(&self, hash: &TxHash) -> Result<Address, TransportError> {
        let tx = self
            .provider
            .get_transaction_by_hash(parse_hash(hash)?)
            .await
            .map_err(rpc_error)?
            .ok_or_else(|| TransportError::NotFound(format!("transaction {hash}")))?;
        Ok(tx.from())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_rejects_bad_url() {
        assert!(matches!(
            AlloyEthRpc::connect("not a url"),
            Err(ClientError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn connect_accepts_http_url() {
        assert!(AlloyEthRpc::connect("http://127.0.0.1:8545").is_ok());
    }

    #[test]
    fn hash_parsing() {
        let hash = TxHash(format!("0x{}", "ab".repeat(32)));
        assert!(parse_hash(&hash).is_ok());
        assert!(matches!(
            parse_hash(&TxHash("0xzz".into())),
            Err(TransportError::Decode(_))
        ));
    }
}
