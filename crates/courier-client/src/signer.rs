//! Custodial signer backed by a BIP-39 mnemonic held in this process.
//!
//! Ethereum accounts live at `m/44'/60'/0'/0/i`; Bitcoin addresses are
//! P2SH-P2WPKH at the BIP-49 paths the wallet asks for.

use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::{Address, B256};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use bip39::{Language, Mnemonic};
use bitcoin::bip32::{DerivationPath, Xpriv};
use bitcoin::secp256k1::Secp256k1;
use bitcoin::{Network, PrivateKey};
use courier_core::error::SignerError;
use courier_core::traits::{EthRpc, Signer};
use courier_core::types::{BtcPaymentRequest, EthTx, TxHash, WalletType};
use courier_wallet::builder::{build_payment, sign_eth};
use courier_wallet::keys::p2sh_p2wpkh_address;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::error::ClientError;

/// Accounts searched when matching a transaction's sender to a key.
pub const MAX_ETH_ACCOUNTS: u32 = 20;

fn eth_path(account_index: u32) -> String {
    format!("m/44'/60'/0'/0/{account_index}")
}

fn signer_error(e: impl std::fmt::Display) -> SignerError {
    SignerError::Other(e.to_string())
}

pub struct LocalKeySigner {
    master: Xpriv,
    network: Network,
    rpc: Arc<dyn EthRpc>,
}

impl LocalKeySigner {
    pub fn from_mnemonic(phrase: &str, network: Network, rpc: Arc<dyn EthRpc>) -> Result<Self, ClientError> {
        let normalized: String = phrase
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" ");
        let mnemonic = Mnemonic::parse_in(Language::English, &normalized)
            .map_err(|e| ClientError::KeyDerivation(e.to_string()))?;
        let seed = Zeroizing::new(mnemonic.to_seed(""));
        let master =
            Xpriv::new_master(network, &seed[..]).map_err(|e| ClientError::KeyDerivation(e.to_string()))?;
        Ok(Self { master, network, rpc })
    }

    fn derive(&self, path: &str) -> Result<Xpriv, SignerError> {
        let full = if path.starts_with('m') {
            path.to_string()
        } else {
            format!("m/{path}")
        };
        let path = DerivationPath::from_str(&full).map_err(signer_error)?;
        self.master.derive_priv(&Secp256k1::new(), &path).map_err(signer_error)
    }

    fn eth_key(&self, account_index: u32) -> Result<PrivateKeySigner, SignerError> {
        let xpriv = self.derive(&eth_path(account_index))?;
        PrivateKeySigner::from_bytes(&B256::from(xpriv.private_key.secret_bytes())).map_err(signer_error)
    }

    fn btc_key(&self, path: &str) -> Result<PrivateKey, SignerError> {
        Ok(self.derive(path)?.to_priv())
    }

    fn key_for_sender(&self, from: Address) -> Result<PrivateKeySigner, SignerError> {
        for index in 0..MAX_ETH_ACCOUNTS {
            let key = self.eth_key(index)?;
            if key.address() == from {
                return Ok(key);
            }
        }
        Err(SignerError::WrongAccount {
            expected: format!("one of the first {MAX_ETH_ACCOUNTS} accounts"),
            actual: from.to_string(),
        })
    }
}

#[async_trait]
impl Signer for LocalKeySigner {
    fn wallet_type(&self) -> WalletType {
        WalletType::Custodial
    }

    async fn eth_address(&self, account_index: u32) -> Result<Address, SignerError> {
        Ok(self.eth_key(account_index)?.address())
    }

    async fn sign_and_send(&self, tx: &EthTx) -> Result<TxHash, SignerError> {
        let key = self.key_for_sender(tx.call.from)?;
        let mut tx = tx.clone();
        let chain_id = self.rpc.chain_id().await.map_err(signer_error)?;
        match tx.chain_id {
            Some(expected) if expected != chain_id => {
                return Err(SignerError::WrongNetwork {
                    expected: expected.to_string(),
                    actual: chain_id.to_string(),
                });
            }
            _ => tx.chain_id = Some(chain_id),
        }
        if tx.nonce.is_none() {
            tx.nonce = Some(self.rpc.transaction_count(tx.call.from).await.map_err(signer_error)?);
        }
        let raw = sign_eth(&tx, key).await.map_err(signer_error)?;
        let hash = self.rpc.send_raw_transaction(&raw).await.map_err(signer_error)?;
        info!(tx_hash = %hash, from = %tx.call.from, "transaction sent");
        Ok(hash)
    }

    async fn btc_address(&self, key_path: &str) -> Result<String, SignerError> {
        let key = self.btc_key(key_path)?;
        let address = p2sh_p2wpkh_address(&key, self.network).map_err(signer_error)?;
        Ok(address.to_string())
    }

    async fn sign_btc_payment(&self, payment: &BtcPaymentRequest) -> Result<String, SignerError> {
        let change = self.btc_address(&payment.change_path).await?;
        let signed = build_payment(payment, &change, self.network, |utxo| {
            self.btc_key(&utxo.key_path)
                .map_err(|e| courier_wallet::WalletError::KeyMaterial(e.to_string()))
        })
        .map_err(signer_error)?;
        debug!(txid = %signed.txid, inputs = payment.utxos.len(), "bitcoin payment signed");
        Ok(signed.raw_hex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Bytes, U256};
    use courier_core::error::TransportError;
    use courier_core::types::{EthCall, UtxoRecord};
    use parking_lot::Mutex;

    // BIP-39 test vector mnemonic; its first account is well known.
    const PHRASE: &str = "test test test test test test test test test test test junk";

    // ------------------------------------------------------------------
    // Mock: EthRpc capturing raw transactions
    // ------------------------------------------------------------------

    #[derive(Default)]
    struct CaptureRpc {
        raw: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl EthRpc for CaptureRpc {
        async fn chain_id(&self) -> Result<u64, TransportError> {
            Ok(31_337)
        }
        async fn gas_price(&self) -> Result<u128, TransportError> {
            Ok(1)
        }
        async fn estimate_gas(&self, _: &EthCall) -> Result<u64, TransportError> {
            Ok(21_000)
        }
        async fn balance(&self, _: Address) -> Result<U256, TransportError> {
            Ok(U256::ZERO)
        }
        async fn transaction_count(&self, _: Address) -> Result<u64, TransportError> {
            Ok(7)
        }
        async fn call(&self, _: &EthCall) -> Result<Bytes, TransportError> {
            Ok(Bytes::new())
        }
        async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, TransportError> {
            self.raw.lock().push(raw.to_vec());
            Ok(TxHash("0x01".into()))
        }
        async fn transaction_sender(&self, _: &TxHash) -> Result<Address, TransportError> {
            Ok(Address::ZERO)
        }
    }

    fn signer(rpc: Arc<CaptureRpc>) -> LocalKeySigner {
        LocalKeySigner::from_mnemonic(PHRASE, Network::Testnet, rpc).unwrap()
    }

    #[tokio::test]
    async fn first_account_matches_known_address() {
        let s = signer(Arc::new(CaptureRpc::default()));
        let address = s.eth_address(0).await.unwrap();
        assert_eq!(
            address.to_string().to_lowercase(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
    }

    #[test]
    fn bad_mnemonic_rejected() {
        let result = LocalKeySigner::from_mnemonic("not a mnemonic", Network::Testnet, Arc::new(CaptureRpc::default()));
        assert!(matches!(result, Err(ClientError::KeyDerivation(_))));
    }

    #[tokio::test]
    async fn sends_from_owned_account_only() {
        let rpc = Arc::new(CaptureRpc::default());
        let s = signer(rpc.clone());
        let from = s.eth_address(1).await.unwrap();
        let tx = EthTx {
            call: EthCall {
                from,
                to: Address::ZERO,
                value: U256::from(1u8),
                data: Bytes::new(),
            },
            gas: 21_000,
            gas_price: 1,
            nonce: None,
            chain_id: None,
        };
        s.sign_and_send(&tx).await.unwrap();
        assert_eq!(rpc.raw.lock().len(), 1);

        let mut foreign = tx.clone();
        foreign.call.from = Address::repeat_byte(0x11);
        assert!(matches!(
            s.sign_and_send(&foreign).await,
            Err(SignerError::WrongAccount { .. })
        ));

        let mut wrong_chain = tx;
        wrong_chain.chain_id = Some(1);
        assert!(matches!(
            s.sign_and_send(&wrong_chain).await,
            Err(SignerError::WrongNetwork { .. })
        ));
    }

    #[tokio::test]
    async fn btc_addresses_are_nested_segwit() {
        let s = signer(Arc::new(CaptureRpc::default()));
        let a = s.btc_address("49'/1'/0'/0/0").await.unwrap();
        let b = s.btc_address("m/49'/1'/0'/0/1").await.unwrap();
        assert!(a.starts_with('2'), "testnet p2sh address: {a}");
        assert_ne!(a, b);
        assert!(s.btc_address("not/a/path").await.is_err());
    }

    #[tokio::test]
    async fn btc_payment_signed_with_path_keys() {
        let s = signer(Arc::new(CaptureRpc::default()));
        let to = s.btc_address("49'/1'/0'/0/5").await.unwrap();
        let payment = BtcPaymentRequest {
            utxos: vec![UtxoRecord {
                tx_hash: "11".repeat(32),
                output_index: 0,
                value: 100_000,
                key_path: "49'/1'/0'/0/0".into(),
            }],
            to,
            amount: 50_000,
            fee: 2_475,
            change_path: "49'/1'/0'/1/0".into(),
        };
        let raw = s.sign_btc_payment(&payment).await.unwrap();
        assert!(!raw.is_empty());
    }
}
