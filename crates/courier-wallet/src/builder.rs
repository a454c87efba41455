//! Transaction construction and signing for escrow legs.
//!
//! Account chains: [`EthTxBuilder`] assembles a native or token transfer and
//! hands back an [`EthTx`] whose integers are only hex-encoded at
//! submission. Escrow-held keys sign locally with [`sign_eth`].
//!
//! Bitcoin: [`BtcTxBuilder`] spends P2SH-P2WPKH outputs and produces raw hex.

use std::str::FromStr;

use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, U256};
use alloy::signers::local::PrivateKeySigner;
use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash as _;
use bitcoin::script::PushBytesBuf;
use bitcoin::secp256k1::{Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, CompressedPublicKey, Network, OutPoint, PrivateKey, ScriptBuf, Sequence, Transaction, TxIn, TxOut,
    Txid, Witness,
};
use courier_core::types::{BtcPaymentRequest, Erc20Token, EthCall, EthTx, UtxoRecord};

use crate::erc20;
use crate::error::WalletError;

/// Builder for account-chain transfers.
///
/// # Example
/// ```ignore
/// let tx = EthTxBuilder::native(from, escrow, wei)
///     .set_gas(21_000)
///     .set_gas_price(price)
///     .build()?;
/// ```
#[derive(Debug, Clone)]
pub struct EthTxBuilder {
    call: EthCall,
    gas: Option<u64>,
    gas_price: Option<u128>,
    nonce: Option<u64>,
    chain_id: Option<u64>,
}

impl EthTxBuilder {
    /// `{from, to, value}` transfer of the native asset.
    pub fn native(from: Address, to: Address, value: U256) -> Self {
        Self::from_call(EthCall {
            from,
            to,
            value,
            data: Bytes::new(),
        })
    }

    /// `transfer(to, amount)` call against the token contract.
    pub fn token(token: &Erc20Token, from: Address, to: Address, amount: U256) -> Self {
        Self::from_call(erc20::transfer_call(token, from, to, amount))
    }

    fn from_call(call: EthCall) -> Self {
        Self {
            call,
            gas: None,
            gas_price: None,
            nonce: None,
            chain_id: None,
        }
    }

    /// The call as it would be simulated, without gas attached.
    pub fn call(&self) -> &EthCall {
        &self.call
    }

    pub fn set_gas(&mut self, gas: u64) -> &mut Self {
        self.gas = Some(gas);
        self
    }

    pub fn set_gas_price(&mut self, gas_price: u128) -> &mut Self {
        self.gas_price = Some(gas_price);
        self
    }

    pub fn set_nonce(&mut self, nonce: u64) -> &mut Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn set_chain_id(&mut self, chain_id: u64) -> &mut Self {
        self.chain_id = Some(chain_id);
        self
    }

    pub fn build(&self) -> Result<EthTx, WalletError> {
        let gas = self.gas.ok_or_else(|| WalletError::BuildError("gas limit not set".into()))?;
        let gas_price = self
            .gas_price
            .ok_or_else(|| WalletError::BuildError("gas price not set".into()))?;
        if gas == 0 {
            return Err(WalletError::BuildError("gas limit is zero".into()));
        }
        Ok(EthTx {
            call: self.call.clone(),
            gas,
            gas_price,
            nonce: self.nonce,
            chain_id: self.chain_id,
        })
    }
}

/// Sign `tx` with a locally held key, returning the EIP-2718 encoding.
pub async fn sign_eth(tx: &EthTx, signer: PrivateKeySigner) -> Result<Vec<u8>, WalletError> {
    if tx.nonce.is_none() {
        return Err(WalletError::BuildError("nonce required for local signing".into()));
    }
    if signer.address() != tx.call.from {
        return Err(WalletError::BuildError(format!(
            "signer {} cannot send from {}",
            signer.address(),
            tx.call.from
        )));
    }
    let wallet = EthereumWallet::from(signer);
    let envelope = tx
        .to_request()
        .build(&wallet)
        .await
        .map_err(|e| WalletError::BuildError(e.to_string()))?;
    Ok(envelope.encoded_2718())
}

/// One spendable input with the key controlling it.
#[derive(Debug, Clone)]
pub struct BtcInput {
    pub utxo: UtxoRecord,
    pub key: PrivateKey,
}

/// A signed Bitcoin transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedBtcTx {
    pub txid: String,
    pub raw_hex: String,
}

/// Builder for P2SH-P2WPKH spends.
pub struct BtcTxBuilder {
    network: Network,
    inputs: Vec<BtcInput>,
    outputs: Vec<(bitcoin::Address, u64)>,
}

impl BtcTxBuilder {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn add_input(&mut self, utxo: UtxoRecord, key: PrivateKey) -> &mut Self {
        self.inputs.push(BtcInput { utxo, key });
        self
    }

    pub fn add_output(&mut self, address: &str, value: u64) -> Result<&mut Self, WalletError> {
        if value == 0 {
            return Err(WalletError::InvalidAmount("output value is zero".into()));
        }
        let address = parse_btc_address(address, self.network)?;
        self.outputs.push((address, value));
        Ok(self)
    }

    fn check_balance(&self) -> Result<(), WalletError> {
        if self.inputs.is_empty() || self.outputs.is_empty() {
            return Err(WalletError::BuildError("transaction needs inputs and outputs".into()));
        }
        let total_in: u64 = self.inputs.iter().map(|i| i.utxo.value).sum();
        let total_out: u64 = self.outputs.iter().map(|(_, v)| *v).sum();
        if total_out > total_in {
            return Err(WalletError::InsufficientFunds {
                have: U256::from(total_in),
                need: U256::from(total_out),
            });
        }
        Ok(())
    }

    /// Sign every input (BIP-143, SIGHASH_ALL) and serialize.
    pub fn build_signed(&self) -> Result<SignedBtcTx, WalletError> {
        self.check_balance()?;

        let mut input = Vec::with_capacity(self.inputs.len());
        for spend in &self.inputs {
            let txid = Txid::from_str(&spend.utxo.tx_hash)
                .map_err(|e| WalletError::BuildError(format!("txid {}: {e}", spend.utxo.tx_hash)))?;
            input.push(TxIn {
                previous_output: OutPoint::new(txid, spend.utxo.output_index),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            });
        }
        let output = self
            .outputs
            .iter()
            .map(|(address, value)| TxOut {
                value: Amount::from_sat(*value),
                script_pubkey: address.script_pubkey(),
            })
            .collect();

        let mut tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input,
            output,
        };

        let secp = Secp256k1::new();
        let mut unlocks = Vec::with_capacity(self.inputs.len());
        {
            let mut cache = SighashCache::new(&tx);
            for (index, spend) in self.inputs.iter().enumerate() {
                let public = CompressedPublicKey::from_private_key(&secp, &spend.key)
                    .map_err(|e| WalletError::KeyMaterial(e.to_string()))?;
                let redeem = ScriptBuf::new_p2wpkh(&public.wpubkey_hash());
                let sighash = cache
                    .p2wpkh_signature_hash(
                        index,
                        &redeem,
                        Amount::from_sat(spend.utxo.value),
                        EcdsaSighashType::All,
                    )
                    .map_err(|e| WalletError::BuildError(e.to_string()))?;
                let message = Message::from_digest(sighash.to_byte_array());
                let signature = bitcoin::ecdsa::Signature {
                    signature: secp.sign_ecdsa(&message, &spend.key.inner),
                    sighash_type: EcdsaSighashType::All,
                };
                let push = PushBytesBuf::try_from(redeem.to_bytes())
                    .map_err(|e| WalletError::BuildError(e.to_string()))?;
                let script_sig = ScriptBuf::builder().push_slice(push).into_script();
                unlocks.push((script_sig, Witness::p2wpkh(&signature, &public.0)));
            }
        }
        for (txin, (script_sig, witness)) in tx.input.iter_mut().zip(unlocks) {
            txin.script_sig = script_sig;
            txin.witness = witness;
        }

        Ok(SignedBtcTx {
            txid: tx.compute_txid().to_string(),
            raw_hex: bitcoin::consensus::encode::serialize_hex(&tx),
        })
    }
}

pub fn parse_btc_address(address: &str, network: Network) -> Result<bitcoin::Address, WalletError> {
    bitcoin::Address::from_str(address.trim())
        .map_err(|e| WalletError::InvalidAddress(format!("{address}: {e}")))?
        .require_network(network)
        .map_err(|e| WalletError::InvalidAddress(format!("{address}: {e}")))
}

/// Build and sign a payment: `amount` to `payment.to`, change (if any) to
/// `change_address`. `key_for` resolves the key behind each UTXO.
pub fn build_payment<F>(
    payment: &BtcPaymentRequest,
    change_address: &str,
    network: Network,
    mut key_for: F,
) -> Result<SignedBtcTx, WalletError>
where
    F: FnMut(&UtxoRecord) -> Result<PrivateKey, WalletError>,
{
    let change = payment.change().ok_or_else(|| WalletError::InsufficientFunds {
        have: U256::from(payment.input_total()),
        need: U256::from(payment.amount.saturating_add(payment.fee)),
    })?;

    let mut builder = BtcTxBuilder::new(network);
    for utxo in &payment.utxos {
        let key = key_for(utxo)?;
        builder.add_input(utxo.clone(), key);
    }
    builder.add_output(&payment.to, payment.amount)?;
    if change > 0 {
        builder.add_output(change_address, change)?;
    }
    builder.build_signed()
}
