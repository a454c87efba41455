//! In-memory stand-in for an Ethereum node and a Bitcoin indexer.
//!
//! Signed transactions are decoded and applied to account balances or
//! appended to the Bitcoin history, so tests observe the same effects a
//! real chain would show.

use std::collections::HashMap;

use alloy::consensus::transaction::SignerRecoverable;
use alloy::consensus::{Transaction as _, TxEnvelope};
use alloy::eips::eip2718::Decodable2718;
use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use bitcoin::Network;
use courier_core::constants::NATIVE_TRANSFER_GAS;
use courier_core::error::TransportError;
use courier_core::traits::{BtcIndexer, EthRpc};
use courier_core::types::{BtcTransaction, BtcTxInput, BtcTxOutput, EthCall, TxHash};
use courier_wallet::discovery::utxos_from_txs;
use parking_lot::Mutex;

/// Gas the fake node charges for a token `transfer` unless overridden.
pub const TOKEN_TRANSFER_GAS: u64 = 50_000;

const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];
const BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];

fn decode_transfer(data: &[u8]) -> Option<(Address, U256)> {
    if data.len() != 68 || data[..4] != TRANSFER_SELECTOR {
        return None;
    }
    Some((Address::from_slice(&data[16..36]), U256::from_be_slice(&data[36..68])))
}

fn rejected(reason: impl Into<String>) -> TransportError {
    TransportError::Request(reason.into())
}

/// An applied account-chain transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEthTx {
    pub hash: TxHash,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub gas: u64,
    pub gas_price: u128,
    pub nonce: u64,
}

impl SentEthTx {
    /// Recipient and amount when this is a token `transfer`.
    pub fn token_transfer(&self) -> Option<(Address, U256)> {
        decode_transfer(&self.data)
    }

    pub fn fee(&self) -> U256 {
        U256::from(self.gas) * U256::from(self.gas_price)
    }
}

struct State {
    chain_id: u64,
    gas_price: u128,
    token_gas: u64,
    eth: HashMap<Address, U256>,
    /// Keyed by (token contract, owner).
    tokens: HashMap<(Address, Address), U256>,
    nonces: HashMap<Address, u64>,
    eth_txs: Vec<SentEthTx>,
    reject_token_transfers: bool,
    btc_txs: Vec<BtcTransaction>,
    btc_fee_rate: u64,
    credits: u64,
}

impl State {
    fn eth_balance(&self, address: Address) -> U256 {
        self.eth.get(&address).copied().unwrap_or(U256::ZERO)
    }

    fn token_balance(&self, token: Address, owner: Address) -> U256 {
        self.tokens.get(&(token, owner)).copied().unwrap_or(U256::ZERO)
    }

    fn apply_eth(&mut self, tx: SentEthTx) -> Result<(), TransportError> {
        let expected_nonce = self.nonces.get(&tx.from).copied().unwrap_or(0);
        if tx.nonce != expected_nonce {
            return Err(rejected(format!("nonce {} != expected {expected_nonce}", tx.nonce)));
        }
        let spend = tx.value + tx.fee();
        let balance = self.eth_balance(tx.from);
        if balance < spend {
            return Err(rejected(format!("insufficient funds: have {balance}, need {spend}")));
        }
        if !tx.data.is_empty() {
            let (to, amount) =
                decode_transfer(&tx.data).ok_or_else(|| rejected("unsupported contract call"))?;
            if self.reject_token_transfers {
                return Err(rejected("execution reverted"));
            }
            let held = self.token_balance(tx.to, tx.from);
            if held < amount {
                return Err(rejected("execution reverted: transfer amount exceeds balance"));
            }
            self.tokens.insert((tx.to, tx.from), held - amount);
            *self.tokens.entry((tx.to, to)).or_default() += amount;
        }
        self.eth.insert(tx.from, balance - spend);
        *self.eth.entry(tx.to).or_default() += tx.value;
        self.nonces.insert(tx.from, expected_nonce + 1);
        self.eth_txs.push(tx);
        Ok(())
    }

    fn btc_history(&self, address: &str) -> Vec<BtcTransaction> {
        let mine = Some(address);
        self.btc_txs
            .iter()
            .filter(|tx| {
                tx.outputs.iter().any(|o| o.address.as_deref() == mine)
                    || tx.inputs.iter().any(|i| i.address.as_deref() == mine)
            })
            .cloned()
            .collect()
    }

    fn btc_output(&self, hash: &str, index: u32) -> Option<&BtcTxOutput> {
        self.btc_txs
            .iter()
            .find(|tx| tx.hash == hash)
            .and_then(|tx| tx.outputs.iter().find(|o| o.index == index))
    }

    fn btc_spent(&self, hash: &str, index: u32) -> bool {
        self.btc_txs
            .iter()
            .flat_map(|tx| tx.inputs.iter())
            .any(|i| i.prev_hash == hash && i.prev_index == index)
    }
}

pub struct FakeChain {
    network: Network,
    state: Mutex<State>,
}

impl FakeChain {
    pub fn new(chain_id: u64, gas_price: u128, btc_fee_rate: u64) -> Self {
        Self {
            network: Network::Testnet,
            state: Mutex::new(State {
                chain_id,
                gas_price,
                token_gas: TOKEN_TRANSFER_GAS,
                eth: HashMap::new(),
                tokens: HashMap::new(),
                nonces: HashMap::new(),
                eth_txs: Vec::new(),
                reject_token_transfers: false,
                btc_txs: Vec::new(),
                btc_fee_rate,
                credits: 0,
            }),
        }
    }

    pub fn fund_eth(&self, address: Address, amount: U256) {
        *self.state.lock().eth.entry(address).or_default() += amount;
    }

    pub fn fund_token(&self, token: Address, owner: Address, amount: U256) {
        *self.state.lock().tokens.entry((token, owner)).or_default() += amount;
    }

    pub fn eth_balance(&self, address: Address) -> U256 {
        self.state.lock().eth_balance(address)
    }

    pub fn token_balance(&self, token: Address, owner: Address) -> U256 {
        self.state.lock().token_balance(token, owner)
    }

    /// Every applied account-chain transaction, in order.
    pub fn eth_txs(&self) -> Vec<SentEthTx> {
        self.state.lock().eth_txs.clone()
    }

    /// Price quoted by `gas_price` from now on.
    pub fn set_gas_price(&self, gas_price: u128) {
        self.state.lock().gas_price = gas_price;
    }

    /// Gas estimated for token transfers from now on.
    pub fn set_token_transfer_gas(&self, gas: u64) {
        self.state.lock().token_gas = gas;
    }

    /// Make every token `transfer` revert.
    pub fn reject_token_transfers(&self, reject: bool) {
        self.state.lock().reject_token_transfers = reject;
    }

    /// Pay `value` satoshi to `address` from outside the wallet. Returns the
    /// crediting transaction's hash.
    pub fn credit_btc(&self, address: &str, value: u64) -> String {
        let mut state = self.state.lock();
        state.credits += 1;
        let hash = format!("{:064x}", state.credits);
        state.btc_txs.push(BtcTransaction {
            hash: hash.clone(),
            inputs: Vec::new(),
            outputs: vec![BtcTxOutput {
                index: 0,
                value,
                address: Some(address.to_string()),
            }],
        });
        hash
    }

    /// Unspent satoshi held by `address`.
    pub fn btc_balance(&self, address: &str) -> u64 {
        let history = self.state.lock().btc_history(address);
        utxos_from_txs(&history, address, "").iter().map(|u| u.value).sum()
    }

    /// Every accepted Bitcoin transaction, in order.
    pub fn btc_txs(&self) -> Vec<BtcTransaction> {
        self.state.lock().btc_txs.clone()
    }
}

#[async_trait]
impl EthRpc for FakeChain {
    async fn chain_id(&self) -> Result<u64, TransportError> {
        Ok(self.state.lock().chain_id)
    }

    async fn gas_price(&self) -> Result<u128, TransportError> {
        Ok(self.state.lock().gas_price)
    }

    async fn estimate_gas(&self, call: &EthCall) -> Result<u64, TransportError> {
        if call.data.is_empty() {
            return Ok(NATIVE_TRANSFER_GAS);
        }
        let token_gas = self.state.lock().token_gas;
        decode_transfer(&call.data)
            .map(|_| token_gas)
            .ok_or_else(|| rejected("unsupported contract call"))
    }

    async fn balance(&self, address: Address) -> Result<U256, TransportError> {
        Ok(self.eth_balance(address))
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, TransportError> {
        Ok(self.state.lock().nonces.get(&address).copied().unwrap_or(0))
    }

    async fn call(&self, call: &EthCall) -> Result<Bytes, TransportError> {
        if call.data.len() != 36 || call.data[..4] != BALANCE_OF_SELECTOR {
            return Err(rejected("unsupported read call"));
        }
        let owner = Address::from_slice(&call.data[16..36]);
        let balance = self.token_balance(call.to, owner);
        Ok(Bytes::from(balance.to_be_bytes::<32>().to_vec()))
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, TransportError> {
        let envelope = TxEnvelope::decode_2718(&mut &raw[..])
            .map_err(|e| TransportError::Decode(format!("raw transaction: {e}")))?;
        let from = envelope
            .recover_signer()
            .map_err(|e| TransportError::Decode(format!("signature: {e}")))?;
        let to = envelope.to().ok_or_else(|| rejected("contract creation unsupported"))?;
        let gas_price = envelope.gas_price().ok_or_else(|| rejected("legacy gas price required"))?;

        let mut state = self.state.lock();
        if envelope.chain_id() != Some(state.chain_id) {
            return Err(rejected(format!("chain id {:?} != {}", envelope.chain_id(), state.chain_id)));
        }
        let hash = TxHash::from(*envelope.tx_hash());
        state.apply_eth(SentEthTx {
            hash: hash.clone(),
            from,
            to,
            value: envelope.value(),
            data: envelope.input().clone(),
            gas: envelope.gas_limit(),
            gas_price,
            nonce: envelope.nonce(),
        })?;
        Ok(hash)
    }

    async fn transaction_sender(&self, hash: &TxHash) -> Result<Address, TransportError> {
        self.state
            .lock()
            .eth_txs
            .iter()
            .find(|tx| &tx.hash == hash)
            .map(|tx| tx.from)
            .ok_or_else(|| TransportError::NotFound(hash.to_string()))
    }
}

#[async_trait]
impl BtcIndexer for FakeChain {
    async fn address_transactions(&self, address: &str) -> Result<Vec<BtcTransaction>, TransportError> {
        Ok(self.state.lock().btc_history(address))
    }

    async fn transaction_inputs(&self, hash: &TxHash) -> Result<Vec<BtcTxInput>, TransportError> {
        self.state
            .lock()
            .btc_txs
            .iter()
            .find(|tx| tx.hash == hash.as_str())
            .map(|tx| tx.inputs.clone())
            .ok_or_else(|| TransportError::NotFound(hash.to_string()))
    }

    async fn broadcast(&self, raw_hex: &str) -> Result<TxHash, TransportError> {
        let bytes = hex::decode(raw_hex).map_err(|e| TransportError::Decode(e.to_string()))?;
        let tx: bitcoin::Transaction =
            bitcoin::consensus::deserialize(&bytes).map_err(|e| TransportError::Decode(e.to_string()))?;

        let mut state = self.state.lock();
        let mut inputs = Vec::with_capacity(tx.input.len());
        for txin in &tx.input {
            let prev_hash = txin.previous_output.txid.to_string();
            let prev_index = txin.previous_output.vout;
            let prev = state
                .btc_output(&prev_hash, prev_index)
                .ok_or_else(|| rejected(format!("missing input {prev_hash}:{prev_index}")))?;
            let address = prev.address.clone();
            if state.btc_spent(&prev_hash, prev_index) {
                return Err(rejected(format!("input {prev_hash}:{prev_index} already spent")));
            }
            inputs.push(BtcTxInput {
                prev_hash,
                prev_index,
                address,
            });
        }
        let outputs = tx
            .output
            .iter()
            .enumerate()
            .map(|(index, out)| BtcTxOutput {
                index: index as u32,
                value: out.value.to_sat(),
                address: bitcoin::Address::from_script(&out.script_pubkey, self.network)
                    .ok()
                    .map(|a| a.to_string()),
            })
            .collect();

        let hash = tx.compute_txid().to_string();
        state.btc_txs.push(BtcTransaction {
            hash: hash.clone(),
            inputs,
            outputs,
        });
        Ok(TxHash(hash))
    }

    async fn fee_per_byte(&self) -> Result<u64, TransportError> {
        Ok(self.state.lock().btc_fee_rate)
    }
}
