//! Transaction cost estimation.
//!
//! Account chains cost `gas_price × gas_limit`, with the limit simulated
//! against the node. UTXO chains cost `size_bytes × fee_per_byte`, with the
//! size taken from a per-script formula.

use std::sync::Arc;

use alloy::primitives::U256;
use courier_core::constants::{BTC_DECIMALS, ETH_DECIMALS, MAX_BTC_FEE_PER_BYTE, MOCK_AMOUNT, MOCK_FROM, MOCK_TO};
use courier_core::traits::EthRpc;
use courier_core::types::{Erc20Token, EthCall, TxCost};
use courier_core::units::to_human_readable_unit;
use tracing::{debug, warn};

use crate::erc20;
use crate::error::WalletError;

/// Fixed transaction overhead in bytes (version, locktime, counts).
const TX_OVERHEAD: u64 = 10;
/// P2SH-P2WPKH input, virtual bytes.
const SEGWIT_INPUT: u64 = 91;
const SEGWIT_OUTPUT: u64 = 32;
/// P2PKH input with signature and compressed key.
const LEGACY_INPUT: u64 = 148;
const LEGACY_OUTPUT: u64 = 34;

/// Estimated size of a Bitcoin transaction in bytes.
///
/// ```
/// use courier_wallet::fees::utxo_tx_size;
/// assert_eq!(utxo_tx_size(1, 2, true), 165);
/// assert_eq!(utxo_tx_size(1, 2, false), 226);
/// ```
pub fn utxo_tx_size(inputs: usize, outputs: usize, segwit: bool) -> u64 {
    let (per_input, per_output) = if segwit {
        (SEGWIT_INPUT, SEGWIT_OUTPUT)
    } else {
        (LEGACY_INPUT, LEGACY_OUTPUT)
    };
    TX_OVERHEAD + per_input * inputs as u64 + per_output * outputs as u64
}

/// Cost of a segwit transaction with the given shape.
pub fn utxo_cost(inputs: usize, outputs: usize, fee_per_byte: u64) -> Result<TxCost, WalletError> {
    let size = utxo_tx_size(inputs, outputs, true);
    let fee = size
        .checked_mul(fee_per_byte)
        .ok_or_else(|| WalletError::InvalidAmount(format!("fee overflow at {fee_per_byte} sat/byte")))?;
    let fee = U256::from(fee);
    debug!(inputs, outputs, size, fee_per_byte, %fee, "utxo fee");
    Ok(TxCost {
        price: U256::from(fee_per_byte),
        units: U256::from(size),
        cost_in_basic_unit: fee,
        cost_in_standard_unit: to_human_readable_unit(fee, BTC_DECIMALS, BTC_DECIMALS)?,
        approximate: false,
    })
}

/// Clamp a fee-oracle answer to [`MAX_BTC_FEE_PER_BYTE`].
pub fn cap_fee_rate(rate: u64) -> u64 {
    if rate > MAX_BTC_FEE_PER_BYTE {
        warn!(rate, cap = MAX_BTC_FEE_PER_BYTE, "abnormal btc fee per byte, capping");
        return MAX_BTC_FEE_PER_BYTE;
    }
    rate
}

/// Cost of `gas` units at `gas_price` wei.
pub fn gas_cost(gas: u64, gas_price: u128, approximate: bool) -> Result<TxCost, WalletError> {
    let cost = U256::from(gas) * U256::from(gas_price);
    Ok(TxCost {
        price: U256::from(gas_price),
        units: U256::from(gas),
        cost_in_basic_unit: cost,
        cost_in_standard_unit: to_human_readable_unit(cost, ETH_DECIMALS, ETH_DECIMALS)?,
        approximate,
    })
}

/// Gas-based estimates against a shared node connection.
#[derive(Clone)]
pub struct FeeEstimator {
    rpc: Arc<dyn EthRpc>,
}

impl FeeEstimator {
    pub fn new(rpc: Arc<dyn EthRpc>) -> Self {
        Self { rpc }
    }

    /// The override if given, otherwise the node's current price.
    pub async fn gas_price(&self, override_price: Option<u128>) -> Result<u128, WalletError> {
        match override_price {
            Some(price) => Ok(price),
            None => Ok(self.rpc.gas_price().await?),
        }
    }

    /// Simulate `call` and price it.
    pub async fn account_cost(&self, call: &EthCall, gas_price: Option<u128>) -> Result<TxCost, WalletError> {
        let gas = self.rpc.estimate_gas(call).await?;
        let price = self.gas_price(gas_price).await?;
        debug!(gas, price, to = %call.to, "gas estimate");
        gas_cost(gas, price, false)
    }

    /// Cost of a token `transfer` call.
    ///
    /// Without `parties` the call is simulated between fixed placeholder
    /// accounts for a nominal amount, so the result is flagged approximate.
    pub async fn token_transfer_cost(
        &self,
        token: &Erc20Token,
        parties: Option<(alloy::primitives::Address, alloy::primitives::Address, U256)>,
        gas_price: Option<u128>,
    ) -> Result<TxCost, WalletError> {
        let approximate = parties.is_none();
        let (from, to, amount) = parties.unwrap_or((MOCK_FROM, MOCK_TO, U256::from(MOCK_AMOUNT)));
        let call = erc20::transfer_call(token, from, to, amount);
        let mut cost = self.account_cost(&call, gas_price).await?;
        cost.approximate = approximate;
        Ok(cost)
    }
}
