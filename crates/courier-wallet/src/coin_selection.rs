//! Greedy UTXO selection.
//!
//! Walks the candidates in discovery order and stops at the first prefix
//! whose value strictly exceeds the amount plus the fee for that many
//! inputs. Order matters: an earlier large output is always spent before
//! a later one that would fit better.

use alloy::primitives::U256;
use courier_core::constants::FUNDING_OUTPUTS;
use courier_core::types::UtxoRecord;

use crate::error::WalletError;
use crate::fees::utxo_tx_size;

/// Result of coin selection: which UTXOs to spend and the fee/change breakdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinSelection {
    pub selected: Vec<UtxoRecord>,
    /// Total value of selected UTXOs in satoshi.
    pub total: u64,
    /// Fee for `selected.len()` inputs in satoshi.
    pub fee: u64,
    /// Estimated transaction size in bytes.
    pub size: u64,
    /// Value returned to the change address.
    pub change: u64,
}

pub struct CoinSelector;

impl CoinSelector {
    /// Select UTXOs paying `amount` plus fee, assuming a payment and a change output.
    pub fn select(
        utxos: &[UtxoRecord],
        amount: u64,
        fee_per_byte: u64,
    ) -> Result<CoinSelection, WalletError> {
        Self::select_with_outputs(utxos, amount, fee_per_byte, FUNDING_OUTPUTS)
    }

    pub fn select_with_outputs(
        utxos: &[UtxoRecord],
        amount: u64,
        fee_per_byte: u64,
        outputs: usize,
    ) -> Result<CoinSelection, WalletError> {
        if utxos.is_empty() {
            return Err(WalletError::NoUtxos);
        }
        if amount == 0 {
            return Err(WalletError::InvalidAmount("amount must be non-zero".into()));
        }

        let mut selected = Vec::new();
        let mut total: u64 = 0;
        let mut fee: u64 = 0;

        for utxo in utxos {
            selected.push(utxo.clone());
            total = total.saturating_add(utxo.value);

            let size = utxo_tx_size(selected.len(), outputs, true);
            fee = size.saturating_mul(fee_per_byte);
            let needed = amount.saturating_add(fee);

            if total > needed {
                return Ok(CoinSelection {
                    selected,
                    total,
                    fee,
                    size,
                    change: total - needed,
                });
            }
        }

        Err(WalletError::InsufficientFunds {
            have: U256::from(total),
            need: U256::from(amount.saturating_add(fee)),
        })
    }

    /// Spend every UTXO to a single output, paying the fee out of the total.
    ///
    /// Used to drain an escrow: the payout is `total - fee` with no change.
    pub fn sweep(utxos: &[UtxoRecord], fee_per_byte: u64) -> Result<CoinSelection, WalletError> {
        if utxos.is_empty() {
            return Err(WalletError::NoUtxos);
        }
        let total: u64 = utxos.iter().map(|u| u.value).sum();
        let size = utxo_tx_size(utxos.len(), 1, true);
        let fee = size.saturating_mul(fee_per_byte);
        if total <= fee {
            return Err(WalletError::InsufficientFunds {
                have: U256::from(total),
                need: U256::from(fee),
            });
        }
        Ok(CoinSelection {
            selected: utxos.to_vec(),
            total,
            fee,
            size,
            change: 0,
        })
    }
}
