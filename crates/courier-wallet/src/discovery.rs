//! Bitcoin UTXO discovery.
//!
//! Unspent outputs are found by replaying an address history: any output
//! referenced by an input from the same address is spent. Accounts are
//! scanned along the receive (`/0/i`) and change (`/1/i`) chains until
//! [`BTC_GAP_LIMIT`] consecutive receive addresses have no history.

use std::collections::HashSet;

use courier_core::constants::{BASE_BTC_PATH, BTC_GAP_LIMIT};
use courier_core::traits::{BtcIndexer, Signer};
use courier_core::types::{BtcTransaction, UtxoRecord};
use tracing::debug;

use crate::error::WalletError;

/// Derivation path of an address within a BIP-49 testnet account.
///
/// ```
/// assert_eq!(courier_wallet::discovery::key_path(0, 1, 4), "49'/1'/0'/1/4");
/// ```
pub fn key_path(account: u32, change: u32, index: u32) -> String {
    format!("{BASE_BTC_PATH}/{account}'/{change}/{index}")
}

/// Unspent outputs paying `address`, in history order.
pub fn utxos_from_txs(txs: &[BtcTransaction], address: &str, path: &str) -> Vec<UtxoRecord> {
    let spent: HashSet<(&str, u32)> = txs
        .iter()
        .flat_map(|tx| tx.inputs.iter())
        .filter(|input| input.address.as_deref() == Some(address))
        .map(|input| (input.prev_hash.as_str(), input.prev_index))
        .collect();

    txs.iter()
        .flat_map(|tx| tx.outputs.iter().map(move |out| (tx, out)))
        .filter(|(_, out)| out.address.as_deref() == Some(address) && out.value > 0)
        .filter(|(tx, out)| !spent.contains(&(tx.hash.as_str(), out.index)))
        .map(|(tx, out)| UtxoRecord {
            tx_hash: tx.hash.clone(),
            output_index: out.index,
            value: out.value,
            key_path: path.to_string(),
        })
        .collect()
}

/// Spendable state of one account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountScan {
    /// UTXOs in discovery order: by index, receive before change.
    pub utxos: Vec<UtxoRecord>,
    pub balance: u64,
    pub next_receive_index: u32,
    pub next_change_index: u32,
}

impl AccountScan {
    pub fn change_path(&self, account: u32) -> String {
        key_path(account, 1, self.next_change_index)
    }
}

/// Walk an account's receive and change chains.
pub async fn scan_account(
    signer: &dyn Signer,
    indexer: &dyn BtcIndexer,
    account: u32,
) -> Result<AccountScan, WalletError> {
    let mut scan = AccountScan::default();
    let mut last_receive: Option<u32> = None;
    let mut last_change: Option<u32> = None;
    let mut gap = 0;
    let mut index = 0;

    while gap < BTC_GAP_LIMIT {
        for change in [0, 1] {
            let path = key_path(account, change, index);
            let address = signer.btc_address(&path).await?;
            let txs = indexer.address_transactions(&address).await?;

            if txs.is_empty() {
                if change == 0 {
                    gap += 1;
                }
                continue;
            }
            gap = 0;
            if change == 0 {
                last_receive = Some(index);
            } else {
                last_change = Some(index);
            }
            let utxos = utxos_from_txs(&txs, &address, &path);
            scan.balance += utxos.iter().map(|u| u.value).sum::<u64>();
            scan.utxos.extend(utxos);
        }
        index += 1;
    }

    scan.next_receive_index = last_receive.map_or(0, |i| i + 1);
    scan.next_change_index = last_change.map_or(0, |i| i + 1);
    debug!(
        account,
        balance = scan.balance,
        utxos = scan.utxos.len(),
        scanned = index,
        "btc account scanned"
    );
    Ok(scan)
}
