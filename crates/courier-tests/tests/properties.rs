//! Property tests over the pure pieces the escrow legs are built from.

use alloy::primitives::U256;
use courier_core::constants::{BTC_DECIMALS, DEFAULT_BTC_FEE_PER_BYTE, MAX_BTC_FEE_PER_BYTE};
use courier_core::types::UtxoRecord;
use courier_core::units::to_human_readable_unit;
use courier_wallet::Chain;
use courier_wallet::coin_selection::CoinSelector;
use courier_wallet::fees::{cap_fee_rate, utxo_tx_size};
use proptest::prelude::*;

fn utxos(values: &[u64]) -> Vec<UtxoRecord> {
    values
        .iter()
        .enumerate()
        .map(|(i, &value)| UtxoRecord {
            tx_hash: format!("{i:064x}"),
            output_index: 0,
            value,
            key_path: format!("49'/1'/0'/0/{i}"),
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Satoshi amounts survive display at full precision and parsing back.
    #[test]
    fn satoshi_amounts_parse_back(sats in 1u64..=21_000_000 * 100_000_000) {
        let human = to_human_readable_unit(U256::from(sats), BTC_DECIMALS, BTC_DECIMALS).unwrap();
        prop_assert_eq!(Chain::BitcoinLike.basic_amount(&human).unwrap(), U256::from(sats));
    }

    /// A funding selection always covers amount plus its own fee, and the
    /// fee matches the transaction shape it selected.
    #[test]
    fn selection_pays_amount_and_fee(
        values in prop::collection::vec(1_000u64..5_000_000, 1..12),
        amount in 1_000u64..10_000_000,
    ) {
        let utxos = utxos(&values);
        if let Ok(selection) = CoinSelector::select(&utxos, amount, DEFAULT_BTC_FEE_PER_BYTE) {
            prop_assert!(selection.total > amount + selection.fee);
            prop_assert_eq!(selection.change, selection.total - amount - selection.fee);
            prop_assert_eq!(
                selection.fee,
                utxo_tx_size(selection.selected.len(), 2, true) * DEFAULT_BTC_FEE_PER_BYTE
            );
        }
    }

    /// A sweep spends everything and leaves nothing behind.
    #[test]
    fn sweep_spends_all(values in prop::collection::vec(100_000u64..1_000_000, 1..8), rate in 1u64..500) {
        let utxos = utxos(&values);
        let rate = cap_fee_rate(rate);
        let sweep = CoinSelector::sweep(&utxos, rate).unwrap();
        prop_assert_eq!(sweep.selected.len(), utxos.len());
        prop_assert_eq!(sweep.total, values.iter().sum::<u64>());
        prop_assert!(rate <= MAX_BTC_FEE_PER_BYTE);
        prop_assert_eq!(sweep.change, 0);
    }
}
