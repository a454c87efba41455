//! Per-chain strategies for funding and draining an escrow.
//!
//! A [`Chain`] is chosen once from the request's crypto type; every leg
//! then dispatches on it instead of on currency strings.

use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use bitcoin::Network;
use courier_core::constants::{ETH_DECIMALS, FUNDING_OUTPUTS, MOCK_TO, NATIVE_TRANSFER_GAS};
use courier_core::error::CoreError;
use courier_core::traits::{BtcIndexer, EthRpc, Signer};
use courier_core::types::{BtcPaymentRequest, CryptoType, Erc20Token, EthTx, TransferRequest, TxCost, TxHash};
use courier_core::units::{to_basic_token_unit, to_human_readable_unit};
use tracing::{debug, info, warn};

use crate::builder::{EthTxBuilder, build_payment, parse_btc_address, sign_eth};
use crate::coin_selection::CoinSelector;
use crate::discovery::{scan_account, utxos_from_txs};
use crate::erc20;
use crate::error::WalletError;
use crate::fees::{FeeEstimator, cap_fee_rate, utxo_cost};
use crate::keys::{EscrowAccount, KeyScheme};

/// Chain family of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chain {
    EthereumLike,
    Erc20Like(Erc20Token),
    BitcoinLike,
}

impl From<&CryptoType> for Chain {
    fn from(crypto: &CryptoType) -> Self {
        match crypto {
            CryptoType::Ethereum => Self::EthereumLike,
            CryptoType::Erc20(token) => Self::Erc20Like(token.clone()),
            CryptoType::Bitcoin => Self::BitcoinLike,
        }
    }
}

impl Chain {
    pub fn crypto_type(&self) -> CryptoType {
        match self {
            Self::EthereumLike => CryptoType::Ethereum,
            Self::Erc20Like(token) => CryptoType::Erc20(token.clone()),
            Self::BitcoinLike => CryptoType::Bitcoin,
        }
    }

    pub fn key_scheme(&self) -> KeyScheme {
        match self {
            Self::BitcoinLike => KeyScheme::Bitcoin,
            Self::EthereumLike | Self::Erc20Like(_) => KeyScheme::Ethereum,
        }
    }

    pub fn decimals(&self) -> u32 {
        self.crypto_type().decimals()
    }

    /// Parse a standard-unit amount into basic units at full precision.
    /// Zero is rejected.
    pub fn basic_amount(&self, amount: &str) -> Result<U256, WalletError> {
        let decimals = self.decimals();
        let value = to_basic_token_unit(amount, decimals, decimals)?;
        if value.is_zero() {
            return Err(WalletError::InvalidAmount(format!("{amount:?} is zero")));
        }
        Ok(value)
    }
}

/// Result of draining an escrow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payout {
    pub tx_hash: TxHash,
    /// Basic units delivered to the recipient.
    pub amount: U256,
    /// Fee paid by the escrow, in the fee currency's basic units.
    pub fee: U256,
}

fn eth_address(s: &str) -> Result<Address, WalletError> {
    Address::from_str(s.trim()).map_err(|e| WalletError::InvalidAddress(format!("{s}: {e}")))
}

fn sats(value: U256) -> Result<u64, WalletError> {
    u64::try_from(value).map_err(|_| WalletError::InvalidAmount(format!("{value} satoshi overflows u64")))
}

/// Node and indexer handles shared by every leg.
#[derive(Clone)]
pub struct ChainClients {
    rpc: Arc<dyn EthRpc>,
    indexer: Arc<dyn BtcIndexer>,
    fees: FeeEstimator,
    network: Network,
}

impl ChainClients {
    pub fn new(rpc: Arc<dyn EthRpc>, indexer: Arc<dyn BtcIndexer>, network: Network) -> Self {
        Self {
            fees: FeeEstimator::new(rpc.clone()),
            rpc,
            indexer,
            network,
        }
    }

    pub fn fees(&self) -> &FeeEstimator {
        &self.fees
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Fee-currency cost the sender pays to fund an escrow for `request`.
    pub async fn send_cost(
        &self,
        chain: &Chain,
        signer: &dyn Signer,
        request: &TransferRequest,
    ) -> Result<TxCost, WalletError> {
        match chain {
            Chain::EthereumLike => {
                let from = signer.eth_address(request.account_index).await?;
                let value = chain.basic_amount(&request.transfer_amount)?;
                let builder = EthTxBuilder::native(from, MOCK_TO, value);
                let mut cost = self.fees.account_cost(builder.call(), request.gas_price).await?;
                cost.approximate = true;
                Ok(cost)
            }
            Chain::Erc20Like(token) => {
                let price = self.fees.gas_price(request.gas_price).await?;
                let plan = self.token_funding_plan(token, price).await?;
                let units = U256::from(plan.token_gas) * U256::from(2u8) + U256::from(NATIVE_TRANSFER_GAS);
                let total = plan.total_cost();
                Ok(TxCost {
                    price: U256::from(price),
                    units,
                    cost_in_basic_unit: total,
                    cost_in_standard_unit: to_human_readable_unit(total, ETH_DECIMALS, ETH_DECIMALS)?,
                    approximate: true,
                })
            }
            Chain::BitcoinLike => {
                let amount = sats(chain.basic_amount(&request.transfer_amount)?)?;
                let scan = scan_account(signer, self.indexer.as_ref(), request.account_index).await?;
                let selection = CoinSelector::select(&scan.utxos, amount, request.fee_per_byte())?;
                utxo_cost(selection.selected.len(), FUNDING_OUTPUTS, request.fee_per_byte())
            }
        }
    }

    async fn token_funding_plan(&self, token: &Erc20Token, gas_price: u128) -> Result<TokenFundingPlan, WalletError> {
        let token_cost = self.fees.token_transfer_cost(token, None, Some(gas_price)).await?;
        let token_gas = u64::try_from(token_cost.units)
            .map_err(|_| WalletError::BuildError(format!("gas estimate {} overflows", token_cost.units)))?;
        Ok(TokenFundingPlan {
            gas_price,
            token_gas,
            prepay_value: token_cost.cost_in_basic_unit,
        })
    }

    /// Move the sender's funds into `escrow`. Returns the send hashes in
    /// broadcast order.
    pub async fn fund_escrow(
        &self,
        chain: &Chain,
        signer: &dyn Signer,
        request: &TransferRequest,
        escrow: &str,
    ) -> Result<Vec<TxHash>, WalletError> {
        let amount = chain.basic_amount(&request.transfer_amount)?;
        match chain {
            Chain::EthereumLike => {
                let from = signer.eth_address(request.account_index).await?;
                let price = self.fees.gas_price(request.gas_price).await?;
                let mut builder = EthTxBuilder::native(from, eth_address(escrow)?, amount);
                let gas = self.rpc.estimate_gas(builder.call()).await?;
                let tx = builder.set_gas(gas).set_gas_price(price).build()?;

                let balance = self.rpc.balance(from).await?;
                let need = amount + tx.max_fee();
                if balance < need {
                    return Err(WalletError::InsufficientFunds { have: balance, need });
                }
                debug!(gas, price, "funding escrow with ether");
                Ok(vec![signer.sign_and_send(&tx).await?])
            }
            Chain::Erc20Like(token) => self.fund_token_escrow(token, signer, request, escrow, amount).await,
            Chain::BitcoinLike => {
                let amount = sats(amount)?;
                let rate = request.fee_per_byte();
                let scan = scan_account(signer, self.indexer.as_ref(), request.account_index).await?;
                let selection = CoinSelector::select(&scan.utxos, amount, rate)?;
                parse_btc_address(escrow, self.network)?;
                let payment = BtcPaymentRequest {
                    utxos: selection.selected,
                    to: escrow.to_string(),
                    amount,
                    fee: selection.fee,
                    change_path: scan.change_path(request.account_index),
                };
                debug!(
                    inputs = payment.utxos.len(),
                    fee = payment.fee,
                    change = selection.change,
                    "funding escrow with bitcoin"
                );
                let raw = signer.sign_btc_payment(&payment).await?;
                Ok(vec![self.indexer.broadcast(&raw).await?])
            }
        }
    }

    /// Two transactions: ether for the escrow's future token transfer, then
    /// the tokens themselves. A failure after the first is reported as
    /// [`WalletError::PartiallyFunded`] and left on chain.
    async fn fund_token_escrow(
        &self,
        token: &Erc20Token,
        signer: &dyn Signer,
        request: &TransferRequest,
        escrow: &str,
        amount: U256,
    ) -> Result<Vec<TxHash>, WalletError> {
        let from = signer.eth_address(request.account_index).await?;
        let escrow = eth_address(escrow)?;
        let price = self.fees.gas_price(request.gas_price).await?;
        let plan = self.token_funding_plan(token, price).await?;

        let token_balance = erc20::decode_balance(&self.rpc.call(&erc20::balance_of_call(token, from)).await?)?;
        if token_balance < amount {
            return Err(WalletError::InsufficientFunds {
                have: token_balance,
                need: amount,
            });
        }
        let eth_balance = self.rpc.balance(from).await?;
        let need = plan.total_cost();
        if eth_balance < need {
            return Err(WalletError::InsufficientFunds { have: eth_balance, need });
        }

        let prepay = EthTxBuilder::native(from, escrow, plan.prepay_value)
            .set_gas(NATIVE_TRANSFER_GAS)
            .set_gas_price(price)
            .build()?;
        let prepay_hash = signer.sign_and_send(&prepay).await?;
        info!(tx_hash = %prepay_hash, value = %plan.prepay_value, "escrow gas prepaid");

        let transfer = async {
            let mut builder = EthTxBuilder::token(token, from, escrow, amount);
            let gas = self.rpc.estimate_gas(builder.call()).await?;
            let tx = builder.set_gas(gas).set_gas_price(price).build()?;
            Ok::<_, WalletError>(signer.sign_and_send(&tx).await?)
        };
        match transfer.await {
            Ok(token_hash) => Ok(vec![prepay_hash, token_hash]),
            Err(e) => {
                warn!(tx_hash = %prepay_hash, error = %e, "token transfer failed after gas prepayment");
                Err(WalletError::PartiallyFunded {
                    prepay_tx_hash: prepay_hash,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Drain `escrow` to `to`, paying the fee from the escrow itself.
    pub async fn pay_out(&self, chain: &Chain, escrow: &EscrowAccount, to: &str) -> Result<Payout, WalletError> {
        match chain {
            Chain::EthereumLike => {
                let signer = escrow.eth_signer()?;
                let from = signer.address();
                let to = eth_address(to)?;
                let balance = self.rpc.balance(from).await?;
                let price = self.fees.gas_price(None).await?;
                let fee = U256::from(NATIVE_TRANSFER_GAS) * U256::from(price);
                if balance <= fee {
                    return Err(WalletError::InsufficientFunds { have: balance, need: fee });
                }
                let value = balance - fee;
                let tx = self
                    .local_tx(EthTxBuilder::native(from, to, value), NATIVE_TRANSFER_GAS, price)
                    .await?;
                let raw = sign_eth(&tx, signer).await?;
                let tx_hash = self.rpc.send_raw_transaction(&raw).await?;
                Ok(Payout { tx_hash, amount: value, fee })
            }
            Chain::Erc20Like(token) => {
                let signer = escrow.eth_signer()?;
                let from = signer.address();
                let to = eth_address(to)?;
                let amount = erc20::decode_balance(&self.rpc.call(&erc20::balance_of_call(token, from)).await?)?;
                if amount.is_zero() {
                    return Err(WalletError::InsufficientFunds {
                        have: U256::ZERO,
                        need: U256::from(1u8),
                    });
                }
                let builder = EthTxBuilder::token(token, from, to, amount);
                let gas = self.rpc.estimate_gas(builder.call()).await?;
                if gas == 0 {
                    return Err(WalletError::BuildError("node estimated zero gas for token transfer".into()));
                }
                let eth_balance = self.rpc.balance(from).await?;
                let current = self.fees.gas_price(None).await?;
                // The prepayment was sized at funding time; use whatever price it still covers.
                let affordable = u128::try_from(eth_balance / U256::from(gas)).unwrap_or(u128::MAX);
                let price = current.min(affordable);
                if price == 0 {
                    return Err(WalletError::InsufficientFunds {
                        have: eth_balance,
                        need: U256::from(gas) * U256::from(current),
                    });
                }
                let fee = U256::from(gas) * U256::from(price);
                let tx = self.local_tx(builder, gas, price).await?;
                let raw = sign_eth(&tx, signer).await?;
                let tx_hash = self.rpc.send_raw_transaction(&raw).await?;
                Ok(Payout { tx_hash, amount, fee })
            }
            Chain::BitcoinLike => {
                let key = escrow.btc_private_key(self.network)?;
                parse_btc_address(to, self.network)?;
                let txs = self.indexer.address_transactions(escrow.address()).await?;
                let utxos = utxos_from_txs(&txs, escrow.address(), escrow.address());
                let rate = cap_fee_rate(self.indexer.fee_per_byte().await?);
                let sweep = CoinSelector::sweep(&utxos, rate)?;
                let amount = sweep.total - sweep.fee;
                let payment = BtcPaymentRequest {
                    utxos: sweep.selected,
                    to: to.to_string(),
                    amount,
                    fee: sweep.fee,
                    change_path: String::new(),
                };
                let signed = build_payment(&payment, escrow.address(), self.network, |_| Ok(key))?;
                let tx_hash = self.indexer.broadcast(&signed.raw_hex).await?;
                Ok(Payout {
                    tx_hash,
                    amount: U256::from(amount),
                    fee: U256::from(sweep.fee),
                })
            }
        }
    }

    async fn local_tx(&self, mut builder: EthTxBuilder, gas: u64, gas_price: u128) -> Result<EthTx, WalletError> {
        let from = builder.call().from;
        let nonce = self.rpc.transaction_count(from).await?;
        let chain_id = self.rpc.chain_id().await?;
        builder
            .set_gas(gas)
            .set_gas_price(gas_price)
            .set_nonce(nonce)
            .set_chain_id(chain_id)
            .build()
    }

    /// Address that funded the escrow, where a cancel returns the funds.
    pub async fn funder_of(&self, chain: &Chain, funding_tx: &TxHash) -> Result<String, WalletError> {
        match chain {
            Chain::EthereumLike | Chain::Erc20Like(_) => Ok(self.rpc.transaction_sender(funding_tx).await?.to_string()),
            Chain::BitcoinLike => {
                let inputs = self.indexer.transaction_inputs(funding_tx).await?;
                inputs
                    .into_iter()
                    .next()
                    .and_then(|input| input.address)
                    .ok_or_else(|| {
                        WalletError::Core(CoreError::DataConsistency(format!(
                            "funding transaction {funding_tx} has no resolvable input address"
                        )))
                    })
            }
        }
    }
}

/// Ether the sender spends funding a token escrow.
struct TokenFundingPlan {
    gas_price: u128,
    /// Gas of one token `transfer`.
    token_gas: u64,
    /// Ether sent to the escrow to pay for its payout.
    prepay_value: U256,
}

impl TokenFundingPlan {
    /// Prepayment fee + prepaid value + the sender's own token transfer.
    fn total_cost(&self) -> U256 {
        let price = U256::from(self.gas_price);
        U256::from(NATIVE_TRANSFER_GAS) * price + self.prepay_value + U256::from(self.token_gas) * price
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_from_crypto_type() {
        assert_eq!(Chain::from(&CryptoType::Ethereum), Chain::EthereumLike);
        assert_eq!(Chain::from(&CryptoType::Bitcoin), Chain::BitcoinLike);
        let dai = CryptoType::Erc20(Erc20Token::dai());
        assert_eq!(Chain::from(&dai), Chain::Erc20Like(Erc20Token::dai()));
        assert_eq!(Chain::from(&dai).crypto_type(), dai);
    }

    #[test]
    fn key_scheme_follows_family() {
        assert_eq!(Chain::Erc20Like(Erc20Token::dai()).key_scheme(), KeyScheme::Ethereum);
        assert_eq!(Chain::BitcoinLike.key_scheme(), KeyScheme::Bitcoin);
    }

    #[test]
    fn basic_amount_uses_chain_decimals() {
        assert_eq!(
            Chain::EthereumLike.basic_amount("0.5").unwrap(),
            U256::from(500_000_000_000_000_000u128)
        );
        assert_eq!(Chain::BitcoinLike.basic_amount("0.0005").unwrap(), U256::from(50_000u64));
        assert!(matches!(
            Chain::BitcoinLike.basic_amount("0.000000001"),
            Err(WalletError::InvalidAmount(_))
        ));
    }

    #[test]
    fn token_plan_total() {
        let plan = TokenFundingPlan {
            gas_price: 10,
            token_gas: 50_000,
            prepay_value: U256::from(500_000u64),
        };
        assert_eq!(plan.total_cost(), U256::from(210_000u64 + 500_000 + 500_000));
    }
}
