//! Request, account and cost types shared across the escrow legs.
//!
//! Amounts entered by users are decimal strings in standard units; every
//! computed amount is an integer in basic units (wei, satoshi).

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, U256};
use alloy::rpc::types::TransactionRequest;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::constants::{BTC_DECIMALS, DAI_CONTRACT_ADDRESS, DEFAULT_BTC_FEE_PER_BYTE, ETH_DECIMALS};
use crate::error::CoreError;

/// An ERC-20 token known to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Erc20Token {
    pub symbol: String,
    pub contract: Address,
    pub decimals: u32,
}

impl Erc20Token {
    pub fn dai() -> Self {
        Self {
            symbol: "dai".to_string(),
            contract: DAI_CONTRACT_ADDRESS,
            decimals: 18,
        }
    }
}

/// Currency being transferred. Selects the chain strategy for every leg.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CryptoType {
    Ethereum,
    Bitcoin,
    Erc20(Erc20Token),
}

impl CryptoType {
    pub fn symbol(&self) -> &str {
        match self {
            Self::Ethereum => "ethereum",
            Self::Bitcoin => "bitcoin",
            Self::Erc20(token) => &token.symbol,
        }
    }

    /// Decimals of the transferred asset.
    pub fn decimals(&self) -> u32 {
        match self {
            Self::Ethereum => ETH_DECIMALS,
            Self::Bitcoin => BTC_DECIMALS,
            Self::Erc20(token) => token.decimals,
        }
    }

    /// Currency in which this asset's transaction fees are paid.
    pub fn fee_crypto(&self) -> CryptoType {
        match self {
            Self::Erc20(_) => Self::Ethereum,
            other => other.clone(),
        }
    }

    pub fn is_account_based(&self) -> bool {
        !matches!(self, Self::Bitcoin)
    }
}

impl FromStr for CryptoType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ethereum" | "eth" => Ok(Self::Ethereum),
            "bitcoin" | "btc" => Ok(Self::Bitcoin),
            "dai" => Ok(Self::Erc20(Erc20Token::dai())),
            other => Err(CoreError::UnsupportedCrypto(other.to_string())),
        }
    }
}

impl TryFrom<String> for CryptoType {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CryptoType> for String {
    fn from(value: CryptoType) -> Self {
        value.symbol().to_string()
    }
}

impl fmt::Display for CryptoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Signing capability the sender funds the escrow with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletType {
    /// Hardware device.
    Ledger,
    /// Browser extension.
    Metamask,
    /// Keys held by this process.
    Custodial,
    /// The escrow account itself (payout legs).
    Escrow,
}

impl FromStr for WalletType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ledger" => Ok(Self::Ledger),
            "metamask" => Ok(Self::Metamask),
            "custodial" => Ok(Self::Custodial),
            "escrow" => Ok(Self::Escrow),
            other => Err(CoreError::UnsupportedWallet(other.to_string())),
        }
    }
}

/// A user secret. Zeroized on drop, redacted in debug output.
#[derive(Clone, Zeroize, ZeroizeOnDrop, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The plaintext. Handle with care.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password([REDACTED])")
    }
}

/// Hash of a broadcast transaction, as reported by the chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(pub String);

impl TxHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<alloy::primitives::TxHash> for TxHash {
    fn from(hash: alloy::primitives::TxHash) -> Self {
        Self(hash.to_string())
    }
}

/// The unit of work for one escrow send leg.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Assigned by the ledger once the send leg is notified.
    pub transfer_id: Option<String>,
    pub sender: String,
    pub destination: String,
    pub crypto_type: CryptoType,
    /// Decimal string in standard units (e.g. `"0.5"`).
    pub transfer_amount: String,
    pub password: Password,
    pub wallet_type: WalletType,
    /// Sat/byte for UTXO chains. `None` uses [`DEFAULT_BTC_FEE_PER_BYTE`].
    pub tx_fee_per_byte: Option<u64>,
    /// Gas price override in wei for account chains.
    pub gas_price: Option<u128>,
    /// Signer account used to fund the escrow.
    pub account_index: u32,
}

impl TransferRequest {
    pub fn new(
        sender: impl Into<String>,
        destination: impl Into<String>,
        crypto_type: CryptoType,
        transfer_amount: impl Into<String>,
        password: Password,
        wallet_type: WalletType,
    ) -> Self {
        Self {
            transfer_id: None,
            sender: sender.into(),
            destination: destination.into(),
            crypto_type,
            transfer_amount: transfer_amount.into(),
            password,
            wallet_type,
            tx_fee_per_byte: None,
            gas_price: None,
            account_index: 0,
        }
    }

    pub fn fee_per_byte(&self) -> u64 {
        self.tx_fee_per_byte.unwrap_or(DEFAULT_BTC_FEE_PER_BYTE)
    }

    /// Reject requests missing what the send leg needs before any key is generated.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.password.expose().is_empty() {
            return Err(CoreError::InvalidParameter("password is required".into()));
        }
        if self.destination.trim().is_empty() {
            return Err(CoreError::InvalidParameter("destination is required".into()));
        }
        if self.sender.trim().is_empty() {
            return Err(CoreError::InvalidParameter("sender is required".into()));
        }
        if self.wallet_type == WalletType::Escrow {
            return Err(CoreError::UnsupportedWallet(
                "escrow accounts cannot fund a transfer".into(),
            ));
        }
        Ok(())
    }
}

/// One spendable Bitcoin output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtxoRecord {
    pub tx_hash: String,
    pub output_index: u32,
    /// Satoshi, always > 0.
    pub value: u64,
    /// Derivation path proving ownership.
    pub key_path: String,
}

/// Estimated cost of a not-yet-built transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxCost {
    /// Gas price in wei, or fee rate in sat/byte.
    pub price: U256,
    /// Gas limit, or estimated size in bytes.
    pub units: U256,
    pub cost_in_basic_unit: U256,
    pub cost_in_standard_unit: String,
    /// Set when the estimate was simulated against placeholder parties.
    pub approximate: bool,
}

/// An account-chain call before gas is attached. Used for simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthCall {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

impl EthCall {
    pub fn to_request(&self) -> TransactionRequest {
        TransactionRequest::default()
            .with_from(self.from)
            .with_to(self.to)
            .with_value(self.value)
            .with_input(self.data.clone())
    }
}

/// An unsigned account-chain transaction.
///
/// Numeric fields stay integers here; hex encoding happens in
/// [`EthTx::to_request`], at submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthTx {
    pub call: EthCall,
    pub gas: u64,
    pub gas_price: u128,
    pub nonce: Option<u64>,
    pub chain_id: Option<u64>,
}

impl EthTx {
    /// Maximum wei this transaction can spend on gas.
    pub fn max_fee(&self) -> U256 {
        U256::from(self.gas) * U256::from(self.gas_price)
    }

    pub fn to_request(&self) -> TransactionRequest {
        let mut req = self
            .call
            .to_request()
            .with_gas_limit(self.gas)
            .with_gas_price(self.gas_price);
        if let Some(nonce) = self.nonce {
            req = req.with_nonce(nonce);
        }
        if let Some(chain_id) = self.chain_id {
            req = req.with_chain_id(chain_id);
        }
        req
    }
}

/// Input of an indexed Bitcoin transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BtcTxInput {
    pub prev_hash: String,
    pub prev_index: u32,
    /// Address that owned the spent output, when the indexer resolves it.
    #[serde(default)]
    pub address: Option<String>,
}

/// Output of an indexed Bitcoin transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BtcTxOutput {
    pub index: u32,
    pub value: u64,
    #[serde(default)]
    pub address: Option<String>,
}

/// One entry of an address history as returned by a chain indexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BtcTransaction {
    pub hash: String,
    pub inputs: Vec<BtcTxInput>,
    pub outputs: Vec<BtcTxOutput>,
}

/// Payment a Bitcoin signer is asked to build and sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtcPaymentRequest {
    pub utxos: Vec<UtxoRecord>,
    pub to: String,
    /// Satoshi sent to `to`.
    pub amount: u64,
    pub fee: u64,
    /// Path of the address receiving the change output.
    pub change_path: String,
}

impl BtcPaymentRequest {
    pub fn input_total(&self) -> u64 {
        self.utxos.iter().map(|u| u.value).sum()
    }

    /// Change left after amount and fee, or `None` if the inputs fall short.
    pub fn change(&self) -> Option<u64> {
        self.input_total().checked_sub(self.amount)?.checked_sub(self.fee)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> TransferRequest {
        TransferRequest::new(
            "alice@x.com",
            "bob@x.com",
            CryptoType::Ethereum,
            "0.5",
            Password::new("abc"),
            WalletType::Custodial,
        )
    }

    #[test]
    fn crypto_type_parses_known_symbols() {
        assert_eq!("ethereum".parse::<CryptoType>().unwrap(), CryptoType::Ethereum);
        assert_eq!("BTC".parse::<CryptoType>().unwrap(), CryptoType::Bitcoin);
        let dai: CryptoType = "dai".parse().unwrap();
        assert_eq!(dai.decimals(), 18);
        assert_eq!(dai.fee_crypto(), CryptoType::Ethereum);
        assert!(matches!(
            "doge".parse::<CryptoType>(),
            Err(CoreError::UnsupportedCrypto(_))
        ));
    }

    #[test]
    fn crypto_type_serde_as_symbol() {
        let json = serde_json::to_string(&CryptoType::Erc20(Erc20Token::dai())).unwrap();
        assert_eq!(json, "\"dai\"");
        let back: CryptoType = serde_json::from_str("\"bitcoin\"").unwrap();
        assert_eq!(back, CryptoType::Bitcoin);
    }

    #[test]
    fn password_debug_is_redacted() {
        let debug = format!("{:?}", Password::new("hunter2"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn default_fee_per_byte() {
        let mut req = request();
        assert_eq!(req.fee_per_byte(), DEFAULT_BTC_FEE_PER_BYTE);
        req.tx_fee_per_byte = Some(40);
        assert_eq!(req.fee_per_byte(), 40);
    }

    #[test]
    fn validate_requires_password_and_destination() {
        assert!(request().validate().is_ok());

        let mut req = request();
        req.password = Password::new("");
        assert!(matches!(req.validate(), Err(CoreError::InvalidParameter(_))));

        let mut req = request();
        req.destination = "  ".into();
        assert!(matches!(req.validate(), Err(CoreError::InvalidParameter(_))));

        let mut req = request();
        req.wallet_type = WalletType::Escrow;
        assert!(matches!(req.validate(), Err(CoreError::UnsupportedWallet(_))));
    }

    #[test]
    fn eth_tx_request_carries_integers() {
        let tx = EthTx {
            call: EthCall {
                from: crate::constants::MOCK_FROM,
                to: crate::constants::MOCK_TO,
                value: U256::from(5u64),
                data: Bytes::new(),
            },
            gas: 21_000,
            gas_price: 2,
            nonce: Some(7),
            chain_id: None,
        };
        assert_eq!(tx.max_fee(), U256::from(42_000u64));
        let req = tx.to_request();
        assert_eq!(req.gas, Some(21_000));
        assert_eq!(req.gas_price, Some(2));
        assert_eq!(req.nonce, Some(7));
        assert_eq!(req.value, Some(U256::from(5u64)));
        assert_eq!(req.from, Some(crate::constants::MOCK_FROM));
    }

    #[test]
    fn payment_change() {
        let utxo = |value| UtxoRecord {
            tx_hash: "aa".into(),
            output_index: 0,
            value,
            key_path: "49'/1'/0'/0/0".into(),
        };
        let mut payment = BtcPaymentRequest {
            utxos: vec![utxo(60_000), utxo(40_000)],
            to: "2N".into(),
            amount: 50_000,
            fee: 2_475,
            change_path: "49'/1'/0'/1/0".into(),
        };
        assert_eq!(payment.input_total(), 100_000);
        assert_eq!(payment.change(), Some(47_525));
        payment.amount = 99_000;
        assert_eq!(payment.change(), None);
    }

    #[test]
    fn wallet_type_from_str() {
        assert_eq!("Ledger".parse::<WalletType>().unwrap(), WalletType::Ledger);
        assert!("trezor".parse::<WalletType>().is_err());
    }
}
