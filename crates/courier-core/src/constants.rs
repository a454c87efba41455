//! Protocol constants. Monetary values are in basic units (wei, satoshi).

use alloy::primitives::{address, Address};

/// Decimals of ether (1 ETH = 10^18 wei).
pub const ETH_DECIMALS: u32 = 18;

/// Decimals of bitcoin (1 BTC = 10^8 satoshi).
pub const BTC_DECIMALS: u32 = 8;

/// Fractional digits kept when converting to and from human-readable amounts.
pub const DEFAULT_PRECISION: u32 = 3;

/// Default Bitcoin fee rate in sat/byte when the request does not set one.
pub const DEFAULT_BTC_FEE_PER_BYTE: u64 = 15;

/// Upper bound applied to fee-oracle answers. Anything above is treated as abnormal.
pub const MAX_BTC_FEE_PER_BYTE: u64 = 200;

/// Gas price used by signers when neither the request nor the oracle provides one (20 gwei).
pub const DEFAULT_GAS_PRICE: u128 = 20_000_000_000;

/// Gas consumed by a plain value transfer between externally owned accounts.
pub const NATIVE_TRANSFER_GAS: u64 = 21_000;

/// Number of consecutive unused addresses after which discovery stops.
pub const BTC_GAP_LIMIT: u32 = 5;

/// BIP-49 testnet purpose/coin prefix for hardware-derived Bitcoin accounts.
pub const BASE_BTC_PATH: &str = "49'/1'";

/// Outputs assumed by the fee estimate of a funding transaction (payment + change).
pub const FUNDING_OUTPUTS: usize = 2;

/// Well-known blob name holding a user's escrow backups.
pub const BACKUP_FILE_NAME: &str = "courier-escrow-backup.json";

/// DAI token contract used by the default token registry.
pub const DAI_CONTRACT_ADDRESS: Address = address!("db29d7f3973e1a428f0578705e7ea1632f2e4ac5");

/// Placeholder sender used for gas previews before the escrow exists.
pub const MOCK_FROM: Address = address!("0f3fe948d25ddf2f7e8212145cef84ac6f20d904");

/// Placeholder recipient used for gas previews before the escrow exists.
pub const MOCK_TO: Address = address!("0f3fe948d25ddf2f7e8212145cef84ac6f20d905");

/// Nominal token amount used for gas previews.
pub const MOCK_AMOUNT: u64 = 1_000;
