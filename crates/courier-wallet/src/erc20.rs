//! ERC-20 call encoding.

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use courier_core::types::{Erc20Token, EthCall};

use crate::error::WalletError;

sol! {
    interface IERC20 {
        function transfer(address to, uint256 amount) external returns (bool);
        function balanceOf(address owner) external view returns (uint256);
    }
}

/// ABI-encoded `transfer(to, amount)`.
pub fn transfer_data(to: Address, amount: U256) -> Bytes {
    IERC20::transferCall { to, amount }.abi_encode().into()
}

/// A `transfer` call against the token contract, sent by `from`.
pub fn transfer_call(token: &Erc20Token, from: Address, to: Address, amount: U256) -> EthCall {
    EthCall {
        from,
        to: token.contract,
        value: U256::ZERO,
        data: transfer_data(to, amount),
    }
}

pub fn balance_of_call(token: &Erc20Token, owner: Address) -> EthCall {
    EthCall {
        from: owner,
        to: token.contract,
        value: U256::ZERO,
        data: IERC20::balanceOfCall { owner }.abi_encode().into(),
    }
}

/// Decode the single `uint256` returned by `balanceOf`.
pub fn decode_balance(output: &[u8]) -> Result<U256, WalletError> {
    if output.len() < 32 {
        return Err(WalletError::Serialization(format!(
            "balanceOf returned {} bytes",
            output.len()
        )));
    }
    Ok(U256::from_be_slice(&output[..32]))
}
