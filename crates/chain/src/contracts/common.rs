//! ERC-20 interface shared by supply and repay flows.

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol;
use alloy::sol_types::SolCall;

sol! {
    /// Standard ERC20 interface (subset for balances and approvals)
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256 balance);
        function allowance(address owner, address spender) external view returns (uint256 remaining);
        function approve(address spender, uint256 amount) external returns (bool success);
        function decimals() external view returns (uint8 value);
    }
}

/// Encode `approve(spender, amount)`.
pub fn encode_approve(spender: Address, amount: U256) -> Bytes {
    Bytes::from(IERC20::approveCall { spender, amount }.abi_encode())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_approve() {
        let spender = Address::repeat_byte(0x11);
        let data = encode_approve(spender, U256::from(1_000_000u64));

        assert_eq!(hex::encode(&data[..4]), "095ea7b3");
        assert_eq!(data.len(), 4 + 32 * 2);

        let decoded = IERC20::approveCall::abi_decode(&data, true).unwrap();
        assert_eq!(decoded.spender, spender);
        assert_eq!(decoded.amount, U256::from(1_000_000u64));
    }
}
