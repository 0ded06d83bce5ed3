//! On-chain contract bindings.
//!
//! Bindings are constructed per call against the pool's current provider,
//! so endpoint rotation never leaves a stale handle alive.

use alloy::sol;

sol! {
    #[sol(rpc)]
    contract IErc20 {
        event Transfer(address indexed from, address indexed to, uint256 value);

        function balanceOf(address account) external view returns (uint256);
        function totalSupply() external view returns (uint256);
    }

    #[sol(rpc)]
    contract IAmmPair {
        event Swap(
            address indexed sender,
            uint256 amount0In,
            uint256 amount1In,
            uint256 amount0Out,
            uint256 amount1Out,
            address indexed to
        );

        function token0() external view returns (address);
        function token1() external view returns (address);
    }

    #[sol(rpc)]
    contract IBondingCurve {
        function token() external view returns (address);
        function agentToken() external view returns (address);
        function getTokenPrice() external view returns (uint256);
        function getPrice() external view returns (uint256);
    }
}
