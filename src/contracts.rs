//! Centralized Contract Definitions
//!
//! Solidity contract interfaces for the DEX arbitrage bot, defined using
//! alloy's `sol!` macro.
//!
//! Each interface is annotated with `#[sol(rpc)]` to generate contract
//! instance types that can make RPC calls via any alloy Provider.
//!
//! Modified: 2026-02-01 — initial migration from ethers-rs abigen!

use alloy::sol;

// ── Uniswap V2 ───────────────────────────────────────────────────────

sol! {
    #[sol(rpc)]
    interface IUniswapV2Factory {
        function getPair(address tokenA, address tokenB) external view returns (address pair);
        function allPairs(uint256) external view returns (address pair);
        function allPairsLength() external view returns (uint256);
    }
}

sol! {
    #[sol(rpc)]
    interface IUniswapV2Pair {
        function getReserves() external view returns (uint112 reserve0, uint112 reserve1, uint32 blockTimestampLast);
        function token0() external view returns (address);
        function token1() external view returns (address);
        function swapFee() external view returns (uint256 fee);
    }
}

// ── V2 fee-registry factory (ReadFromFactory fee source) ─────────────

sol! {
    #[sol(rpc)]
    interface IFeeFactory {
        function getPairFees(address pair) external view returns (uint256 fees);
    }
}

// ── Multicall2 (batched reads for registry sync) ──────────────────────

sol! {
    #[sol(rpc)]
    interface IMulticall2 {
        struct Call {
            address target;
            bytes callData;
        }

        struct Result {
            bool success;
            bytes returnData;
        }

        function tryAggregate(bool requireSuccess, Call[] calldata calls) external returns (Result[] memory returnData);
    }
}

// ── BatchChecker (on-chain re-validation of packed arb calldata) ─────

sol! {
    #[sol(rpc)]
    interface IBatchChecker {
        function checkArbs(address router, bytes[] calldata args) external returns (bytes memory results);
    }
}
