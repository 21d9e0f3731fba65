//! Core data shapes shared across the detection and submission pipeline.
//!

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// How a pool's fee numerator is obtained. Denominator is always 10_000.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeSource {
    /// Numerator is a configured constant, never re-read on chain.
    Fixed(u16),
    /// Numerator is read from the pool contract itself.
    ReadFromPool,
    /// Numerator is read from a fee-registry factory's `getPairFees`.
    ReadFromFactory(Address),
}

/// Denominator against which every `fee_numerator` is scaled.
pub const FEE_DENOMINATOR: u64 = 10_000;

/// A Uniswap-V2-family liquidity pool tracked by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub address: Address,
    pub token0: Address,
    pub token1: Address,
    pub reserve0: U256,
    pub reserve1: U256,
    pub fee_source: FeeSource,
    /// In `[1, 10_000]`; denominator fixed at [`FEE_DENOMINATOR`].
    pub fee_numerator: u16,
}

impl Pool {
    pub fn reserve_of(&self, token: Address) -> U256 {
        if token == self.token0 {
            self.reserve0
        } else {
            self.reserve1
        }
    }

    pub fn other_token(&self, token: Address) -> Address {
        if token == self.token0 {
            self.token1
        } else {
            self.token0
        }
    }

    pub fn contains_token(&self, token: Address) -> bool {
        token == self.token0 || token == self.token1
    }
}

/// A token-pool-token cycle candidate: `t0, p0, t1, p1, .., tk`.
///
/// Stored flat (alternating token/pool) rather than as two parallel vectors
/// because value equality over the whole tuple is exactly what the
/// blacklist and path index need, and a plain `Vec<Address>` gives that for
/// free via derived `Hash`/`Eq`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Path {
    elems: Vec<Address>,
}

impl Path {
    /// `elems` must alternate token/pool, starting and ending on a token:
    /// odd length >= 5 (2-hop) or 7 (3-hop).
    pub fn new(elems: Vec<Address>) -> Self {
        debug_assert!(elems.len() % 2 == 1, "path must have odd element count");
        Self { elems }
    }

    pub fn hops(&self) -> usize {
        (self.elems.len() - 1) / 2
    }

    pub fn token(&self, i: usize) -> Address {
        self.elems[2 * i]
    }

    pub fn pool(&self, i: usize) -> Address {
        self.elems[2 * i + 1]
    }

    pub fn start_token(&self) -> Address {
        self.elems[0]
    }

    pub fn end_token(&self) -> Address {
        *self.elems.last().unwrap()
    }

    pub fn pools(&self) -> impl Iterator<Item = Address> + '_ {
        self.elems.iter().skip(1).step_by(2).copied()
    }

    pub fn tokens(&self) -> impl Iterator<Item = Address> + '_ {
        self.elems.iter().step_by(2).copied()
    }

    pub fn contains_pool(&self, pool: Address) -> bool {
        self.pools().any(|p| p == pool)
    }

    pub fn raw(&self) -> &[Address] {
        &self.elems
    }
}

/// An immutable record produced by the profitability engine.
///
/// Ordered by `gas_price` descending (see `Ord`) so the filter/submission
/// stage can sort candidates with a plain `sort_unstable_by(|a, b| b.cmp(a))`
/// instead of a bespoke comparator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArbitrageCandidate {
    pub path: Path,
    pub amount_in: U256,
    pub gross_profit: U256,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub burner_count: u32,
    pub burner_cost: U256,
    pub net_profit: U256,
    pub tx_cost: U256,
}

impl ArbitrageCandidate {
    pub fn pairs(&self) -> impl Iterator<Item = Address> + '_ {
        self.path.pools()
    }
}

impl PartialOrd for ArbitrageCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ArbitrageCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.gas_price.cmp(&other.gas_price)
    }
}

/// Highest block number whose `Sync` events have been folded into the registry.
pub type BlockCursor = u64;

/// A `Sync(uint112 reserve0, uint112 reserve1)` event observed on chain.
#[derive(Debug, Clone, Copy)]
pub struct SyncEvent {
    pub pool: Address,
    pub reserve0: U256,
    pub reserve1: U256,
    pub block_number: u64,
}

/// Decoded 19-byte-per-record `BatchChecker.checkArbs` result.
#[derive(Debug, Clone, Copy)]
pub struct BatchCheckResult {
    pub success: bool,
    pub profit: U256,
    pub gas: u32,
}

/// Outcome of the gas-estimation quorum for one candidate submission.
#[derive(Debug, Clone)]
pub enum EstimationOutcome {
    Accepted { gas_limit: u64 },
    NotProfitable,
    MixedEstimation { profitables: u32, nonprofitables: u32, errors: u32 },
    QuorumErrored(String),
    LateTransaction,
}

/// Per-account nonce, rolled back atomically on estimation rejection.
#[derive(Debug, Default, Clone, Copy)]
pub struct NonceCounter(pub u64);

impl NonceCounter {
    pub fn next(&mut self) -> u64 {
        let n = self.0;
        self.0 += 1;
        n
    }

    pub fn rollback(&mut self) {
        self.0 = self.0.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        let mut bytes = [0u8; 20];
        bytes[19] = byte;
        Address::from(bytes)
    }

    #[test]
    fn path_accessors_round_trip() {
        let t0 = addr(1);
        let p0 = addr(2);
        let t1 = addr(3);
        let p1 = addr(4);
        let t2 = addr(5);
        let path = Path::new(vec![t0, p0, t1, p1, t2]);

        assert_eq!(path.hops(), 2);
        assert_eq!(path.start_token(), t0);
        assert_eq!(path.end_token(), t2);
        assert_eq!(path.token(1), t1);
        assert_eq!(path.pool(1), p1);
        assert_eq!(path.pools().collect::<Vec<_>>(), vec![p0, p1]);
        assert!(path.contains_pool(p0));
        assert!(!path.contains_pool(addr(9)));
    }

    #[test]
    fn path_equality_is_by_value() {
        let a = Path::new(vec![addr(1), addr(2), addr(3)]);
        let b = Path::new(vec![addr(1), addr(2), addr(3)]);
        let c = Path::new(vec![addr(1), addr(2), addr(4)]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn candidate_ord_is_by_gas_price() {
        let path = Path::new(vec![addr(1), addr(2), addr(3)]);
        let mk = |gp: u64| ArbitrageCandidate {
            path: path.clone(),
            amount_in: U256::ZERO,
            gross_profit: U256::ZERO,
            gas_price: U256::from(gp),
            gas_limit: 0,
            burner_count: 0,
            burner_cost: U256::ZERO,
            net_profit: U256::ZERO,
            tx_cost: U256::ZERO,
        };
        let low = mk(10);
        let high = mk(20);
        assert!(high > low);
    }

    #[test]
    fn nonce_counter_next_and_rollback() {
        let mut n = NonceCounter(5);
        assert_eq!(n.next(), 5);
        assert_eq!(n.0, 6);
        n.rollback();
        n.rollback();
        assert_eq!(n.0, 4);
    }
}
