//! Path graph: token adjacency built from the pool registry, cycle
//! enumeration from configured entry tokens, and a pool -> path index so
//! a reserve update can cheaply find every path it invalidates.
//!

use crate::types::{Path, Pool};
use alloy::primitives::Address;
use std::collections::{HashMap, HashSet};

/// Bidirectional token adjacency: for each token, every `(pool, other_token)`
/// edge reachable from it.
#[derive(Debug, Clone, Default)]
pub struct PathGraph {
    adjacency: HashMap<Address, Vec<(Address, Address)>>,
}

/// What token(s) a path's closing hop is allowed to land on.
#[derive(Clone, Copy)]
enum ClosesAt<'a> {
    Exactly(Address),
    AnyOf(&'a HashSet<Address>),
}

impl ClosesAt<'_> {
    fn matches(&self, token: Address) -> bool {
        match self {
            ClosesAt::Exactly(t) => *t == token,
            ClosesAt::AnyOf(set) => set.contains(&token),
        }
    }
}

impl PathGraph {
    pub fn build(pools: &HashMap<Address, Pool>) -> Self {
        let mut adjacency: HashMap<Address, Vec<(Address, Address)>> = HashMap::new();
        for pool in pools.values() {
            adjacency
                .entry(pool.token0)
                .or_default()
                .push((pool.address, pool.token1));
            adjacency
                .entry(pool.token1)
                .or_default()
                .push((pool.address, pool.token0));
        }
        Self { adjacency }
    }

    /// Enumerate every simple 2-hop and 3-hop cycle starting at one of
    /// `entry_tokens`, never revisiting a pool within the same path.
    ///
    /// `weths` pool together: a path that starts at any weth is allowed to
    /// close at *any* weth, not just the one it started from (they're
    /// fungible for the bot's funding purposes). A path starting at a
    /// non-weth entry token must return to exactly that token.
    /// `entry_tokens` are typically the wrapped-native assets and major
    /// stablecoins the bot is funded in.
    pub fn enumerate_paths(&self, entry_tokens: &[Address], weths: &HashSet<Address>) -> Vec<Path> {
        let mut paths = Vec::new();
        for &start in entry_tokens {
            let Some(edges) = self.adjacency.get(&start) else {
                continue;
            };
            let closes_at: ClosesAt = if weths.contains(&start) {
                ClosesAt::AnyOf(weths)
            } else {
                ClosesAt::Exactly(start)
            };
            for &(pool0, mid) in edges {
                self.extend(closes_at, vec![start, pool0, mid], &mut paths);
            }
        }
        paths
    }

    /// `elems` is the partial path so far (ending on a token, at least one
    /// hop in). A cycle closes and stops extending once the current token
    /// satisfies `closes_at` after 2 or 3 hops; otherwise we try one more
    /// hop, up to the 3-hop limit.
    fn extend(&self, closes_at: ClosesAt, elems: Vec<Address>, out: &mut Vec<Path>) {
        let hops = (elems.len() - 1) / 2;
        let current_token = *elems.last().unwrap();

        if hops >= 2 && closes_at.matches(current_token) {
            out.push(Path::new(elems));
            return;
        }
        if hops >= 3 {
            return;
        }

        let Some(edges) = self.adjacency.get(&current_token) else {
            return;
        };
        let used_pools: HashSet<Address> = elems.iter().skip(1).step_by(2).copied().collect();

        for &(pool, next_token) in edges {
            if used_pools.contains(&pool) {
                continue;
            }
            let mut next = elems.clone();
            next.push(pool);
            next.push(next_token);
            self.extend(closes_at, next, out);
        }
    }
}

/// Maps each pool address to the indices of every path in some fixed path
/// list that uses it, so a reserve change can be translated directly into
/// "which paths need re-evaluation" without scanning the whole path list.
#[derive(Debug, Clone, Default)]
pub struct PoolPathIndex {
    by_pool: HashMap<Address, Vec<usize>>,
}

impl PoolPathIndex {
    pub fn build(paths: &[Path]) -> Self {
        let mut by_pool: HashMap<Address, Vec<usize>> = HashMap::new();
        for (idx, path) in paths.iter().enumerate() {
            for pool in path.pools() {
                by_pool.entry(pool).or_default().push(idx);
            }
        }
        Self { by_pool }
    }

    /// Union of path indices touched by any of `changed_pools`.
    pub fn paths_touching(&self, changed_pools: &[Address]) -> HashSet<usize> {
        let mut out = HashSet::new();
        for pool in changed_pools {
            if let Some(indices) = self.by_pool.get(pool) {
                out.extend(indices.iter().copied());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FeeSource;
    use alloy::primitives::U256;

    fn addr(byte: u8) -> Address {
        let mut bytes = [0u8; 20];
        bytes[19] = byte;
        Address::from(bytes)
    }

    fn pool(address: Address, t0: Address, t1: Address) -> Pool {
        Pool {
            address,
            token0: t0,
            token1: t1,
            reserve0: U256::from(1_000_000u64),
            reserve1: U256::from(1_000_000u64),
            fee_source: FeeSource::Fixed(30),
            fee_numerator: 9_970,
        }
    }

    #[test]
    fn enumerates_two_hop_cycle() {
        let weth = addr(1);
        let usdc = addr(2);
        let p0 = addr(10);
        let p1 = addr(11);
        let mut pools = HashMap::new();
        pools.insert(p0, pool(p0, weth, usdc));
        pools.insert(p1, pool(p1, usdc, weth));

        let graph = PathGraph::build(&pools);
        let weths: HashSet<Address> = [weth].into_iter().collect();
        let paths = graph.enumerate_paths(&[weth], &weths);
        assert!(paths.iter().any(|p| p.hops() == 2 && p.start_token() == weth));
    }

    #[test]
    fn enumerates_three_hop_cycle_without_repeating_pools() {
        let weth = addr(1);
        let usdc = addr(2);
        let dai = addr(3);
        let p0 = addr(10);
        let p1 = addr(11);
        let p2 = addr(12);
        let mut pools = HashMap::new();
        pools.insert(p0, pool(p0, weth, usdc));
        pools.insert(p1, pool(p1, usdc, dai));
        pools.insert(p2, pool(p2, dai, weth));

        let graph = PathGraph::build(&pools);
        let weths: HashSet<Address> = [weth].into_iter().collect();
        let paths = graph.enumerate_paths(&[weth], &weths);
        let three_hop = paths.iter().find(|p| p.hops() == 3);
        assert!(three_hop.is_some());
        let p = three_hop.unwrap();
        let pool_set: HashSet<_> = p.pools().collect();
        assert_eq!(pool_set.len(), 3);
    }

    #[test]
    fn weth_started_path_may_close_on_a_different_weth() {
        let weth_a = addr(1);
        let weth_b = addr(2);
        let usdc = addr(3);
        let p0 = addr(10);
        let p1 = addr(11);
        let mut pools = HashMap::new();
        pools.insert(p0, pool(p0, weth_a, usdc));
        pools.insert(p1, pool(p1, usdc, weth_b));

        let graph = PathGraph::build(&pools);
        let weths: HashSet<Address> = [weth_a, weth_b].into_iter().collect();
        let paths = graph.enumerate_paths(&[weth_a], &weths);
        assert!(paths.iter().any(|p| p.start_token() == weth_a && p.end_token() == weth_b));
    }

    #[test]
    fn non_weth_entry_must_close_on_itself() {
        let weth = addr(1);
        let usdc = addr(2);
        let dai = addr(3);
        let p0 = addr(10);
        let p1 = addr(11);
        let mut pools = HashMap::new();
        pools.insert(p0, pool(p0, usdc, weth));
        pools.insert(p1, pool(p1, weth, dai));

        let graph = PathGraph::build(&pools);
        let weths: HashSet<Address> = [weth].into_iter().collect();
        let paths = graph.enumerate_paths(&[usdc], &weths);
        assert!(paths.is_empty());
    }

    #[test]
    fn pool_path_index_maps_pool_to_paths() {
        let t0 = addr(1);
        let t1 = addr(2);
        let p0 = addr(10);
        let p1 = addr(11);
        let path_a = Path::new(vec![t0, p0, t1, p1, t0]);
        let path_b = Path::new(vec![t0, p1, t1, p0, t0]);
        let index = PoolPathIndex::build(&[path_a, path_b]);

        let touching = index.paths_touching(&[p0]);
        assert_eq!(touching.len(), 2);
    }
}
