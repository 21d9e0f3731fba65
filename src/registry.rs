//! Pool Registry & Sync: the in-memory mirror of every tracked pool's
//! reserves, kept current by folding `Sync` events and periodically
//! reconciled against a full on-chain refresh.
//!

use crate::error::RegistryError;
use crate::types::{FeeSource, Pool, SyncEvent};
use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

/// What the registry needs from the chain: batched multicall reads. Kept
/// as a trait so the registry's folding/filtering logic is testable
/// without a live node.
#[async_trait]
pub trait MulticallClient {
    /// `factory.allPairsLength()` for each factory.
    async fn pool_counts(&self, factories: &[Address]) -> Result<Vec<U256>, RegistryError>;

    /// `factory.allPairs(index)` for a contiguous range, retried on the
    /// zero-address subset only (some indices may legitimately 404 if the
    /// factory's count changed between the count call and this one).
    async fn pool_addresses(&self, factory: Address, start: U256, count: U256) -> Result<Vec<Address>, RegistryError>;

    /// `pair.token0()`/`pair.token1()` for each pool address, in the same
    /// order as `pools`.
    async fn pool_tokens(&self, pools: &[Address]) -> Result<Vec<(Address, Address)>, RegistryError>;

    /// `pair.getReserves()` for each pool address, in the same order.
    async fn pool_reserves(&self, pools: &[Address]) -> Result<Vec<(U256, U256)>, RegistryError>;

    /// Fee numerator per pool, decoded per its `fee_source`: `Fixed(n)`
    /// needs no call and is returned as-is; `ReadFromPool` reads
    /// `pair.swapFee()`; `ReadFromFactory(f)` reads `f.getPairFees(pair)`.
    /// One element per `(pool, fee_source)` pair, same order as input.
    async fn pool_fee_numerators(&self, pools: &[(Address, FeeSource)]) -> Result<Vec<u16>, RegistryError>;
}

/// In-memory pool table.
#[derive(Debug, Clone, Default)]
pub struct PoolRegistry {
    pools: HashMap<Address, Pool>,
    /// Per-factory discovery order, oldest first. Used by
    /// [`Self::filter_by_liquidity`] to exempt the most recently created
    /// pools from the liquidity cutoff regardless of their reserves —
    /// brand new pools haven't had a chance to accumulate liquidity yet.
    creation_order: HashMap<Address, Vec<Address>>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pools(pools: impl IntoIterator<Item = Pool>) -> Self {
        Self {
            pools: pools.into_iter().map(|p| (p.address, p)).collect(),
        }
    }

    pub fn get(&self, address: &Address) -> Option<&Pool> {
        self.pools.get(address)
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn as_map(&self) -> &HashMap<Address, Pool> {
        &self.pools
    }

    pub fn insert(&mut self, pool: Pool) {
        self.pools.insert(pool.address, pool);
    }

    /// Fold a batch of `Sync` events into reserves, returning the set of
    /// pool addresses actually updated (unknown pools are skipped, not
    /// inserted — they must go through [`Self::insert`] from a full
    /// discovery pass first).
    pub fn apply_events(&mut self, events: &[SyncEvent]) -> HashSet<Address> {
        let mut touched = HashSet::new();
        for event in events {
            if let Some(pool) = self.pools.get_mut(&event.pool) {
                pool.reserve0 = event.reserve0;
                pool.reserve1 = event.reserve1;
                touched.insert(event.pool);
            }
        }
        touched
    }

    /// Drop every pool whose liquidity (valued in a reference token via
    /// `prices_usd`) falls below its token-specific minimum, or the
    /// global fallback minimum if the token has no configured price —
    /// except the `exclude_tail` most recently created pools of each
    /// factory, which are kept regardless of reserves.
    pub fn filter_by_liquidity(
        &mut self,
        min_liquidity_raw: &HashMap<Address, U256>,
        global_fallback_raw: U256,
        exclude_tail: usize,
    ) -> usize {
        let exempt: HashSet<Address> = self
            .creation_order
            .values()
            .flat_map(|pools| pools.iter().rev().take(exclude_tail).copied())
            .collect();

        let before = self.pools.len();
        self.pools.retain(|addr, pool| {
            if exempt.contains(addr) {
                return true;
            }
            let min0 = min_liquidity_raw.get(&pool.token0).copied().unwrap_or(global_fallback_raw);
            let min1 = min_liquidity_raw.get(&pool.token1).copied().unwrap_or(global_fallback_raw);
            pool.reserve0 >= min0 && pool.reserve1 >= min1
        });
        before - self.pools.len()
    }

    /// Discover every pool created after `known_count` per factory and
    /// insert it with a zero-reserve placeholder (reserves are filled in
    /// by a subsequent [`refresh_all`] or the next `Sync` event).
    pub async fn fetch_new_pools(
        &mut self,
        client: &impl MulticallClient,
        factories: &[Address],
        known_counts: &mut HashMap<Address, U256>,
        fee_sources: &HashMap<Address, FeeSource>,
        default_fee_numerator: u16,
    ) -> Result<usize, RegistryError> {
        let counts = client.pool_counts(factories).await?;
        if counts.len() != factories.len() {
            return Err(RegistryError::LengthMismatch { expected: factories.len(), got: counts.len() });
        }

        let mut discovered = 0usize;
        for (factory, total) in factories.iter().zip(counts) {
            let known = known_counts.entry(*factory).or_insert(U256::ZERO);
            if total <= *known {
                continue;
            }
            let new_count = total - *known;
            let addresses = client.pool_addresses(*factory, *known, new_count).await?;
            let tokens = client.pool_tokens(&addresses).await?;

            for (addr, (token0, token1)) in addresses.iter().zip(tokens) {
                if token0.is_zero() || token1.is_zero() {
                    warn!(pool = %addr, "skipping pool with zero-address token");
                    continue;
                }
                self.pools.entry(*addr).or_insert(Pool {
                    address: *addr,
                    token0,
                    token1,
                    reserve0: U256::ZERO,
                    reserve1: U256::ZERO,
                    fee_source: fee_sources.get(factory).copied().unwrap_or(FeeSource::Fixed(default_fee_numerator)),
                    fee_numerator: default_fee_numerator,
                });
                self.creation_order.entry(*factory).or_default().push(*addr);
                discovered += 1;
            }
            *known = total;
        }

        info!(discovered, "pool discovery complete");
        Ok(discovered)
    }

    /// Refresh every tracked pool's reserves and fee_numerator in one pass.
    /// Used at startup and after any gap large enough that `Sync` events
    /// alone can't be trusted to have caught everything. Reserves and
    /// fee_numerator are both recomputed so a mid-refresh fee change (e.g.
    /// a `ReadFromFactory` registry update) is never left stale.
    pub async fn refresh_all(&mut self, client: &impl MulticallClient) -> Result<(), RegistryError> {
        let addresses: Vec<Address> = self.pools.keys().copied().collect();
        if addresses.is_empty() {
            return Ok(());
        }
        let reserves = client.pool_reserves(&addresses).await?;
        if reserves.len() != addresses.len() {
            return Err(RegistryError::LengthMismatch { expected: addresses.len(), got: reserves.len() });
        }

        let fee_sources: Vec<(Address, FeeSource)> = addresses
            .iter()
            .map(|addr| (*addr, self.pools[addr].fee_source))
            .collect();
        let fee_numerators = client.pool_fee_numerators(&fee_sources).await?;
        if fee_numerators.len() != addresses.len() {
            return Err(RegistryError::LengthMismatch { expected: addresses.len(), got: fee_numerators.len() });
        }

        for ((addr, (r0, r1)), fee_numerator) in addresses.into_iter().zip(reserves).zip(fee_numerators) {
            if let Some(pool) = self.pools.get_mut(&addr) {
                pool.reserve0 = r0;
                pool.reserve1 = r1;
                pool.fee_numerator = fee_numerator;
            }
        }
        Ok(())
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

    fn pool(address: Address, t0: Address, t1: Address, r0: u64, r1: u64) -> Pool {
        Pool {
            address,
            token0: t0,
            token1: t1,
            reserve0: U256::from(r0),
            reserve1: U256::from(r1),
            fee_source: FeeSource::Fixed(30),
            fee_numerator: 9_970,
        }
    }

    #[test]
    fn apply_events_updates_known_pools_only() {
        let p0 = addr(10);
        let mut registry = PoolRegistry::from_pools(vec![pool(p0, addr(1), addr(2), 100, 200)]);

        let touched = registry.apply_events(&[
            SyncEvent { pool: p0, reserve0: U256::from(150u64), reserve1: U256::from(250u64), block_number: 5 },
            SyncEvent { pool: addr(99), reserve0: U256::from(1u64), reserve1: U256::from(1u64), block_number: 5 },
        ]);

        assert_eq!(touched.len(), 1);
        assert!(touched.contains(&p0));
        assert_eq!(registry.get(&p0).unwrap().reserve0, U256::from(150u64));
    }

    #[test]
    fn filter_by_liquidity_drops_below_minimum() {
        let t0 = addr(1);
        let t1 = addr(2);
        let mut registry = PoolRegistry::from_pools(vec![
            pool(addr(10), t0, t1, 1_000, 1_000),
            pool(addr(11), t0, t1, 10, 10),
        ]);

        let mut minimums = HashMap::new();
        minimums.insert(t0, U256::from(500u64));
        minimums.insert(t1, U256::from(500u64));

        let dropped = registry.filter_by_liquidity(&minimums, U256::ZERO, 0);
        assert_eq!(dropped, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn filter_by_liquidity_exempts_excluded_tail() {
        let t0 = addr(1);
        let t1 = addr(2);
        let factory = addr(50);
        let stale_pool = addr(10);
        let fresh_pool = addr(11);
        let mut registry = PoolRegistry::from_pools(vec![
            pool(stale_pool, t0, t1, 10, 10),
            pool(fresh_pool, t0, t1, 10, 10),
        ]);
        registry.creation_order.insert(factory, vec![stale_pool, fresh_pool]);

        let mut minimums = HashMap::new();
        minimums.insert(t0, U256::from(500u64));
        minimums.insert(t1, U256::from(500u64));

        let dropped = registry.filter_by_liquidity(&minimums, U256::ZERO, 1);
        assert_eq!(dropped, 1);
        assert!(registry.get(&fresh_pool).is_some());
        assert!(registry.get(&stale_pool).is_none());
    }
}
