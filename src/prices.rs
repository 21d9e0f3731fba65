//! Price Poller: a background task that periodically fetches the chain's
//! current legacy gas price (deriving the `min`/`low`/`mid`/`max`
//! escalation thresholds from it), the native token's USD price (display
//! bookkeeping only — `tx_stats`/`balance_stats`), and the §3 `Prices`
//! token/eth table: a ratio per configured "price pool" entry, read
//! straight off that pool's own reserves each tick.
//!
//! Readers get a "not running yet" error until the very first poll
//! succeeds; after that, the last good value is always available even if
//! subsequent polls fail (a transient feed outage shouldn't stall
//! detection).
//!

use crate::config::PricePoolRef;
use crate::error::RpcError;
use crate::profitability::GasPriceLevels;
use crate::registry::MulticallClient;
use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum PriceError {
    #[error("price poller has not completed its first successful poll yet")]
    NotRunning,
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("price feed request failed: {0}")]
    Feed(String),
}

/// What the poller needs from the outside world: the chain's current
/// legacy gas price and an external USD quote for the native token. Legacy
/// gas price only — this bot targets chains without EIP-1559 dynamic fees.
#[async_trait]
pub trait GasPriceSource {
    async fn gas_price(&self) -> Result<U256, RpcError>;
}

#[async_trait]
pub trait UsdPriceFeed {
    async fn native_token_usd(&self) -> Result<Decimal, PriceError>;
}

/// Reqwest-backed USD price feed hitting a single configurable HTTP
/// endpoint that returns `{"price": "<decimal>"}`.
pub struct HttpUsdPriceFeed {
    client: reqwest::Client,
    url: String,
}

impl HttpUsdPriceFeed {
    pub fn new(url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), url: url.into() }
    }
}

#[async_trait]
impl UsdPriceFeed for HttpUsdPriceFeed {
    async fn native_token_usd(&self) -> Result<Decimal, PriceError> {
        #[derive(serde::Deserialize)]
        struct Resp {
            price: String,
        }
        let resp: Resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| PriceError::Feed(e.to_string()))?
            .json()
            .await
            .map_err(|e| PriceError::Feed(e.to_string()))?;
        resp.price.parse().map_err(|_| PriceError::Feed(format!("unparseable price: {}", resp.price)))
    }
}

struct PollState {
    native_usd: Decimal,
    levels: GasPriceLevels,
    token_eth: HashMap<Address, Decimal>,
}

/// Singleton-style background price poller. Intended to be constructed
/// once at startup and shared (e.g. behind an `Arc`) with every task that
/// needs gas-price thresholds or the native token's USD price.
pub struct PricePoller {
    state: RwLock<Option<PollState>>,
    running: AtomicBool,
}

impl Default for PricePoller {
    fn default() -> Self {
        Self::new()
    }
}

impl PricePoller {
    pub fn new() -> Self {
        Self { state: RwLock::new(None), running: AtomicBool::new(false) }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn gas_levels(&self) -> Result<GasPriceLevels, PriceError> {
        self.state
            .read()
            .unwrap()
            .as_ref()
            .map(|s| s.levels)
            .ok_or(PriceError::NotRunning)
    }

    pub fn native_usd(&self) -> Result<Decimal, PriceError> {
        self.state
            .read()
            .unwrap()
            .as_ref()
            .map(|s| s.native_usd)
            .ok_or(PriceError::NotRunning)
    }

    /// The §3 `Prices` table lookup: how many wei of native gas one unit
    /// of `token` is worth. Weths always price at exactly 1 (they ARE the
    /// native coin, just wrapped); anything else falls back to `0` before
    /// the first successful poll or if `token` isn't one of the
    /// configured price-pool tokens — `profitability::evaluate_path`
    /// already discards a path whose `wei_price` is zero, so failing
    /// closed here is safe.
    pub fn token_eth_price(&self, token: Address, weths: &[Address]) -> Decimal {
        if weths.contains(&token) {
            return Decimal::ONE;
        }
        self.state
            .read()
            .unwrap()
            .as_ref()
            .and_then(|s| s.token_eth.get(&token).copied())
            .unwrap_or(Decimal::ZERO)
    }

    /// Run the poll loop until `shutdown` resolves. Each tick fetches the
    /// chain's legacy gas price, the native token's USD price, and the
    /// configured price pools' reserves, then derives low/mid/high gas
    /// thresholds and the token/eth price table. A failed tick logs and
    /// retries on the next interval rather than clearing previously
    /// published values.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        self: std::sync::Arc<Self>,
        gas_source: impl GasPriceSource,
        usd_feed: impl UsdPriceFeed,
        multicall: &impl MulticallClient,
        price_pools: &[PricePoolRef],
        interval: Duration,
        min_multiplier: Decimal,
        low_multiplier: Decimal,
        mid_multiplier: Decimal,
        max_multiplier: Decimal,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match self
                .poll_once(&gas_source, &usd_feed, multicall, price_pools, min_multiplier, low_multiplier, mid_multiplier, max_multiplier)
                .await
            {
                Ok(()) => {
                    if !self.running.swap(true, Ordering::AcqRel) {
                        info!("price poller completed first successful poll");
                    }
                }
                Err(err) => error!(error = %err, "price poll tick failed, keeping last known values"),
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn poll_once(
        &self,
        gas_source: &impl GasPriceSource,
        usd_feed: &impl UsdPriceFeed,
        multicall: &impl MulticallClient,
        price_pools: &[PricePoolRef],
        min_multiplier: Decimal,
        low_multiplier: Decimal,
        mid_multiplier: Decimal,
        max_multiplier: Decimal,
    ) -> Result<(), PriceError> {
        let gas_price = gas_source.gas_price().await?;
        let native_usd = usd_feed.native_token_usd().await?;

        let levels = GasPriceLevels {
            min: scale(gas_price, min_multiplier),
            low: scale(gas_price, low_multiplier),
            mid: scale(gas_price, mid_multiplier),
            max: scale(gas_price, max_multiplier),
        };

        let mut token_eth = self.state.read().unwrap().as_ref().map(|s| s.token_eth.clone()).unwrap_or_default();

        if !price_pools.is_empty() {
            let pools: Vec<Address> = price_pools.iter().map(|p| p.pool).collect();
            match multicall.pool_reserves(&pools).await {
                Ok(reserves) => {
                    for (pool, (r0, r1)) in price_pools.iter().zip(reserves) {
                        let (token_reserve, weth_reserve) = if pool.token_is_token0 { (r0, r1) } else { (r1, r0) };
                        if weth_reserve.is_zero() {
                            continue;
                        }
                        let ratio = Decimal::from_str_exact(&token_reserve.to_string())
                            .unwrap_or(Decimal::ZERO)
                            / Decimal::from_str_exact(&weth_reserve.to_string()).unwrap_or(Decimal::ONE);
                        token_eth.insert(pool.token, ratio);
                    }
                }
                Err(err) => error!(error = %err, "price pool reserve fetch failed, keeping last known token/eth prices"),
            }
        }

        *self.state.write().unwrap() = Some(PollState { native_usd, levels, token_eth });
        Ok(())
    }
}

fn scale(gas_price: U256, multiplier: Decimal) -> U256 {
    let dec = Decimal::from(gas_price.to::<u128>().min(u128::MAX)) * multiplier;
    U256::from(dec.trunc().to_string().parse::<u128>().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;
    use crate::types::FeeSource;
    use async_trait::async_trait;

    struct FixedReserves(Vec<(U256, U256)>);

    #[async_trait]
    impl MulticallClient for FixedReserves {
        async fn pool_counts(&self, _factories: &[Address]) -> Result<Vec<U256>, RegistryError> {
            unimplemented!()
        }
        async fn pool_addresses(&self, _factory: Address, _start: U256, _count: U256) -> Result<Vec<Address>, RegistryError> {
            unimplemented!()
        }
        async fn pool_tokens(&self, _pools: &[Address]) -> Result<Vec<(Address, Address)>, RegistryError> {
            unimplemented!()
        }
        async fn pool_reserves(&self, _pools: &[Address]) -> Result<Vec<(U256, U256)>, RegistryError> {
            Ok(self.0.clone())
        }
        async fn pool_fee_numerators(&self, _pools: &[(Address, FeeSource)]) -> Result<Vec<u16>, RegistryError> {
            unimplemented!()
        }
    }

    struct FixedGas(U256);

    #[async_trait]
    impl GasPriceSource for FixedGas {
        async fn gas_price(&self) -> Result<U256, RpcError> {
            Ok(self.0)
        }
    }

    struct FixedUsd(Decimal);

    #[async_trait]
    impl UsdPriceFeed for FixedUsd {
        async fn native_token_usd(&self) -> Result<Decimal, PriceError> {
            Ok(self.0)
        }
    }

    #[test]
    fn token_eth_price_is_one_for_weth_before_any_poll() {
        let weth = Address::from([1u8; 20]);
        let poller = PricePoller::new();
        assert_eq!(poller.token_eth_price(weth, &[weth]), Decimal::ONE);
    }

    #[test]
    fn token_eth_price_fails_closed_before_first_poll() {
        let token = Address::from([2u8; 20]);
        let weth = Address::from([1u8; 20]);
        let poller = PricePoller::new();
        assert_eq!(poller.token_eth_price(token, &[weth]), Decimal::ZERO);
    }

    #[tokio::test]
    async fn poll_once_derives_token_eth_ratio_from_reserves() {
        let token = Address::from([2u8; 20]);
        let weth = Address::from([1u8; 20]);
        let pool = Address::from([3u8; 20]);
        let price_pools = vec![PricePoolRef { pool, token, token_is_token0: true }];
        let multicall = FixedReserves(vec![(U256::from(2_000u64), U256::from(1_000u64))]);

        let poller = PricePoller::new();
        poller
            .poll_once(
                &FixedGas(U256::from(1_000_000_000u64)),
                &FixedUsd(Decimal::ONE),
                &multicall,
                &price_pools,
                Decimal::ONE,
                Decimal::ONE,
                Decimal::ONE,
                Decimal::ONE,
            )
            .await
            .unwrap();

        assert_eq!(poller.token_eth_price(token, &[weth]), Decimal::new(2, 0));
    }

    #[tokio::test]
    async fn poll_once_keeps_last_known_ratio_on_zero_weth_reserve() {
        let token = Address::from([2u8; 20]);
        let weth = Address::from([1u8; 20]);
        let pool = Address::from([3u8; 20]);
        let price_pools = vec![PricePoolRef { pool, token, token_is_token0: true }];

        let poller = PricePoller::new();
        poller
            .poll_once(
                &FixedGas(U256::from(1u64)),
                &FixedUsd(Decimal::ONE),
                &FixedReserves(vec![(U256::from(3_000u64), U256::from(1_000u64))]),
                &price_pools,
                Decimal::ONE,
                Decimal::ONE,
                Decimal::ONE,
                Decimal::ONE,
            )
            .await
            .unwrap();
        assert_eq!(poller.token_eth_price(token, &[weth]), Decimal::new(3, 0));

        poller
            .poll_once(
                &FixedGas(U256::from(1u64)),
                &FixedUsd(Decimal::ONE),
                &FixedReserves(vec![(U256::from(999u64), U256::ZERO)]),
                &price_pools,
                Decimal::ONE,
                Decimal::ONE,
                Decimal::ONE,
                Decimal::ONE,
            )
            .await
            .unwrap();
        assert_eq!(poller.token_eth_price(token, &[weth]), Decimal::new(3, 0));
    }

    #[test]
    fn gas_levels_unavailable_before_first_poll() {
        let poller = PricePoller::new();
        assert!(!poller.is_running());
        assert!(matches!(poller.gas_levels(), Err(PriceError::NotRunning)));
    }
}
