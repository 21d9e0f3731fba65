//! Block-driven main control loop: owns every piece of mutable state the
//! bot carries between ticks (pool registry, path list, blacklist, burner
//! inventory, nonce counter) and wires the Concurrency Fabric, the batch
//! validator, and the submission pipeline together into one cycle per
//! new block.
//!

use crate::blacklist::Blacklist;
use crate::burner::BurnerPool;
use crate::chain::{ChainBatchChecker, ChainMulticall, ChainSubmitter};
use crate::concurrency::{self, Command, SharedCursor};
use crate::config::BotConfig;
use crate::error::BotError;
use crate::graph::{PathGraph, PoolPathIndex};
use crate::persistence::{keys, Store};
use crate::prices::PricePoller;
use crate::profitability::ProfitabilityConfig;
use crate::registry::PoolRegistry;
use crate::rpc::RpcFabric;
use crate::submission::Submitter;
use crate::types::{ArbitrageCandidate, NonceCounter, Path, Pool};
use crate::validator::{self, BatchValidator};
use alloy::primitives::{Address, U256};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{info, warn};

/// Running counters persisted alongside the rest of the bot's state, not
/// used for any decision the bot makes — purely an operational signal an
/// external dashboard can read back. Profit is tracked in both units
/// rather than one, reconciling the reference's two disagreeing shapes.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TxStats {
    pub submitted: u64,
    pub confirmed: u64,
    pub failed: u64,
    pub native_profit: U256,
    pub usd_profit: Decimal,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct BalanceStats {
    pub last_native_balance_wei: U256,
    pub last_checked_block: u64,
}

/// Everything the main loop needs between ticks. Constructed once at
/// startup via [`Driver::bootstrap`] and driven by [`Driver::run`] until
/// shutdown is signaled.
pub struct Driver {
    config: Arc<BotConfig>,
    rpc: Arc<RpcFabric>,
    store: Store,

    registry: PoolRegistry,
    paths: Vec<Path>,
    pool_path_index: PoolPathIndex,
    known_counts: HashMap<Address, U256>,
    last_block: u64,

    blacklist: Blacklist,
    burners: BurnerPool,
    nonce: NonceCounter,

    tx_stats: TxStats,
    balance_stats: BalanceStats,
    /// Hashes submitted but not yet reconciled against a receipt.
    pending_txs: Vec<alloy::primitives::TxHash>,
}

impl Driver {
    /// Load persisted state (falling back to empty/default on first boot),
    /// then run one full pool discovery + reserve refresh pass so the path
    /// graph is built against live reserves rather than whatever was saved.
    pub async fn bootstrap(config: Arc<BotConfig>, rpc: Arc<RpcFabric>, multicall: &ChainMulticall) -> Result<Self, BotError> {
        let store = Store::new(&config.data_dir);

        let persisted_pools: Vec<Pool> = store.load_or_default(keys::POOLS, Vec::new())?;
        let mut registry = PoolRegistry::from_pools(persisted_pools);

        let mut known_counts: HashMap<Address, U256> = store.load_or_default(keys::POOL_NUMBERS, HashMap::new())?;
        let last_block: u64 = store.load_or_default(keys::LAST_BLOCK, 0u64)?;

        let pre_blacklist = store.load_or_default(keys::PRE_BLACKLIST_PATHS, HashMap::new())?;
        let blacklisted = store.load_or_default(keys::BLACKLIST_PATHS, std::collections::HashSet::new())?;
        let blacklist = Blacklist::from_parts(config.blacklist_threshold, pre_blacklist, blacklisted);

        let burners: BurnerPool = store.load_or_default(keys::BURNERS, BurnerPool::new())?;
        let tx_stats: TxStats = store.load_or_default(keys::TX_STATS, TxStats::default())?;
        let balance_stats: BalanceStats = store.load_or_default(keys::BALANCE_STATS, BalanceStats::default())?;

        let factories: Vec<Address> = config.factories.keys().copied().collect();
        registry
            .fetch_new_pools(multicall, &factories, &mut known_counts, &config.factories, default_fee_numerator(&config))
            .await?;
        registry.refresh_all(multicall).await?;
        registry.filter_by_liquidity(&config.min_liquidity, config.min_liquidity_fallback, config.exclude_tail);

        let graph = PathGraph::build(registry.as_map());
        let weths: std::collections::HashSet<Address> = config.weths.iter().copied().collect();
        let mut paths = graph.enumerate_paths(&config.path_entry_tokens, &weths);
        paths.retain(|p| !blacklist.is_blacklisted(p));
        let pool_path_index = PoolPathIndex::build(&paths);

        info!(pools = registry.len(), paths = paths.len(), "driver bootstrap complete");

        Ok(Self {
            config,
            rpc,
            store,
            registry,
            paths,
            pool_path_index,
            known_counts,
            last_block,
            blacklist,
            burners,
            nonce: NonceCounter(0),
            tx_stats,
            balance_stats,
            pending_txs: Vec::new(),
        })
    }

    /// Drive the bot until `shutdown` fires, then flush all persisted
    /// state and return.
    pub async fn run(
        mut self,
        multicall: ChainMulticall,
        batch_client: ChainBatchChecker,
        submitter_chain: ChainSubmitter,
        price_poller: Arc<PricePoller>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), BotError> {
        let cursor = Arc::new(SharedCursor::new());
        let (tick_tx, tick_rx) = broadcast::channel::<usize>(4);
        let (results_tx, mut results_rx) = mpsc::channel::<ArbitrageCandidate>(1024);

        let min_gas_limits = self.config.min_gas_limits.clone();
        let gas_limit_for: Arc<dyn Fn(usize) -> u64 + Send + Sync> =
            Arc::new(move |hops| *min_gas_limits.get(&hops).unwrap_or(&200_000));

        let weths = self.config.weths.clone();
        let price_poller_for_closure = price_poller.clone();
        let price_correction = self.config.price_correction;
        let wei_price_for: Arc<dyn Fn(Address) -> Decimal + Send + Sync> =
            Arc::new(move |token| price_poller_for_closure.token_eth_price(token, &weths) * price_correction);

        let profitability_cfg = Arc::new(ProfitabilityConfig {
            levels: self.config.gas_levels,
            multipliers: self.config.gas_multipliers,
            min_profit: self.config.min_profit,
            burner_enabled: self.config.burner_enabled,
            burner_gas_price: self.config.burner_gas_price,
        });

        let workers = concurrency::spawn_workers(
            self.config.worker_count,
            cursor.clone(),
            gas_limit_for,
            wei_price_for.clone(),
            profitability_cfg,
            tick_rx,
            results_tx,
        );

        self.broadcast_snapshot(&workers).await;

        let validator = BatchValidator { chunk_size: self.config.batch_checker_chunk_size, router: self.config.router };
        let submitter = Submitter { router: self.config.router };
        let chunk_size = concurrency::chunk_size(self.paths.len(), self.config.worker_count.max(1));

        let mut poll_interval = tokio::time::interval(Duration::from_millis(self.config.main_node_poll_interval_ms));

        loop {
            tokio::select! {
                _ = poll_interval.tick() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            if let Err(err) = self
                .run_tick(
                    &multicall,
                    &batch_client,
                    &submitter_chain,
                    &validator,
                    &submitter,
                    &cursor,
                    &tick_tx,
                    &mut results_rx,
                    chunk_size,
                    &workers,
                    &price_poller,
                    &wei_price_for,
                )
                .await
            {
                warn!(error = %err, "tick failed, continuing to next block");
            }
        }

        for handle in &workers {
            handle.broadcast(Command::Shutdown).await;
        }
        self.persist_all()?;
        info!("driver shut down cleanly, state flushed");
        Ok(())
    }

    async fn broadcast_snapshot(&self, workers: &[concurrency::WorkerHandle]) {
        let pools = Arc::new(self.registry.as_map().clone());
        let paths = Arc::new(self.paths.clone());
        for handle in workers {
            handle.broadcast(Command::UpdatePools(pools.clone())).await;
            handle.broadcast(Command::UpdatePaths(paths.clone())).await;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_tick(
        &mut self,
        multicall: &ChainMulticall,
        batch_client: &ChainBatchChecker,
        submitter_chain: &ChainSubmitter,
        validator: &BatchValidator,
        submitter: &Submitter,
        cursor: &Arc<SharedCursor>,
        tick_tx: &broadcast::Sender<usize>,
        results_rx: &mut mpsc::Receiver<ArbitrageCandidate>,
        chunk_size: usize,
        workers: &[concurrency::WorkerHandle],
        price_poller: &PricePoller,
        wei_price_for: &Arc<dyn Fn(Address) -> Decimal + Send + Sync>,
    ) -> Result<(), BotError> {
        let current_block = self.rpc.block_number().await?;
        let block_deadline = Instant::now() + Duration::from_millis(self.config.max_delay_ms);

        match self.rpc.get_balance(submitter_chain.signer.address()).await {
            Ok(balance) => {
                self.balance_stats.last_native_balance_wei = balance;
                self.balance_stats.last_checked_block = current_block;
            }
            Err(err) => warn!(error = %err, "failed to poll executor native balance"),
        }
        self.store.save(keys::BALANCE_STATS, &self.balance_stats)?;

        self.reconcile_pending_txs().await;

        let mut pool_set_changed = false;

        if current_block > self.last_block {
            let events = self.rpc.fetch_sync_events(self.last_block + 1, current_block).await?;
            let touched = self.registry.apply_events(&events);
            if !touched.is_empty() {
                let changed: Vec<Address> = touched.into_iter().collect();
                let affected = self.pool_path_index.paths_touching(&changed);
                info!(pools = changed.len(), paths = affected.len(), "reserves updated from sync events");
            }
            self.last_block = current_block;
        }

        let factories: Vec<Address> = self.config.factories.keys().copied().collect();
        let discovered = self
            .registry
            .fetch_new_pools(multicall, &factories, &mut self.known_counts, &self.config.factories, default_fee_numerator(&self.config))
            .await?;
        if discovered > 0 {
            // newly discovered pools carry zero-reserve placeholders until
            // the next refresh fills them in.
            self.registry.refresh_all(multicall).await?;
            pool_set_changed = true;
        }
        let filtered_out =
            self.registry
                .filter_by_liquidity(&self.config.min_liquidity, self.config.min_liquidity_fallback, self.config.exclude_tail);
        if filtered_out > 0 {
            pool_set_changed = true;
        }

        // Reserves changed this tick (via sync events or a full refresh),
        // so every worker's evaluation would otherwise run against a stale
        // snapshot — keep the chunk-claiming cursor stable across the
        // broadcast barrier by re-broadcasting before signaling the tick.
        let pools_snapshot = Arc::new(self.registry.as_map().clone());
        for handle in workers {
            handle.broadcast(Command::UpdatePools(pools_snapshot.clone())).await;
        }

        if pool_set_changed {
            let graph = PathGraph::build(self.registry.as_map());
            let weths: std::collections::HashSet<Address> = self.config.weths.iter().copied().collect();
            let mut new_paths = graph.enumerate_paths(&self.config.path_entry_tokens, &weths);
            new_paths.retain(|p| !self.blacklist.is_blacklisted(p));
            self.pool_path_index = PoolPathIndex::build(&new_paths);
            self.paths = new_paths;
            let paths_snapshot = Arc::new(self.paths.clone());
            for handle in workers {
                handle.broadcast(Command::UpdatePaths(paths_snapshot.clone())).await;
            }
            info!(pools = self.registry.len(), paths = self.paths.len(), "path graph rebuilt after material pool-set change");
        }

        cursor.reset();
        let _ = tick_tx.send(chunk_size);

        let mut candidates = Vec::new();
        let collect_deadline = Instant::now() + Duration::from_millis(self.config.main_node_poll_interval_ms.max(50));
        while Instant::now() < collect_deadline {
            match tokio::time::timeout(Duration::from_millis(20), results_rx.recv()).await {
                Ok(Some(candidate)) => {
                    if !self.blacklist.is_blacklisted(&candidate.path) {
                        candidates.push(candidate);
                    }
                }
                Ok(None) => break,
                Err(_) => continue,
            }
        }

        if candidates.is_empty() {
            return Ok(());
        }

        let filtered = crate::validator::filter_profitables(candidates, self.config.gas_levels.max);
        let pools = self.registry.as_map().clone();
        let validated = validator.validate(batch_client, &filtered, &pools).await;

        let mut recomputed = Vec::with_capacity(validated.len());
        let mut newly_blacklisted: std::collections::HashSet<Path> = std::collections::HashSet::new();
        for (candidate, check) in &validated {
            if check.success {
                self.blacklist.record_success(&candidate.path);
                let wei_price = wei_price_for(candidate.path.start_token());
                if let Some(updated) = validator::recompute_from_onchain_gas(
                    candidate,
                    check,
                    wei_price,
                    &self.config.gas_levels,
                    &self.config.gas_multipliers,
                ) {
                    recomputed.push(updated);
                }
            } else if self.blacklist.record_failure(&candidate.path) {
                newly_blacklisted.insert(candidate.path.clone());
            }
        }

        if !newly_blacklisted.is_empty() {
            self.paths.retain(|p| !newly_blacklisted.contains(p));
            self.pool_path_index = PoolPathIndex::build(&self.paths);
            let removed = Arc::new(newly_blacklisted);
            for handle in workers {
                handle.broadcast(Command::RemovePaths(removed.clone())).await;
            }
        }

        let final_batch = crate::validator::filter_profitables(recomputed, self.config.gas_levels.max);
        if final_batch.is_empty() {
            return Ok(());
        }

        if self.config.dry_run {
            for candidate in &final_batch {
                info!(amount_in = %candidate.amount_in, net_profit = %candidate.net_profit, "dry run: would submit candidate");
            }
            return Ok(());
        }

        let results = submitter
            .submit_wave(
                &final_batch,
                &pools,
                submitter_chain,
                submitter_chain,
                &mut self.burners,
                &mut self.nonce,
                block_deadline,
                self.config.estimation_confirms,
            )
            .await;

        let native_usd = price_poller.native_usd().unwrap_or(Decimal::ZERO);
        for (candidate, result) in final_batch.iter().zip(&results) {
            match &result.outcome {
                Ok(hash) => {
                    self.tx_stats.submitted += 1;
                    self.tx_stats.native_profit += candidate.net_profit;
                    let profit_native = Decimal::from(candidate.net_profit.to::<u128>().min(u128::MAX)) / Decimal::from(1_000_000_000_000_000_000u64);
                    self.tx_stats.usd_profit += profit_native * native_usd;
                    self.pending_txs.push(*hash);
                    info!(tx = %hash, "wave submission accepted");
                }
                Err(err) => {
                    self.tx_stats.failed += 1;
                    warn!(error = %err, "wave submission rejected");
                }
            }
        }

        self.store.save(keys::TX_STATS, &self.tx_stats)?;

        Ok(())
    }

    /// Batch-fetch receipts for every still-outstanding submitted tx and
    /// fold the result into `tx_stats`, dropping reconciled hashes from
    /// `pending_txs`. A still-pending receipt is left in the list for the
    /// next tick.
    async fn reconcile_pending_txs(&mut self) {
        if self.pending_txs.is_empty() {
            return;
        }
        let receipts = match self.rpc.get_receipts(&self.pending_txs).await {
            Ok(r) => r,
            Err(err) => {
                warn!(error = %err, "failed to fetch receipts for pending transactions");
                return;
            }
        };

        let mut still_pending = Vec::new();
        for (hash, receipt) in self.pending_txs.iter().zip(&receipts) {
            match crate::rpc::get_tx_status(receipt.as_ref()) {
                crate::rpc::TxStatus::Pending => still_pending.push(*hash),
                crate::rpc::TxStatus::Confirmed => self.tx_stats.confirmed += 1,
                crate::rpc::TxStatus::Reverted | crate::rpc::TxStatus::NoOp => self.tx_stats.failed += 1,
            }
        }
        self.pending_txs = still_pending;
    }

    fn persist_all(&self) -> Result<(), BotError> {
        let pools: Vec<Pool> = self.registry.as_map().values().copied().collect();
        self.store.save(keys::POOLS, &pools)?;
        self.store.save(keys::POOL_NUMBERS, &self.known_counts)?;
        self.store.save(keys::LAST_BLOCK, &self.last_block)?;

        let (pre_blacklist, blacklisted) = self.blacklist.clone().into_parts();
        self.store.save(keys::PRE_BLACKLIST_PATHS, &pre_blacklist)?;
        self.store.save(keys::BLACKLIST_PATHS, &blacklisted)?;

        self.store.save(keys::BURNERS, &self.burners)?;
        self.store.save(keys::TX_STATS, &self.tx_stats)?;
        self.store.save(keys::BALANCE_STATS, &self.balance_stats)?;
        Ok(())
    }
}

/// Fee numerator assumed for a newly discovered pool whose factory has no
/// explicit `factories` entry in the network config: the standard 0.3%
/// Uniswap-V2-family swap fee.
fn default_fee_numerator(_config: &BotConfig) -> u16 {
    9_970
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_stats_defaults_to_zero() {
        let stats = TxStats::default();
        assert_eq!(stats.submitted, 0);
        assert_eq!(stats.confirmed, 0);
        assert_eq!(stats.failed, 0);
    }
}
