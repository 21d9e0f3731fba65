//! Concurrency Fabric: a small pool of independent search workers that
//! share only explicitly broadcast pool/path snapshots and claim disjoint
//! slices of the path list through a single shared cursor.
//!
//! Workers do not share memory beyond what's broadcast to them — each
//! holds its own copy of the current pools and paths, updated only when
//! the driver pushes a new snapshot and acknowledged before the driver
//! proceeds. This models the same isolation a multi-process worker pool
//! would give, using a command channel and a completion acknowledgment
//! per worker instead of a shared-memory busy-wait barrier.
//!

use crate::profitability::ProfitabilityConfig;
use crate::types::{ArbitrageCandidate, Path, Pool};
use alloy::primitives::Address;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// A command broadcast to every worker. The driver waits for an ack from
/// each worker before considering the broadcast complete.
pub enum Command {
    UpdatePools(Arc<HashMap<Address, Pool>>),
    UpdatePaths(Arc<Vec<Path>>),
    RemovePaths(Arc<std::collections::HashSet<Path>>),
    Shutdown,
}

/// Cursor shared by all workers for claiming disjoint slices of the path
/// list on each search tick. `chunk_size` is fixed for the tick (computed
/// once from `workers_count` and path count), not re-derived per claim.
pub struct SharedCursor {
    next: AtomicUsize,
}

impl SharedCursor {
    pub fn new() -> Self {
        Self { next: AtomicUsize::new(0) }
    }

    pub fn reset(&self) {
        self.next.store(0, Ordering::SeqCst);
    }

    /// Atomically claim up to `chunk_size` indices in `[0, total)`.
    /// Returns `None` once the path list is exhausted for this tick.
    pub fn claim(&self, total: usize, chunk_size: usize) -> Option<(usize, usize)> {
        let start = self.next.fetch_add(chunk_size, Ordering::SeqCst);
        if start >= total {
            return None;
        }
        let end = (start + chunk_size).min(total);
        Some((start, end))
    }
}

impl Default for SharedCursor {
    fn default() -> Self {
        Self::new()
    }
}

pub fn chunk_size(total_paths: usize, workers: usize) -> usize {
    if workers == 0 || total_paths == 0 {
        return total_paths.max(1);
    }
    total_paths.div_ceil(workers)
}

/// A handle the driver uses to talk to one worker: send snapshot updates,
/// await their acknowledgment, and collect candidates.
pub struct WorkerHandle {
    cmd_tx: mpsc::Sender<(Command, oneshot::Sender<()>)>,
}

impl WorkerHandle {
    pub async fn broadcast(&self, command: Command) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.cmd_tx.send((command, ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }
}

/// Spawn `count` search workers, each running its own copy of the pool
/// table and path list and sharing `cursor` to claim disjoint slices on
/// every search tick signaled via `tick_rx`.
pub fn spawn_workers(
    count: usize,
    cursor: Arc<SharedCursor>,
    gas_limit_for: Arc<dyn Fn(usize) -> u64 + Send + Sync>,
    wei_price_for: Arc<dyn Fn(Address) -> Decimal + Send + Sync>,
    profitability_cfg: Arc<ProfitabilityConfig>,
    mut tick_rx: tokio::sync::broadcast::Receiver<usize>,
    results_tx: mpsc::Sender<ArbitrageCandidate>,
) -> Vec<WorkerHandle> {
    let mut handles = Vec::with_capacity(count);

    for _ in 0..count {
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<(Command, oneshot::Sender<()>)>(4);
        let mut tick_rx = tick_rx.resubscribe();
        let cursor = cursor.clone();
        let gas_limit_for = gas_limit_for.clone();
        let wei_price_for = wei_price_for.clone();
        let profitability_cfg = profitability_cfg.clone();
        let results_tx = results_tx.clone();

        tokio::spawn(async move {
            let mut pools: Arc<HashMap<Address, Pool>> = Arc::new(HashMap::new());
            let mut paths: Arc<Vec<Path>> = Arc::new(Vec::new());

            loop {
                tokio::select! {
                    cmd = cmd_rx.recv() => {
                        match cmd {
                            Some((Command::UpdatePools(p), ack)) => { pools = p; let _ = ack.send(()); }
                            Some((Command::UpdatePaths(p), ack)) => { paths = p; let _ = ack.send(()); }
                            Some((Command::RemovePaths(removed), ack)) => {
                                if !removed.is_empty() {
                                    let kept: Vec<Path> = paths.iter().filter(|p| !removed.contains(*p)).cloned().collect();
                                    paths = Arc::new(kept);
                                }
                                let _ = ack.send(());
                            }
                            Some((Command::Shutdown, ack)) => { let _ = ack.send(()); break; }
                            None => break,
                        }
                    }
                    tick = tick_rx.recv() => {
                        let Ok(chunk) = tick else { continue };
                        let Some((start, end)) = cursor.claim(paths.len(), chunk) else { continue };
                        for path in &paths[start..end] {
                            let hops = path.hops();
                            let gas_limit = gas_limit_for(hops);
                            let wei_price = wei_price_for(path.start_token());
                            if let Some(candidate) = crate::profitability::evaluate_path(&pools, path, gas_limit, wei_price, &profitability_cfg) {
                                let _ = results_tx.send(candidate).await;
                            }
                        }
                    }
                }
            }
        });

        handles.push(WorkerHandle { cmd_tx });
    }

    handles
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_claims_disjoint_ranges() {
        let cursor = SharedCursor::new();
        let total = 10;
        let size = 3;
        let mut claimed = Vec::new();
        while let Some(range) = cursor.claim(total, size) {
            claimed.push(range);
        }
        assert_eq!(claimed, vec![(0, 3), (3, 6), (6, 9), (9, 10)]);
    }

    #[test]
    fn chunk_size_splits_evenly_with_remainder() {
        assert_eq!(chunk_size(10, 3), 4);
        assert_eq!(chunk_size(9, 3), 3);
        assert_eq!(chunk_size(0, 3), 1);
    }
}
