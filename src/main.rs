//! Entry point: parse the CLI, load the layered config, stand up the RPC
//! fabric and price poller, bootstrap the driver from persisted state, and
//! run until SIGINT/SIGTERM.

use anyhow::{Context, Result};
use dexarb_core::chain::{ChainBatchChecker, ChainMulticall, ChainSubmitter};
use dexarb_core::config::{BotConfig, Cli};
use dexarb_core::driver::Driver;
use dexarb_core::prices::{HttpUsdPriceFeed, PricePoller};
use dexarb_core::rpc::{RpcEndpoint, RpcFabric};
use alloy::signers::local::PrivateKeySigner;
use clap::Parser;
use futures::stream::StreamExt;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string())))
        .with_target(true)
        .init();

    let cli = Cli::parse();
    let config = Arc::new(BotConfig::load(&cli).context("failed to load configuration")?);
    info!(network = ?config.network, dry_run = config.dry_run, "configuration loaded");

    let rpc = Arc::new(RpcFabric::new(
        RpcEndpoint::new("sync", config.sync_node_url.expose().clone(), Duration::from_millis(config.sync_node_poll_interval_ms)),
        RpcEndpoint::new("main", config.main_node_url.expose().clone(), Duration::from_millis(config.main_node_poll_interval_ms)),
        config
            .other_node_urls
            .iter()
            .enumerate()
            .map(|(i, url)| RpcEndpoint::new(format!("other-{i}"), url.expose().clone(), Duration::from_millis(config.main_node_poll_interval_ms)))
            .collect(),
    ));

    let signer: PrivateKeySigner = config
        .private_key
        .expose()
        .parse()
        .context("PRIVATE_KEY is not a valid secp256k1 private key")?;

    let multicall = ChainMulticall { rpc: rpc.clone(), multicall: config.multicall, chunk_size: config.multicall_chunk_size };
    let batch_client = ChainBatchChecker { rpc: rpc.clone(), batch_checker: config.batch_checker };
    let submitter_chain = ChainSubmitter { rpc: rpc.clone(), signer, chain_id: config.chain_id };

    let price_poller = Arc::new(PricePoller::new());
    let usd_feed = HttpUsdPriceFeed::new(config.price_feed_url.expose().clone());
    let price_poller_task = price_poller.clone();
    let price_rpc = rpc.clone();
    let price_multicall = ChainMulticall { rpc: rpc.clone(), multicall: config.multicall, chunk_size: config.multicall_chunk_size };
    let price_pools = config.price_pools.clone();
    let (price_shutdown_tx, price_shutdown_rx) = watch::channel(false);
    // The poller's own derived gas-price levels are a live supplementary
    // read (surfaced via `PricePoller::gas_levels`); the profitability
    // pipeline itself runs off the static thresholds in the network
    // config, so no scaling beyond "use the freshly polled price as-is"
    // is needed here.
    let unscaled = rust_decimal::Decimal::ONE;
    let price_poll_interval = Duration::from_millis(config.price_poll_interval_ms);
    tokio::spawn(async move {
        price_poller_task
            .run(
                price_rpc,
                usd_feed,
                &price_multicall,
                &price_pools,
                price_poll_interval,
                unscaled,
                unscaled,
                unscaled,
                unscaled,
                price_shutdown_rx,
            )
            .await;
    });

    let data_dir = config.data_dir.clone();
    dexarb_core::persistence::ensure_dir(&data_dir).context("failed to create data directory")?;
    let uptime_marker = dexarb_core::persistence::UptimeMarker::new(data_dir.join("uptime.txt"));
    uptime_marker.write_now().context("failed to write uptime marker")?;

    let driver = Driver::bootstrap(config.clone(), rpc.clone(), &multicall)
        .await
        .context("driver bootstrap failed")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut signals = Signals::new(&[SIGINT, SIGTERM]).context("failed to install signal handlers")?;
    let signals_handle = signals.handle();
    let signal_task = tokio::spawn(async move {
        if let Some(signal) = signals.next().await {
            info!(signal, "shutdown signal received, flushing state");
            let _ = shutdown_tx.send(true);
        }
    });

    let run_result = driver.run(multicall, batch_client, submitter_chain, price_poller, shutdown_rx).await;
    let _ = price_shutdown_tx.send(true);
    signals_handle.close();
    signal_task.abort();

    match run_result {
        Ok(()) => {
            info!("shutdown complete");
            Ok(())
        }
        Err(err) => {
            error!(error = %err, "driver exited with a fatal error");
            Err(err.into())
        }
    }
}
