//! Layered configuration: `.env` secrets, a per-network TOML file selected
//! by `-n/--network`, and CLI overrides on top, following the reference
//! implementation's `config_<network>.yaml` + `-n` argparse flag layering
//! (`utils/config.py`).
//!

use crate::error::ConfigError;
use crate::profitability::{GasPriceLevels, ProfitMultipliers};
use alloy::primitives::Address;
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Wraps a value that must never appear verbatim in logs. `Debug`/`Display`
/// both print a fixed redaction marker regardless of the wrapped value.
#[derive(Clone)]
pub struct Secret<T>(T);

impl<T> Secret<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl<T> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<redacted>")
    }
}

impl<T> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<redacted>")
    }
}

/// Network selector for `-n/--network`, mirroring the reference's
/// `-n {bsc,ganache,bsc_fork}` choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum Network {
    Bsc,
    Ganache,
    BscFork,
}

impl Network {
    pub fn config_file_name(self) -> &'static str {
        match self {
            Network::Bsc => "bsc.toml",
            Network::Ganache => "ganache.toml",
            Network::BscFork => "bsc_fork.toml",
        }
    }
}

/// CLI surface: required network selector plus operational overrides.
#[derive(Debug, Parser)]
#[command(name = "dexarb-core", about = "On-chain constant-product AMM arbitrage detector and executor")]
pub struct Cli {
    /// Network config file to load (selects `config/<network>.toml`).
    #[arg(short = 'n', long, value_enum)]
    pub network: Network,

    /// Skip submission; log candidates that would have been submitted.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Override the configured profitability worker count.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Override the configured persistence data directory.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Directory containing `<network>.toml` config files.
    #[arg(long, default_value = "config")]
    pub config_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct TransactionConfFile {
    max_delay_ms: u64,
    gas_limit_multiplier_pct: u32,
    min_profit_wei: String,
    final_tx_ms: u64,
    estimation_confirms: u32,
    receipt_timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct PollConfFile {
    main_node_ms: u64,
    sync_node_ms: u64,
    price_ms: u64,
}

#[derive(Debug, Deserialize)]
struct GasPriceTierFile {
    multiplier_bps: u16,
    threshold_gwei: u64,
}

#[derive(Debug, Deserialize)]
struct PriceConfFile {
    url: String,
    correction: String,
    low: GasPriceTierFile,
    mid: GasPriceTierFile,
    high: GasPriceTierFile,
    min_gas_gwei: u64,
    max_gas_gwei: u64,
}

#[derive(Debug, Deserialize)]
struct BurnerConfFile {
    enabled: bool,
    gas_price_gwei: u64,
}

#[derive(Debug, Deserialize)]
struct FilterConfFile {
    min_liquidity: HashMap<String, String>,
    min_liquidity_fallback: String,
    exclude_tail: usize,
}

#[derive(Debug, Deserialize)]
struct PathsConfFile {
    tokens: Vec<String>,
}

/// One entry of the "price pool" subset (§3's `Prices` table): a pool
/// pairing a non-weth entry token directly against a weth, read each
/// price-poll tick to derive that token's wei price straight from live
/// reserves rather than an external USD feed.
#[derive(Debug, Deserialize)]
struct PricePoolConfFile {
    pool: String,
    token: String,
    token_is_token0: bool,
}

#[derive(Debug, Deserialize)]
struct BatchCheckerConfFile {
    address: String,
    chunk_size: usize,
}

#[derive(Debug, Deserialize)]
struct MulticallConfFile {
    address: String,
    chunk_size: usize,
}

/// What a per-network TOML file deserializes into. Field names mirror the
/// reference YAML's top-level keys so an operator porting `config_bsc.yaml`
/// can translate it nearly verbatim.
#[derive(Debug, Deserialize)]
struct NetworkConfigFile {
    chain_id: u64,
    router: String,
    weths: Vec<String>,
    blacklist_threshold: u32,
    worker_count: usize,
    transaction: TransactionConfFile,
    poll: PollConfFile,
    price: PriceConfFile,
    burner: BurnerConfFile,
    filter: FilterConfFile,
    paths: PathsConfFile,
    #[serde(default)]
    price_pools: Vec<PricePoolConfFile>,
    multicall: MulticallConfFile,
    batch_checker: BatchCheckerConfFile,
    /// factory address -> fee source tag (`"fixed:<numerator>"`, `"pool"`, or a
    /// `0x`-prefixed fee-registry factory address).
    factories: HashMap<String, String>,
    min_gas_limits: HashMap<String, u64>,
}

fn parse_address(s: &str, field: &str) -> Result<Address, ConfigError> {
    Address::from_str(s).map_err(|e| ConfigError::Invalid {
        field: field.to_string(),
        reason: e.to_string(),
    })
}

fn parse_u256(s: &str, field: &str) -> Result<alloy::primitives::U256, ConfigError> {
    alloy::primitives::U256::from_str(s).map_err(|e| ConfigError::Invalid {
        field: field.to_string(),
        reason: e.to_string(),
    })
}

fn parse_decimal(s: &str, field: &str) -> Result<rust_decimal::Decimal, ConfigError> {
    s.parse().map_err(|_| ConfigError::Invalid {
        field: field.to_string(),
        reason: format!("not a valid decimal: {s}"),
    })
}

fn gwei_to_wei(gwei: u64) -> alloy::primitives::U256 {
    alloy::primitives::U256::from(gwei) * alloy::primitives::U256::from(1_000_000_000u64)
}

/// A price pool reference resolved from [`PricePoolConfFile`]: `token` is
/// whichever side of `pool` is paired against a weth, so the price poller
/// can read `token`'s wei price directly off that pool's own reserves.
#[derive(Debug, Clone, Copy)]
pub struct PricePoolRef {
    pub pool: Address,
    pub token: Address,
    pub token_is_token0: bool,
}

/// Fully validated runtime configuration, assembled from `.env` secrets, a
/// per-network TOML file, and CLI overrides.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub network: Network,
    pub chain_id: u64,
    pub private_key: Secret<String>,
    pub sync_node_url: Secret<String>,
    pub main_node_url: Secret<String>,
    pub other_node_urls: Vec<Secret<String>>,

    pub router: Address,
    pub multicall: Address,
    pub multicall_chunk_size: usize,
    pub batch_checker: Address,
    pub batch_checker_chunk_size: usize,
    pub factories: HashMap<Address, crate::types::FeeSource>,

    pub weths: Vec<Address>,
    pub path_entry_tokens: Vec<Address>,
    pub min_gas_limits: HashMap<usize, u64>,
    pub price_pools: Vec<PricePoolRef>,

    pub blacklist_threshold: u32,
    pub worker_count: usize,

    pub min_liquidity: HashMap<Address, alloy::primitives::U256>,
    pub min_liquidity_fallback: alloy::primitives::U256,
    pub exclude_tail: usize,

    pub gas_levels: GasPriceLevels,
    pub gas_multipliers: ProfitMultipliers,
    pub price_feed_url: Secret<String>,
    pub price_correction: rust_decimal::Decimal,
    pub price_poll_interval_ms: u64,
    pub sync_node_poll_interval_ms: u64,
    pub main_node_poll_interval_ms: u64,

    pub burner_enabled: bool,
    pub burner_gas_price: alloy::primitives::U256,

    pub min_profit: alloy::primitives::U256,
    pub gas_limit_multiplier_pct: u32,
    pub final_tx_deadline_ms: u64,
    pub estimation_confirms: u32,
    pub receipt_timeout_ms: u64,
    pub max_delay_ms: u64,

    pub dry_run: bool,
    pub data_dir: PathBuf,
}

impl BotConfig {
    /// `.env` secrets, then `<config_dir>/<network>.toml`, then CLI
    /// overrides — in that precedence order, matching the teacher's layering.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let private_key = require_env("PRIVATE_KEY")?;
        let sync_node_url = require_env("SYNC_NODE_URL")?;
        let main_node_url = require_env("MAIN_NODE_URL")?;
        let other_node_urls = std::env::var("OTHER_NODE_URLS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Secret::new(s.to_string()))
            .collect();

        let toml_path: PathBuf = cli.config_dir.join(cli.network.config_file_name());
        let file = Self::load_network_file(&toml_path)?;

        Self::from_parts(cli, file, private_key, sync_node_url, other_node_urls, main_node_url)
    }

    fn load_network_file(path: &Path) -> Result<NetworkConfigFile, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Toml {
            path: path.display().to_string(),
            source,
        })
    }

    fn from_parts(
        cli: &Cli,
        file: NetworkConfigFile,
        private_key: String,
        sync_node_url: String,
        other_node_urls: Vec<Secret<String>>,
        main_node_url: String,
    ) -> Result<Self, ConfigError> {
        let weths = file
            .weths
            .iter()
            .map(|s| parse_address(s, "weths"))
            .collect::<Result<Vec<_>, _>>()?;

        let path_entry_tokens = file
            .paths
            .tokens
            .iter()
            .map(|s| parse_address(s, "paths.tokens"))
            .collect::<Result<Vec<_>, _>>()?;

        let price_pools = file
            .price_pools
            .iter()
            .map(|p| {
                Ok(PricePoolRef {
                    pool: parse_address(&p.pool, "price_pools.pool")?,
                    token: parse_address(&p.token, "price_pools.token")?,
                    token_is_token0: p.token_is_token0,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let mut factories = HashMap::new();
        for (addr_str, tag) in &file.factories {
            let addr = parse_address(addr_str, "factories")?;
            let source = parse_fee_source(tag)?;
            factories.insert(addr, source);
        }

        let mut min_gas_limits = HashMap::new();
        for (hops_str, gas) in &file.min_gas_limits {
            let hops: usize = hops_str.parse().map_err(|_| ConfigError::Invalid {
                field: "min_gas_limits".into(),
                reason: format!("key {hops_str} is not a hop count"),
            })?;
            min_gas_limits.insert(hops, *gas);
        }

        let mut min_liquidity = HashMap::new();
        for (addr_str, amount_str) in &file.filter.min_liquidity {
            let addr = parse_address(addr_str, "filter.min_liquidity")?;
            let amount = parse_u256(amount_str, "filter.min_liquidity")?;
            min_liquidity.insert(addr, amount);
        }

        let gas_levels = GasPriceLevels {
            min: gwei_to_wei(file.price.min_gas_gwei),
            low: gwei_to_wei(file.price.low.threshold_gwei),
            mid: gwei_to_wei(file.price.mid.threshold_gwei),
            max: gwei_to_wei(file.price.max_gas_gwei),
        };
        let gas_multipliers = ProfitMultipliers {
            low: file.price.low.multiplier_bps,
            mid: file.price.mid.multiplier_bps,
            high: file.price.high.multiplier_bps,
        };

        let worker_count = cli.workers.unwrap_or(file.worker_count);
        let data_dir = cli.data_dir.clone().unwrap_or_else(|| PathBuf::from("data"));

        Ok(Self {
            network: cli.network,
            chain_id: file.chain_id,
            private_key: Secret::new(private_key),
            sync_node_url: Secret::new(sync_node_url),
            main_node_url: Secret::new(main_node_url),
            other_node_urls,

            router: parse_address(&file.router, "router")?,
            multicall: parse_address(&file.multicall.address, "multicall.address")?,
            multicall_chunk_size: file.multicall.chunk_size,
            batch_checker: parse_address(&file.batch_checker.address, "batch_checker.address")?,
            batch_checker_chunk_size: file.batch_checker.chunk_size,
            factories,

            weths,
            path_entry_tokens,
            min_gas_limits,
            price_pools,

            blacklist_threshold: file.blacklist_threshold,
            worker_count,

            min_liquidity,
            min_liquidity_fallback: parse_u256(&file.filter.min_liquidity_fallback, "filter.min_liquidity_fallback")?,
            exclude_tail: file.filter.exclude_tail,

            gas_levels,
            gas_multipliers,
            price_feed_url: Secret::new(file.price.url),
            price_correction: parse_decimal(&file.price.correction, "price.correction")?,
            price_poll_interval_ms: file.poll.price_ms,
            sync_node_poll_interval_ms: file.poll.sync_node_ms,
            main_node_poll_interval_ms: file.poll.main_node_ms,

            burner_enabled: file.burner.enabled,
            burner_gas_price: gwei_to_wei(file.burner.gas_price_gwei),

            min_profit: parse_u256(&file.transaction.min_profit_wei, "transaction.min_profit_wei")?,
            gas_limit_multiplier_pct: file.transaction.gas_limit_multiplier_pct,
            final_tx_deadline_ms: file.transaction.final_tx_ms,
            estimation_confirms: file.transaction.estimation_confirms,
            receipt_timeout_ms: file.transaction.receipt_timeout_ms,
            max_delay_ms: file.transaction.max_delay_ms,

            dry_run: cli.dry_run,
            data_dir,
        })
    }
}

fn parse_fee_source(tag: &str) -> Result<crate::types::FeeSource, ConfigError> {
    if tag == "pool" {
        return Ok(crate::types::FeeSource::ReadFromPool);
    }
    if let Some(numerator) = tag.strip_prefix("fixed:") {
        let n: u16 = numerator.parse().map_err(|_| ConfigError::Invalid {
            field: "factories".into(),
            reason: format!("invalid fixed fee numerator: {numerator}"),
        })?;
        return Ok(crate::types::FeeSource::Fixed(n));
    }
    if tag.starts_with("0x") {
        let addr = parse_address(tag, "factories")?;
        return Ok(crate::types::FeeSource::ReadFromFactory(addr));
    }
    Err(ConfigError::Invalid {
        field: "factories".into(),
        reason: format!("unrecognized fee_source tag: {tag}"),
    })
}

fn require_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnv(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_debug_and_display_never_reveal_value() {
        let secret = Secret::new("super-secret-key".to_string());
        assert_eq!(format!("{secret:?}"), "<redacted>");
        assert_eq!(format!("{secret}"), "<redacted>");
        assert_eq!(secret.expose(), "super-secret-key");
    }

    #[test]
    fn parse_fee_source_variants() {
        assert!(matches!(parse_fee_source("pool").unwrap(), crate::types::FeeSource::ReadFromPool));
        assert!(matches!(parse_fee_source("fixed:30").unwrap(), crate::types::FeeSource::Fixed(30)));
        assert!(matches!(
            parse_fee_source("0x0000000000000000000000000000000000000001").unwrap(),
            crate::types::FeeSource::ReadFromFactory(_)
        ));
        assert!(parse_fee_source("garbage").is_err());
    }

    #[test]
    fn load_network_file_parses_minimal_toml() {
        let dir = std::env::temp_dir().join(format!("dexarb-config-test-{:?}", std::thread::current().id()));
        std::fs::create_dir_all(&dir).unwrap();
        let toml_path = dir.join("bsc.toml");
        std::fs::write(
            &toml_path,
            r#"
chain_id = 56
router = "0x0000000000000000000000000000000000000001"
weths = ["0x0000000000000000000000000000000000000002"]
blacklist_threshold = 3
worker_count = 4

[transaction]
max_delay_ms = 3000
gas_limit_multiplier_pct = 120
min_profit_wei = "1000000000000000"
final_tx_ms = 2500
estimation_confirms = 2
receipt_timeout_ms = 15000

[poll]
main_node_ms = 200
sync_node_ms = 500
price_ms = 10000

[price]
url = "https://example.test/price"
correction = "1.0"
min_gas_gwei = 1
max_gas_gwei = 50

[price.low]
multiplier_bps = 3000
threshold_gwei = 5

[price.mid]
multiplier_bps = 5000
threshold_gwei = 10

[price.high]
multiplier_bps = 7000
threshold_gwei = 20

[burner]
enabled = false
gas_price_gwei = 3

[filter]
min_liquidity_fallback = "1000000000000000000"
exclude_tail = 5

[filter.min_liquidity]

[paths]
tokens = ["0x0000000000000000000000000000000000000002"]

[multicall]
address = "0x0000000000000000000000000000000000000003"
chunk_size = 500

[batch_checker]
address = "0x0000000000000000000000000000000000000004"
chunk_size = 50

[factories]

[min_gas_limits]
2 = 180000
3 = 240000
"#,
        )
        .unwrap();

        let file = BotConfig::load_network_file(&toml_path).unwrap();
        assert_eq!(file.chain_id, 56);
        assert_eq!(file.worker_count, 4);
        assert_eq!(file.min_gas_limits["2"], 180_000);

        std::fs::remove_dir_all(&dir).ok();
    }
}
