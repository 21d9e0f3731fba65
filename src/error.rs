//! Crate-level error taxonomy.
//!
//! Each subsystem gets its own `thiserror` variant set; `BotError` composes
//! them for the few call sites that cross subsystem boundaries. The binary
//! boundary (driver main loop) converts everything to `anyhow::Result`.

use alloy::primitives::Address;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("rpc call failed after exhausting retries: {0}")]
    Transient(String),

    #[error("multicall result length mismatch: expected {expected}, got {got}")]
    LengthMismatch { expected: usize, got: usize },

    #[error("pool {0} has invalid token addresses (zero address)")]
    InvalidPool(Address),
}

#[derive(Debug, Error)]
pub enum ArithmeticError {
    #[error("112-bit overflow during path simulation, even after scale-down retry")]
    Overflow,

    #[error("virtual reserves infeasible: R_in >= R_out or non-positive")]
    Infeasible,
}

#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error("batch checker rpc call failed: {0}")]
    Rpc(String),

    #[error("batch result length is not a multiple of 19 bytes (got {0})")]
    BadRecordLength(usize),

    #[error("batch result record count ({got}) does not match candidate count ({expected})")]
    RecordCountMismatch { expected: usize, got: usize },
}

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("transaction became late: block deadline elapsed while estimating gas")]
    LateTransaction,

    #[error("gas estimation quorum reported the trade as not profitable")]
    NotProfitable,

    #[error("gas estimation quorum produced a mixed outcome with no majority")]
    MixedEstimation,

    #[error("all quorum endpoints errored; last error: {0}")]
    QuorumErrored(String),

    #[error("nonce too low / already known / underpriced, resyncing next tick: {0}")]
    NonceRace(String),
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("endpoint {endpoint} timed out")]
    Timeout { endpoint: String },

    #[error("transport error from {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("no endpoints configured")]
    NoEndpoints,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse toml config {path}: {source}")]
    Toml {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("missing required environment variable {0}")]
    MissingEnv(String),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to (de)serialize {path}: {source}")]
    Serde {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum BurnerError {
    #[error("burner creation failed at factory {factory} from executor {executor}")]
    CreationFailed { factory: Address, executor: Address },
}

#[derive(Debug, Error)]
pub enum BotError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Arithmetic(#[from] ArithmeticError),

    #[error(transparent)]
    Validator(#[from] ValidatorError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Burner(#[from] BurnerError),

    #[error("invariant violated: {0}")]
    Invariant(String),
}
