//! Submission pipeline: turn validated candidates into signed
//! transactions, clear them through a gas-estimation quorum, and
//! broadcast the ones that pass.
//!
//! A rejected candidate rolls its nonce back and releases any burners it
//! reserved, then the wave continues with the next candidate — only a
//! hard nonce conflict (the account's next nonce was consumed by
//! something outside this process) aborts the rest of the wave, since at
//! that point every remaining nonce in the wave is stale.
//!

use crate::burner::BurnerPool;
use crate::codec::{self, SwapLeg};
use crate::error::SubmissionError;
use crate::types::{ArbitrageCandidate, EstimationOutcome, NonceCounter, Pool};
use alloy::primitives::{Address, Bytes, TxHash, U256};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct TxParams {
    pub to: Address,
    pub data: Vec<u8>,
    pub gas_price: U256,
    pub nonce: u64,
    /// `⌈candidate.gas_limit * 1.2⌉`, carried on the envelope from the
    /// estimation-quorum call through to the signed broadcast transaction.
    pub gas_limit: u64,
}

/// `⌈gas_limit * 1.2⌉`, the safety margin the router's own gas estimate
/// doesn't account for (calldata decoding, the batch-checker-validated
/// path occasionally diverging slightly from the live one by the time it
/// lands).
pub fn envelope_gas_limit(gas_limit: u64) -> u64 {
    (gas_limit as f64 * 1.2).ceil() as u64
}

/// Fans a gas estimate out to the quorum (exactly the main and sync RPC
/// nodes — see the RPC fabric) and returns every outcome, success or
/// error, without waiting on stragglers beyond the quorum itself.
#[async_trait]
pub trait EstimationQuorum {
    async fn estimate_quorum(&self, tx: &TxParams) -> Vec<Result<u64, String>>;
}

/// Signs and races a raw transaction across every configured node.
#[async_trait]
pub trait TxBroadcaster {
    async fn sign(&self, tx: &TxParams, gas_limit: u64) -> Result<Bytes, SubmissionError>;
    async fn broadcast(&self, raw_tx: &Bytes) -> Result<TxHash, String>;
}

/// Below this gas estimate, the quorum considers the trade a no-op or
/// revert rather than a genuine profitable execution.
const MIN_VIABLE_GAS_ESTIMATE: u64 = 60_000;

/// `profitables`, `nonprofitables`, and `errors` each gate acceptance or
/// rejection once they individually reach `confirms` — whichever counter
/// gets there first decides the outcome; anything else is a mix.
///
/// `deadline_exceeded` is evaluated against the wall clock *after* the
/// quorum call returns: a wave that would otherwise clear `confirms`
/// profitable estimates but only does so once the block deadline has
/// already passed must not be accepted — it becomes `LateTransaction`
/// instead, per §4.7's "elapsed block-time <= final_tx deadline" clause.
fn classify(results: &[Result<u64, String>], confirms: u32, deadline_exceeded: bool) -> EstimationOutcome {
    let mut profitables = 0u32;
    let mut nonprofitables = 0u32;
    let mut errors = 0u32;
    let mut best_gas = 0u64;
    let mut last_error = String::new();

    for result in results {
        match result {
            Ok(gas) if *gas >= MIN_VIABLE_GAS_ESTIMATE => {
                profitables += 1;
                best_gas = best_gas.max(*gas);
            }
            Ok(_) => nonprofitables += 1,
            Err(e) => {
                errors += 1;
                last_error = e.clone();
            }
        }
    }

    if profitables >= confirms {
        if deadline_exceeded {
            EstimationOutcome::LateTransaction
        } else {
            EstimationOutcome::Accepted { gas_limit: best_gas }
        }
    } else if nonprofitables >= confirms {
        EstimationOutcome::NotProfitable
    } else if errors >= confirms {
        EstimationOutcome::QuorumErrored(last_error)
    } else {
        EstimationOutcome::MixedEstimation { profitables, nonprofitables, errors }
    }
}

fn is_nonce_race(err: &str) -> bool {
    let lower = err.to_lowercase();
    lower.contains("nonce too low") || lower.contains("already known") || lower.contains("underpriced")
}

#[derive(Debug)]
pub struct SubmissionResult {
    pub path_pools: Vec<Address>,
    pub outcome: Result<TxHash, SubmissionError>,
}

pub struct Submitter {
    pub router: Address,
}

impl Submitter {
    /// Process one wave of already-validated, pair-disjoint candidates in
    /// gas-price order. Returns one result per candidate the wave
    /// actually attempted (a hard nonce race stops the wave early, so the
    /// returned vec may be shorter than `candidates`).
    pub async fn submit_wave(
        &self,
        candidates: &[ArbitrageCandidate],
        pools: &HashMap<Address, Pool>,
        quorum: &impl EstimationQuorum,
        broadcaster: &impl TxBroadcaster,
        burners: &mut BurnerPool,
        nonce: &mut NonceCounter,
        block_deadline: Instant,
        confirms: u32,
    ) -> Vec<SubmissionResult> {
        let mut results = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            if Instant::now() >= block_deadline {
                results.push(SubmissionResult {
                    path_pools: candidate.pairs().collect(),
                    outcome: Err(SubmissionError::LateTransaction),
                });
                continue;
            }

            let taken_burners = if candidate.burner_count > 0 {
                burners.consume(candidate.burner_count)
            } else {
                Vec::new()
            };

            let Some(data) = encode_for_submission(candidate, pools, &taken_burners) else {
                burners.release(taken_burners);
                results.push(SubmissionResult {
                    path_pools: candidate.pairs().collect(),
                    outcome: Err(SubmissionError::NotProfitable),
                });
                continue;
            };

            let tx = TxParams {
                to: self.router,
                data,
                gas_price: candidate.gas_price,
                nonce: nonce.next(),
                gas_limit: envelope_gas_limit(candidate.gas_limit),
            };

            let estimates = quorum.estimate_quorum(&tx).await;
            let deadline_exceeded = Instant::now() >= block_deadline;
            match classify(&estimates, confirms, deadline_exceeded) {
                EstimationOutcome::Accepted { .. } => {
                    match broadcaster.sign(&tx, tx.gas_limit).await {
                        Ok(raw) => match broadcaster.broadcast(&raw).await {
                            Ok(hash) => {
                                info!(tx = %hash, "submitted arbitrage transaction");
                                results.push(SubmissionResult { path_pools: candidate.pairs().collect(), outcome: Ok(hash) });
                            }
                            Err(err) if is_nonce_race(&err) => {
                                warn!(error = %err, "nonce race detected, aborting remainder of wave");
                                nonce.rollback();
                                burners.release(taken_burners);
                                results.push(SubmissionResult {
                                    path_pools: candidate.pairs().collect(),
                                    outcome: Err(SubmissionError::NonceRace(err)),
                                });
                                break;
                            }
                            Err(err) => {
                                nonce.rollback();
                                burners.release(taken_burners);
                                results.push(SubmissionResult {
                                    path_pools: candidate.pairs().collect(),
                                    outcome: Err(SubmissionError::QuorumErrored(err)),
                                });
                            }
                        },
                        Err(err) => {
                            nonce.rollback();
                            burners.release(taken_burners);
                            results.push(SubmissionResult { path_pools: candidate.pairs().collect(), outcome: Err(err) });
                        }
                    }
                }
                EstimationOutcome::NotProfitable => {
                    nonce.rollback();
                    burners.release(taken_burners);
                    results.push(SubmissionResult { path_pools: candidate.pairs().collect(), outcome: Err(SubmissionError::NotProfitable) });
                }
                EstimationOutcome::MixedEstimation { profitables, nonprofitables, errors } => {
                    nonce.rollback();
                    burners.release(taken_burners);
                    warn!(profitables, nonprofitables, errors, "mixed gas estimation outcome, skipping candidate");
                    results.push(SubmissionResult { path_pools: candidate.pairs().collect(), outcome: Err(SubmissionError::MixedEstimation) });
                }
                EstimationOutcome::QuorumErrored(msg) => {
                    nonce.rollback();
                    burners.release(taken_burners);
                    results.push(SubmissionResult { path_pools: candidate.pairs().collect(), outcome: Err(SubmissionError::QuorumErrored(msg)) });
                }
                EstimationOutcome::LateTransaction => {
                    nonce.rollback();
                    burners.release(taken_burners);
                    results.push(SubmissionResult { path_pools: candidate.pairs().collect(), outcome: Err(SubmissionError::LateTransaction) });
                }
            }
        }

        results
    }
}

fn encode_for_submission(candidate: &ArbitrageCandidate, pools: &HashMap<Address, Pool>, burners: &[Address]) -> Option<Vec<u8>> {
    let mut legs = Vec::with_capacity(candidate.path.hops());
    for hop in 0..candidate.path.hops() {
        let pool = pools.get(&candidate.path.pool(hop))?;
        let token_in = candidate.path.token(hop);
        legs.push(SwapLeg { pair: pool.address, fee_numerator: pool.fee_numerator, is0_in: token_in == pool.token0 });
    }
    codec::encode_arb_args(&candidate.path, &legs, candidate.amount_in, candidate.tx_cost, burners).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_accepts_on_unanimous_quorum() {
        let results: Vec<Result<u64, String>> = vec![Ok(100_000), Ok(120_000)];
        assert!(matches!(classify(&results, 2, false), EstimationOutcome::Accepted { .. }));
    }

    #[test]
    fn classify_not_profitable_when_any_estimate_too_low() {
        let results: Vec<Result<u64, String>> = vec![Ok(100_000), Ok(10_000)];
        assert!(matches!(classify(&results, 2, false), EstimationOutcome::NotProfitable));
    }

    #[test]
    fn classify_errored_when_all_fail() {
        let results: Vec<Result<u64, String>> = vec![Err("timeout".into()), Err("timeout".into())];
        assert!(matches!(classify(&results, 2, false), EstimationOutcome::QuorumErrored(_)));
    }

    #[test]
    fn classify_mixed_on_single_error_single_profitable() {
        let results: Vec<Result<u64, String>> = vec![Ok(100_000), Err("timeout".into())];
        assert!(matches!(classify(&results, 2, false), EstimationOutcome::MixedEstimation { .. }));
    }

    #[test]
    fn classify_late_when_quorum_clears_after_deadline() {
        let results: Vec<Result<u64, String>> = vec![Ok(100_000), Ok(120_000)];
        assert!(matches!(classify(&results, 2, true), EstimationOutcome::LateTransaction));
    }

    #[test]
    fn envelope_gas_limit_applies_ceiling_multiplier() {
        assert_eq!(envelope_gas_limit(100_000), 120_000);
        assert_eq!(envelope_gas_limit(100_001), 120_002);
    }

    #[test]
    fn nonce_race_detection_is_case_insensitive() {
        assert!(is_nonce_race("Nonce Too Low"));
        assert!(is_nonce_race("transaction underpriced"));
        assert!(is_nonce_race("already known"));
        assert!(!is_nonce_race("execution reverted"));
    }
}
