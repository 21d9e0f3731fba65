//! Batch on-chain re-validation of candidates the profitability engine
//! produced from (possibly stale) in-memory reserves, plus the filter
//! stage that turns validated results into a submittable, pair-disjoint
//! batch.
//!

use crate::codec::{self, SwapLeg};
use crate::error::ValidatorError;
use crate::profitability::{self, GasPriceLevels, ProfitMultipliers};
use crate::types::{ArbitrageCandidate, BatchCheckResult, Pool};
use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// What the validator needs from the chain: a single `checkArbs` call.
/// Implemented by the RPC fabric; mocked directly in tests.
#[async_trait]
pub trait BatchChecker {
    async fn check_arbs(&self, router: Address, args: Vec<Vec<u8>>) -> Result<Vec<u8>, ValidatorError>;
}

pub struct BatchValidator {
    pub chunk_size: usize,
    pub router: Address,
}

impl BatchValidator {
    /// Re-check every candidate on chain, halving the batch and retrying
    /// on RPC failure until individual calls either succeed or are
    /// recorded as a hard failure sentinel.
    pub async fn validate(
        &self,
        client: &impl BatchChecker,
        candidates: &[ArbitrageCandidate],
        pools: &HashMap<Address, Pool>,
    ) -> Vec<(ArbitrageCandidate, BatchCheckResult)> {
        let mut out = Vec::with_capacity(candidates.len());
        for chunk in candidates.chunks(self.chunk_size.max(1)) {
            let results = self.check_chunk(client, chunk, pools).await;
            out.extend(chunk.iter().cloned().zip(results));
        }
        out
    }

    async fn check_chunk(
        &self,
        client: &impl BatchChecker,
        chunk: &[ArbitrageCandidate],
        pools: &HashMap<Address, Pool>,
    ) -> Vec<BatchCheckResult> {
        let args: Vec<Vec<u8>> = match chunk
            .iter()
            .map(|c| encode_candidate(c, pools))
            .collect::<Option<Vec<_>>>()
        {
            Some(a) => a,
            None => return vec![BatchCheckResult { success: false, profit: U256::ZERO, gas: 0 }; chunk.len()],
        };

        match client.check_arbs(self.router, args).await {
            Ok(raw) => match decode_batch_results(&raw) {
                Ok(records) if records.len() == chunk.len() => {
                    for (candidate, record) in chunk.iter().zip(&records) {
                        if !record.success && record.gas != 0 {
                            warn!(
                                path = ?candidate.path.tokens().collect::<Vec<_>>(),
                                gas = record.gas,
                                "batch checker reported a revert with nonzero gas usage"
                            );
                        }
                    }
                    records
                }
                _ => vec![BatchCheckResult { success: false, profit: U256::ZERO, gas: 0 }; chunk.len()],
            },
            Err(err) => {
                if chunk.len() == 1 {
                    warn!(error = %err, "batch checker call failed for single candidate, marking as failed");
                    vec![BatchCheckResult { success: false, profit: U256::ZERO, gas: 0 }]
                } else {
                    warn!(error = %err, size = chunk.len(), "batch checker call failed, halving batch and retrying");
                    let mid = chunk.len() / 2;
                    let (a, b) = chunk.split_at(mid);
                    let mut results = Box::pin(self.check_chunk(client, a, pools)).await;
                    results.extend(Box::pin(self.check_chunk(client, b, pools)).await);
                    results
                }
            }
        }
    }
}

fn encode_candidate(candidate: &ArbitrageCandidate, pools: &HashMap<Address, Pool>) -> Option<Vec<u8>> {
    let mut legs = Vec::with_capacity(candidate.path.hops());
    for hop in 0..candidate.path.hops() {
        let pool = pools.get(&candidate.path.pool(hop))?;
        let token_in = candidate.path.token(hop);
        legs.push(SwapLeg {
            pair: pool.address,
            fee_numerator: pool.fee_numerator,
            is0_in: token_in == pool.token0,
        });
    }
    codec::encode_arb_args(&candidate.path, &legs, candidate.amount_in, candidate.tx_cost, &[]).ok()
}

/// Decode a `BatchChecker.checkArbs` return value: a flat buffer of
/// 19-byte records (`status(1) || profit(14) || gas(4)`, all big-endian).
pub fn decode_batch_results(raw: &[u8]) -> Result<Vec<BatchCheckResult>, ValidatorError> {
    if raw.len() % 19 != 0 {
        return Err(ValidatorError::BadRecordLength(raw.len()));
    }
    Ok(raw
        .chunks_exact(19)
        .map(|record| {
            let success = record[0] != 0;
            let mut profit_bytes = [0u8; 32];
            profit_bytes[18..32].copy_from_slice(&record[1..15]);
            let profit = U256::from_be_bytes(profit_bytes);
            let gas = u32::from_be_bytes([record[15], record[16], record[17], record[18]]);
            BatchCheckResult { success, profit, gas }
        })
        .collect())
}

/// Fixed overhead the on-chain call adds on top of the validator's own
/// gas usage estimate (calldata dispatch + router call framing).
const ON_CHAIN_GAS_OVERHEAD: u64 = 23_640;

/// Recompute a candidate's gas accounting from an on-chain gas
/// measurement, re-running the same low/mid/high escalation the
/// profitability engine used so validated candidates stay internally
/// consistent with freshly-detected ones (including the `min_gas_price`
/// floor, applied here as well as in detection).
pub fn recompute_from_onchain_gas(
    candidate: &ArbitrageCandidate,
    check: &BatchCheckResult,
    wei_price: Decimal,
    levels: &GasPriceLevels,
    multipliers: &ProfitMultipliers,
) -> Option<ArbitrageCandidate> {
    if !check.success || check.profit.is_zero() {
        return None;
    }
    let gas_usage = check.gas as u64 + ON_CHAIN_GAS_OVERHEAD;
    let bruto_profit = check.profit;

    if bruto_profit <= candidate.burner_cost {
        return None;
    }
    let profit_after_burners = bruto_profit - candidate.burner_cost;

    let gas_price = optimal_gas_price_escalated(profit_after_burners, gas_usage, wei_price, multipliers, levels)?;

    let gas_cost_amt = profitability::gas_cost(gas_price, gas_usage, wei_price);
    let net_profit = bruto_profit.checked_sub(gas_cost_amt)?.checked_sub(candidate.burner_cost)?;
    if net_profit.is_zero() {
        return None;
    }

    Some(ArbitrageCandidate {
        path: candidate.path.clone(),
        amount_in: candidate.amount_in,
        gross_profit: bruto_profit,
        gas_price,
        gas_limit: gas_usage,
        burner_count: candidate.burner_count,
        burner_cost: candidate.burner_cost,
        net_profit,
        tx_cost: candidate.amount_in + gas_cost_amt + candidate.burner_cost,
    })
}

fn optimal_gas_price_escalated(
    profit_after_burners: U256,
    gas_usage: u64,
    wei_price: Decimal,
    multipliers: &ProfitMultipliers,
    levels: &GasPriceLevels,
) -> Option<U256> {
    let low = profitability_optimal(profit_after_burners, gas_usage, wei_price, multipliers.low);
    if low < levels.min {
        return None;
    }
    let mut price = low;
    if price > levels.low {
        price = profitability_optimal(profit_after_burners, gas_usage, wei_price, multipliers.mid);
    }
    if price > levels.mid {
        price = profitability_optimal(profit_after_burners, gas_usage, wei_price, multipliers.high);
    }
    Some(price.min(levels.max))
}

fn profitability_optimal(bruto_profit: U256, gas_usage: u64, wei_price: Decimal, multiplier_bps: u16) -> U256 {
    // Mirrors profitability::evaluate_path's private optimal_gas_price,
    // re-exposed here since both the detector and the validator need it.
    if gas_usage == 0 || wei_price.is_zero() {
        return U256::ZERO;
    }
    let share = bruto_profit.saturating_mul(U256::from(multiplier_bps)) / U256::from(10_000u64);
    let share_dec = Decimal::from(share.to::<u128>().min(u128::MAX));
    let denom = Decimal::from(gas_usage) * wei_price;
    if denom.is_zero() {
        return U256::ZERO;
    }
    let price = (share_dec / denom).round();
    if price.is_sign_negative() {
        return U256::ZERO;
    }
    U256::from(price.trunc().to_string().parse::<u128>().unwrap_or(u128::MAX))
}

/// Sort by gas price descending, then keep only candidates whose pool set
/// is entirely disjoint from every candidate already accepted (so no two
/// submitted transactions race for the same pool's state), dropping
/// anything above `max_gas_price` along the way.
pub fn filter_profitables(
    mut candidates: Vec<ArbitrageCandidate>,
    max_gas_price: U256,
) -> Vec<ArbitrageCandidate> {
    candidates.sort_unstable_by(|a, b| b.gas_price.cmp(&a.gas_price));

    let mut accepted = Vec::with_capacity(candidates.len());
    let mut all_pairs: HashSet<Address> = HashSet::new();

    for candidate in candidates {
        if candidate.gas_price > max_gas_price {
            warn!(gas_price = %candidate.gas_price, "dropping candidate above max gas price");
            continue;
        }
        let pairs: Vec<Address> = candidate.pairs().collect();
        if pairs.iter().any(|p| all_pairs.contains(p)) {
            continue;
        }
        all_pairs.extend(pairs);
        accepted.push(candidate);
    }

    accepted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_batch_results_parses_fixed_width_records() {
        let mut raw = Vec::new();
        raw.push(1u8);
        raw.extend_from_slice(&[0u8; 13]);
        raw.push(0x05);
        raw.extend_from_slice(&1000u32.to_be_bytes());
        raw.push(0u8);
        raw.extend_from_slice(&[0u8; 14]);
        raw.extend_from_slice(&0u32.to_be_bytes());

        let results = decode_batch_results(&raw).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].success);
        assert_eq!(results[0].profit, U256::from(5u64));
        assert_eq!(results[0].gas, 1000);
        assert!(!results[1].success);
    }

    #[test]
    fn decode_batch_results_rejects_bad_length() {
        let err = decode_batch_results(&[0u8; 20]).unwrap_err();
        assert!(matches!(err, ValidatorError::BadRecordLength(20)));
    }

    fn addr(byte: u8) -> Address {
        let mut bytes = [0u8; 20];
        bytes[19] = byte;
        Address::from(bytes)
    }

    fn candidate(path: crate::types::Path, gas_price: u64, pools: Vec<Address>) -> ArbitrageCandidate {
        let _ = pools;
        ArbitrageCandidate {
            path,
            amount_in: U256::from(1u64),
            gross_profit: U256::from(10u64),
            gas_price: U256::from(gas_price),
            gas_limit: 100_000,
            burner_count: 0,
            burner_cost: U256::ZERO,
            net_profit: U256::from(5u64),
            tx_cost: U256::from(6u64),
        }
    }

    #[test]
    fn filter_profitables_drops_pair_conflicts_keeping_higher_gas_price() {
        let t0 = addr(1);
        let p0 = addr(10);
        let p1 = addr(11);
        let path_a = crate::types::Path::new(vec![t0, p0, addr(2), p1, t0]);
        let path_b = crate::types::Path::new(vec![t0, p0, addr(3), addr(12), t0]);

        let high = candidate(path_a, 100, vec![p0, p1]);
        let low = candidate(path_b, 50, vec![p0, addr(12)]);

        let accepted = filter_profitables(vec![low, high], U256::from(1_000u64));
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].gas_price, U256::from(100u64));
    }

    #[test]
    fn filter_profitables_drops_above_max_gas_price() {
        let t0 = addr(1);
        let path = crate::types::Path::new(vec![t0, addr(10), addr(2), addr(11), t0]);
        let c = candidate(path, 500, vec![]);
        let accepted = filter_profitables(vec![c], U256::from(100u64));
        assert!(accepted.is_empty());
    }
}
