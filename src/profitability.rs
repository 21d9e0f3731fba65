//! Constant-product arbitrage math: virtual reserve reduction, optimal
//! input sizing, forward simulation, local refinement, and gas-price
//! escalation.
//!
//! All reserve/amount arithmetic is exact `U256` integer math — no
//! floating point, no arbitrary-precision decimals. Only the final
//! conversion between native-gas cost and arbitraged-token units crosses
//! into [`rust_decimal::Decimal`], since that conversion is a price ratio,
//! not a pool invariant.
//!

use crate::error::ArithmeticError;
use crate::types::{ArbitrageCandidate, Path, Pool};
use alloy::primitives::{Address, U256};
use rust_decimal::Decimal;
use std::collections::HashMap;

const FEE_DENOM: u64 = 10_000;

/// Floor integer square root via Newton's method.
pub fn isqrt(n: U256) -> U256 {
    if n.is_zero() {
        return U256::ZERO;
    }
    let mut x = n;
    let mut y = (x + U256::from(1)) >> 1;
    while y < x {
        x = y;
        y = (x + n / x) >> 1;
    }
    x
}

/// Reduce a multi-hop path to a single virtual two-sided pool: the reserve
/// facing the trade's input token and the reserve facing its output token.
///
/// Each hop after the first folds the running virtual reserves together
/// with the next pool's reserves using the same constant-product identity
/// a direct swap would use. Rounds to the nearest integer at every hop
/// (the fixed-width `U256` analogue of the floor division the contract
/// itself performs); unlike an arbitrary-precision accumulator this can't
/// defer rounding to the very end without risking overflow on longer paths.
pub fn virtual_reserves(
    pools: &HashMap<Address, Pool>,
    path: &Path,
) -> Result<(U256, U256), ArithmeticError> {
    let pool0 = pools
        .get(&path.pool(0))
        .ok_or(ArithmeticError::Infeasible)?;
    let mut virtual_in = pool0.reserve_of(path.token(0));
    let mut virtual_out = pool0.reserve_of(path.token(1));

    for hop in 1..path.hops() {
        let pool = pools
            .get(&path.pool(hop))
            .ok_or(ArithmeticError::Infeasible)?;
        let fee = U256::from(pool.fee_numerator);
        let reserve_in_b = pool.reserve_of(path.token(hop));
        let reserve_out_b = pool.reserve_of(path.token(hop + 1));

        let denom = U256::from(FEE_DENOM)
            .checked_mul(reserve_in_b)
            .and_then(|v| v.checked_add(fee.checked_mul(virtual_out)?))
            .ok_or(ArithmeticError::Overflow)?;
        if denom.is_zero() {
            return Err(ArithmeticError::Infeasible);
        }

        let new_in = U256::from(FEE_DENOM)
            .checked_mul(virtual_in)
            .and_then(|v| v.checked_mul(reserve_in_b))
            .ok_or(ArithmeticError::Overflow)?
            / denom;
        let new_out = fee
            .checked_mul(virtual_out)
            .and_then(|v| v.checked_mul(reserve_out_b))
            .ok_or(ArithmeticError::Overflow)?
            / denom;

        virtual_in = new_in;
        virtual_out = new_out;
    }

    Ok((virtual_in, virtual_out))
}

/// Profit-maximizing input amount for a two-sided constant-product pool:
/// `(sqrt(R_in * R_out * fee * 10_000) - R_in * 10_000) / fee`.
pub fn optimal_amount_in(
    reserve_in: U256,
    reserve_out: U256,
    fee_numerator: u16,
) -> Result<U256, ArithmeticError> {
    let fee = U256::from(fee_numerator);
    let radicand = reserve_in
        .checked_mul(reserve_out)
        .and_then(|v| v.checked_mul(fee))
        .and_then(|v| v.checked_mul(U256::from(FEE_DENOM)))
        .ok_or(ArithmeticError::Overflow)?;
    let root = isqrt(radicand);
    let subtrahend = reserve_in
        .checked_mul(U256::from(FEE_DENOM))
        .ok_or(ArithmeticError::Overflow)?;
    if root <= subtrahend {
        return Ok(U256::ZERO);
    }
    Ok((root - subtrahend) / fee)
}

/// Simulate `amount_in` through every hop of `path`, applying each pool's
/// fee. Returns [`ArithmeticError::Overflow`] if the trade would drain a
/// pool below its own reserve at any hop — the same 112-bit guard the
/// on-chain executor enforces.
pub fn path_amount_out(
    pools: &HashMap<Address, Pool>,
    path: &Path,
    mut amount_in: U256,
) -> Result<U256, ArithmeticError> {
    for hop in 0..path.hops() {
        let pool = pools
            .get(&path.pool(hop))
            .ok_or(ArithmeticError::Infeasible)?;
        let reserve_in = pool.reserve_of(path.token(hop));
        let reserve_out = pool.reserve_of(path.token(hop + 1));

        if amount_in > reserve_in {
            return Err(ArithmeticError::Overflow);
        }

        let amount_in_with_fee = amount_in
            .checked_mul(U256::from(pool.fee_numerator))
            .ok_or(ArithmeticError::Overflow)?;
        let denom = reserve_in
            .checked_mul(U256::from(FEE_DENOM))
            .and_then(|v| v.checked_add(amount_in_with_fee))
            .ok_or(ArithmeticError::Overflow)?;
        if denom.is_zero() {
            return Err(ArithmeticError::Infeasible);
        }
        let amount_out = amount_in_with_fee
            .checked_mul(reserve_out)
            .ok_or(ArithmeticError::Overflow)?
            / denom;

        if amount_out > reserve_out {
            return Err(ArithmeticError::Overflow);
        }
        amount_in = amount_out;
    }
    Ok(amount_in)
}

/// Scan a small neighborhood above `amount_in0` for a strictly better
/// input, stopping as soon as profit starts decreasing (the profit curve
/// is unimodal, so one strict decrease means we've passed the peak). Ties
/// do not count as an improvement and do not stop the scan.
pub fn tweak_amount_in(
    pools: &HashMap<Address, Pool>,
    path: &Path,
    amount_in0: U256,
    profit0: U256,
) -> (U256, U256, u32) {
    let mut best_in = amount_in0;
    let mut best_profit = profit0;
    let mut best_i = 0u32;

    for i in 1u32..=29 {
        let amount_in = round_div(amount_in0 * U256::from(100 + i), U256::from(100));
        let amount_out = match path_amount_out(pools, path, amount_in) {
            Ok(v) => v,
            Err(_) => break,
        };
        let profit = amount_out.saturating_sub(amount_in);

        if profit > best_profit {
            best_in = amount_in;
            best_profit = profit;
            best_i = i;
        } else if profit < best_profit {
            break;
        }
    }

    (best_in, best_profit, best_i)
}

/// Round `numerator / denominator` half-away-from-zero (all operands are
/// unsigned, so this is simply half-up).
fn round_div(numerator: U256, denominator: U256) -> U256 {
    let half = denominator / U256::from(2);
    (numerator + half) / denominator
}

/// Low/mid/high gas-price escalation tiers plus the floor/ceiling the
/// final chosen price is clamped to.
#[derive(Debug, Clone, Copy)]
pub struct GasPriceLevels {
    pub min: U256,
    pub low: U256,
    pub mid: U256,
    pub max: U256,
}

/// Profit-share multipliers applied at each escalation tier, expressed as
/// `numerator / 10_000` to stay in integer-friendly units.
#[derive(Debug, Clone, Copy)]
pub struct ProfitMultipliers {
    pub low: u16,
    pub mid: u16,
    pub high: u16,
}

/// `gas_price = (bruto_profit * multiplier_bps / 10_000) / (gas_usage * wei_price)`,
/// computed in the arbitraged token's own units so it can be compared
/// directly against `bruto_profit`.
fn optimal_gas_price(
    bruto_profit: U256,
    gas_usage: u64,
    wei_price: Decimal,
    multiplier_bps: u16,
) -> U256 {
    let share = Decimal::from(
        bruto_profit
            .checked_mul(U256::from(multiplier_bps))
            .map(|v| v / U256::from(FEE_DENOM))
            .unwrap_or(U256::ZERO)
            .to::<u128>(),
    );
    if wei_price.is_zero() || gas_usage == 0 {
        return U256::ZERO;
    }
    let denom = Decimal::from(gas_usage) * wei_price;
    if denom.is_zero() {
        return U256::ZERO;
    }
    let price = (share / denom).round();
    decimal_to_u256(price)
}

fn decimal_to_u256(d: Decimal) -> U256 {
    if d.is_sign_negative() || d.is_zero() {
        return U256::ZERO;
    }
    U256::from(d.trunc().to_string().parse::<u128>().unwrap_or(u128::MAX))
}

/// `gas_price * gas_limit`, converted from native wei into the
/// arbitraged-token's smallest unit via `wei_price`.
pub fn gas_cost(gas_price: U256, gas_usage: u64, wei_price: Decimal) -> U256 {
    let native_wei = gas_price.saturating_mul(U256::from(gas_usage));
    let native_wei_dec = Decimal::from(native_wei.to::<u128>().min(u128::MAX));
    decimal_to_u256((native_wei_dec * wei_price).round())
}

/// Cost and overhead of self-destructing burner helper contracts: each
/// additional burner reduces effective gas usage (via the selfdestruct
/// refund) at the cost of its own execution overhead, up to the point of
/// diminishing returns.
///
/// Gas constants: burn execution 6,114 + burner-address calldata 320 =
/// 6,434 gas per burner; selfdestruct refund nets a 17,566 gas reduction
/// per burner against the base call's gas usage. A final 1.2x safety
/// multiplier is applied once, after the loop converges.
pub fn burners_values(gas_usage: u64) -> (u32, u64) {
    const GAS_REDUCTION: u64 = 17_566;
    const BURN_COST: u64 = 6_434;

    let mut gas_usage = gas_usage;
    let mut total_gas = gas_usage;
    let mut count = 0u32;

    loop {
        total_gas += BURN_COST;
        let reduced = gas_usage.saturating_sub(GAS_REDUCTION);
        let new_gas_usage = reduced.max(total_gas / 2);

        if new_gas_usage >= gas_usage {
            break;
        }
        gas_usage = new_gas_usage;
        count += 1;
    }

    let final_gas = ((gas_usage as f64) * 1.2).round() as u64;
    (count, final_gas)
}

/// Economic cost of a burner wave: a fixed 36,930-gas-equivalent
/// allowance (distinct from the 6,434/17,566 gas-usage-reduction
/// constants above) times the configured burner gas price, converted into
/// the arbitraged token's units.
pub fn burners_cost(burner_count: u32, burner_gas_price: U256, wei_price: Decimal) -> U256 {
    const BURN_COST_ALLOWANCE: u64 = 36_930;
    if burner_count == 0 {
        return U256::ZERO;
    }
    let per_burner = U256::from(BURN_COST_ALLOWANCE).saturating_mul(burner_gas_price);
    let total_native = per_burner.saturating_mul(U256::from(burner_count));
    let total_dec = Decimal::from(total_native.to::<u128>().min(u128::MAX));
    decimal_to_u256((total_dec * wei_price).round())
}

/// Per-path configuration the profitability engine needs from the rest of
/// the bot: gas limits indexed by path length, the burner feature toggle,
/// and the escalation thresholds/multipliers.
pub struct ProfitabilityConfig {
    pub levels: GasPriceLevels,
    pub multipliers: ProfitMultipliers,
    pub min_profit: U256,
    pub burner_enabled: bool,
    pub burner_gas_price: U256,
}

/// Run the full per-path pipeline: virtual reserves, optimal input,
/// forward simulation (with a single overflow-triggered scale-down
/// retry), local refinement, gas accounting with escalation, and the
/// final profitability gate. Returns `None` if the path is not
/// profitable at any stage.
pub fn evaluate_path(
    pools: &HashMap<Address, Pool>,
    path: &Path,
    gas_limit: u64,
    wei_price: Decimal,
    cfg: &ProfitabilityConfig,
) -> Option<ArbitrageCandidate> {
    let (reserve_in, reserve_out) = virtual_reserves(pools, path).ok()?;
    if reserve_in >= reserve_out || reserve_in.is_zero() || reserve_out.is_zero() {
        return None;
    }

    let fee0 = pools.get(&path.pool(0))?.fee_numerator;
    let mut amount_in = optimal_amount_in(reserve_in, reserve_out, fee0).ok()?;
    if amount_in.is_zero() {
        return None;
    }

    let amount_out = match path_amount_out(pools, path, amount_in) {
        Ok(v) => v,
        Err(ArithmeticError::Overflow) => {
            amount_in = round_div(amount_in * U256::from(5), U256::from(6)); // //= 1.2
            path_amount_out(pools, path, amount_in).ok()?
        }
        Err(_) => return None,
    };

    let mut bruto_profit = amount_out.checked_sub(amount_in)?;
    if bruto_profit.is_zero() {
        return None;
    }

    let (tweaked_in, tweaked_profit, i) = tweak_amount_in(pools, path, amount_in, bruto_profit);
    if i > 0 {
        amount_in = tweaked_in;
        bruto_profit = tweaked_profit;
    }

    let (burner_count, gas_usage) = if cfg.burner_enabled {
        burners_values(gas_limit)
    } else {
        (0, gas_limit)
    };
    let burner_cost = burners_cost(burner_count, cfg.burner_gas_price, wei_price);
    if bruto_profit <= burner_cost {
        return None;
    }
    let profit_after_burners = bruto_profit - burner_cost;

    let mut gas_price = optimal_gas_price(
        profit_after_burners,
        gas_usage,
        wei_price,
        cfg.multipliers.low,
    );
    if gas_price < cfg.levels.min {
        return None;
    }
    if gas_price > cfg.levels.low {
        gas_price = optimal_gas_price(
            profit_after_burners,
            gas_usage,
            wei_price,
            cfg.multipliers.mid,
        );
    }
    if gas_price > cfg.levels.mid {
        gas_price = optimal_gas_price(
            profit_after_burners,
            gas_usage,
            wei_price,
            cfg.multipliers.high,
        );
    }
    let gas_price = gas_price.min(cfg.levels.max);

    let gas_cost_amt = gas_cost(gas_price, gas_usage, wei_price);
    let tx_cost = amount_in + gas_cost_amt + burner_cost;

    let net_profit = bruto_profit.checked_sub(gas_cost_amt)?.checked_sub(burner_cost)?;
    if net_profit.is_zero() {
        return None;
    }

    let wei_profit = decimal_to_u256(
        (Decimal::from(net_profit.to::<u128>().min(u128::MAX))
            / wei_price.max(Decimal::new(1, 18)))
        .floor(),
    );
    if wei_profit < cfg.min_profit {
        return None;
    }

    Some(ArbitrageCandidate {
        path: path.clone(),
        amount_in,
        gross_profit: bruto_profit,
        gas_price,
        gas_limit: gas_usage,
        burner_count,
        burner_cost,
        net_profit,
        tx_cost,
    })
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
            fee_source: crate::types::FeeSource::Fixed(30),
            fee_numerator: 9_970,
        }
    }

    #[test]
    fn isqrt_known_values() {
        assert_eq!(isqrt(U256::from(0)), U256::from(0));
        assert_eq!(isqrt(U256::from(1)), U256::from(1));
        assert_eq!(isqrt(U256::from(99)), U256::from(9));
        assert_eq!(isqrt(U256::from(100)), U256::from(10));
        assert_eq!(isqrt(U256::from(1_000_000u64)), U256::from(1000));
    }

    #[test]
    fn optimal_amount_in_is_positive_for_skewed_reserves() {
        let amount_in = optimal_amount_in(U256::from(1_000_000u64), U256::from(2_000_000u64), 9_970).unwrap();
        assert!(amount_in > U256::ZERO);
    }

    #[test]
    fn optimal_amount_in_zero_for_balanced_reserves() {
        // when reserve_in == reserve_out there is no edge to exploit via this pool alone
        let amount_in = optimal_amount_in(U256::from(1_000_000u64), U256::from(1_000_000u64), 9_970).unwrap();
        assert_eq!(amount_in, U256::ZERO);
    }

    #[test]
    fn virtual_reserves_two_hop_cycle() {
        let t0 = addr(1);
        let t1 = addr(2);
        let p0 = addr(10);
        let p1 = addr(11);
        let mut pools = HashMap::new();
        pools.insert(p0, pool(p0, t0, t1, 1_000_000, 1_100_000));
        pools.insert(p1, pool(p1, t1, t0, 1_000_000, 900_000));

        let path = Path::new(vec![t0, p0, t1, p1, t0]);
        let (r_in, r_out) = virtual_reserves(&pools, &path).unwrap();
        assert!(r_in > U256::ZERO);
        assert!(r_out > U256::ZERO);
    }

    #[test]
    fn path_amount_out_rejects_drain_beyond_reserves() {
        let t0 = addr(1);
        let t1 = addr(2);
        let p0 = addr(10);
        let mut pools = HashMap::new();
        pools.insert(p0, pool(p0, t0, t1, 1_000, 1_000));
        let path = Path::new(vec![t0, p0, t1]);

        let err = path_amount_out(&pools, &path, U256::from(2_000u64)).unwrap_err();
        assert!(matches!(err, ArithmeticError::Overflow));
    }

    #[test]
    fn burners_values_reduces_until_convergence() {
        let (count, gas) = burners_values(300_000);
        assert!(count > 0);
        assert!(gas > 0);
    }

    #[test]
    fn burners_values_never_increases_gas_usage() {
        let (_, gas) = burners_values(50_000);
        // final value includes the 1.2x safety multiplier, so it may exceed
        // the raw post-reduction usage but must still be a finite positive value
        assert!(gas > 0);
    }
}
