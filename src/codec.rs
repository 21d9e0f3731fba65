//! Address shifting and arbitrage calldata encode/decode.
//!
//! Byte layout mirrors the on-chain `ArbExecutor`/`BatchChecker` argument
//! format: a 1-byte selector identifying hop count and same/cross-token
//! shape, followed by fixed-width big-endian fields. All multi-byte numeric
//! fields are big-endian; addresses are "shifted" left by one bit before
//! being packed, freeing the low bit as a flag elsewhere in the contract's
//! storage layout.
//!

use crate::error::ArithmeticError;
use crate::types::Path;
use alloy::primitives::{Address, U256};

/// Shift an address left by one bit, producing a 21-byte big-endian value.
pub fn shift_address(addr: Address) -> [u8; 21] {
    let mut wide = [0u8; 32];
    wide[12..32].copy_from_slice(addr.as_slice());
    let value = U256::from_be_bytes(wide) << 1;
    let be = value.to_be_bytes::<32>();
    let mut out = [0u8; 21];
    out.copy_from_slice(&be[11..32]);
    out
}

/// Inverse of [`shift_address`]: shift right by one bit and recover the
/// 20-byte address.
pub fn unshift_address(shifted: &[u8]) -> Address {
    debug_assert_eq!(shifted.len(), 21);
    let mut wide = [0u8; 32];
    wide[11..32].copy_from_slice(shifted);
    let value = U256::from_be_bytes(wide) >> 1;
    let be = value.to_be_bytes::<32>();
    let mut out = [0u8; 20];
    out.copy_from_slice(&be[12..32]);
    Address::from(out)
}

/// A single pool leg within an encoded path: shifted pair address, fee
/// numerator, and which token enters the pool as `token0`.
#[derive(Debug, Clone, Copy)]
pub struct SwapLeg {
    pub pair: Address,
    pub fee_numerator: u16,
    pub is0_in: bool,
}

/// Decoded arbitrage calldata, selector-agnostic.
#[derive(Debug, Clone)]
pub struct DecodedArbArgs {
    pub selector: u8,
    pub legs: Vec<SwapLeg>,
    pub amount_in: u128,
    pub tx_cost: u128,
    pub token_in: Address,
    pub first_token_out: Address,
    pub token_out: Option<Address>,
    pub burners: Vec<Address>,
}

fn write_uint112(buf: &mut Vec<u8>, value: U256) -> Result<(), ArithmeticError> {
    let be = value.to_be_bytes::<32>();
    if be[0..18].iter().any(|b| *b != 0) {
        return Err(ArithmeticError::Overflow);
    }
    buf.extend_from_slice(&be[18..32]);
    Ok(())
}

fn read_uint112(bytes: &[u8]) -> u128 {
    debug_assert_eq!(bytes.len(), 14);
    let mut wide = [0u8; 16];
    wide[2..16].copy_from_slice(bytes);
    u128::from_be_bytes(wide)
}

/// Encode a path + per-pool pair of `(fee_numerator, is0_in)` + amounts into
/// `ArbExecutor` calldata (selectors `0x01`-`0x04`).
///
/// `legs.len()` must equal `path.hops()` (2 or 3).
pub fn encode_arb_args(
    path: &Path,
    legs: &[SwapLeg],
    amount_in: U256,
    tx_cost: U256,
    burners: &[Address],
) -> Result<Vec<u8>, ArithmeticError> {
    let hops = path.hops();
    debug_assert_eq!(legs.len(), hops);

    let token_in = path.start_token();
    let token_out = path.end_token();
    let first_token_out = path.token(1);
    let same = token_in == token_out;

    let selector: u8 = match (hops, same) {
        (2, true) => 0x01,
        (2, false) => 0x02,
        (3, true) => 0x03,
        (3, false) => 0x04,
        _ => return Err(ArithmeticError::Infeasible),
    };

    let mut out = Vec::with_capacity(128);
    out.push(selector);

    out.extend_from_slice(&shift_address(legs[0].pair));
    write_uint112(&mut out, amount_in)?;
    out.extend_from_slice(&legs[0].fee_numerator.to_be_bytes());
    out.push(if legs[0].is0_in { 0x01 } else { 0x00 });

    out.extend_from_slice(&shift_address(legs[1].pair));
    out.extend_from_slice(&legs[1].fee_numerator.to_be_bytes());
    out.push(if legs[1].is0_in { 0x01 } else { 0x00 });

    if hops == 3 {
        out.extend_from_slice(&shift_address(legs[2].pair));
        out.extend_from_slice(&legs[2].fee_numerator.to_be_bytes());
        out.push(if legs[2].is0_in { 0x01 } else { 0x00 });
    }

    write_uint112(&mut out, tx_cost)?;
    out.extend_from_slice(&shift_address(token_in));
    out.extend_from_slice(&shift_address(first_token_out));

    if !same {
        out.extend_from_slice(&shift_address(token_out));
    }

    if !burners.is_empty() {
        out.push(burners.len() as u8);
        for b in burners {
            out.extend_from_slice(b.as_slice());
        }
    }

    Ok(out)
}

/// Decode calldata produced by [`encode_arb_args`].
pub fn decode_arb_args(calldata: &[u8]) -> Option<DecodedArbArgs> {
    if calldata.is_empty() {
        return None;
    }
    let selector = calldata[0];
    let hops = match selector {
        0x01 | 0x02 => 2,
        0x03 | 0x04 => 3,
        _ => return None,
    };
    let cross = matches!(selector, 0x02 | 0x04);

    // Fixed offset after selector + leg0 + leg1 (+leg2 if 3-hop).
    let tail_start = 1 + 21 + 14 + 2 + 1 + 21 + 2 + 1 + if hops == 3 { 21 + 2 + 1 } else { 0 };

    if calldata.len() < tail_start + 14 + 21 + 21 {
        return None;
    }

    let amount_in = read_uint112(&calldata[22..36]);

    let leg0 = SwapLeg {
        pair: unshift_address(&calldata[1..22]),
        fee_numerator: u16::from_be_bytes([calldata[36], calldata[37]]),
        is0_in: calldata[38] != 0,
    };
    let leg1 = SwapLeg {
        pair: unshift_address(&calldata[39..60]),
        fee_numerator: u16::from_be_bytes([calldata[60], calldata[61]]),
        is0_in: calldata[62] != 0,
    };
    let mut legs = vec![leg0, leg1];
    if hops == 3 {
        legs.push(SwapLeg {
            pair: unshift_address(&calldata[63..84]),
            fee_numerator: u16::from_be_bytes([calldata[84], calldata[85]]),
            is0_in: calldata[86] != 0,
        });
    }

    let tx_cost = read_uint112(&calldata[tail_start..tail_start + 14]);
    let token_in = unshift_address(&calldata[tail_start + 14..tail_start + 35]);
    let first_token_out = unshift_address(&calldata[tail_start + 35..tail_start + 56]);

    let mut cursor = tail_start + 56;
    let token_out = if cross {
        if calldata.len() < cursor + 21 {
            return None;
        }
        let addr = unshift_address(&calldata[cursor..cursor + 21]);
        cursor += 21;
        Some(addr)
    } else {
        None
    };

    let burners_len = calldata.get(cursor).copied().unwrap_or(0) as usize;
    cursor += 1;
    let mut burners = Vec::with_capacity(burners_len);
    for i in 0..burners_len {
        let start = cursor + i * 20;
        if calldata.len() < start + 20 {
            break;
        }
        burners.push(Address::from_slice(&calldata[start..start + 20]));
    }

    Some(DecodedArbArgs {
        selector,
        legs,
        amount_in,
        tx_cost,
        token_in,
        first_token_out,
        token_out,
        burners,
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

    #[test]
    fn shift_unshift_round_trip() {
        let a = addr(0xAB);
        let shifted = shift_address(a);
        assert_eq!(shifted.len(), 21);
        assert_eq!(unshift_address(&shifted), a);
    }

    #[test]
    fn shift_preserves_high_bit_zero() {
        // Max 20-byte address still fits in 21 bytes after <<1.
        let max = Address::from([0xFFu8; 20]);
        let shifted = shift_address(max);
        assert_eq!(unshift_address(&shifted), max);
    }

    #[test]
    fn encode_decode_round_trip_same_token_2hop() {
        let t0 = addr(1);
        let p0 = addr(2);
        let t1 = addr(3);
        let p1 = addr(4);
        let path = Path::new(vec![t0, p0, t1, p1, t0]);
        let legs = vec![
            SwapLeg { pair: p0, fee_numerator: 30, is0_in: true },
            SwapLeg { pair: p1, fee_numerator: 25, is0_in: false },
        ];
        let encoded =
            encode_arb_args(&path, &legs, U256::from(1_000_000u64), U256::from(500u64), &[])
                .unwrap();
        assert_eq!(encoded[0], 0x01);

        let decoded = decode_arb_args(&encoded).unwrap();
        assert_eq!(decoded.selector, 0x01);
        assert_eq!(decoded.amount_in, 1_000_000u128);
        assert_eq!(decoded.tx_cost, 500u128);
        assert_eq!(decoded.token_in, t0);
        assert_eq!(decoded.first_token_out, t1);
        assert!(decoded.token_out.is_none());
        assert_eq!(decoded.legs[0].pair, p0);
        assert_eq!(decoded.legs[1].fee_numerator, 25);
        assert!(decoded.burners.is_empty());
    }

    #[test]
    fn encode_decode_round_trip_cross_token_3hop_with_burners() {
        let t0 = addr(1);
        let p0 = addr(2);
        let t1 = addr(3);
        let p1 = addr(4);
        let t2 = addr(5);
        let p2 = addr(6);
        let t3 = addr(7);
        let path = Path::new(vec![t0, p0, t1, p1, t2, p2, t3]);
        let legs = vec![
            SwapLeg { pair: p0, fee_numerator: 30, is0_in: true },
            SwapLeg { pair: p1, fee_numerator: 30, is0_in: false },
            SwapLeg { pair: p2, fee_numerator: 5, is0_in: true },
        ];
        let burners = vec![addr(8), addr(9)];
        let encoded = encode_arb_args(
            &path,
            &legs,
            U256::from(42u64),
            U256::from(7u64),
            &burners,
        )
        .unwrap();
        assert_eq!(encoded[0], 0x04);

        let decoded = decode_arb_args(&encoded).unwrap();
        assert_eq!(decoded.selector, 0x04);
        assert_eq!(decoded.legs.len(), 3);
        assert_eq!(decoded.token_out, Some(t3));
        assert_eq!(decoded.burners, burners);
    }

    #[test]
    fn encode_rejects_amount_exceeding_uint112() {
        let t0 = addr(1);
        let path = Path::new(vec![t0, addr(2), addr(3), addr(4), t0]);
        let legs = vec![
            SwapLeg { pair: addr(2), fee_numerator: 30, is0_in: true },
            SwapLeg { pair: addr(4), fee_numerator: 30, is0_in: false },
        ];
        let too_big = U256::from(1u64) << 120;
        let err = encode_arb_args(&path, &legs, too_big, U256::ZERO, &[]).unwrap_err();
        assert!(matches!(err, ArithmeticError::Overflow));
    }
}
