//! Binds the RPC fabric and the on-chain contract definitions together
//! behind the trait boundaries the rest of the crate depends on:
//! [`MulticallClient`], [`BatchChecker`], [`GasPriceSource`],
//! [`EstimationQuorum`], and [`TxBroadcaster`]. Everything above this
//! module works against those traits and is therefore testable without a
//! live node; this module is the only place that actually encodes and
//! decodes Solidity calldata.
//!

use crate::contracts::{IFeeFactory, IMulticall2, IUniswapV2Factory, IUniswapV2Pair};
use crate::error::{RegistryError, RpcError, SubmissionError, ValidatorError};
use crate::prices::GasPriceSource;
use crate::registry::MulticallClient;
use crate::rpc::RpcFabric;
use crate::submission::{EstimationQuorum, TxBroadcaster, TxParams};
use crate::types::FeeSource;
use crate::validator::BatchChecker as BatchCheckerTrait;
use alloy::consensus::{SignableTransaction, Signed, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSigner;
use alloy::primitives::{Address, Bytes, TxHash, TxKind, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Adapts [`RpcFabric`] + the on-chain fee-registry factory address per
/// `factory:X` pool into concrete multicall reads for the Pool Registry.
pub struct ChainMulticall {
    pub rpc: Arc<RpcFabric>,
    pub multicall: Address,
    /// Calls are pre-chunked to this size before the halve-and-retry logic
    /// takes over, so a single healthy batch never exceeds what a node's
    /// `eth_call` gas limit will tolerate.
    pub chunk_size: usize,
}

fn encode_call<C: SolCall>(call: C) -> Bytes {
    Bytes::from(call.abi_encode())
}

impl ChainMulticall {
    /// `Multicall2.tryAggregate(false, calls)`, halving the batch and
    /// retrying on RPC failure down to a single call, matching §4.1's
    /// failure semantics. A still-failing single call is returned as an
    /// unsuccessful `Result` entry rather than propagated, so the caller
    /// can treat it as a non-fatal skip.
    async fn try_aggregate(&self, calls: Vec<(Address, Bytes)>) -> Vec<(bool, Bytes)> {
        if calls.is_empty() {
            return Vec::new();
        }
        if self.chunk_size > 0 && calls.len() > self.chunk_size {
            let mut out = Vec::with_capacity(calls.len());
            for chunk in calls.chunks(self.chunk_size) {
                out.extend(Box::pin(self.try_aggregate(chunk.to_vec())).await);
            }
            return out;
        }
        if calls.len() == 1 {
            return match self.call_one(&calls[0]).await {
                Ok(result) => vec![result],
                Err(_) => vec![(false, Bytes::new())],
            };
        }
        match self.call_batch(&calls).await {
            Ok(results) if results.len() == calls.len() => results,
            _ => {
                warn!(size = calls.len(), "multicall batch failed or mismatched length, halving and retrying");
                let mid = calls.len() / 2;
                let (a, b) = calls.split_at(mid);
                let mut out = Box::pin(self.try_aggregate(a.to_vec())).await;
                out.extend(Box::pin(self.try_aggregate(b.to_vec())).await);
                out
            }
        }
    }

    async fn call_batch(&self, calls: &[(Address, Bytes)]) -> Result<Vec<(bool, Bytes)>, RpcError> {
        let sol_calls: Vec<IMulticall2::Call> = calls
            .iter()
            .map(|(target, call_data)| IMulticall2::Call { target: *target, callData: call_data.clone() })
            .collect();
        let call = IMulticall2::tryAggregateCall { requireSuccess: false, calls: sol_calls };
        let raw = self.rpc.eth_call(self.multicall, call.abi_encode()).await?;
        let decoded = IMulticall2::tryAggregateCall::abi_decode_returns(&raw)
            .map_err(|e| RpcError::Transport { endpoint: "multicall".into(), source: anyhow::anyhow!(e) })?;
        Ok(decoded.returnData.into_iter().map(|r| (r.success, r.returnData)).collect())
    }

    async fn call_one(&self, call: &(Address, Bytes)) -> Result<(bool, Bytes), RpcError> {
        match self.rpc.eth_call(call.0, call.1.to_vec()).await {
            Ok(data) => Ok((true, data)),
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl MulticallClient for ChainMulticall {
    async fn pool_counts(&self, factories: &[Address]) -> Result<Vec<U256>, RegistryError> {
        let calls: Vec<(Address, Bytes)> = factories
            .iter()
            .map(|f| (*f, encode_call(IUniswapV2Factory::allPairsLengthCall {})))
            .collect();
        let results = self.try_aggregate(calls).await;
        Ok(results
            .into_iter()
            .map(|(ok, data)| {
                if !ok {
                    return U256::ZERO;
                }
                IUniswapV2Factory::allPairsLengthCall::abi_decode_returns(&data)
                    .map(|r| r.pair)
                    .unwrap_or(U256::ZERO)
            })
            .collect())
    }

    async fn pool_addresses(&self, factory: Address, start: U256, count: U256) -> Result<Vec<Address>, RegistryError> {
        let count_usize: usize = count.try_into().map_err(|_| RegistryError::LengthMismatch { expected: 0, got: 0 })?;
        let start_u64: u64 = start.try_into().map_err(|_| RegistryError::LengthMismatch { expected: 0, got: 0 })?;
        let calls: Vec<(Address, Bytes)> = (0..count_usize)
            .map(|i| (factory, encode_call(IUniswapV2Factory::allPairsCall { _0: U256::from(start_u64 + i as u64) })))
            .collect();
        let results = self.try_aggregate(calls).await;
        Ok(results
            .into_iter()
            .map(|(ok, data)| {
                if !ok {
                    return Address::ZERO;
                }
                IUniswapV2Factory::allPairsCall::abi_decode_returns(&data)
                    .map(|r| r.pair)
                    .unwrap_or(Address::ZERO)
            })
            .collect())
    }

    async fn pool_tokens(&self, pools: &[Address]) -> Result<Vec<(Address, Address)>, RegistryError> {
        let calls: Vec<(Address, Bytes)> = pools
            .iter()
            .flat_map(|p| {
                [
                    (*p, encode_call(IUniswapV2Pair::token0Call {})),
                    (*p, encode_call(IUniswapV2Pair::token1Call {})),
                ]
            })
            .collect();
        let results = self.try_aggregate(calls).await;
        Ok(results
            .chunks(2)
            .map(|pair| {
                let t0 = pair
                    .first()
                    .filter(|(ok, _)| *ok)
                    .and_then(|(_, d)| IUniswapV2Pair::token0Call::abi_decode_returns(d).ok())
                    .map(|r| r._0)
                    .unwrap_or(Address::ZERO);
                let t1 = pair
                    .get(1)
                    .filter(|(ok, _)| *ok)
                    .and_then(|(_, d)| IUniswapV2Pair::token1Call::abi_decode_returns(d).ok())
                    .map(|r| r._0)
                    .unwrap_or(Address::ZERO);
                (t0, t1)
            })
            .collect())
    }

    async fn pool_reserves(&self, pools: &[Address]) -> Result<Vec<(U256, U256)>, RegistryError> {
        let calls: Vec<(Address, Bytes)> = pools
            .iter()
            .map(|p| (*p, encode_call(IUniswapV2Pair::getReservesCall {})))
            .collect();
        let results = self.try_aggregate(calls).await;
        Ok(results
            .into_iter()
            .map(|(ok, data)| {
                if !ok {
                    return (U256::ZERO, U256::ZERO);
                }
                IUniswapV2Pair::getReservesCall::abi_decode_returns(&data)
                    .map(|r| (U256::from(r.reserve0), U256::from(r.reserve1)))
                    .unwrap_or((U256::ZERO, U256::ZERO))
            })
            .collect())
    }

    /// `Fixed(n)` needs no call. `ReadFromPool` reads `pair.swapFee()`;
    /// `ReadFromFactory(f)` reads `f.getPairFees(pair)`. Both are decoded
    /// the same way as §4.1's refresh path: `10_000 − fee·10` for a pool's
    /// own `swapFee` (quoted in basis points of 0.1%), `10_000 − fees` for
    /// a factory's `getPairFees` (quoted directly against the denominator).
    async fn pool_fee_numerators(&self, pools: &[(Address, FeeSource)]) -> Result<Vec<u16>, RegistryError> {
        let mut calls = Vec::new();
        let mut call_kind = Vec::with_capacity(pools.len());
        for (pool, source) in pools {
            match source {
                FeeSource::Fixed(n) => call_kind.push(CallKind::Fixed(*n)),
                FeeSource::ReadFromPool => {
                    calls.push((*pool, encode_call(IUniswapV2Pair::swapFeeCall {})));
                    call_kind.push(CallKind::FromPool(calls.len() - 1));
                }
                FeeSource::ReadFromFactory(factory) => {
                    calls.push((*factory, encode_call(IFeeFactory::getPairFeesCall { pair: *pool })));
                    call_kind.push(CallKind::FromFactory(calls.len() - 1));
                }
            }
        }

        let results = self.try_aggregate(calls).await;
        Ok(call_kind
            .into_iter()
            .map(|kind| match kind {
                CallKind::Fixed(n) => n,
                CallKind::FromPool(idx) => {
                    let Some((ok, data)) = results.get(idx) else { return 1 };
                    if !*ok {
                        return 1;
                    }
                    IUniswapV2Pair::swapFeeCall::abi_decode_returns(data)
                        .ok()
                        .and_then(|r| TryInto::<u64>::try_into(r.fee).ok())
                        .map(|fee| 10_000u64.saturating_sub(fee.saturating_mul(10)).clamp(1, 10_000) as u16)
                        .unwrap_or(1)
                }
                CallKind::FromFactory(idx) => {
                    let Some((ok, data)) = results.get(idx) else { return 1 };
                    if !*ok {
                        return 1;
                    }
                    IFeeFactory::getPairFeesCall::abi_decode_returns(data)
                        .ok()
                        .and_then(|r| TryInto::<u64>::try_into(r.fees).ok())
                        .map(|fees| 10_000u64.saturating_sub(fees).clamp(1, 10_000) as u16)
                        .unwrap_or(1)
                }
            })
            .collect())
    }
}

enum CallKind {
    Fixed(u16),
    FromPool(usize),
    FromFactory(usize),
}


/// Adapts [`RpcFabric`] into the batch validator's on-chain re-check call.
pub struct ChainBatchChecker {
    pub rpc: Arc<RpcFabric>,
    pub batch_checker: Address,
}

#[async_trait]
impl BatchCheckerTrait for ChainBatchChecker {
    async fn check_arbs(&self, router: Address, args: Vec<Vec<u8>>) -> Result<Vec<u8>, ValidatorError> {
        let call = crate::contracts::IBatchChecker::checkArbsCall {
            router,
            args: args.into_iter().map(Bytes::from).collect(),
        };
        let raw = self
            .rpc
            .eth_call(self.batch_checker, call.abi_encode())
            .await
            .map_err(|e| ValidatorError::Rpc(e.to_string()))?;
        let decoded = crate::contracts::IBatchChecker::checkArbsCall::abi_decode_returns(&raw)
            .map_err(|e| ValidatorError::Rpc(e.to_string()))?;
        Ok(decoded.results.to_vec())
    }
}

#[async_trait]
impl GasPriceSource for Arc<RpcFabric> {
    async fn gas_price(&self) -> Result<U256, RpcError> {
        RpcFabric::gas_price(self).await
    }
}

/// Adapts [`RpcFabric::batch_estimate_gas`] into the submission pipeline's
/// gas-estimation quorum, and signs/broadcasts with a locally held key —
/// per §6, account signing always happens locally; only the signed payload
/// ever leaves the process.
pub struct ChainSubmitter {
    pub rpc: Arc<RpcFabric>,
    pub signer: PrivateKeySigner,
    pub chain_id: u64,
}

#[async_trait]
impl EstimationQuorum for ChainSubmitter {
    async fn estimate_quorum(&self, tx: &TxParams) -> Vec<Result<u64, String>> {
        let value = serde_json::json!({
            "from": format!("{:#x}", self.signer.address()),
            "to": format!("{:#x}", tx.to),
            "data": format!("0x{}", tx.data.iter().map(|b| format!("{b:02x}")).collect::<String>()),
            "gasPrice": format!("{:#x}", tx.gas_price),
            "gas": format!("{:#x}", tx.gas_limit),
        });
        self.rpc
            .batch_estimate_gas(value)
            .await
            .into_iter()
            .map(|r| r.map_err(|e| e.to_string()))
            .collect()
    }
}

#[async_trait]
impl TxBroadcaster for ChainSubmitter {
    async fn sign(&self, tx: &TxParams, gas_limit: u64) -> Result<Bytes, SubmissionError> {
        let mut legacy = TxLegacy {
            chain_id: Some(self.chain_id),
            nonce: tx.nonce,
            gas_price: tx.gas_price.try_into().unwrap_or(u128::MAX),
            gas_limit,
            to: TxKind::Call(tx.to),
            value: U256::ZERO,
            input: Bytes::from(tx.data.clone()),
        };
        let signature = self
            .signer
            .sign_transaction(&mut legacy)
            .await
            .map_err(|e| SubmissionError::QuorumErrored(e.to_string()))?;
        let hash = legacy.signature_hash();
        let envelope = TxEnvelope::Legacy(Signed::new_unchecked(legacy, signature, hash));
        Ok(Bytes::from(envelope.encoded_2718()))
    }

    async fn broadcast(&self, raw_tx: &Bytes) -> Result<TxHash, String> {
        self.rpc.broadcast_raw_tx(raw_tx).await.map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_call_produces_selector_prefixed_calldata() {
        let data = encode_call(IUniswapV2Factory::allPairsLengthCall {});
        assert_eq!(data.len(), 4);
    }
}
