//! Coinstake kernel verification.
//!
//! A coinstake's kernel (input 0) must satisfy
//!
//! ```text
//! hash(modifier ++ blockFrom.time ++ txPrev.offset ++ txPrev.time
//!      ++ prevout.n ++ tx.time) <= target * stakeTimeWeight
//! ```
//!
//! so the chance of staking is proportional to coin age, damped by current
//! network strength. The hashed fields pin each attempt to one output at one
//! on-chain position: block and tx hashes are deliberately excluded because
//! they can be ground out in quantity, which would degrade the scheme back
//! into proof-of-work.

use crate::chain::ChainAdapter;
use crate::error::KernelError;
use crate::stake_modifier::kernel_stake_modifier;
use crate::stake_weight::{stake_time_factored_weight, AverageWeightCache};
use log::{debug, trace};
use lumen_core::crypto::{compact_to_target, target_to_compact, Hash, HashWriter};
use lumen_core::types::{
    Block, BlockIndex, ConsensusParams, OutPoint, Transaction, BLOCK_HEADER_SIZE, COIN,
};
use primitive_types::U256;

const DAY: i64 = 24 * 60 * 60;

/// Upper bound on the time weight counted by [`get_stake_time`].
const MAX_STAKE_TIME_WEIGHT: i64 = 30 * DAY;

/// A verified kernel: the proof hash and the target it met.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelProof {
    /// The computed kernel hash.
    pub hash: Hash,
    /// The stake-time-scaled target the hash was checked against.
    pub target: U256,
}

/// Time weight of a staking interval. Starts from zero at the minimum age;
/// goes negative for a fresher interval and must not be clamped.
pub fn get_weight(params: &ConsensusParams, interval_beginning: i64, interval_end: i64) -> i64 {
    interval_end - interval_beginning - params.stake_min_age
}

/// The v0.3 coinstake timestamp rule: block and coinstake carry the same
/// time.
pub fn check_coin_stake_timestamp(time_block: i64, time_tx: i64) -> bool {
    time_block == time_tx
}

/// Checks a coinstake kernel hash against the stake-time-scaled target.
///
/// `block_from` is the block confirming the staked output, `tx_offset` the
/// header-inclusive byte offset of `tx_prev` inside it, `time_tx` the
/// candidate coinstake's timestamp and `pindex_prev` the predecessor of the
/// chain tip. Returns the proof on success; every rejection carries the
/// violated rule.
#[allow(clippy::too_many_arguments)]
pub fn check_stake_time_kernel_hash(
    chain: &impl ChainAdapter,
    params: &ConsensusParams,
    cache: &AverageWeightCache,
    bits: u32,
    block_from: &Block,
    tx_offset: u32,
    tx_prev: &Transaction,
    prevout: &OutPoint,
    time_tx: u32,
    pindex_prev: Option<&BlockIndex>,
) -> Result<KernelProof, KernelError> {
    if time_tx < tx_prev.time {
        debug!("check_stake_time_kernel_hash: tx time violation");
        return Err(KernelError::TimestampViolation { time_tx, time_prev: tx_prev.time });
    }

    let time_block_from = block_from.time();
    if time_block_from + params.stake_min_age > time_tx as i64 {
        debug!("check_stake_time_kernel_hash: min age violation");
        return Err(KernelError::MinAgeViolation { block_time: time_block_from, time_tx });
    }

    let target_per_coin_day = compact_to_target(bits);
    let value_in = tx_prev
        .outputs
        .get(prevout.n as usize)
        .ok_or(KernelError::PrevoutOutOfRange { txid: prevout.hash, n: prevout.n })?
        .value;
    let hash_block_from = block_from.hash();

    let pindex_from = chain
        .index_by_hash(&hash_block_from)
        .ok_or(KernelError::BlockIndexNotFound(hash_block_from))?;
    let height_block_from = pindex_from.height;
    let time_weight = get_weight(params, tx_prev.time as i64, time_tx as i64);
    let coin_day_weight = value_in.wrapping_mul(time_weight) / COIN / DAY;

    // Stake-time factored weight; big-int from here on, with the same
    // two's-complement wrap into unsigned the 256-bit lane has always had.
    let factored_time_weight =
        stake_time_factored_weight(chain, params, cache, time_weight, coin_day_weight, pindex_prev);
    let stake_time_weight = U256::from(value_in as u64)
        .overflowing_mul(U256::from(factored_time_weight as u64))
        .0
        / U256::from(COIN as u64)
        / U256::from(DAY as u64);
    let target_proof_of_stake = stake_time_weight.overflowing_mul(target_per_coin_day).0;

    let kernel_modifier = kernel_stake_modifier(chain, params, &hash_block_from).map_err(|err| {
        debug!("check_stake_time_kernel_hash: kernel stake modifier unavailable");
        err
    })?;

    let mut writer = HashWriter::new();
    writer.write_u64(kernel_modifier.modifier);
    writer.write_u32(time_block_from as u32);
    writer.write_u32(tx_offset);
    writer.write_u32(tx_prev.time);
    writer.write_u32(prevout.n);
    writer.write_u32(time_tx);
    let hash_proof_of_stake = writer.finalize();

    trace!(
        "check_stake_time_kernel_hash: using modifier {:#018x} at height={} timestamp={} for block from height={height_block_from} timestamp={time_block_from} time_weight={time_weight} coin_day_weight={coin_day_weight}",
        kernel_modifier.modifier,
        kernel_modifier.height,
        kernel_modifier.time
    );
    trace!(
        "check_stake_time_kernel_hash: check modifier={:#018x} time_block_from={time_block_from} tx_offset={tx_offset} time_tx_prev={} prevout={} time_tx={time_tx} hash_proof={hash_proof_of_stake} target_proof={target_proof_of_stake:064x}",
        kernel_modifier.modifier,
        tx_prev.time,
        prevout.n
    );

    // Outputs confirmed by the proof-of-work prefix of the chain predate
    // stake targets; only stake-confirmed outputs are checked.
    if height_block_from > params.last_pow_block
        && hash_proof_of_stake.to_u256() > target_proof_of_stake
    {
        debug!(
            "check_stake_time_kernel_hash: hash {hash_proof_of_stake} above target {target_proof_of_stake:064x} ({:#010x} > {:#010x}) for block from height {height_block_from}",
            target_to_compact(hash_proof_of_stake.to_u256()),
            target_to_compact(target_proof_of_stake)
        );
        return Err(KernelError::TargetNotMet {
            hash: hash_proof_of_stake,
            target: target_proof_of_stake,
        });
    }
    Ok(KernelProof { hash: hash_proof_of_stake, target: target_proof_of_stake })
}

/// Checks the kernel of an incoming block's coinstake against `bits`.
///
/// Resolves the staked output, its confirming block and its on-chain byte
/// offset through the chain adapter, then delegates to
/// [`check_stake_time_kernel_hash`] with the tip's predecessor. Lookup
/// failures commonly mean "not yet synced" and are retried by the caller.
pub fn check_proof_of_stake(
    chain: &impl ChainAdapter,
    params: &ConsensusParams,
    cache: &AverageWeightCache,
    tx: &Transaction,
    bits: u32,
) -> Result<KernelProof, KernelError> {
    if !tx.is_coinstake() {
        return Err(KernelError::NotCoinStake(tx.hash()));
    }

    // Kernel (input 0) must match the stake hash target per coin age.
    let txin = &tx.inputs[0];
    let lookup = chain.transaction_lookup(&txin.prevout.hash).ok_or_else(|| {
        // Previous transaction not in the main chain; may occur during
        // initial download.
        debug!("check_proof_of_stake: read staked output tx failed");
        KernelError::TransactionNotFound(txin.prevout.hash)
    })?;
    // The transaction index stores offsets relative to the transaction
    // area; the serialized field includes the header.
    let tx_offset = lookup.offset + BLOCK_HEADER_SIZE;

    let pindex_block = chain
        .index_by_hash(&lookup.block_hash)
        .ok_or(KernelError::BlockIndexNotFound(lookup.block_hash))?;
    let block = chain
        .read_block(pindex_block)
        .ok_or(KernelError::BlockReadFailed(lookup.block_hash))?;

    let pindex_prev = chain.tip().and_then(|tip| chain.prev(tip));
    check_stake_time_kernel_hash(
        chain,
        params,
        cache,
        bits,
        &block,
        tx_offset,
        &lookup.tx,
        &txin.prevout,
        tx.time,
        pindex_prev,
    )
    .map_err(|err| {
        debug!("check_proof_of_stake: check kernel failed on coinstake {}: {err}", tx.hash());
        err
    })
}

/// Total stake-time spent by a transaction, in coin-days, for reward
/// accounting.
///
/// Sums `value * factored_weight` over inputs meeting the minimum age, with
/// the time weight capped at 30 days. A timestamp violation aborts the whole
/// computation.
pub fn get_stake_time(
    chain: &impl ChainAdapter,
    params: &ConsensusParams,
    cache: &AverageWeightCache,
    tx: &Transaction,
    pindex_prev: Option<&BlockIndex>,
) -> Result<u64, KernelError> {
    let mut stake_time = U256::zero();
    if tx.is_coinbase() {
        return Ok(0);
    }

    for txin in &tx.inputs {
        let lookup = chain.transaction_lookup(&txin.prevout.hash).ok_or_else(|| {
            debug!("get_stake_time: read staked output tx failed");
            KernelError::TransactionNotFound(txin.prevout.hash)
        })?;
        let tx_prev = &lookup.tx;
        if tx.time < tx_prev.time {
            return Err(KernelError::TimestampViolation { time_tx: tx.time, time_prev: tx_prev.time });
        }

        let pindex_block = chain
            .index_by_hash(&lookup.block_hash)
            .ok_or(KernelError::BlockIndexNotFound(lookup.block_hash))?;
        let block = chain
            .read_block(pindex_block)
            .ok_or(KernelError::BlockReadFailed(lookup.block_hash))?;
        if block.time() + params.stake_min_age > tx.time as i64 {
            // Only count coins meeting the minimum age requirement.
            continue;
        }

        let value_in = tx_prev
            .outputs
            .get(txin.prevout.n as usize)
            .ok_or(KernelError::PrevoutOutOfRange { txid: txin.prevout.hash, n: txin.prevout.n })?
            .value;
        let mut time_weight = (tx.time - tx_prev.time) as i64;
        if time_weight > MAX_STAKE_TIME_WEIGHT {
            time_weight = MAX_STAKE_TIME_WEIGHT;
        }

        let coin_day = value_in.wrapping_mul(time_weight) / COIN / DAY;
        let factored_time_weight =
            stake_time_factored_weight(chain, params, cache, time_weight, coin_day, pindex_prev);
        stake_time = stake_time
            .overflowing_add(
                U256::from(value_in as u64)
                    .overflowing_mul(U256::from(factored_time_weight as u64))
                    .0
                    / U256::from(COIN as u64)
                    / U256::from(DAY as u64),
            )
            .0;
        trace!(
            "get_stake_time: value_in={value_in} time_weight={time_weight} coin_day={coin_day} factored_time_weight={factored_time_weight}"
        );
    }
    trace!("get_stake_time: stake time {stake_time}");
    Ok(stake_time.low_u64())
}

/// Total coin age spent by a transaction, in coin-days.
///
/// Accumulates in cent-seconds over inputs meeting the minimum age. Kept for
/// parity with reward code paths.
pub fn get_coin_age(
    chain: &impl ChainAdapter,
    params: &ConsensusParams,
    tx: &Transaction,
) -> Result<u64, KernelError> {
    let mut cent_seconds = U256::zero();
    if tx.is_coinbase() {
        return Ok(0);
    }

    for txin in &tx.inputs {
        let lookup = chain.transaction_lookup(&txin.prevout.hash).ok_or_else(|| {
            debug!("get_coin_age: read staked output tx failed");
            KernelError::TransactionNotFound(txin.prevout.hash)
        })?;
        let tx_prev = &lookup.tx;
        if tx.time < tx_prev.time {
            return Err(KernelError::TimestampViolation { time_tx: tx.time, time_prev: tx_prev.time });
        }

        let pindex_block = chain
            .index_by_hash(&lookup.block_hash)
            .ok_or(KernelError::BlockIndexNotFound(lookup.block_hash))?;
        let block = chain
            .read_block(pindex_block)
            .ok_or(KernelError::BlockReadFailed(lookup.block_hash))?;
        if block.time() + params.stake_min_age > tx.time as i64 {
            continue;
        }

        let value_in = tx_prev
            .outputs
            .get(txin.prevout.n as usize)
            .ok_or(KernelError::PrevoutOutOfRange { txid: txin.prevout.hash, n: txin.prevout.n })?
            .value;
        cent_seconds = cent_seconds
            .overflowing_add(
                U256::from(value_in as u64)
                    .overflowing_mul(U256::from((tx.time - tx_prev.time) as u64))
                    .0
                    / U256::from(lumen_core::types::CENT as u64),
            )
            .0;
        trace!(
            "get_coin_age: value_in={value_in} time_diff={} cent_seconds={cent_seconds}",
            tx.time - tx_prev.time
        );
    }

    let coin_day = cent_seconds.overflowing_mul(U256::from(lumen_core::types::CENT as u64)).0
        / U256::from(COIN as u64)
        / U256::from(DAY as u64);
    trace!("get_coin_age: coin age {coin_day}");
    Ok(coin_day.low_u64())
}
