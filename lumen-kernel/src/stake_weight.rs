//! Network stake-weight estimation and stake-time damping.
//!
//! Stake-time is coin-age scaled against the network-wide average stake
//! weight of the last 60 blocks, then damped with a cosine-squared curve so
//! that the marginal influence of large stakes falls off. The floating-point
//! arithmetic here is consensus-visible: `cos`, `pow` and `f64` division
//! must be bit-identical across nodes, which rules out fast-math and
//! fused-multiply-add builds.

use crate::chain::ChainAdapter;
use log::trace;
use lumen_core::types::{BlockIndex, ConsensusParams};
use std::sync::Mutex;

/// Number of staked blocks sampled by [`pos_kernel_ps`].
const POS_INTERVAL: i32 = 72;

/// Number of blocks averaged by [`average_stake_weight`].
const AVERAGE_WINDOW: i32 = 60;

/// Moving estimate of stake kernels tried per second over the last 72 staked
/// blocks before `pindex_prev`.
pub fn pos_kernel_ps(
    chain: &impl ChainAdapter,
    params: &ConsensusParams,
    pindex_prev: &BlockIndex,
) -> f64 {
    let mut kernels_tried: f64 = 0.0;
    let mut stakes_handled: i32 = 0;
    let mut stakes_time: i32 = 0;

    let mut prev_stake: Option<&BlockIndex> = None;
    let mut walk = Some(pindex_prev);
    while let Some(pindex) = walk {
        if stakes_handled >= POS_INTERVAL {
            break;
        }
        // Height-based discrimination; flag bits are not reliable during
        // header download.
        if pindex.height > params.last_pow_block {
            kernels_tried += chain.difficulty(pindex) * 4294967296.0;
            let delta = match prev_stake {
                Some(stake) => (stake.time as u32).wrapping_sub(pindex.time as u32) as i32,
                None => 0,
            };
            if pindex.height >= params.fork_height_2 {
                // Prevent negative stake time.
                stakes_time = stakes_time.wrapping_add(delta.max(0));
            } else {
                stakes_time = stakes_time.wrapping_add(delta);
            }
            prev_stake = Some(pindex);
            stakes_handled += 1;
        }
        walk = chain.prev(pindex);
    }

    if stakes_time != 0 {
        kernels_tried / stakes_time as f64
    } else {
        0.0
    }
}

/// Single-slot cache for [`average_stake_weight`], keyed by the height it
/// was computed at. Written at most once per new tip; guard shared use with
/// the chain lock or this mutex alone.
#[derive(Debug)]
pub struct AverageWeightCache {
    slot: Mutex<(i32, f64)>,
}

impl AverageWeightCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self { slot: Mutex::new((0, 0.0)) }
    }

    /// Clears the cached entry. Call when a reorg rolls back past the
    /// cached height.
    pub fn invalidate(&self) {
        *self.slot.lock().expect("average weight cache poisoned") = (0, 0.0);
    }
}

impl Default for AverageWeightCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Average network stake weight over the last 60 blocks before
/// `pindex_prev`, cached per height.
pub fn average_stake_weight(
    chain: &impl ChainAdapter,
    params: &ConsensusParams,
    cache: &AverageWeightCache,
    pindex_prev: Option<&BlockIndex>,
) -> f64 {
    if chain.best_height() < 1 {
        return 0.0;
    }
    let pindex_prev = match pindex_prev {
        Some(pindex) => pindex,
        None => return 0.0,
    };

    let mut slot = cache.slot.lock().expect("average weight cache poisoned");
    if pindex_prev.height == slot.0 {
        return slot.1;
    }
    slot.0 = pindex_prev.height;

    let mut weight_sum: f64 = 0.0;
    let mut sampled: i32 = 0;
    let mut walk = Some(pindex_prev);
    while let Some(pindex) = walk {
        if sampled >= AVERAGE_WINDOW {
            break;
        }
        weight_sum += pos_kernel_ps(chain, params, pindex);
        sampled += 1;
        walk = chain.prev(pindex);
    }
    let average = weight_sum / sampled as f64 + 21.0;
    slot.1 = average;
    average
}

/// Damps `time_weight` by the stake's share of the network average weight.
///
/// Shares above 0.45 collapse to a floor of `stake_min_age + 1`: oversized
/// stakes get effectively no advantage. The raw share comparison and the
/// truncation to integer are consensus-visible.
pub fn factored_time_weight(
    params: &ConsensusParams,
    time_weight: i64,
    coin_day_weight: i64,
    average_weight: f64,
) -> i64 {
    let weight_fraction = (coin_day_weight + 1) as f64 / average_weight;
    if weight_fraction > 0.45 {
        params.stake_min_age + 1
    } else {
        let stake_time_factor = (params.pi * weight_fraction).cos().powf(2.0);
        (stake_time_factor * time_weight as f64) as i64
    }
}

/// [`factored_time_weight`] against the cached network average at
/// `pindex_prev`.
pub fn stake_time_factored_weight(
    chain: &impl ChainAdapter,
    params: &ConsensusParams,
    cache: &AverageWeightCache,
    time_weight: i64,
    coin_day_weight: i64,
    pindex_prev: Option<&BlockIndex>,
) -> i64 {
    let average = average_stake_weight(chain, params, cache, pindex_prev);
    let factored = factored_time_weight(params, time_weight, coin_day_weight, average);
    trace!(
        "stake_time_factored_weight: time_weight={time_weight} coin_day_weight={coin_day_weight} average={average} factored={factored}"
    );
    factored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ConsensusParams {
        ConsensusParams::default()
    }

    #[test]
    fn test_factored_weight_boundary_at_45_percent() {
        let params = params();
        // share == 0.45 exactly takes the cosine branch (strict compare).
        let at_boundary = factored_time_weight(&params, 86400, 8, 20.0);
        assert_ne!(at_boundary, params.stake_min_age + 1);
        let expected = (std::f64::consts::PI * 0.45).cos().powf(2.0) * 86400.0;
        assert_eq!(at_boundary, expected as i64);

        // The next representable share above 0.45 hits the floor.
        let above = factored_time_weight(&params, 86400, 9, 20.0);
        assert_eq!(above, params.stake_min_age + 1);
    }

    #[test]
    fn test_factored_weight_zero_share_passes_through() {
        let params = params();
        // coin_day_weight = -1 makes the share exactly zero: cos(0)^2 == 1.
        assert_eq!(factored_time_weight(&params, 86400, -1, 20.0), 86400);
    }

    #[test]
    fn test_factored_weight_infinite_share_hits_floor() {
        let params = params();
        // Zero average (empty chain) drives the share to infinity.
        assert_eq!(factored_time_weight(&params, 86400, 10, 0.0), params.stake_min_age + 1);
    }

    #[test]
    fn test_factored_weight_truncates_toward_zero() {
        let params = params();
        let factored = factored_time_weight(&params, 1000, 0, 100.0);
        let exact = (params.pi * (1.0 / 100.0)).cos().powf(2.0) * 1000.0;
        assert_eq!(factored, exact as i64);
        assert!(factored < 1000);
    }
}
