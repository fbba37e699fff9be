//! Stake modifier generation, resolution and checksumming.
//!
//! The stake modifier keeps a txout owner from computing future
//! proof-of-stake for a coin as soon as its transaction confirms: the kernel
//! must hash against a modifier generated well after the confirming block.
//! Each of the modifier's 64 bits is contributed by a block selected
//! pseudo-randomly from its own section of a past time window, seeded by the
//! previous modifier. Modifiers are recomputed at a fixed time interval
//! rather than per block, so an attacker gains no additional modifier bits
//! by generating a run of blocks.

use crate::chain::ChainAdapter;
use crate::error::KernelError;
use log::{debug, trace, warn};
use lumen_core::crypto::{Hash, HashWriter};
use lumen_core::types::{BlockIndex, ConsensusParams};
use primitive_types::U256;
use std::collections::HashSet;

/// A resolved kernel stake modifier together with the height and time of the
/// block that generated it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelModifier {
    /// The 64-bit stake modifier.
    pub modifier: u64,
    /// Height of the generating block.
    pub height: i32,
    /// Timestamp of the generating block.
    pub time: i64,
}

/// Length in seconds of selection-interval section `section`.
///
/// Sections grow with the index: early rounds draw from short windows, later
/// rounds from windows approaching a full modifier interval. Signed 64-bit
/// arithmetic with truncating division is consensus-visible.
pub fn selection_interval_section(params: &ConsensusParams, section: i32) -> i64 {
    assert!((0..64).contains(&section));
    params.modifier_interval * 63
        / (63 + (63 - section as i64) * (params.modifier_interval_ratio - 1))
}

/// Total length in seconds of the selection interval, over all 64 sections.
pub fn selection_interval(params: &ConsensusParams) -> i64 {
    (0..64).map(|section| selection_interval_section(params, section)).sum()
}

/// Walks back from `index` to the nearest block that generated a stake
/// modifier, returning the modifier and its generation time.
fn last_stake_modifier(
    chain: &impl ChainAdapter,
    index: &BlockIndex,
) -> Result<(u64, i64), KernelError> {
    let mut pindex = index;
    loop {
        if pindex.generated_stake_modifier() {
            return Ok((pindex.stake_modifier, pindex.time));
        }
        match chain.prev(pindex) {
            Some(prev) => pindex = prev,
            None => return Err(KernelError::NoGeneratedModifier(index.hash)),
        }
    }
}

/// Selection hash for one candidate: the proof hash and the previous
/// modifier, double-hashed. Proof-of-stake candidates are shifted right by
/// 32 bits so they always win ties against proof-of-work candidates,
/// preserving the energy-efficiency property.
fn selection_hash(proof: &Hash, prev_modifier: u64, proof_of_stake: bool) -> U256 {
    let mut writer = HashWriter::new();
    writer.write_hash(proof);
    writer.write_u64(prev_modifier);
    let hash = writer.finalize().to_u256();
    if proof_of_stake {
        hash >> 32
    } else {
        hash
    }
}

/// Picks the candidate with the lowest selection hash for one round.
///
/// Candidates already in `selected_blocks` are skipped; iteration stops at
/// the first candidate past `selection_interval_stop` once something has
/// been selected. Fails only when a candidate hash is missing from the
/// index.
fn select_block_from_candidates<'a, C: ChainAdapter>(
    chain: &'a C,
    params: &ConsensusParams,
    sorted_by_timestamp: &[(i64, U256)],
    selected_blocks: &HashSet<Hash>,
    selection_interval_stop: i64,
    prev_modifier: u64,
) -> Result<&'a BlockIndex, KernelError> {
    let mut best: Option<(U256, &BlockIndex)> = None;
    for &(_, hash_value) in sorted_by_timestamp {
        let hash = Hash::from_u256(hash_value);
        let pindex = match chain.index_by_hash(&hash) {
            Some(pindex) => pindex,
            None => {
                warn!("select_block_from_candidates: failed to find block index for candidate block {hash}");
                return Err(KernelError::CandidateNotIndexed(hash));
            }
        };
        if best.is_some() && pindex.time > selection_interval_stop {
            break;
        }
        if selected_blocks.contains(&pindex.hash) {
            continue;
        }
        // Flag bits are not reliable during header download; discriminate
        // proof-of-stake by height.
        let proof_of_stake = pindex.height > params.last_pow_block;
        let proof =
            if proof_of_stake { &pindex.hash_proof_of_stake } else { &pindex.hash };
        let hash_selection = selection_hash(proof, prev_modifier, proof_of_stake);
        match best {
            Some((best_hash, _)) if hash_selection < best_hash => {
                best = Some((hash_selection, pindex));
            }
            None => best = Some((hash_selection, pindex)),
            _ => {}
        }
    }
    match best {
        Some((hash_selection, pindex)) => {
            trace!("select_block_from_candidates: selection hash={hash_selection:064x}");
            Ok(pindex)
        }
        None => Err(KernelError::SelectionFailed),
    }
}

/// Computes the stake modifier for the block being added, `pindex_current`.
///
/// Returns `(modifier, generated)`. When the predecessor's block time has
/// not crossed into a new modifier interval the previous modifier is
/// returned with `generated == false`; otherwise 64 selection rounds over
/// the candidate window assemble a fresh modifier from the entropy bits of
/// the selected blocks.
pub fn compute_next_stake_modifier(
    chain: &impl ChainAdapter,
    params: &ConsensusParams,
    pindex_current: &BlockIndex,
) -> Result<(u64, bool), KernelError> {
    let pindex_prev = match &pindex_current.prev {
        // Genesis block's modifier is 0.
        None => return Ok((0, true)),
        Some(prev_hash) => chain
            .index_by_hash(prev_hash)
            .ok_or(KernelError::BlockIndexNotFound(*prev_hash))?,
    };

    // Find the current modifier and its generation time; if it is not old
    // enough, keep it.
    let (prev_modifier, modifier_time) = last_stake_modifier(chain, pindex_prev)?;
    debug!(
        "compute_next_stake_modifier: prev modifier={prev_modifier:#018x} time={modifier_time}"
    );
    if modifier_time / params.modifier_interval >= pindex_prev.time / params.modifier_interval {
        trace!(
            "compute_next_stake_modifier: no new interval, keep current modifier: height={} time={}",
            pindex_prev.height,
            pindex_prev.time
        );
        return Ok((prev_modifier, false));
    }

    // Collect candidate blocks, eldest first, then sort by timestamp with a
    // numeric tiebreak on the block hash. Chains contain consecutive blocks
    // with identical timestamps; ordering their hashes as anything but
    // 256-bit integers forks.
    let mut sorted_by_timestamp: Vec<(i64, U256)> =
        Vec::with_capacity((64 * params.modifier_interval / params.target_spacing) as usize);
    let interval = selection_interval(params);
    let selection_interval_start =
        pindex_prev.time / params.modifier_interval * params.modifier_interval - interval;
    let mut walk = Some(pindex_prev);
    while let Some(pindex) = walk {
        if pindex.time < selection_interval_start {
            break;
        }
        sorted_by_timestamp.push((pindex.time, pindex.hash.to_u256()));
        walk = chain.prev(pindex);
    }
    let height_first_candidate = walk.map_or(0, |pindex| pindex.height + 1);
    sorted_by_timestamp.reverse();
    sorted_by_timestamp.sort();

    // Select 64 blocks from the candidates to generate the new modifier.
    let mut modifier_new: u64 = 0;
    let mut selection_interval_stop = selection_interval_start;
    let mut selected_blocks: HashSet<Hash> = HashSet::new();
    let rounds = std::cmp::min(64, sorted_by_timestamp.len() as i32);
    for round in 0..rounds {
        // Add an interval section to the current selection round.
        selection_interval_stop += selection_interval_section(params, round);
        let selected = select_block_from_candidates(
            chain,
            params,
            &sorted_by_timestamp,
            &selected_blocks,
            selection_interval_stop,
            prev_modifier,
        )
        .map_err(|err| {
            warn!("compute_next_stake_modifier: unable to select block at round {round}");
            err
        })?;
        // Write the entropy bit of the selected block.
        modifier_new |= (selected.stake_entropy_bit() as u64) << round;
        selected_blocks.insert(selected.hash);
        trace!(
            "compute_next_stake_modifier: selected modifier={modifier_new:#018x} round={round} stop={selection_interval_stop} height={} entropy bit={}",
            selected.height,
            selected.stake_entropy_bit()
        );
    }

    if log::log_enabled!(log::Level::Trace) {
        // '-' proof-of-work unselected, '=' proof-of-stake unselected,
        // 'W'/'S' selected.
        let len = (pindex_prev.height - height_first_candidate + 1).max(0) as usize;
        let mut selection_map = vec![b'-'; len];
        let mut walk = Some(pindex_prev);
        while let Some(pindex) = walk {
            if pindex.height < height_first_candidate {
                break;
            }
            let pos = (pindex.height - height_first_candidate) as usize;
            let selected = selected_blocks.contains(&pindex.hash);
            if pindex.height > params.last_pow_block {
                selection_map[pos] = if selected { b'S' } else { b'=' };
            } else if selected {
                selection_map[pos] = b'W';
            }
            walk = chain.prev(pindex);
        }
        trace!(
            "compute_next_stake_modifier: selection height [{height_first_candidate}, {}] map {}",
            pindex_prev.height,
            String::from_utf8_lossy(&selection_map)
        );
    }

    Ok((modifier_new, true))
}

/// Resolves the stake modifier governing a kernel whose staked output was
/// confirmed in the block `hash_block_from`.
///
/// The modifier is taken about one selection interval after the confirming
/// block, so it cannot be predicted at confirmation time. The forward walk
/// follows the active chain and ends on the first modifier-generating block
/// whose time reaches the target; failure means the chain does not yet
/// extend far enough and the caller retries later.
pub fn kernel_stake_modifier(
    chain: &impl ChainAdapter,
    params: &ConsensusParams,
    hash_block_from: &Hash,
) -> Result<KernelModifier, KernelError> {
    let pindex_from = chain
        .index_by_hash(hash_block_from)
        .ok_or(KernelError::BlockIndexNotFound(*hash_block_from))?;
    let mut modifier_height = pindex_from.height;
    let mut modifier_time = pindex_from.time;
    let interval = selection_interval(params);
    let target_time = pindex_from.time + interval;

    let mut pindex = pindex_from;
    let mut next = chain.active_next(pindex);
    while modifier_time < target_time {
        match next {
            None => {
                // Reached the best block; happens when the node is behind.
                if pindex.time + params.stake_min_age - interval > chain.adjusted_time() {
                    warn!(
                        "kernel_stake_modifier: reached best block {} at height {} from block {hash_block_from}",
                        pindex.hash, pindex.height
                    );
                } else {
                    debug!(
                        "kernel_stake_modifier: modifier not yet available: height={modifier_height} time={modifier_time} target={target_time}"
                    );
                }
                return Err(KernelError::ModifierUnavailable {
                    block: *hash_block_from,
                    best: pindex.hash,
                    height: pindex.height,
                });
            }
            Some(succ) => {
                pindex = succ;
                next = chain.active_next(pindex);
                if pindex.generated_stake_modifier() {
                    modifier_height = pindex.height;
                    modifier_time = pindex.time;
                }
            }
        }
    }
    Ok(KernelModifier { modifier: pindex.stake_modifier, height: modifier_height, time: modifier_time })
}

/// Chained 32-bit digest of a block's stake fields.
///
/// Hashes the predecessor's checksum (absent at genesis) with the block's
/// flags, kernel hash and stake modifier, keeping the upper 32 bits.
pub fn stake_modifier_checksum(
    chain: &impl ChainAdapter,
    params: &ConsensusParams,
    index: &BlockIndex,
) -> u32 {
    assert!(index.prev.is_some() || index.hash == params.genesis_hash);
    let mut writer = HashWriter::new();
    if index.prev.is_some() {
        let prev = chain
            .prev(index)
            .expect("predecessor of a connected block must be indexed");
        writer.write_u32(prev.stake_modifier_checksum);
    }
    writer.write_u32(index.flags);
    writer.write_hash(&index.hash_proof_of_stake);
    writer.write_u64(index.stake_modifier);
    let checksum = writer.finalize().to_u256() >> (256 - 32);
    checksum.low_u64() as u32
}
