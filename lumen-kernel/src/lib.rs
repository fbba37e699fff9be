//! Proof-of-Stake-Time consensus kernel for Lumen.
//!
//! Decides whether a candidate block's coinstake transaction is valid and
//! derives the per-block stake modifier used as an entropy source for future
//! stake eligibility. Stake eligibility is weighted by stake-time: coin-age
//! damped against the network-wide average stake weight, so that oversized
//! stakes gain no outsized advantage.
//!
//! Everything here is consensus-critical: byte layouts, integer truncation,
//! iteration order and tie-breaking must stay bit-exact across nodes.

pub mod chain;
pub mod checkpoints;
pub mod error;
pub mod kernel;
pub mod stake_modifier;
pub mod stake_weight;

pub use chain::{BlockTree, ChainAdapter, TxLookup};
pub use checkpoints::check_stake_modifier_checkpoints;
pub use error::KernelError;
pub use kernel::{
    check_proof_of_stake, check_stake_time_kernel_hash, get_coin_age, get_stake_time, KernelProof,
};
pub use stake_modifier::{
    compute_next_stake_modifier, kernel_stake_modifier, stake_modifier_checksum, KernelModifier,
};
pub use stake_weight::AverageWeightCache;
