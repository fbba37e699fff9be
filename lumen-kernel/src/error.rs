use lumen_core::crypto::Hash;
use primitive_types::U256;
use thiserror::Error;

/// Errors surfaced by the consensus kernel. Nothing is recovered internally;
/// the surrounding validator decides whether a failure is fatal for the
/// block, retryable ("not yet synced"), or fatal for the node.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KernelError {
    #[error("called on non-coinstake transaction {0}")]
    NotCoinStake(Hash),

    #[error("coinstake timestamp violation: tx time {time_tx} earlier than staked output time {time_prev}")]
    TimestampViolation { time_tx: u32, time_prev: u32 },

    #[error("stake min age violation: source block time {block_time} too recent for tx time {time_tx}")]
    MinAgeViolation { block_time: i64, time_tx: u32 },

    #[error("block {0} not indexed")]
    BlockIndexNotFound(Hash),

    #[error("failed to find block index for candidate block {0}")]
    CandidateNotIndexed(Hash),

    #[error("no generated stake modifier in the ancestry of {0}")]
    NoGeneratedModifier(Hash),

    #[error("unable to select a candidate block")]
    SelectionFailed,

    #[error("stake modifier not yet available for block {block}: active chain ends at {best} (height {height})")]
    ModifierUnavailable { block: Hash, best: Hash, height: i32 },

    #[error("transaction {0} not found")]
    TransactionNotFound(Hash),

    #[error("unable to read block {0}")]
    BlockReadFailed(Hash),

    #[error("prevout index {n} out of range for transaction {txid}")]
    PrevoutOutOfRange { txid: Hash, n: u32 },

    #[error("proof-of-stake hash does not meet target: hash {hash}, target {target:064x}")]
    TargetNotMet { hash: Hash, target: U256 },

    #[error("stake modifier checksum {checksum:#010x} fails hard checkpoint at height {height}")]
    CheckpointMismatch { height: i32, checksum: u32 },
}
