//! Chain access for the consensus kernel.
//!
//! The kernel never touches storage directly: it reads the block index, the
//! active chain and the transaction index through [`ChainAdapter`].
//! [`BlockTree`] is the in-memory implementation used by tests and tools;
//! full nodes back the trait with their own index.

use crate::checkpoints::check_stake_modifier_checkpoints;
use crate::error::KernelError;
use crate::stake_modifier::{compute_next_stake_modifier, stake_modifier_checksum};
use lumen_core::crypto::{difficulty_from_bits, Hash};
use lumen_core::types::{Block, BlockIndex, ConsensusParams, Transaction};
use std::collections::HashMap;

/// Result of a transaction-index lookup.
#[derive(Debug, Clone)]
pub struct TxLookup {
    /// The transaction itself.
    pub tx: Transaction,
    /// Hash of the block containing it.
    pub block_hash: Hash,
    /// Byte offset of the transaction within the block's transaction area,
    /// excluding the header.
    pub offset: u32,
}

/// Read access to the block index and the active chain.
///
/// Callers hold a chain lock for the duration of any kernel operation: a
/// reorg mid-call invalidates results.
pub trait ChainAdapter {
    /// Looks up an index entry by block hash.
    fn index_by_hash(&self, hash: &Hash) -> Option<&BlockIndex>;

    /// The tip of the active chain, if any block is connected.
    fn tip(&self) -> Option<&BlockIndex>;

    /// The successor of `index` on the active chain. `None` when `index` is
    /// the tip or not on the active chain at all.
    fn active_next(&self, index: &BlockIndex) -> Option<&BlockIndex>;

    /// Reads the full block for an index entry.
    fn read_block(&self, index: &BlockIndex) -> Option<Block>;

    /// Resolves a transaction to its content, containing block and offset.
    fn transaction_lookup(&self, txid: &Hash) -> Option<TxLookup>;

    /// Network-adjusted wall-clock time in Unix seconds.
    fn adjusted_time(&self) -> i64;

    /// The predecessor of `index`; `None` at genesis.
    fn prev(&self, index: &BlockIndex) -> Option<&BlockIndex> {
        index.prev.as_ref().and_then(|hash| self.index_by_hash(hash))
    }

    /// Height of the active chain tip, or -1 with no blocks connected.
    fn best_height(&self) -> i32 {
        self.tip().map_or(-1, |tip| tip.height)
    }

    /// Floating-point difficulty of `index`.
    fn difficulty(&self, index: &BlockIndex) -> f64 {
        difficulty_from_bits(index.bits)
    }
}

struct TxLocation {
    block_hash: Hash,
    position: usize,
    offset: u32,
}

/// Arena-style block index plus active chain, keyed by block hash.
///
/// `connect_block` runs the stake-modifier state machine for each appended
/// block: entropy bit and proof hash are recorded, the next modifier is
/// computed exactly once, the checksum is chained from the predecessor and
/// verified against the hard checkpoints. Stake fields are never recomputed
/// after connection.
pub struct BlockTree {
    params: ConsensusParams,
    index: HashMap<Hash, BlockIndex>,
    active: Vec<Hash>,
    blocks: HashMap<Hash, Block>,
    tx_index: HashMap<Hash, TxLocation>,
    adjusted_time: i64,
}

impl BlockTree {
    /// Creates an empty tree. `params.genesis_hash` must match the first
    /// connected block.
    pub fn new(params: ConsensusParams) -> Self {
        Self {
            params,
            index: HashMap::new(),
            active: Vec::new(),
            blocks: HashMap::new(),
            tx_index: HashMap::new(),
            adjusted_time: 0,
        }
    }

    /// The consensus parameters this tree was created with.
    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    /// Overrides the network-adjusted time reported to the kernel.
    pub fn set_adjusted_time(&mut self, time: i64) {
        self.adjusted_time = time;
    }

    /// Appends `block` to the active chain.
    ///
    /// `tx_offsets` carries the byte offset of each transaction within the
    /// block's transaction area. `hash_proof_of_stake` is the kernel hash
    /// established during validation; ignored for non-staked blocks.
    ///
    /// A checkpoint mismatch leaves the tree unchanged and is fatal for the
    /// node: the local index disagrees with hard-coded history.
    pub fn connect_block(
        &mut self,
        block: Block,
        tx_offsets: &[u32],
        hash_proof_of_stake: Hash,
    ) -> Result<Hash, KernelError> {
        assert_eq!(tx_offsets.len(), block.transactions.len());
        let height = self.active.len() as i32;
        if height == 0 {
            assert_eq!(
                block.hash(),
                self.params.genesis_hash,
                "first connected block must be the genesis block"
            );
        } else {
            assert_eq!(
                Some(&block.header.prev_block_hash),
                self.active.last(),
                "connect_block requires the next block of the active chain"
            );
        }

        let mut index = BlockIndex::new(&block.header, height);
        index.set_stake_entropy_bit(block.stake_entropy_bit());
        if block.is_proof_of_stake() {
            index.set_proof_of_stake();
            index.hash_proof_of_stake = hash_proof_of_stake;
        }

        let (modifier, generated) = compute_next_stake_modifier(&*self, &self.params, &index)?;
        index.set_stake_modifier(modifier, generated);
        index.stake_modifier_checksum = stake_modifier_checksum(&*self, &self.params, &index);
        if !check_stake_modifier_checkpoints(
            self.params.network,
            index.height,
            index.stake_modifier_checksum,
        ) {
            return Err(KernelError::CheckpointMismatch {
                height: index.height,
                checksum: index.stake_modifier_checksum,
            });
        }

        let hash = index.hash;
        for (position, (tx, &offset)) in block.transactions.iter().zip(tx_offsets).enumerate() {
            self.tx_index.insert(tx.hash(), TxLocation { block_hash: hash, position, offset });
        }
        self.blocks.insert(hash, block);
        self.index.insert(hash, index);
        self.active.push(hash);
        Ok(hash)
    }
}

impl ChainAdapter for BlockTree {
    fn index_by_hash(&self, hash: &Hash) -> Option<&BlockIndex> {
        self.index.get(hash)
    }

    fn tip(&self) -> Option<&BlockIndex> {
        self.active.last().and_then(|hash| self.index.get(hash))
    }

    fn active_next(&self, index: &BlockIndex) -> Option<&BlockIndex> {
        let pos = index.height as usize;
        if self.active.get(pos) != Some(&index.hash) {
            return None;
        }
        self.active.get(pos + 1).and_then(|hash| self.index.get(hash))
    }

    fn read_block(&self, index: &BlockIndex) -> Option<Block> {
        self.blocks.get(&index.hash).cloned()
    }

    fn transaction_lookup(&self, txid: &Hash) -> Option<TxLookup> {
        let location = self.tx_index.get(txid)?;
        let block = self.blocks.get(&location.block_hash)?;
        Some(TxLookup {
            tx: block.transactions.get(location.position)?.clone(),
            block_hash: location.block_hash,
            offset: location.offset,
        })
    }

    fn adjusted_time(&self) -> i64 {
        self.adjusted_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::types::{BlockHeader, Network, OutPoint, TxInput, TxOutput, COIN};

    fn test_params(genesis_hash: Hash) -> ConsensusParams {
        ConsensusParams {
            network: Network::Regtest,
            stake_min_age: 600,
            modifier_interval: 64,
            target_spacing: 16,
            modifier_interval_ratio: 3,
            last_pow_block: 0,
            fork_height_2: 0,
            genesis_hash,
            pi: std::f64::consts::PI,
        }
    }

    fn coinbase(time: u32) -> Transaction {
        Transaction {
            time,
            inputs: vec![TxInput { prevout: OutPoint::null() }],
            outputs: vec![TxOutput { value: 50 * COIN, script_pubkey: b"cb".to_vec() }],
        }
    }

    fn make_block(time: u32, prev: Hash, nonce: u32) -> Block {
        Block {
            header: BlockHeader {
                version: 1,
                prev_block_hash: prev,
                merkle_root: Hash::sha256d(&nonce.to_le_bytes()),
                time,
                bits: 0x1d00ffff,
                nonce,
            },
            transactions: vec![coinbase(time)],
        }
    }

    #[test]
    fn test_connect_and_walk() {
        let genesis = make_block(64000, Hash::zero(), 0);
        let mut tree = BlockTree::new(test_params(genesis.hash()));
        let genesis_hash = tree.connect_block(genesis, &[0], Hash::zero()).unwrap();

        let block1 = make_block(64016, genesis_hash, 1);
        let block1_hash = tree.connect_block(block1, &[0], Hash::zero()).unwrap();

        assert_eq!(tree.best_height(), 1);
        assert_eq!(tree.tip().unwrap().hash, block1_hash);

        let genesis_index = tree.index_by_hash(&genesis_hash).unwrap();
        assert_eq!(tree.active_next(genesis_index).unwrap().hash, block1_hash);
        let tip = tree.tip().unwrap();
        assert!(tree.active_next(tip).is_none());
        assert_eq!(tree.prev(tip).unwrap().hash, genesis_hash);
        assert!(tree.prev(genesis_index).is_none());
    }

    #[test]
    fn test_active_next_rejects_foreign_index() {
        let genesis = make_block(64000, Hash::zero(), 0);
        let mut tree = BlockTree::new(test_params(genesis.hash()));
        tree.connect_block(genesis, &[0], Hash::zero()).unwrap();

        // An index entry that is not part of this tree's active chain.
        let foreign = BlockIndex::new(&make_block(64000, Hash::zero(), 99).header, 0);
        assert!(tree.active_next(&foreign).is_none());
    }

    #[test]
    fn test_transaction_lookup() {
        let genesis = make_block(64000, Hash::zero(), 0);
        let cb = genesis.transactions[0].clone();
        let mut tree = BlockTree::new(test_params(genesis.hash()));
        let genesis_hash = tree.connect_block(genesis, &[7], Hash::zero()).unwrap();

        let lookup = tree.transaction_lookup(&cb.hash()).unwrap();
        assert_eq!(lookup.tx, cb);
        assert_eq!(lookup.block_hash, genesis_hash);
        assert_eq!(lookup.offset, 7);

        assert!(tree.transaction_lookup(&Hash::sha256d(b"missing")).is_none());
    }
}
