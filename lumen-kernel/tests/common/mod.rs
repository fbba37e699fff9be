#![allow(dead_code)]

use lumen_core::crypto::Hash;
use lumen_core::types::{
    Block, BlockHeader, ConsensusParams, Network, OutPoint, Transaction, TxInput, TxOutput, COIN,
};
use lumen_kernel::{BlockTree, ChainAdapter};

/// Small-scale parameters: one modifier interval every 64 seconds, blocks
/// every 16, a four-block proof-of-work prefix.
pub fn test_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Regtest,
        stake_min_age: 600,
        modifier_interval: 64,
        target_spacing: 16,
        modifier_interval_ratio: 3,
        last_pow_block: 4,
        fork_height_2: 0,
        genesis_hash: Hash::zero(),
        pi: std::f64::consts::PI,
    }
}

/// Genesis time aligned to the test modifier interval.
pub const GENESIS_TIME: u32 = 6_400_000;

pub fn coinbase(time: u32, tag: u32) -> Transaction {
    Transaction {
        time,
        inputs: vec![TxInput { prevout: OutPoint::null() }],
        outputs: vec![TxOutput {
            value: 50 * COIN,
            script_pubkey: tag.to_le_bytes().to_vec(),
        }],
    }
}

/// A coinstake shell: real prevout, empty first output. Fixture blocks do
/// not carry verifiable kernels; the tree does not check them.
pub fn dummy_coinstake(time: u32, tag: u32) -> Transaction {
    Transaction {
        time,
        inputs: vec![TxInput {
            prevout: OutPoint::new(Hash::sha256d(&tag.to_le_bytes()), 0),
        }],
        outputs: vec![
            TxOutput { value: 0, script_pubkey: vec![] },
            TxOutput { value: COIN, script_pubkey: tag.to_le_bytes().to_vec() },
        ],
    }
}

pub fn make_block(time: u32, prev: Hash, nonce: u32, transactions: Vec<Transaction>) -> Block {
    Block {
        header: BlockHeader {
            version: 1,
            prev_block_hash: prev,
            merkle_root: Hash::sha256d(&nonce.to_le_bytes()),
            time,
            bits: 0x1d00ffff,
            nonce,
        },
        transactions,
    }
}

/// Grows a single active chain block by block, running the stake-modifier
/// state machine through `BlockTree::connect_block`.
pub struct ChainBuilder {
    pub tree: BlockTree,
    time: i64,
    counter: u32,
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self::with_params(test_params())
    }

    pub fn with_params(mut params: ConsensusParams) -> Self {
        let genesis = make_block(GENESIS_TIME, Hash::zero(), 0, vec![coinbase(GENESIS_TIME, 0)]);
        params.genesis_hash = genesis.hash();
        let mut tree = BlockTree::new(params);
        tree.connect_block(genesis, &[0], Hash::zero()).unwrap();
        Self { tree, time: GENESIS_TIME as i64, counter: 0 }
    }

    pub fn tip_hash(&self) -> Hash {
        self.tree.tip().unwrap().hash
    }

    pub fn tip_time(&self) -> i64 {
        self.time
    }

    /// Appends a staking block `spacing` seconds after the tip.
    pub fn add_block(&mut self, spacing: i64) -> Hash {
        self.add_block_with_txs(spacing, vec![], &[])
    }

    /// Appends a staking block carrying `extra` transactions at the given
    /// offsets within the transaction area.
    pub fn add_block_with_txs(
        &mut self,
        spacing: i64,
        extra: Vec<Transaction>,
        extra_offsets: &[u32],
    ) -> Hash {
        self.counter += 1;
        self.time += spacing;
        let time = self.time as u32;

        let mut transactions = vec![coinbase(time, self.counter), dummy_coinstake(time, self.counter)];
        let mut offsets = vec![0u32, 120];
        transactions.extend(extra);
        offsets.extend_from_slice(extra_offsets);

        let block = make_block(time, self.tip_hash(), self.counter, transactions);
        let proof = Hash::sha256d(&[b"proof".as_slice(), &self.counter.to_le_bytes()].concat());
        self.tree.connect_block(block, &offsets, proof).unwrap()
    }

    /// Appends `count` staking blocks at the default spacing.
    pub fn extend(&mut self, count: usize) {
        let spacing = self.tree.params().target_spacing;
        for _ in 0..count {
            self.add_block(spacing);
        }
    }
}
