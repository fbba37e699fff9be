//! Core data structures for the Lumen blockchain.

use crate::crypto::{Hash, HashWriter};
use serde::{Deserialize, Serialize};

/// Number of base units in one LMN.
pub const COIN: i64 = 100_000_000;

/// One hundredth of a coin, the unit of cent-second coin-age accumulation.
pub const CENT: i64 = 1_000_000;

/// Serialized size of a block header in bytes.
pub const BLOCK_HEADER_SIZE: u32 = 80;

/// Block-index flag: the block stakes (carries a coinstake transaction).
pub const BLOCK_PROOF_OF_STAKE: u32 = 1 << 0;

/// Block-index flag: the stake entropy bit contributed to modifiers.
pub const BLOCK_STAKE_ENTROPY: u32 = 1 << 1;

/// Block-index flag: a stake modifier was generated on this block.
pub const BLOCK_STAKE_MODIFIER: u32 = 1 << 2;

/// Identifies a specific transaction output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct OutPoint {
    /// Hash of the transaction holding the output.
    pub hash: Hash,
    /// Output index within that transaction.
    pub n: u32,
}

impl OutPoint {
    /// Creates an outpoint referencing output `n` of transaction `hash`.
    pub fn new(hash: Hash, n: u32) -> Self {
        Self { hash, n }
    }

    /// The null outpoint marks coinbase inputs.
    pub fn null() -> Self {
        Self { hash: Hash::zero(), n: u32::MAX }
    }

    /// Returns true for the coinbase marker outpoint.
    pub fn is_null(&self) -> bool {
        self.hash.is_zero() && self.n == u32::MAX
    }
}

/// A transaction input references an output from a previous transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxInput {
    /// Reference to the output being spent.
    pub prevout: OutPoint,
}

/// A transaction output carries an amount and a locking script.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxOutput {
    /// Amount in base units.
    pub value: i64,
    /// Locking script; opaque to the consensus kernel.
    pub script_pubkey: Vec<u8>,
}

impl TxOutput {
    /// An empty output has no value and no script. The first output of a
    /// coinstake transaction is empty by construction.
    pub fn is_empty(&self) -> bool {
        self.value == 0 && self.script_pubkey.is_empty()
    }
}

/// The projection of a transaction the consensus kernel consumes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    /// Transaction timestamp (seconds since Unix epoch).
    pub time: u32,
    /// List of inputs.
    pub inputs: Vec<TxInput>,
    /// List of outputs.
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Returns true if this is a coinbase transaction (single null-prevout
    /// input).
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    /// Returns true if this is a coinstake transaction: a real first input
    /// and at least two outputs, the first of which is empty.
    pub fn is_coinstake(&self) -> bool {
        !self.inputs.is_empty()
            && !self.inputs[0].prevout.is_null()
            && self.outputs.len() >= 2
            && self.outputs[0].is_empty()
    }

    /// Transaction identifier: double-SHA256 over the projected fields.
    pub fn hash(&self) -> Hash {
        let mut writer = HashWriter::new();
        writer.write_u32(self.time);
        writer.write_u32(self.inputs.len() as u32);
        for input in &self.inputs {
            writer.write_hash(&input.prevout.hash);
            writer.write_u32(input.prevout.n);
        }
        writer.write_u32(self.outputs.len() as u32);
        for output in &self.outputs {
            writer.write_u64(output.value as u64);
            writer.write_u32(output.script_pubkey.len() as u32);
            writer.write_bytes(&output.script_pubkey);
        }
        writer.finalize()
    }
}

/// An 80-byte block header.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block format version.
    pub version: i32,
    /// Hash of the predecessor block.
    pub prev_block_hash: Hash,
    /// Merkle root over the block's transactions.
    pub merkle_root: Hash,
    /// Block timestamp (seconds since Unix epoch).
    pub time: u32,
    /// Compact difficulty target.
    pub bits: u32,
    /// Proof-of-work nonce; unused by staked blocks.
    pub nonce: u32,
}

impl BlockHeader {
    /// Block hash: double-SHA256 of the 80-byte little-endian layout.
    pub fn hash(&self) -> Hash {
        let mut writer = HashWriter::new();
        writer.write_i32(self.version);
        writer.write_hash(&self.prev_block_hash);
        writer.write_hash(&self.merkle_root);
        writer.write_u32(self.time);
        writer.write_u32(self.bits);
        writer.write_u32(self.nonce);
        writer.finalize()
    }
}

/// A block: header plus the kernel's projection of its transactions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    /// The block header.
    pub header: BlockHeader,
    /// Transactions in block order.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Block hash, taken over the header.
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Block timestamp.
    pub fn time(&self) -> i64 {
        self.header.time as i64
    }

    /// A block stakes when its second transaction is a coinstake.
    pub fn is_proof_of_stake(&self) -> bool {
        self.transactions.len() > 1 && self.transactions[1].is_coinstake()
    }

    /// The entropy bit contributed to stake modifiers: the lowest bit of the
    /// block hash.
    pub fn stake_entropy_bit(&self) -> u8 {
        self.hash().as_bytes()[0] & 1
    }
}

/// In-memory index entry for a connected block.
///
/// Predecessors are referenced by hash; the owning arena resolves them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockIndex {
    /// Hash of this block.
    pub hash: Hash,
    /// Hash of the predecessor; `None` at genesis.
    pub prev: Option<Hash>,
    /// Height of this block in the chain.
    pub height: i32,
    /// Block timestamp (seconds since Unix epoch).
    pub time: i64,
    /// Compact difficulty target of this block.
    pub bits: u32,
    /// Stake-related flag bits.
    pub flags: u32,
    /// The stake modifier in effect at this block. When
    /// [`BlockIndex::generated_stake_modifier`] is set this block emitted the
    /// value; otherwise it is inherited from the nearest generating ancestor.
    pub stake_modifier: u64,
    /// Kernel hash for staked blocks; zero for proof-of-work blocks.
    pub hash_proof_of_stake: Hash,
    /// Checksum chained from the predecessor's checksum.
    pub stake_modifier_checksum: u32,
}

impl BlockIndex {
    /// Builds an index entry for `header` at `height`, with all stake fields
    /// cleared.
    pub fn new(header: &BlockHeader, height: i32) -> Self {
        Self {
            hash: header.hash(),
            prev: if height == 0 { None } else { Some(header.prev_block_hash) },
            height,
            time: header.time as i64,
            bits: header.bits,
            flags: 0,
            stake_modifier: 0,
            hash_proof_of_stake: Hash::zero(),
            stake_modifier_checksum: 0,
        }
    }

    /// True when a stake modifier was generated on this block.
    pub fn generated_stake_modifier(&self) -> bool {
        self.flags & BLOCK_STAKE_MODIFIER != 0
    }

    /// Stores the stake modifier, marking it generated or inherited.
    pub fn set_stake_modifier(&mut self, modifier: u64, generated: bool) {
        self.stake_modifier = modifier;
        if generated {
            self.flags |= BLOCK_STAKE_MODIFIER;
        }
    }

    /// The entropy bit this block contributes to future modifiers.
    pub fn stake_entropy_bit(&self) -> u8 {
        ((self.flags & BLOCK_STAKE_ENTROPY) >> 1) as u8
    }

    /// Records the entropy bit. Only the lowest bit of `bit` is used.
    pub fn set_stake_entropy_bit(&mut self, bit: u8) {
        self.flags &= !BLOCK_STAKE_ENTROPY;
        if bit & 1 != 0 {
            self.flags |= BLOCK_STAKE_ENTROPY;
        }
    }

    /// True when the proof-of-stake flag is set.
    pub fn is_proof_of_stake(&self) -> bool {
        self.flags & BLOCK_PROOF_OF_STAKE != 0
    }

    /// Marks the block as staked.
    pub fn set_proof_of_stake(&mut self) {
        self.flags |= BLOCK_PROOF_OF_STAKE;
    }
}

/// Network discriminant; selects hard-coded checkpoint tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Network {
    /// Production network.
    Main,
    /// Public test network.
    Test,
    /// Local regression-test network; no checkpoints.
    Regtest,
}

/// Consensus parameters consumed by the kernel. Immutable for the lifetime
/// of a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusParams {
    /// Which network these parameters describe.
    pub network: Network,
    /// Minimum UTXO age in seconds for staking and modifier participation.
    pub stake_min_age: i64,
    /// Alignment period in seconds between new stake modifiers.
    pub modifier_interval: i64,
    /// Expected seconds per block.
    pub target_spacing: i64,
    /// Shapes the geometric selection-section lengths.
    pub modifier_interval_ratio: i64,
    /// Height at or below which blocks are treated as proof-of-work.
    pub last_pow_block: i32,
    /// Height enabling the negative-stake-time fix.
    pub fork_height_2: i32,
    /// Hash of the genesis block.
    pub genesis_hash: Hash,
    /// The circle constant, fixed across nodes.
    pub pi: f64,
}

impl Default for ConsensusParams {
    /// Private-network defaults. Embedding nodes supply real network
    /// parameters; the checkpoint table is selected by `network`.
    fn default() -> Self {
        Self {
            network: Network::Regtest,
            stake_min_age: 8 * 60 * 60,
            modifier_interval: 10240,
            target_spacing: 64,
            modifier_interval_ratio: 3,
            last_pow_block: 0,
            fork_height_2: 0,
            genesis_hash: Hash::zero(),
            pi: std::f64::consts::PI,
        }
    }
}
