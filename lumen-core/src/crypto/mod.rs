//! Hashing primitives and compact-difficulty conversions for Lumen.

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A 32-byte hash output.
///
/// The derived `Ord` is byte-lexicographic and exists for container use only.
/// Consensus comparisons treat a hash as a little-endian 256-bit integer; use
/// [`Hash::to_u256`] for those.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// Creates a new zero-initialized hash.
    pub fn zero() -> Self {
        Hash([0u8; 32])
    }

    /// Creates a hash from a byte slice, returning `None` on length mismatch.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() == 32 {
            let mut hash = [0u8; 32];
            hash.copy_from_slice(bytes);
            Some(Self(hash))
        } else {
            None
        }
    }

    /// Parses a hash from a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes).ok_or(hex::FromHexError::InvalidStringLength)
    }

    /// Returns the hash as a byte slice.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Computes the double-SHA256 hash of the given data.
    pub fn sha256d(data: &[u8]) -> Self {
        let first = Sha256::digest(data);
        let second = Sha256::digest(first);
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&second);
        Hash(hash)
    }

    /// Interprets the 32 bytes as a little-endian 256-bit integer.
    pub fn to_u256(&self) -> U256 {
        U256::from_little_endian(&self.0)
    }

    /// Builds a hash from the little-endian representation of a 256-bit integer.
    pub fn from_u256(value: U256) -> Self {
        let mut bytes = [0u8; 32];
        value.to_little_endian(&mut bytes);
        Hash(bytes)
    }

    /// Returns true if every byte is zero.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl Default for Hash {
    fn default() -> Self {
        Hash::zero()
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Incremental double-SHA256 writer over a little-endian, unpadded byte
/// layout. Integers are appended in declared width without length prefixes.
#[derive(Default)]
pub struct HashWriter {
    inner: Sha256,
}

impl HashWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    /// Appends a `u32` in little-endian order.
    pub fn write_u32(&mut self, value: u32) {
        self.inner.update(value.to_le_bytes());
    }

    /// Appends a `u64` in little-endian order.
    pub fn write_u64(&mut self, value: u64) {
        self.inner.update(value.to_le_bytes());
    }

    /// Appends an `i32` in little-endian order.
    pub fn write_i32(&mut self, value: i32) {
        self.inner.update(value.to_le_bytes());
    }

    /// Appends the 32 raw bytes of a hash.
    pub fn write_hash(&mut self, hash: &Hash) {
        self.inner.update(hash.as_bytes());
    }

    /// Finishes the stream and returns the double-SHA256 digest.
    pub fn finalize(self) -> Hash {
        let first = self.inner.finalize();
        let second = Sha256::digest(first);
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&second);
        Hash(hash)
    }
}

/// Expands a compact difficulty encoding (`nBits`) into a 256-bit target.
///
/// Format: `[exponent (1 byte)][mantissa (3 bytes)]` with the mantissa sign
/// bit masked off. Bits shifted past 256 are dropped.
pub fn compact_to_target(bits: u32) -> U256 {
    let exponent = (bits >> 24) as usize;
    let mantissa = bits & 0x007f_ffff;
    if exponent <= 3 {
        U256::from(mantissa >> (8 * (3 - exponent)))
    } else {
        let shift = 8 * (exponent - 3);
        if shift >= 256 {
            U256::zero()
        } else {
            U256::from(mantissa) << shift
        }
    }
}

/// Converts a 256-bit target into its compact encoding. Reverse of
/// [`compact_to_target`].
pub fn target_to_compact(target: U256) -> u32 {
    let mut size = (target.bits() + 7) / 8;
    let mut compact = if size <= 3 {
        (target.low_u64() << (8 * (3 - size))) as u32
    } else {
        (target >> (8 * (size - 3))).low_u64() as u32
    };

    // If the mantissa sign bit is set, push it into the exponent instead.
    if compact & 0x0080_0000 != 0 {
        compact >>= 8;
        size += 1;
    }

    compact | ((size as u32) << 24)
}

/// Converts a compact difficulty encoding to the conventional floating-point
/// difficulty, normalized so that the minimum-difficulty target is 1.0.
pub fn difficulty_from_bits(bits: u32) -> f64 {
    let mut shift = (bits >> 24) & 0xff;
    let mut diff = 65535.0 / (bits & 0x00ff_ffff) as f64;
    while shift < 29 {
        diff *= 256.0;
        shift += 1;
    }
    while shift > 29 {
        diff /= 256.0;
        shift -= 1;
    }
    diff
}
