//! Hard checkpoints of stake modifier checksums, to ensure the locally
//! computed modifier history is deterministic across nodes.

use lumen_core::types::Network;

/// Mainnet checkpoints.
const MAINNET_CHECKPOINTS: &[(i32, u32)] = &[(0, 0xfd11f4e7)];

/// Testnet checkpoints.
const TESTNET_CHECKPOINTS: &[(i32, u32)] = &[(0, 0)];

/// Regression-test networks carry no checkpoints.
const REGTEST_CHECKPOINTS: &[(i32, u32)] = &[];

/// The checkpoint table for `network`.
pub fn stake_modifier_checkpoints(network: Network) -> &'static [(i32, u32)] {
    match network {
        Network::Main => MAINNET_CHECKPOINTS,
        Network::Test => TESTNET_CHECKPOINTS,
        Network::Regtest => REGTEST_CHECKPOINTS,
    }
}

/// Returns true when `height` carries no checkpoint or `checksum` matches it.
/// A mismatch means the local index disagrees with hard-coded history.
pub fn check_stake_modifier_checkpoints(network: Network, height: i32, checksum: u32) -> bool {
    match stake_modifier_checkpoints(network).iter().find(|(h, _)| *h == height) {
        Some((_, expected)) => checksum == *expected,
        None => true,
    }
}
