//! Configuration types and protocol constants for the Basalt node.

pub mod constants;

use serde::Deserialize;

/// Heights at which consensus rule changes activate.
#[derive(Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ForkConfig {
    /// Height from which the BFT engine authoritatively selects the best
    /// chain and records finalized checkpoints. `u32::MAX` disables the
    /// overlay (score-only fork choice).
    pub finality: u32,
}

impl Default for ForkConfig {
    fn default() -> Self {
        ForkConfig { finality: u32::MAX }
    }
}

/// Operator-tunable node settings. Everything here has a working default;
/// the surrounding daemon overrides fields from its CLI/config file.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct NodeConfig {
    /// Explicit gas-limit target for locally packed blocks. When unset the
    /// node adapts the target to the observed execution bandwidth.
    pub target_gas_limit: Option<u64>,
    /// Maximum number of non-executable transactions kept in the on-disk
    /// stash.
    pub stash_capacity: usize,
    /// Maximum number of temporarily unprocessable blocks kept in memory
    /// for later replay.
    pub future_blocks_capacity: usize,
    /// NTP server probed for clock drift. `None` disables the probe.
    pub ntp_server: Option<String>,
    pub forks: ForkConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            target_gas_limit: None,
            stash_capacity: 1000,
            future_blocks_capacity: 1024,
            ntp_server: None,
            forks: ForkConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_deserialize_from_empty_document() {
        let config: NodeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, NodeConfig::default());
        assert_eq!(config.forks.finality, u32::MAX);
    }
}
