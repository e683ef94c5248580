//! Protocol constants inherited from the surrounding Basalt protocol.

use std::time::Duration;

/// Nominal spacing between consecutive blocks, in seconds.
pub const BLOCK_INTERVAL: u64 = 10;

/// Upper bound applied to the bandwidth-suggested gas limit when the
/// operator has not configured an explicit target.
pub const BLOCK_GAS_LIMIT_SOFT_CAP: u64 = 40_000_000;

/// How long a proposer may reasonably spend executing transactions while
/// packing a block. The bandwidth estimator scales its gas-limit
/// suggestions to fit this window.
pub const TOLERABLE_BLOCK_PACKING_TIME: Duration = Duration::from_millis(500);

/// Blocks older than this distance from the chain head are ignored by the
/// bandwidth estimator; replaying deep history says nothing about current
/// hardware throughput.
pub const MAX_BACKTRACKING_BLOCKS: u32 = 360;

/// A committed block older than this is considered catch-up traffic; log
/// writes for it may skip fsync.
pub const CATCH_UP_AGE: Duration = Duration::from_secs(24 * 60 * 60);
