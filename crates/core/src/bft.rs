//! Boundary to the BFT finality overlay.

use anyhow::Result;
use basalt_types::{BlockId, Header};

/// The finality vote engine. Past the FINALITY fork height it becomes
/// authoritative for best-chain selection and records finalized
/// checkpoints; before that it only vetoes blocks extending branches it
/// has abandoned.
pub trait BftEngine: Send + Sync {
    /// Whether a block whose parent is `parent_id` may be accepted at all.
    fn accepts(&self, parent_id: &BlockId) -> Result<bool>;

    /// Whether `header` should replace the current best chain head.
    /// Only meaningful past the FINALITY fork.
    fn select(&self, header: &Header) -> Result<bool>;

    /// Notifies the engine of a committed block. `packing` is true only
    /// for blocks produced by this node.
    fn commit_block(&self, header: &Header, packing: bool) -> Result<()>;

    /// Whether a block packed on top of `parent_id` should carry a
    /// finality vote.
    fn should_vote(&self, parent_id: &BlockId) -> Result<bool>;

    /// The latest finalized checkpoint.
    fn finalized(&self) -> BlockId;
}
