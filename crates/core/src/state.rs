//! Staged state produced by consensus execution.

use basalt_types::H256;

/// State changes of one processed block, staged in memory until the engine
/// decides the block is acceptable.
pub trait StateStage: Send {
    /// Persists the staged changes, returning the resulting state root.
    fn commit(self: Box<Self>) -> anyhow::Result<H256>;
}
