//! Boundary to the stateless/stateful consensus rules.

use crate::state::StateStage;
use basalt_types::{Block, BlockSummary, Receipt};

#[derive(thiserror::Error, Debug)]
pub enum ConsensusError {
    /// The block's timestamp is ahead of local wall time; it may become
    /// valid later.
    #[error("block timestamp is in the future")]
    FutureBlock,
    /// The block violates a consensus rule outright; a protocol bug or
    /// adversarial input.
    #[error("consensus violation: {0}")]
    Critical(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ConsensusError {
    pub fn is_future(&self) -> bool {
        matches!(self, ConsensusError::FutureBlock)
    }

    pub fn is_critical(&self) -> bool {
        matches!(self, ConsensusError::Critical(_))
    }
}

/// Validates and executes blocks against their parent state.
pub trait ConsensusEngine: Send + Sync {
    /// Fully validates `block` against `parent` and executes its
    /// transactions. `now` is the caller's wall-clock sample (seconds);
    /// `conflicts` discriminates the state-trie partition when several
    /// blocks exist at the same height.
    ///
    /// Returns the staged state and the ordered receipts; the caller is
    /// responsible for committing the stage.
    fn process(
        &self,
        parent: &BlockSummary,
        block: &Block,
        now: u64,
        conflicts: u32,
    ) -> Result<(Box<dyn StateStage>, Vec<Receipt>), ConsensusError>;
}
