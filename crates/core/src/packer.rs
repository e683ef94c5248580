//! Boundary to the POA block packer.

use crate::state::StateStage;
use basalt_types::{Block, BlockSummary, Header, Receipt, Transaction};
use secp256k1::SecretKey;

#[derive(thiserror::Error, Debug)]
pub enum AdoptError {
    /// The block has no gas left for this transaction.
    #[error("block gas limit reached")]
    GasLimitReached,
    /// The transaction cannot be included yet (e.g. depends on a tx that
    /// is not on this chain); it stays in the pool.
    #[error("transaction not adoptable now")]
    NotAdoptableNow,
    /// The transaction is invalid on this chain and should be dropped
    /// from the pool once the block is committed.
    #[error(transparent)]
    Rejected(#[from] anyhow::Error),
}

impl AdoptError {
    pub fn is_gas_limit_reached(&self) -> bool {
        matches!(self, AdoptError::GasLimitReached)
    }

    pub fn is_not_adoptable_now(&self) -> bool {
        matches!(self, AdoptError::NotAdoptableNow)
    }
}

/// The packer's per-slot working object: adopts transactions one by one and
/// finally seals them into a signed block.
pub trait PackFlow: Send + Sync {
    /// Unix time (seconds) at which the scheduled slot opens.
    fn when(&self) -> u64;

    /// Height of the block this flow will produce.
    fn number(&self) -> u32;

    fn parent(&self) -> &Header;

    /// Total score the packed block will carry.
    fn total_score(&self) -> u64;

    /// Executes `tx` on the staged state and adds it to the block.
    fn adopt(&mut self, tx: &Transaction) -> Result<(), AdoptError>;

    /// Seals the adopted transactions into a signed block. `should_vote`
    /// attaches a BFT finality vote to the proposal.
    fn pack(
        self: Box<Self>,
        key: &SecretKey,
        conflicts: u32,
        should_vote: bool,
    ) -> anyhow::Result<(Block, Box<dyn StateStage>, Vec<Receipt>)>;
}

/// Plans and seals blocks for the local authority.
pub trait Packer: Send + Sync {
    /// Plans the next legal proposing slot on top of `parent`, no earlier
    /// than `base`. Fails when this node is not authorized for any
    /// upcoming slot in the current round.
    fn schedule(&self, parent: &BlockSummary, base: u64) -> anyhow::Result<Box<dyn PackFlow>>;

    /// Gas-limit target applied to subsequently scheduled flows.
    fn set_target_gas_limit(&self, limit: u64);
}
