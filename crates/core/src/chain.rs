//! Read/write access to the block repository.

use anyhow::{anyhow, Result};
use basalt_types::{Block, BlockId, BlockSummary, Header, Receipt};
use std::cmp::Ordering;
use tokio::sync::watch;

/// The node's view on persistent chain storage.
///
/// A repository stores every admitted block (canonical or not) together with
/// its receipts, tracks the best chain head, and answers chain-view queries
/// ("which block sits at height N on the chain ending at this head?").
pub trait Repository: Send + Sync {
    /// Tag identifying this chain, baked into the genesis id.
    fn chain_tag(&self) -> u8;

    fn genesis_id(&self) -> BlockId;

    /// The largest block number ever stored.
    fn max_block_num(&self) -> Result<u32>;

    /// Number of blocks already stored at `number`.
    fn scan_conflicts(&self, number: u32) -> Result<u32>;

    /// Lightweight handle of a stored block, `None` if unknown.
    fn block_summary(&self, id: &BlockId) -> Result<Option<BlockSummary>>;

    /// Summary of the current best block. At least the genesis block is
    /// always present, so this cannot fail.
    fn best_summary(&self) -> BlockSummary;

    fn block(&self, id: &BlockId) -> Result<Option<Block>>;

    fn receipts(&self, id: &BlockId) -> Result<Option<Vec<Receipt>>>;

    /// Summaries of all blocks stored at `number`.
    fn summaries_at(&self, number: u32) -> Result<Vec<BlockSummary>>;

    /// Stores `block` with its receipts. `conflicts` is the discriminator
    /// recorded in the block's summary; `become_best` advances the best
    /// pointer to this block.
    fn add_block(
        &self,
        block: &Block,
        receipts: &[Receipt],
        conflicts: u32,
        become_best: bool,
    ) -> Result<()>;

    /// Id of the block at `number` on the chain ending at `head`, `None`
    /// when `number` is beyond the head or the head is unknown.
    fn chain_block_id(&self, head: &BlockId, number: u32) -> Result<Option<BlockId>>;

    /// Watch channel that observes every best-block change.
    fn best_ticker(&self) -> watch::Receiver<BlockId>;

    /// Whether `new` makes a better chain head than `best`.
    ///
    /// Total score decides; ties are broken by id so the relation is a
    /// strict weak order that can only tie when the ids are equal.
    fn better_than(&self, new: &Header, best: &Header) -> bool {
        match new.total_score.cmp(&best.total_score) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => new.id() < best.id(),
        }
    }

    /// Ids on the chain ending at `head` that are not on the chain ending
    /// at `other`, in ascending block-number order.
    ///
    /// This is the side branch after a reorg from `head`'s chain to
    /// `other`'s chain (and the backfill list in the other direction).
    fn exclude(&self, head: &BlockId, other: &BlockId) -> Result<Vec<BlockId>> {
        let mut side = Vec::new();
        let mut cursor = *head;
        loop {
            if self.chain_block_id(other, cursor.number())? == Some(cursor) {
                break;
            }
            if cursor.number() == 0 {
                return Err(anyhow!(
                    "chains {head} and {other} do not share a genesis block"
                ));
            }
            let summary = self
                .block_summary(&cursor)?
                .ok_or_else(|| anyhow!("missing summary for {cursor} while walking side branch"))?;
            side.push(cursor);
            cursor = summary.header.parent_id;
        }
        side.reverse();
        Ok(side)
    }
}
