//! Boundary to the event/transfer log database.
//!
//! The log index lives outside chain state and is strictly best-effort:
//! the engine stops writing to it after the first failure instead of
//! blocking or corrupting block commits.

use basalt_types::{Block, Receipt};

/// A transactional batch of log writes.
pub trait LogWriter: Send {
    /// Indexes the events and transfers of `block`.
    fn write(&mut self, block: &Block, receipts: &[Receipt]) -> anyhow::Result<()>;

    /// Drops all entries for blocks numbered `from` and above.
    fn truncate(&mut self, from: u32) -> anyhow::Result<()>;

    fn commit(&mut self) -> anyhow::Result<()>;

    fn rollback(&mut self) -> anyhow::Result<()>;
}

pub trait LogDb: Send + Sync {
    fn new_writer(&self) -> Box<dyn LogWriter>;

    /// Writer with fsync disabled; used while replaying old blocks where
    /// durability of each individual batch does not matter.
    fn new_writer_sync_off(&self) -> Box<dyn LogWriter>;
}
