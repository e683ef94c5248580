//! Engine tests against the in-memory collaborators.

mod node_run;
mod process;

use super::bandwidth::Bandwidth;
use super::error::ProcessError;
use super::log_worker::LogWorker;
use super::processor::Processor;
use super::stats::BlockStats;
use crate::testing::{MemLogDb, MemPool, MemRepository, MockBft, TestChain, TestConsensus};
use basalt_types::Block;
use std::sync::Arc;

/// A processor wired to in-memory collaborators on a fresh chain.
pub(super) struct Harness {
    pub(super) repo: Arc<MemRepository>,
    pub(super) bft: Arc<MockBft>,
    pub(super) consensus: Arc<TestConsensus>,
    pub(super) pool: Arc<MemPool>,
    pub(super) log_db: Arc<MemLogDb>,
    pub(super) processor: Arc<Processor>,
    pub(super) chain: TestChain,
}

impl Harness {
    /// Must be created inside a tokio runtime (the log worker spawns).
    pub(super) fn new() -> Self {
        Self::with_finality(u32::MAX)
    }

    pub(super) fn with_finality(finality: u32) -> Self {
        let chain = TestChain::new();
        let repo = Arc::new(MemRepository::new(chain.genesis().clone()));
        let bft = Arc::new(MockBft::new());
        let consensus = Arc::new(TestConsensus::new());
        let pool = Arc::new(MemPool::new());
        let log_db = Arc::new(MemLogDb::new());
        let processor = Arc::new(
            Processor::new(
                repo.clone(),
                bft.clone(),
                consensus.clone(),
                pool.clone(),
                Some(log_db.clone()),
                LogWorker::spawn(),
                Bandwidth::default(),
                finality,
            )
            .expect("fresh repository"),
        );
        Harness {
            repo,
            bft,
            consensus,
            pool,
            log_db,
            processor,
            chain,
        }
    }

    pub(super) async fn process(&self, block: &Block) -> Result<bool, ProcessError> {
        let mut stats = BlockStats::default();
        self.processor
            .process_block(&Arc::new(block.clone()), &mut stats)
            .await
    }
}
