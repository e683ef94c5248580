//! The node runtime: wiring between the processor, the POA sealer and the
//! background loops, all cancelled through a single token.

mod bandwidth;
mod error;
mod future_blocks;
mod house_keeping;
mod log_worker;
mod metrics;
mod probe;
mod processor;
mod sealer;
mod stash;
mod stats;

#[cfg(test)]
mod tests;

pub use error::ProcessError;

use crate::bft::BftEngine;
use crate::chain::Repository;
use crate::comm::{Communicator, SyncItem};
use crate::consensus::ConsensusEngine;
use crate::logdb::LogDb;
use crate::packer::Packer;
use crate::pool::TxPool;
use basalt_config::NodeConfig;
use basalt_types::Block;
use bandwidth::Bandwidth;
use future_blocks::FutureBlocks;
use house_keeping::HouseKeeping;
use log_worker::LogWorker;
use processor::Processor;
use sealer::Sealer;
use secp256k1::SecretKey;
use stash::TxStash;
use stats::BlockStats;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Current wall time in seconds since the Unix epoch. Sampled once per
/// scheduling decision; block timestamps use the same scale.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// A running Basalt node core.
///
/// Every collaborator is injected; the node owns only the glue: the block
/// processor, the POA sealer, the tx stash and the house-keeping chores.
pub struct Node {
    config: NodeConfig,
    key: SecretKey,
    repo: Arc<dyn Repository>,
    bft: Arc<dyn BftEngine>,
    consensus: Arc<dyn ConsensusEngine>,
    packer: Arc<dyn Packer>,
    pool: Arc<dyn TxPool>,
    comm: Arc<dyn Communicator>,
    log_db: Option<Arc<dyn LogDb>>,
    stash_tree: sled::Tree,
}

impl Node {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: NodeConfig,
        key: SecretKey,
        repo: Arc<dyn Repository>,
        bft: Arc<dyn BftEngine>,
        consensus: Arc<dyn ConsensusEngine>,
        packer: Arc<dyn Packer>,
        pool: Arc<dyn TxPool>,
        comm: Arc<dyn Communicator>,
        log_db: Option<Arc<dyn LogDb>>,
        stash_tree: sled::Tree,
    ) -> Self {
        Node {
            config,
            key,
            repo,
            bft,
            consensus,
            packer,
            pool,
            comm,
            log_db,
            stash_tree,
        }
    }

    /// Runs the node until `cancel` fires, then drains and returns.
    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        let stash = Arc::new(TxStash::new(
            self.stash_tree.clone(),
            self.config.stash_capacity,
        ));
        let stashed = stash.load_all()?;
        if !stashed.is_empty() {
            tracing::info!(count = stashed.len(), "loaded stashed transactions");
        }
        self.pool.fill(stashed);

        let bandwidth = Bandwidth::default();
        let log_worker = LogWorker::spawn();
        let processor = Arc::new(Processor::new(
            self.repo.clone(),
            self.bft.clone(),
            self.consensus.clone(),
            self.pool.clone(),
            self.log_db.clone(),
            log_worker,
            bandwidth.clone(),
            self.config.forks.finality,
        )?);
        let future_blocks = FutureBlocks::new(self.config.future_blocks_capacity);

        let mut tasks = JoinSet::new();

        tasks.spawn(sync_loop(
            self.processor_deps(&processor, &future_blocks),
            cancel.clone(),
        ));

        let house_keeping = HouseKeeping::new(
            processor.clone(),
            self.repo.clone(),
            self.comm.clone(),
            future_blocks.clone(),
            self.config.ntp_server.clone(),
        );
        tasks.spawn(house_keeping.run(cancel.clone()));

        tasks.spawn(stash_loop(self.pool.clone(), stash, cancel.clone()));

        let sealer = Sealer::new(
            processor.clone(),
            self.packer.clone(),
            self.repo.clone(),
            self.comm.clone(),
            bandwidth,
            self.key,
            self.config.target_gas_limit,
        );
        tasks.spawn(sealer.run(cancel.clone()));

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                if err.is_panic() {
                    tracing::error!(%err, "node task panicked");
                }
            }
        }
        processor.close().await;
        Ok(())
    }

    fn processor_deps(
        &self,
        processor: &Arc<Processor>,
        future_blocks: &FutureBlocks,
    ) -> SyncLoopDeps {
        SyncLoopDeps {
            processor: processor.clone(),
            repo: self.repo.clone(),
            comm: self.comm.clone(),
            future_blocks: future_blocks.clone(),
        }
    }
}

struct SyncLoopDeps {
    processor: Arc<Processor>,
    repo: Arc<dyn Repository>,
    comm: Arc<dyn Communicator>,
    future_blocks: FutureBlocks,
}

/// Drains the sync protocol's block stream serially; draining speed is the
/// transport's back-pressure.
async fn sync_loop(deps: SyncLoopDeps, cancel: CancellationToken) {
    let mut feed = deps.comm.sync_stream();
    let mut stats = BlockStats::default();
    let mut report_ticker = tokio::time::interval(Duration::from_secs(2));
    report_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            item = feed.recv() => match item {
                None => break,
                Some(SyncItem::KeepAlive) => continue,
                Some(SyncItem::Block(block)) => {
                    match deps.processor.process_block(&block, &mut stats).await {
                        Ok(_) => {}
                        Err(err) => {
                            handle_process_failure(&block, err, &deps.future_blocks, &mut stats);
                        }
                    }
                }
            },
            _ = report_ticker.tick() => {
                if !stats.is_empty() {
                    stats.report(&deps.repo.best_summary().header);
                }
            }
        }
    }
    if !stats.is_empty() {
        stats.report(&deps.repo.best_summary().header);
    }
    tracing::trace!("stopping sync loop");
}

/// Persists transactions the pool flags as non-executable so they survive
/// a restart.
async fn stash_loop(pool: Arc<dyn TxPool>, stash: Arc<TxStash>, cancel: CancellationToken) {
    let mut events = pool.subscribe();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => {
                    if event.executable == Some(false) {
                        match stash.save(&event.tx) {
                            Ok(()) => {
                                tracing::debug!(hash = %event.tx.hash(), "stashed non-executable tx");
                            }
                            Err(err) => tracing::warn!(%err, "failed to stash tx"),
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "tx event subscriber lagging");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
    tracing::trace!("stopping tx stash loop");
}

/// Shared failure policy of the block-feeding loops: park what may succeed
/// later, drop and report the rest.
pub(crate) fn handle_process_failure(
    block: &Arc<Block>,
    err: ProcessError,
    future_blocks: &FutureBlocks,
    stats: &mut BlockStats,
) {
    match err {
        // A future-timestamp block already has its parent stored, so a
        // later replay can only get further; park it unconditionally.
        ProcessError::FutureBlock => {
            future_blocks.set(block.clone());
            stats.update_queued(1);
            tracing::debug!(id = %block.id(), "block queued for later processing");
        }
        // Both of these mean the parent is not stored; the block is worth
        // keeping only when the parent itself is already parked.
        ProcessError::TemporarilyUnprocessable | ProcessError::ParentMissing => {
            if future_blocks.contains(&block.header.parent_id) {
                future_blocks.set(block.clone());
                stats.update_queued(1);
                tracing::debug!(id = %block.id(), "block queued behind its parent");
            } else {
                tracing::debug!(
                    id = %block.id(),
                    parent = %block.header.parent_id,
                    "dropped block with unknown parent"
                );
            }
        }
        ProcessError::BftRejected => {
            stats.update_ignored(1);
            tracing::debug!(id = %block.id(), "block extends an abandoned branch");
        }
        ProcessError::Critical(reason) => {
            let header = &block.header;
            tracing::error!(
                id = %block.id(),
                number = header.number(),
                parent = %header.parent_id,
                timestamp = header.timestamp,
                gas_used = header.gas_used,
                total_score = header.total_score,
                %reason,
                "block violates consensus rules"
            );
        }
        ProcessError::Transient(err) => {
            let chain = format!("{err:#}");
            tracing::error!(err = %chain, id = %block.id(), "failed to process block");
        }
        ProcessError::Fatal(err) => {
            let chain = format!("{err:#}");
            tracing::error!(err = %chain, id = %block.id(), "failed to commit block");
        }
    }
}
