use crate::bft::BftEngine;
use crate::chain::Repository;
use crate::consensus::ConsensusEngine;
use crate::logdb::{LogDb, LogWriter};
use crate::node::bandwidth::Bandwidth;
use crate::node::error::ProcessError;
use crate::node::log_worker::LogWorkerHandle;
use crate::node::metrics::{self, BlockOrigin};
use crate::node::stats::BlockStats;
use crate::node::unix_now;
use crate::packer::PackFlow;
use crate::pool::TxPool;
use crate::state::StateStage;
use anyhow::Context as _;
use basalt_config::constants::CATCH_UP_AGE;
use basalt_types::{Block, BlockSummary, Header, Receipt};
use secp256k1::SecretKey;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// The single authoritative path by which any block, received or locally
/// packed, becomes part of the node's view.
///
/// One async mutex serializes the whole operation; it also owns the
/// high-water mark of admitted block numbers, so admissibility decisions
/// and commits cannot interleave.
pub(crate) struct Processor {
    repo: Arc<dyn Repository>,
    bft: Arc<dyn BftEngine>,
    consensus: Arc<dyn ConsensusEngine>,
    pool: Arc<dyn TxPool>,
    log_db: Option<Arc<dyn LogDb>>,
    log_worker: LogWorkerHandle,
    /// Latched on the first log-database failure; log writes stay disabled
    /// for the rest of the process lifetime.
    log_db_failed: AtomicBool,
    bandwidth: Bandwidth,
    /// FINALITY fork height.
    finality: u32,
    inner: Mutex<ProcessorInner>,
}

struct ProcessorInner {
    /// Largest block number ever admitted.
    max_block_num: u32,
}

/// Outcome of a successful local pack, for the sealer to broadcast and log.
pub(crate) struct PackedBlock {
    pub(crate) block: Arc<Block>,
    pub(crate) exec_elapsed: Duration,
    pub(crate) commit_elapsed: Duration,
    pub(crate) real_elapsed: Duration,
}

impl Processor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        repo: Arc<dyn Repository>,
        bft: Arc<dyn BftEngine>,
        consensus: Arc<dyn ConsensusEngine>,
        pool: Arc<dyn TxPool>,
        log_db: Option<Arc<dyn LogDb>>,
        log_worker: LogWorkerHandle,
        bandwidth: Bandwidth,
        finality: u32,
    ) -> anyhow::Result<Self> {
        let max_block_num = repo.max_block_num()?;
        Ok(Processor {
            repo,
            bft,
            consensus,
            pool,
            log_db,
            log_worker,
            log_db_failed: AtomicBool::new(false),
            bandwidth,
            finality,
            inner: Mutex::new(ProcessorInner { max_block_num }),
        })
    }

    pub(crate) fn log_db_failed(&self) -> bool {
        self.log_db_failed.load(Ordering::Relaxed)
    }

    /// Drains and stops the log worker.
    pub(crate) async fn close(&self) {
        self.log_worker.close().await;
    }

    /// Feeds one received block through admission, consensus, commit and
    /// fork reconciliation. Returns whether the block became the new best.
    ///
    /// A block that is already stored returns `Ok(false)` and counts as
    /// ignored; the queueable categories surface as errors for the caller
    /// to park in the future-block cache.
    pub(crate) async fn process_block(
        &self,
        block: &Arc<Block>,
        stats: &mut BlockStats,
    ) -> Result<bool, ProcessError> {
        let started = Instant::now();
        let mut inner = self.inner.lock().await;
        let number = block.number();

        if number > inner.max_block_num.saturating_add(1) {
            return Err(ProcessError::TemporarilyUnprocessable);
        }
        let conflicts = if number == inner.max_block_num.wrapping_add(1) {
            // New height; nothing can conflict yet.
            0
        } else {
            let conflicts = self
                .repo
                .scan_conflicts(number)
                .map_err(ProcessError::Fatal)?;
            if conflicts > 0
                && self
                    .repo
                    .block_summary(&block.id())
                    .map_err(ProcessError::Fatal)?
                    .is_some()
            {
                stats.update_ignored(1);
                metrics::count_ignored();
                tracing::debug!(id = %block.id(), "block already known");
                return Ok(false);
            }
            conflicts
        };

        let result = self
            .process_admitted(&mut inner, block, conflicts, started, stats)
            .await;
        match &result {
            Ok(_) => metrics::count_processed(BlockOrigin::Received, true),
            Err(err) if err.is_queueable() => {}
            Err(ProcessError::BftRejected) => metrics::count_ignored(),
            Err(_) => metrics::count_processed(BlockOrigin::Received, false),
        }
        result
    }

    async fn process_admitted(
        &self,
        inner: &mut ProcessorInner,
        block: &Arc<Block>,
        conflicts: u32,
        started: Instant,
        stats: &mut BlockStats,
    ) -> Result<bool, ProcessError> {
        let parent = self
            .repo
            .block_summary(&block.header.parent_id)
            .map_err(ProcessError::Fatal)?
            .ok_or(ProcessError::ParentMissing)?;

        if !self
            .bft
            .accepts(&block.header.parent_id)
            .map_err(ProcessError::Fatal)?
        {
            return Err(ProcessError::BftRejected);
        }

        let now = unix_now();
        let (stage, receipts) = self.consensus.process(&parent, block, now, conflicts)?;
        let receipts = Arc::new(receipts);
        let exec_elapsed = started.elapsed();

        let old_best = self.repo.best_summary();
        let becomes_best = if use_bft_select(&block.header, &old_best.header, self.finality) {
            self.bft.select(&block.header).map_err(ProcessError::Fatal)?
        } else {
            self.repo.better_than(&block.header, &old_best.header)
        };

        let commit_started = Instant::now();
        self.commit_block(block, &receipts, stage, conflicts, becomes_best, false)
            .await?;
        let commit_elapsed = commit_started.elapsed();

        // The high-water mark only advances once the block actually stuck.
        if block.number() > inner.max_block_num {
            inner.max_block_num = block.number();
        }

        if conflicts > 0 {
            self.check_double_signing(block);
        }
        if becomes_best {
            self.reconcile_fork(&old_best, block);
        }

        let real_elapsed = started.elapsed();
        stats.update_processed(
            1,
            block.transactions.len(),
            exec_elapsed,
            commit_elapsed,
            real_elapsed,
            block.header.gas_used,
        );
        if let Some(estimate) = self.bandwidth.update(&block.header, real_elapsed, now) {
            metrics::record_bandwidth(estimate);
        }
        Ok(becomes_best)
    }

    /// Adopts pool transactions into `flow`, seals the block and commits it
    /// through the same discipline as received blocks. Runs entirely under
    /// the process lock.
    pub(crate) async fn pack_block(
        &self,
        mut flow: Box<dyn PackFlow>,
        key: &SecretKey,
    ) -> Result<PackedBlock, ProcessError> {
        let mut inner = self.inner.lock().await;
        let started = Instant::now();

        let mut to_drop = Vec::new();
        for tx in self.pool.executables() {
            match flow.adopt(&tx) {
                Ok(()) => {}
                Err(err) if err.is_gas_limit_reached() => {
                    tracing::debug!(hash = %tx.hash(), "gas limit reached during packing");
                    break;
                }
                Err(err) if err.is_not_adoptable_now() => continue,
                Err(err) => {
                    tracing::debug!(%err, hash = %tx.hash(), "tx rejected during packing");
                    if let Ok(id) = tx.id() {
                        to_drop.push((tx.hash(), id));
                    }
                }
            }
        }

        let should_vote = if flow.number() >= self.finality {
            self.bft
                .should_vote(&flow.parent().id())
                .map_err(ProcessError::Fatal)?
        } else {
            false
        };

        let (block, stage, receipts) = flow
            .pack(key, 0, should_vote)
            .map_err(ProcessError::Fatal)?;
        let block = Arc::new(block);
        let receipts = Arc::new(receipts);
        let exec_elapsed = started.elapsed();

        // A locally packed block extends the best chain by construction.
        let commit_started = Instant::now();
        let result = self
            .commit_block(&block, &receipts, stage, 0, true, true)
            .await;
        metrics::count_processed(BlockOrigin::Proposed, result.is_ok());
        result?;
        let commit_elapsed = commit_started.elapsed();

        if block.number() > inner.max_block_num {
            inner.max_block_num = block.number();
        }

        // Transactions that failed adoption outright leave the pool only
        // after the block stuck.
        for (hash, id) in &to_drop {
            self.pool.remove(hash, id);
        }

        if let Some(estimate) =
            self.bandwidth
                .update(&block.header, exec_elapsed + commit_elapsed, unix_now())
        {
            metrics::record_bandwidth(estimate);
        }

        Ok(PackedBlock {
            block,
            exec_elapsed,
            commit_elapsed,
            real_elapsed: started.elapsed(),
        })
    }

    /// Steps 5 to 9 of the pipeline: log plan, state commit, log barrier,
    /// repository append, finality notification.
    async fn commit_block(
        &self,
        block: &Arc<Block>,
        receipts: &Arc<Vec<Receipt>>,
        stage: Box<dyn StateStage>,
        conflicts: u32,
        becomes_best: bool,
        packing: bool,
    ) -> Result<(), ProcessError> {
        // The plan goes to the worker before the state commit so log I/O
        // overlaps the trie write; the barrier below settles it.
        let mut logs_submitted = false;
        if becomes_best {
            if let Some(log_db) = self.active_log_db() {
                self.submit_log_plan(log_db, block.clone(), receipts.clone())
                    .await
                    .map_err(ProcessError::Fatal)?;
                logs_submitted = true;
            }
        }

        stage.commit().map_err(ProcessError::Fatal)?;

        if logs_submitted {
            if let Err(err) = self.log_worker.sync().await {
                // Isolated failure: the chain commit goes ahead, log
                // writes stop for the rest of the process lifetime.
                self.log_db_failed.store(true, Ordering::Relaxed);
                tracing::warn!(%err, "writing logs failed, log db disabled");
            }
        }

        self.repo
            .add_block(block, receipts, conflicts, becomes_best)
            .map_err(ProcessError::Fatal)?;

        if block.number() >= self.finality {
            self.bft
                .commit_block(&block.header, packing)
                .map_err(ProcessError::Fatal)?;
        }
        Ok(())
    }

    fn active_log_db(&self) -> Option<Arc<dyn LogDb>> {
        if self.log_db_failed() {
            return None;
        }
        self.log_db.clone()
    }

    async fn submit_log_plan(
        &self,
        log_db: Arc<dyn LogDb>,
        block: Arc<Block>,
        receipts: Arc<Vec<Receipt>>,
    ) -> anyhow::Result<()> {
        let repo = self.repo.clone();
        let old_best = self.repo.best_summary();
        let now = unix_now();
        self.log_worker
            .run(Box::new(move || {
                // Blocks a day behind are catch-up traffic; skip fsync.
                let catch_up =
                    block.header.timestamp.saturating_add(CATCH_UP_AGE.as_secs()) < now;
                let mut writer = if catch_up {
                    log_db.new_writer_sync_off()
                } else {
                    log_db.new_writer()
                };
                if let Err(err) =
                    write_branch(repo.as_ref(), writer.as_mut(), &old_best, &block, &receipts)
                {
                    if let Err(rollback_err) = writer.rollback() {
                        tracing::debug!(%rollback_err, "log writer rollback failed");
                    }
                    return Err(err);
                }
                Ok(())
            }))
            .await
    }

    /// Emits the double-signing warning when another stored block at the
    /// same height shares this block's signer. Observability only.
    fn check_double_signing(&self, block: &Block) {
        let Ok(signer) = block.header.signer() else {
            return;
        };
        let summaries = match self.repo.summaries_at(block.number()) {
            Ok(summaries) => summaries,
            Err(err) => {
                tracing::debug!(%err, "failed to enumerate blocks for double-sign check");
                return;
            }
        };
        let id = block.id();
        for other in summaries {
            if other.id() != id && other.header.signer().ok() == Some(signer) {
                metrics::count_double_sign(&signer);
                let signer_hex = format!("0x{}", hex::encode(signer));
                tracing::warn!(
                    signer = %signer_hex,
                    height = block.number(),
                    id = %id,
                    other = %other.id(),
                    "double signing detected"
                );
            }
        }
    }

    /// After the best pointer moved: hand transactions of the abandoned
    /// branch back to the pool, best-effort.
    fn reconcile_fork(&self, old_best: &BlockSummary, new_block: &Block) {
        let side = match self.repo.exclude(&old_best.id(), &new_block.id()) {
            Ok(side) => side,
            Err(err) => {
                tracing::warn!(%err, "failed to enumerate abandoned branch");
                return;
            }
        };
        if side.is_empty() {
            return;
        }
        metrics::count_fork();
        if side.len() >= 2 {
            tracing::warn!(
                depth = side.len(),
                best = %new_block.id(),
                "fork happened"
            );
        }
        for id in &side {
            let side_block = match self.repo.block(id) {
                Ok(Some(block)) => block,
                Ok(None) => {
                    tracing::warn!(%id, "abandoned block disappeared from repository");
                    continue;
                }
                Err(err) => {
                    tracing::warn!(%err, %id, "failed to load abandoned block");
                    continue;
                }
            };
            for tx in side_block.transactions {
                if let Err(err) = self.pool.add(tx) {
                    tracing::debug!(%err, "failed to return side-branch tx to pool");
                }
            }
        }
    }
}

/// Fork-height policy switch: past FINALITY (for both contenders) the BFT
/// engine picks the best chain instead of the score comparison.
fn use_bft_select(header: &Header, prev_best: &Header, finality: u32) -> bool {
    header.number() >= finality && prev_best.number() >= finality
}

/// The log-write plan for one committed block: truncate what the old best
/// chain wrote beyond the fork point, backfill the new branch up to the
/// parent, then write the new block. Runs inside the log worker.
fn write_branch(
    repo: &dyn Repository,
    writer: &mut dyn LogWriter,
    old_best: &BlockSummary,
    block: &Block,
    receipts: &[Receipt],
) -> anyhow::Result<()> {
    let parent_id = block.header.parent_id;

    let stale = repo.exclude(&old_best.id(), &parent_id)?;
    if let Some(first_divergent) = stale.first() {
        writer.truncate(first_divergent.number())?;
    }

    for id in repo.exclude(&parent_id, &old_best.id())? {
        let backfill = repo
            .block(&id)?
            .with_context(|| format!("missing block {id} on new branch"))?;
        let backfill_receipts = repo
            .receipts(&id)?
            .with_context(|| format!("missing receipts for {id} on new branch"))?;
        writer.write(&backfill, &backfill_receipts)?;
    }

    writer.write(block, receipts)?;
    writer.commit()
}
