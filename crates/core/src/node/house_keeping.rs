use crate::chain::Repository;
use crate::comm::Communicator;
use crate::node::future_blocks::FutureBlocks;
use crate::node::processor::Processor;
use crate::node::stats::BlockStats;
use crate::node::{handle_process_failure, metrics, probe};
use basalt_config::constants::BLOCK_INTERVAL;
use basalt_types::Block;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const FUTURE_DRAIN_INTERVAL: Duration = Duration::from_secs(1);
const CONNECTIVITY_INTERVAL: Duration = Duration::from_secs(10);
const CLOCK_PROBE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Background chores around the processor: feeds gossiped blocks in,
/// replays the future-block cache, and watches connectivity and clock
/// drift.
pub(crate) struct HouseKeeping {
    processor: Arc<Processor>,
    repo: Arc<dyn Repository>,
    comm: Arc<dyn Communicator>,
    future_blocks: FutureBlocks,
    ntp_server: Option<String>,
}

impl HouseKeeping {
    pub(crate) fn new(
        processor: Arc<Processor>,
        repo: Arc<dyn Repository>,
        comm: Arc<dyn Communicator>,
        future_blocks: FutureBlocks,
        ntp_server: Option<String>,
    ) -> Self {
        HouseKeeping {
            processor,
            repo,
            comm,
            future_blocks,
            ntp_server,
        }
    }

    pub(crate) async fn run(self, cancel: CancellationToken) {
        let mut block_feed = self.comm.subscribe_block();
        let mut future_ticker = tokio::time::interval(FUTURE_DRAIN_INTERVAL);
        future_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut connectivity_ticker = tokio::time::interval(CONNECTIVITY_INTERVAL);
        connectivity_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut clock_ticker = tokio::time::interval(CLOCK_PROBE_INTERVAL);
        clock_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut warned_no_peers = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = block_feed.recv() => match received {
                    Ok(block) => self.handle_gossip(block).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "gossip subscriber lagging");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = future_ticker.tick() => self.drain_future_blocks().await,
                _ = connectivity_ticker.tick() => {
                    let peers = self.comm.peer_count();
                    metrics::record_peer_count(peers);
                    // Before initial sync finishes a lonely node is
                    // expected; not worth an operator warning.
                    if peers == 0 && *self.comm.synced().borrow() {
                        if !warned_no_peers {
                            tracing::warn!("no peers connected");
                            warned_no_peers = true;
                        }
                    } else if peers > 0 {
                        warned_no_peers = false;
                    }
                }
                _ = clock_ticker.tick() => self.check_clock_drift().await,
            }
        }
        tracing::trace!("stopping house-keeping loop");
    }

    async fn handle_gossip(&self, block: Arc<Block>) {
        let mut stats = BlockStats::default();
        match self.processor.process_block(&block, &mut stats).await {
            Ok(true) => {
                // Only blocks extending our best view are worth relaying.
                self.comm.broadcast_block(block.clone());
                stats.report(&block.header);
            }
            Ok(false) => {
                stats.report(&block.header);
            }
            Err(err) => {
                handle_process_failure(&block, err, &self.future_blocks, &mut stats);
            }
        }
    }

    /// Replays parked blocks in ascending number order; whatever commits
    /// (or turns out to be known already) leaves the cache.
    async fn drain_future_blocks(&self) {
        if self.future_blocks.len() == 0 {
            return;
        }
        let mut stats = BlockStats::default();
        for block in self.future_blocks.drain_ordered() {
            match self.processor.process_block(&block, &mut stats).await {
                Ok(_) => {
                    self.future_blocks.remove(&block.id());
                }
                Err(err) if err.is_queueable() => {}
                Err(err) => {
                    tracing::debug!(%err, id = %block.id(), "parked block still fails");
                }
            }
        }
        if !stats.is_empty() {
            stats.report(&self.repo.best_summary().header);
        }
    }

    async fn check_clock_drift(&self) {
        let Some(server) = &self.ntp_server else {
            return;
        };
        match probe::measure_clock_drift(server).await {
            Ok(drift) => {
                let drift_secs = format!("{drift:+.2}");
                if drift.abs() > (BLOCK_INTERVAL / 2) as f64 {
                    tracing::warn!(
                        drift_secs = %drift_secs,
                        server = server.as_str(),
                        "system clock drifts from NTP"
                    );
                } else {
                    tracing::trace!(drift_secs = %drift_secs, "clock drift probe");
                }
            }
            Err(err) => tracing::debug!(%err, "clock drift probe failed"),
        }
    }
}
