use crate::chain::Repository;
use crate::comm::Communicator;
use crate::node::bandwidth::Bandwidth;
use crate::node::processor::Processor;
use crate::node::stats::DisplayMs;
use crate::node::unix_now;
use crate::packer::{PackFlow, Packer};
use basalt_config::constants::{BLOCK_GAS_LIMIT_SOFT_CAP, BLOCK_INTERVAL};
use basalt_types::{key_address, Address, BlockSummary};
use secp256k1::SecretKey;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Outcome of waiting out a scheduled slot.
enum SlotOutcome {
    /// The slot window opened; pack now.
    Pack,
    /// The best block moved in a way that invalidates the flow.
    Reschedule,
    Cancelled,
}

/// The POA turn-taker: repeatedly asks the packer for the next legal slot,
/// packs a block at slot time through the processor's commit discipline,
/// and broadcasts the result.
pub(crate) struct Sealer {
    processor: Arc<Processor>,
    packer: Arc<dyn Packer>,
    repo: Arc<dyn Repository>,
    comm: Arc<dyn Communicator>,
    bandwidth: Bandwidth,
    key: SecretKey,
    /// Address derived from `key`; the local authority.
    address: Address,
    /// Operator-pinned gas-limit target; adaptive when unset.
    target_gas_limit: Option<u64>,
}

impl Sealer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        processor: Arc<Processor>,
        packer: Arc<dyn Packer>,
        repo: Arc<dyn Repository>,
        comm: Arc<dyn Communicator>,
        bandwidth: Bandwidth,
        key: SecretKey,
        target_gas_limit: Option<u64>,
    ) -> Self {
        let address = key_address(&key);
        Sealer {
            processor,
            packer,
            repo,
            comm,
            bandwidth,
            key,
            address,
            target_gas_limit,
        }
    }

    pub(crate) async fn run(self, cancel: CancellationToken) {
        // Packing before the chain caught up would fork us off the
        // network; wait out the initial sync first.
        let mut synced = self.comm.synced();
        if !*synced.borrow() {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    changed = synced.changed() => {
                        if changed.is_err() || *synced.borrow() {
                            break;
                        }
                    }
                }
            }
        }
        tracing::info!("synchronization process done");

        let mut best_ticker = self.repo.best_ticker();
        let mut schedule_failures = 0u32;
        loop {
            if cancel.is_cancelled() {
                return;
            }

            let target = self
                .target_gas_limit
                .unwrap_or_else(|| self.bandwidth.suggest().min(BLOCK_GAS_LIMIT_SOFT_CAP));
            self.packer.set_target_gas_limit(target);

            let parent = self.repo.best_summary();
            let flow = match self.packer.schedule(&parent, self.schedule_base(&parent)) {
                Ok(flow) => {
                    schedule_failures = 0;
                    flow
                }
                Err(err) => {
                    // A whole streak of failures (e.g. not an authority
                    // this round) is one log line.
                    if schedule_failures == 0 {
                        tracing::warn!(%err, "unable to schedule block packing");
                    }
                    schedule_failures += 1;
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = best_ticker.changed() => {}
                    }
                    continue;
                }
            };
            tracing::debug!(
                when = flow.when(),
                number = flow.number(),
                "scheduled to pack block"
            );

            match self.wait_for_slot(&cancel, flow.as_ref()).await {
                SlotOutcome::Cancelled => return,
                SlotOutcome::Reschedule => {
                    tracing::debug!("re-scheduling block packing due to new best block");
                    continue;
                }
                SlotOutcome::Pack => {}
            }

            match self.processor.pack_block(flow, &self.key).await {
                Ok(packed) => {
                    self.comm.broadcast_block(packed.block.clone());
                    let mgas = format!("{:.3}", packed.block.header.gas_used as f64 / 1e6);
                    tracing::info!(
                        txs = packed.block.transactions.len(),
                        mgas = %mgas,
                        et = %DisplayMs(packed.exec_elapsed),
                        ct = %DisplayMs(packed.commit_elapsed),
                        rt = %DisplayMs(packed.real_elapsed),
                        id = %packed.block.id(),
                        "packed new block"
                    );
                }
                Err(err) => {
                    tracing::error!(%err, "failed to pack block");
                }
            }
        }
    }

    /// Base timestamp handed to the packer's scheduler.
    ///
    /// Inside the prioritized window after the parent the base snaps to
    /// the protocol's optimal tick so a bursty producer cannot skew its
    /// slots ahead; outside of it the wall clock is the base.
    fn schedule_base(&self, parent: &BlockSummary) -> u64 {
        let now = unix_now();
        let parent_time = parent.header.timestamp;
        let buffer = (BLOCK_INTERVAL / 2).min(3);
        let window_end = parent_time + 3 * BLOCK_INTERVAL - buffer;
        if parent_time < now && now < window_end {
            parent_time + BLOCK_INTERVAL
        } else {
            now
        }
    }

    /// Polls at one-second granularity until the slot opens or the flow
    /// becomes stale.
    async fn wait_for_slot(
        &self,
        cancel: &CancellationToken,
        flow: &dyn PackFlow,
    ) -> SlotOutcome {
        loop {
            let now = unix_now();
            if now + BLOCK_INTERVAL / 2 >= flow.when() {
                return SlotOutcome::Pack;
            }

            tokio::select! {
                _ = cancel.cancelled() => return SlotOutcome::Cancelled,
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }

            let best = self.repo.best_summary();
            if best.id() == flow.parent().id() {
                continue;
            }
            // Someone else took this height, or a heavier chain appeared:
            // this flow would pack a stale block.
            let other_signer_took_slot = best.number() == flow.number()
                && best.header.signer().map(|s| s != self.address).unwrap_or(true);
            if other_signer_took_slot || best.header.total_score > flow.total_score() {
                return SlotOutcome::Reschedule;
            }
        }
    }
}
