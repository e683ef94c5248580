use basalt_types::Header;
use std::time::Duration;

/// Running totals for one reporting cycle of block processing.
#[derive(Default)]
pub(crate) struct BlockStats {
    pub(crate) processed: usize,
    pub(crate) ignored: usize,
    pub(crate) queued: usize,
    pub(crate) txs: usize,
    pub(crate) gas_used: u64,
    pub(crate) exec_elapsed: Duration,
    pub(crate) commit_elapsed: Duration,
    pub(crate) real_elapsed: Duration,
}

impl BlockStats {
    pub(crate) fn update_processed(
        &mut self,
        count: usize,
        txs: usize,
        exec: Duration,
        commit: Duration,
        real: Duration,
        gas_used: u64,
    ) {
        self.processed += count;
        self.txs += txs;
        self.exec_elapsed += exec;
        self.commit_elapsed += commit;
        self.real_elapsed += real;
        self.gas_used += gas_used;
    }

    pub(crate) fn update_ignored(&mut self, count: usize) {
        self.ignored += count;
    }

    pub(crate) fn update_queued(&mut self, count: usize) {
        self.queued += count;
    }

    /// Logs one "imported blocks" line with the stable key set and resets
    /// the cycle. `best` is the chain head after the cycle.
    pub(crate) fn report(&mut self, best: &Header) {
        if self.processed > 0 {
            let mgas = format!("{:.3}", self.gas_used as f64 / 1e6);
            tracing::info!(
                count = self.processed,
                txs = self.txs,
                mgas = %mgas,
                et = %DisplayMs(self.exec_elapsed),
                ct = %DisplayMs(self.commit_elapsed),
                rt = %DisplayMs(self.real_elapsed),
                id = %best.id(),
                "imported blocks"
            );
        } else if self.queued > 0 || self.ignored > 0 {
            tracing::debug!(
                queued = self.queued,
                ignored = self.ignored,
                "no blocks imported"
            );
        }
        *self = BlockStats::default();
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.processed == 0 && self.ignored == 0 && self.queued == 0
    }
}

/// Millisecond rendering for the elapsed triplet.
pub(crate) struct DisplayMs(pub(crate) Duration);

impl std::fmt::Display for DisplayMs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0.as_millis())
    }
}
