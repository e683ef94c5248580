//! Metric names and recording helpers for the engine.

use basalt_types::Address;
use metrics::{counter, gauge};

const BLOCKS_PROCESSED: &str = "basalt_node_blocks_processed_total";
const BLOCKS_IGNORED: &str = "basalt_node_blocks_ignored_total";
const FORKS: &str = "basalt_node_forks_total";
const DOUBLE_SIGN: &str = "basalt_node_double_sign_total";
const BANDWIDTH: &str = "basalt_node_bandwidth_gas_per_second";
const PEERS: &str = "basalt_node_peer_count";

/// Where a processed block came from.
#[derive(Copy, Clone)]
pub(crate) enum BlockOrigin {
    Received,
    Proposed,
}

impl BlockOrigin {
    fn label(self) -> &'static str {
        match self {
            BlockOrigin::Received => "received",
            BlockOrigin::Proposed => "proposed",
        }
    }
}

pub(crate) fn count_processed(origin: BlockOrigin, ok: bool) {
    let status = if ok { "ok" } else { "failed" };
    counter!(BLOCKS_PROCESSED, "origin" => origin.label(), "status" => status).increment(1);
}

pub(crate) fn count_ignored() {
    counter!(BLOCKS_IGNORED).increment(1);
}

pub(crate) fn count_fork() {
    counter!(FORKS).increment(1);
}

pub(crate) fn count_double_sign(signer: &Address) {
    counter!(DOUBLE_SIGN, "signer" => format!("0x{}", hex::encode(signer))).increment(1);
}

pub(crate) fn record_bandwidth(gas_per_second: u64) {
    gauge!(BANDWIDTH).set(gas_per_second as f64);
}

pub(crate) fn record_peer_count(count: usize) {
    gauge!(PEERS).set(count as f64);
}
