use basalt_config::constants::{
    BLOCK_GAS_LIMIT_SOFT_CAP, BLOCK_INTERVAL, MAX_BACKTRACKING_BLOCKS,
    TOLERABLE_BLOCK_PACKING_TIME,
};
use basalt_types::Header;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Smoothing weight of the newest sample: 1/16 new, 15/16 history.
const SMOOTHING: f64 = 1.0 / 16.0;

/// Samples below this wall time carry too much measurement noise.
const MIN_ELAPSED: Duration = Duration::from_millis(5);

/// Estimates how much gas this machine executes per second, observed over
/// committed blocks. The packer uses the estimate to size its blocks so
/// that packing stays inside the tolerable window.
///
/// Clones share the underlying estimate.
#[derive(Clone, Default)]
pub(crate) struct Bandwidth {
    gas_per_second: Arc<Mutex<f64>>,
}

impl Bandwidth {
    /// Feeds one committed block and how long it took to execute and
    /// commit. Blocks deep in the past (catch-up replay) and degenerate
    /// samples are ignored. Returns the updated estimate when the sample
    /// was taken.
    pub(crate) fn update(&self, header: &Header, elapsed: Duration, now: u64) -> Option<u64> {
        if header.gas_used == 0 || elapsed < MIN_ELAPSED {
            return None;
        }
        let horizon = u64::from(MAX_BACKTRACKING_BLOCKS) * BLOCK_INTERVAL;
        if header.timestamp.saturating_add(horizon) < now {
            return None;
        }

        let sample = header.gas_used as f64 / elapsed.as_secs_f64();
        let mut gas_per_second = self.gas_per_second.lock();
        *gas_per_second = if *gas_per_second == 0.0 {
            sample
        } else {
            *gas_per_second * (1.0 - SMOOTHING) + sample * SMOOTHING
        };
        Some(*gas_per_second as u64)
    }

    /// Gas limit that should be packable within the tolerable packing
    /// time. Falls back to the protocol soft cap before any sample
    /// arrives.
    pub(crate) fn suggest(&self) -> u64 {
        let gas_per_second = *self.gas_per_second.lock();
        if gas_per_second == 0.0 {
            return BLOCK_GAS_LIMIT_SOFT_CAP;
        }
        (gas_per_second * TOLERABLE_BLOCK_PACKING_TIME.as_secs_f64()) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_with(gas_used: u64, timestamp: u64) -> Header {
        Header {
            gas_used,
            timestamp,
            ..Default::default()
        }
    }

    #[test]
    fn suggest_defaults_to_soft_cap() {
        assert_eq!(Bandwidth::default().suggest(), BLOCK_GAS_LIMIT_SOFT_CAP);
    }

    #[test]
    fn update_tracks_observed_throughput() {
        let bandwidth = Bandwidth::default();
        let now = 1_700_000_000;
        // 10M gas in 500ms => 20M gas/s.
        let updated = bandwidth
            .update(
                &header_with(10_000_000, now),
                Duration::from_millis(500),
                now,
            )
            .unwrap();
        assert_eq!(updated, 20_000_000);
        // Suggestion fits the tolerable packing window.
        assert_eq!(
            bandwidth.suggest(),
            (20_000_000.0 * TOLERABLE_BLOCK_PACKING_TIME.as_secs_f64()) as u64
        );
    }

    #[test]
    fn stale_and_degenerate_samples_are_ignored() {
        let bandwidth = Bandwidth::default();
        let now = 1_700_000_000;
        let long_ago = now - u64::from(MAX_BACKTRACKING_BLOCKS) * BLOCK_INTERVAL - 1;

        assert!(bandwidth
            .update(&header_with(10_000_000, long_ago), Duration::from_secs(1), now)
            .is_none());
        assert!(bandwidth
            .update(&header_with(0, now), Duration::from_secs(1), now)
            .is_none());
        assert!(bandwidth
            .update(&header_with(10_000_000, now), Duration::from_micros(10), now)
            .is_none());
        assert_eq!(bandwidth.suggest(), BLOCK_GAS_LIMIT_SOFT_CAP);
    }
}
