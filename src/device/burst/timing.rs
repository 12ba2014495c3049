//! Burst timing model.
//!
//! Every transaction on a memory bundle pays a fixed latency before data
//! starts streaming, then moves `elements_per_cycle` elements per cycle:
//!
//! ```text
//! ┌──────────────┐  ┌──────────────────────────┐  ┌──────────────┐  ┌─────
//! │ Latency (30) │─►│ Data (burst_len / rate)  │─►│ Latency (30) │─►│ ...
//! └──────────────┘  └──────────────────────────┘  └──────────────┘  └─────
//! ```
//!
//! A transfer of `n` elements is split into `ceil(n / burst_len)` bursts,
//! so long bursts amortize the latency. Bursts on one bundle serialize;
//! different bundles run concurrently.

use serde::{Deserialize, Serialize};

use crate::device::params;

/// Burst timing configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurstConfig {
    /// Maximum elements per burst transaction
    pub burst_len: usize,

    /// Fixed latency per transaction in cycles
    pub latency_cycles: u32,

    /// Elements moved per cycle while streaming
    pub elements_per_cycle: u32,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            burst_len: params::BURST_LENGTH,
            latency_cycles: params::BURST_LATENCY_CYCLES,
            elements_per_cycle: params::ELEMENTS_PER_CYCLE,
        }
    }
}

impl BurstConfig {
    /// Zero-latency, unbounded-bandwidth timing for functional runs.
    pub fn instant() -> Self {
        Self {
            burst_len: params::BURST_LENGTH,
            latency_cycles: 0,
            elements_per_cycle: u32::MAX,
        }
    }

    /// Number of bursts needed to move `len` elements.
    pub fn bursts_for(&self, len: usize) -> usize {
        len.div_ceil(self.burst_len)
    }

    /// Cycles for a single burst of `len` elements.
    pub fn burst_cycles(&self, len: usize) -> u64 {
        let rate = u64::from(self.elements_per_cycle);
        u64::from(self.latency_cycles) + (len as u64).div_ceil(rate)
    }

    /// Cycles to move `len` contiguous elements, burst by burst.
    pub fn transfer_cycles(&self, len: usize) -> u64 {
        let full = len / self.burst_len;
        let tail = len % self.burst_len;
        let mut cycles = full as u64 * self.burst_cycles(self.burst_len);
        if tail > 0 {
            cycles += self.burst_cycles(tail);
        }
        cycles
    }
}

/// Occupancy of one memory bundle on the engine's cycle timeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BundleTimeline {
    /// First cycle at which the bundle is free
    pub busy_until: u64,
}

impl BundleTimeline {
    /// Book `cycles` of bundle time for a request issued at `issue_at`.
    ///
    /// Returns the cycle at which the request completes.
    pub fn schedule(&mut self, issue_at: u64, cycles: u64) -> u64 {
        let start = issue_at.max(self.busy_until);
        self.busy_until = start + cycles;
        self.busy_until
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = BurstConfig::default();
        assert_eq!(config.burst_len, 256);
        assert_eq!(config.latency_cycles, 30);
        assert_eq!(config.elements_per_cycle, 1);
    }

    #[test]
    fn test_bursts_for() {
        let config = BurstConfig::default();
        assert_eq!(config.bursts_for(0), 0);
        assert_eq!(config.bursts_for(1), 1);
        assert_eq!(config.bursts_for(256), 1);
        assert_eq!(config.bursts_for(257), 2);
    }

    #[test]
    fn test_transfer_cycles() {
        let config = BurstConfig::default();

        // One full burst: 30 latency + 256 data
        assert_eq!(config.transfer_cycles(256), 286);

        // 300 elements: (30 + 256) + (30 + 44)
        assert_eq!(config.transfer_cycles(300), 360);
    }

    #[test]
    fn test_long_bursts_amortize_latency() {
        let long = BurstConfig::default();
        let short = BurstConfig { burst_len: 16, ..long };

        // 1024 elements: 4 latencies vs 64 latencies
        assert_eq!(long.transfer_cycles(1024), 4 * 30 + 1024);
        assert_eq!(short.transfer_cycles(1024), 64 * 30 + 1024);
    }

    #[test]
    fn test_instant() {
        let config = BurstConfig::instant();
        assert_eq!(config.transfer_cycles(1000), 4);
    }

    #[test]
    fn test_timeline_serializes_requests() {
        let mut timeline = BundleTimeline::default();

        assert_eq!(timeline.schedule(0, 10), 10);
        // Issued while busy: waits for the first request
        assert_eq!(timeline.schedule(5, 10), 20);
        // Issued after idle gap: starts at issue time
        assert_eq!(timeline.schedule(50, 10), 60);
    }
}
