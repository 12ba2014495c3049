//! Compute pipeline clock.
//!
//! Models the engine's statically scheduled pipeline on a single cycle
//! counter:
//!
//! ```text
//! pixel n     │ MAC × 9C ........│ mac latency │ fuse │
//! pixel n+1                      │ MAC × 9C ........│ mac latency │ fuse │
//! ```
//!
//! MAC steps retire one per cycle (all filter lanes in parallel), and the
//! next pixel's first MAC issues in the cycle after the previous pixel's
//! last one. Fuse never holds up the MAC stream; its completion time only
//! bounds when the run can finish.
//!
//! The only stalls are waits on memory: an input row or a coefficient set
//! that has not landed when compute needs it.

use std::fmt;

/// Why compute waited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallReason {
    /// Input row not yet delivered by the input port.
    InputRow {
        /// Image row being waited on.
        row: usize,
        /// Cycles lost.
        cycles: u64,
    },
    /// Coefficients or bias for a filter group still in flight.
    Coefficients {
        /// Filter group being loaded.
        group: usize,
        /// Cycles lost.
        cycles: u64,
    },
}

impl StallReason {
    /// Cycles lost to this stall.
    pub fn cycles(&self) -> u64 {
        match self {
            StallReason::InputRow { cycles, .. } => *cycles,
            StallReason::Coefficients { cycles, .. } => *cycles,
        }
    }
}

impl fmt::Display for StallReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StallReason::InputRow { row, cycles } => {
                write!(f, "input row {} ({} cycles)", row, cycles)
            }
            StallReason::Coefficients { group, cycles } => {
                write!(f, "coefficients for group {} ({} cycles)", group, cycles)
            }
        }
    }
}

/// Cycle bookkeeping for the compute pipeline.
#[derive(Debug, Clone)]
pub struct PipelineClock {
    /// Next cycle at which a MAC step can issue.
    pub cycle: u64,
    /// MAC steps issued.
    pub mac_steps: u64,
    /// Cycles compute spent waiting on memory.
    pub stall_cycles: u64,
    /// Stalls by cause, in order.
    pub stalls: Vec<StallReason>,
    mac_latency: u64,
    fuse_latency: u64,
    last_fuse_done: u64,
}

impl PipelineClock {
    /// Create a clock with the given stage latencies.
    pub fn new(mac_latency: u32, fuse_latency: u32) -> Self {
        Self {
            cycle: 0,
            mac_steps: 0,
            stall_cycles: 0,
            stalls: Vec::new(),
            mac_latency: u64::from(mac_latency),
            fuse_latency: u64::from(fuse_latency),
            last_fuse_done: 0,
        }
    }

    /// Back to cycle zero.
    pub fn reset(&mut self) {
        self.cycle = 0;
        self.mac_steps = 0;
        self.stall_cycles = 0;
        self.stalls.clear();
        self.last_fuse_done = 0;
    }

    /// Hold compute until data that lands at `ready_at` is available.
    ///
    /// `reason` is called with the stall length only if a stall occurs.
    pub fn wait_for(&mut self, ready_at: u64, reason: impl FnOnce(u64) -> StallReason) {
        if ready_at > self.cycle {
            let stall = reason(ready_at - self.cycle);
            log::trace!("stall at cycle {}: {}", self.cycle, stall);
            self.stall_cycles += stall.cycles();
            self.stalls.push(stall);
            self.cycle = ready_at;
        }
    }

    /// Issue `steps` back-to-back MAC steps. Returns the cycle of the last one.
    pub fn issue_macs(&mut self, steps: u64) -> u64 {
        debug_assert!(steps > 0);
        let last = self.cycle + steps - 1;
        self.cycle += steps;
        self.mac_steps += steps;
        last
    }

    /// Schedule the fuse for a pixel whose last MAC issued at `last_mac`.
    ///
    /// Returns the cycle at which its outputs are handed to the write port.
    pub fn schedule_fuse(&mut self, last_mac: u64) -> u64 {
        let done = last_mac + 1 + self.mac_latency + self.fuse_latency;
        self.last_fuse_done = self.last_fuse_done.max(done);
        done
    }

    /// Cycle at which every issued pixel has left the fuse stage.
    pub fn drained_at(&self) -> u64 {
        self.cycle.max(self.last_fuse_done)
    }

    /// Advance the clock to `cycle` if it is ahead.
    pub fn advance_to(&mut self, cycle: u64) {
        self.cycle = self.cycle.max(cycle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macs_issue_back_to_back() {
        let mut clock = PipelineClock::new(3, 2);
        assert_eq!(clock.issue_macs(9), 8);
        assert_eq!(clock.issue_macs(9), 17);
        assert_eq!(clock.cycle, 18);
        assert_eq!(clock.mac_steps, 18);
        assert_eq!(clock.stall_cycles, 0);
    }

    #[test]
    fn test_fuse_overlaps_next_pixel() {
        let mut clock = PipelineClock::new(3, 2);
        let last = clock.issue_macs(9);
        let fused = clock.schedule_fuse(last);
        assert_eq!(fused, 9 + 3 + 2);

        // next pixel starts right away, before the fuse completes
        let next_last = clock.issue_macs(9);
        assert_eq!(next_last, 17);
        assert!(fused > 9);

        let fused2 = clock.schedule_fuse(next_last);
        assert_eq!(clock.drained_at(), fused2);
    }

    #[test]
    fn test_wait_records_stall() {
        let mut clock = PipelineClock::new(3, 2);
        clock.issue_macs(9);
        clock.wait_for(40, |cycles| StallReason::InputRow { row: 3, cycles });
        assert_eq!(clock.cycle, 40);
        assert_eq!(clock.stall_cycles, 31);
        assert_eq!(clock.stalls, vec![StallReason::InputRow { row: 3, cycles: 31 }]);

        // data already there: no stall
        clock.wait_for(12, |cycles| StallReason::Coefficients { group: 1, cycles });
        assert_eq!(clock.stall_cycles, 31);
        assert_eq!(clock.stalls.len(), 1);
    }

    #[test]
    fn test_reset() {
        let mut clock = PipelineClock::new(3, 2);
        let last = clock.issue_macs(4);
        clock.schedule_fuse(last);
        clock.reset();
        assert_eq!(clock.cycle, 0);
        assert_eq!(clock.drained_at(), 0);
    }
}
