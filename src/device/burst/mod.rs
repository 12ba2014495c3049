//! Burst transfer interface.
//!
//! The engine reaches host memory through four directional ports:
//!
//! ```text
//!                ┌──────────────────────────── Engine ───┐
//!  gmem0 ──────► │ input        (image rows, read)       │
//!  gmem1 ◄────── │ output       (feature map, write)     │
//!  gmem2 ──┬───► │ coefficients (filter weights, read)   │
//!          └───► │ bias         (per-filter bias, read)  │
//!                └───────────────────────────────────────┘
//! ```
//!
//! Each port is assigned to a memory bundle. Requests on one bundle
//! serialize; different bundles overlap. Coefficient and bias ports may
//! share a bundle because both are read-only and drained before streaming
//! starts. Input and output must not share one: they are both busy during
//! steady-state streaming.
//!
//! All transfers are issued as sequential bursts of up to `burst_len`
//! elements (see [`timing`]).

pub mod timing;
pub mod writer;

pub use timing::{BurstConfig, BundleTimeline};
pub use writer::{BurstWriter, PendingRun};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::device::host_memory::{self, HostMemory, HostMemoryError};
use crate::device::params::ELEMENT_BYTES;
use crate::error::{ConvError, Result};
use crate::fixed::Fixed16;

/// The four memory ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PortKind {
    /// Image rows, read
    Input,
    /// Feature map, write
    Output,
    /// Filter weights, read
    Coefficients,
    /// Per-filter bias, read
    Bias,
}

impl PortKind {
    /// All ports in a fixed order.
    pub const ALL: [PortKind; 4] = [
        PortKind::Input,
        PortKind::Output,
        PortKind::Coefficients,
        PortKind::Bias,
    ];

    /// Port name as used in configuration files.
    pub fn name(self) -> &'static str {
        match self {
            PortKind::Input => "input",
            PortKind::Output => "output",
            PortKind::Coefficients => "coefficients",
            PortKind::Bias => "bias",
        }
    }

    /// True for the write port.
    pub fn is_write(self) -> bool {
        self == PortKind::Output
    }
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bundle assignment of the four ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMap {
    /// Bundle carrying image reads
    pub input: String,
    /// Bundle carrying feature map writes
    pub output: String,
    /// Bundle carrying weight reads
    pub coefficients: String,
    /// Bundle carrying bias reads
    pub bias: String,
}

impl Default for PortMap {
    fn default() -> Self {
        Self {
            input: "gmem0".into(),
            output: "gmem1".into(),
            coefficients: "gmem2".into(),
            bias: "gmem2".into(),
        }
    }
}

impl PortMap {
    /// Bundle for a port.
    pub fn bundle(&self, kind: PortKind) -> &str {
        match kind {
            PortKind::Input => &self.input,
            PortKind::Output => &self.output,
            PortKind::Coefficients => &self.coefficients,
            PortKind::Bias => &self.bias,
        }
    }

    /// Reject mappings where streaming reads and writes would contend.
    pub fn validate(&self) -> Result<()> {
        for kind in PortKind::ALL {
            if self.bundle(kind).is_empty() {
                return Err(ConvError::InvalidConfig(format!("{} port has no bundle", kind)));
            }
        }
        if self.input == self.output {
            return Err(ConvError::PortConflict {
                first: PortKind::Input.name(),
                second: PortKind::Output.name(),
                bundle: self.input.clone(),
            });
        }
        Ok(())
    }
}

/// Traffic counters for one port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortStats {
    /// Requests issued (each may span several bursts)
    pub transfers: u64,
    /// Burst transactions issued
    pub bursts: u64,
    /// Elements moved
    pub elements: u64,
    /// Bundle cycles consumed
    pub busy_cycles: u64,
}

/// Data returned by a read, with the cycle it becomes usable.
#[derive(Debug, Clone)]
pub struct BurstRead {
    /// Samples in address order
    pub data: Vec<Fixed16>,
    /// Cycle at which the last burst lands
    pub ready_at: u64,
}

/// The engine's four memory ports.
#[derive(Debug, Clone)]
pub struct BurstInterface {
    config: BurstConfig,
    ports: PortMap,
    bundles: BTreeMap<String, BundleTimeline>,
    stats: BTreeMap<PortKind, PortStats>,
    writer: BurstWriter,
}

impl BurstInterface {
    /// Build the interface, rejecting conflicting port mappings.
    pub fn new(config: BurstConfig, ports: PortMap) -> Result<Self> {
        ports.validate()?;

        let bundles = PortKind::ALL
            .iter()
            .map(|&k| (ports.bundle(k).to_string(), BundleTimeline::default()))
            .collect();
        let stats = PortKind::ALL.iter().map(|&k| (k, PortStats::default())).collect();

        Ok(Self {
            writer: BurstWriter::new(config.burst_len),
            config,
            ports,
            bundles,
            stats,
        })
    }

    /// Timing configuration.
    pub fn config(&self) -> &BurstConfig {
        &self.config
    }

    /// Port to bundle mapping.
    pub fn port_map(&self) -> &PortMap {
        &self.ports
    }

    /// Counters for one port.
    pub fn stats(&self, kind: PortKind) -> PortStats {
        self.stats.get(&kind).copied().unwrap_or_default()
    }

    /// Cycle at which the bundle behind `kind` goes idle.
    pub fn busy_until(&self, kind: PortKind) -> u64 {
        self.bundles
            .get(self.ports.bundle(kind))
            .map(|t| t.busy_until)
            .unwrap_or(0)
    }

    /// Clear timelines and counters for a new run.
    pub fn reset(&mut self) {
        for timeline in self.bundles.values_mut() {
            *timeline = BundleTimeline::default();
        }
        for stats in self.stats.values_mut() {
            *stats = PortStats::default();
        }
        self.writer = BurstWriter::new(self.config.burst_len);
    }

    /// Read `len` contiguous samples starting at `addr` on a read port.
    pub fn read(
        &mut self,
        kind: PortKind,
        mem: &mut HostMemory,
        addr: u64,
        len: usize,
        issue_at: u64,
    ) -> Result<BurstRead> {
        debug_assert!(!kind.is_write(), "read issued on the {} port", kind);
        check_span(addr, len)?;
        mem.check_burst_read(addr, len * ELEMENT_BYTES)?;

        let mut data = Vec::with_capacity(len);
        let mut ready_at = issue_at;
        for (burst_addr, burst_len) in self.split(addr, len) {
            data.extend(mem.read_fixed(burst_addr, burst_len));
            mem.record_dma_read(burst_addr, burst_len * ELEMENT_BYTES);
            ready_at = self.book(kind, issue_at, burst_len);
            log::trace!(
                "{} burst read addr=0x{:X} len={} ready@{}",
                kind, burst_addr, burst_len, ready_at
            );
        }

        self.count_transfer(kind);
        Ok(BurstRead { data, ready_at })
    }

    /// Queue one output sample for write-combining.
    pub fn write_output(
        &mut self,
        mem: &mut HostMemory,
        addr: u64,
        value: Fixed16,
        issue_at: u64,
    ) -> Result<()> {
        check_span(addr, 1)?;
        mem.check_burst_write(addr, ELEMENT_BYTES)?;
        for run in self.writer.push(addr, value) {
            self.issue_write(mem, run, issue_at);
        }
        Ok(())
    }

    /// Drain the write-combining buffer; returns when the output bundle idles.
    pub fn flush_output(&mut self, mem: &mut HostMemory, issue_at: u64) -> u64 {
        if let Some(run) = self.writer.take() {
            self.issue_write(mem, run, issue_at);
        }
        self.busy_until(PortKind::Output).max(issue_at)
    }

    fn issue_write(&mut self, mem: &mut HostMemory, run: PendingRun, issue_at: u64) {
        for (burst_addr, burst_len) in self.split(run.addr, run.data.len()) {
            let offset = ((burst_addr - run.addr) as usize) / ELEMENT_BYTES;
            mem.write_fixed(burst_addr, &run.data[offset..offset + burst_len]);
            mem.record_dma_write(burst_addr, burst_len * ELEMENT_BYTES);
            let done = self.book(PortKind::Output, issue_at, burst_len);
            log::trace!(
                "output burst write addr=0x{:X} len={} done@{}",
                burst_addr, burst_len, done
            );
        }
        self.count_transfer(PortKind::Output);
    }

    /// Split a contiguous request into (address, length) bursts.
    fn split(&self, addr: u64, len: usize) -> Vec<(u64, usize)> {
        let burst_len = self.config.burst_len;
        (0..len)
            .step_by(burst_len)
            .map(|start| {
                let n = burst_len.min(len - start);
                (addr + (start * ELEMENT_BYTES) as u64, n)
            })
            .collect()
    }

    /// Book one burst on the port's bundle and update counters.
    fn book(&mut self, kind: PortKind, issue_at: u64, len: usize) -> u64 {
        let cycles = self.config.burst_cycles(len);
        let bundle = self.ports.bundle(kind).to_string();
        let done = self.bundles.entry(bundle).or_default().schedule(issue_at, cycles);

        let stats = self.stats.entry(kind).or_default();
        stats.bursts += 1;
        stats.elements += len as u64;
        stats.busy_cycles += cycles;
        done
    }

    fn count_transfer(&mut self, kind: PortKind) {
        self.stats.entry(kind).or_default().transfers += 1;
    }
}

/// Reject transfers that are misaligned or wrap the address space.
fn check_span(addr: u64, len: usize) -> Result<()> {
    if addr % ELEMENT_BYTES as u64 != 0 {
        return Err(HostMemoryError::AlignmentError {
            address: addr,
            required: ELEMENT_BYTES,
        }
        .into());
    }
    host_memory::address_at(addr, len)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::host_memory::DataDirection;

    fn ramp(n: usize) -> Vec<Fixed16> {
        (0..n).map(|i| Fixed16::from_raw(i as i16)).collect()
    }

    #[test]
    fn test_port_map_default_is_valid() {
        let map = PortMap::default();
        assert!(map.validate().is_ok());
        assert_eq!(map.bundle(PortKind::Coefficients), map.bundle(PortKind::Bias));
        assert_ne!(map.bundle(PortKind::Input), map.bundle(PortKind::Output));
    }

    #[test]
    fn test_shared_input_output_rejected() {
        let map = PortMap {
            output: "gmem0".into(),
            ..PortMap::default()
        };
        let err = BurstInterface::new(BurstConfig::default(), map).unwrap_err();
        assert_eq!(
            err,
            ConvError::PortConflict { first: "input", second: "output", bundle: "gmem0".into() }
        );
    }

    #[test]
    fn test_read_splits_into_bursts() {
        let mut mem = HostMemory::new();
        mem.write_fixed(0x1000, &ramp(600));

        let mut bus = BurstInterface::new(BurstConfig::default(), PortMap::default()).unwrap();
        let read = bus.read(PortKind::Input, &mut mem, 0x1000, 600, 0).unwrap();

        assert_eq!(read.data, ramp(600));
        let stats = bus.stats(PortKind::Input);
        assert_eq!(stats.transfers, 1);
        assert_eq!(stats.bursts, 3);
        assert_eq!(stats.elements, 600);
        // (30+256) + (30+256) + (30+88)
        assert_eq!(read.ready_at, 690);
    }

    #[test]
    fn test_independent_bundles_overlap() {
        let mut mem = HostMemory::new();
        let mut bus = BurstInterface::new(BurstConfig::default(), PortMap::default()).unwrap();

        let a = bus.read(PortKind::Input, &mut mem, 0x0, 256, 0).unwrap();
        let b = bus.read(PortKind::Coefficients, &mut mem, 0x8000, 256, 0).unwrap();
        assert_eq!(a.ready_at, 286);
        assert_eq!(b.ready_at, 286);
    }

    #[test]
    fn test_shared_bundle_serializes() {
        let mut mem = HostMemory::new();
        let mut bus = BurstInterface::new(BurstConfig::default(), PortMap::default()).unwrap();

        let coeff = bus.read(PortKind::Coefficients, &mut mem, 0x8000, 36, 0).unwrap();
        let bias = bus.read(PortKind::Bias, &mut mem, 0x9000, 4, 0).unwrap();
        assert_eq!(coeff.ready_at, 66);
        assert_eq!(bias.ready_at, 66 + 34);
    }

    #[test]
    fn test_output_write_combining() {
        let mut mem = HostMemory::new();
        let mut bus = BurstInterface::new(BurstConfig::default(), PortMap::default()).unwrap();

        for (i, v) in ramp(10).into_iter().enumerate() {
            bus.write_output(&mut mem, 0x4000 + 2 * i as u64, v, 0).unwrap();
        }
        assert_eq!(bus.stats(PortKind::Output).bursts, 0);

        let idle = bus.flush_output(&mut mem, 0);
        assert_eq!(idle, 40);
        assert_eq!(bus.stats(PortKind::Output).bursts, 1);
        assert_eq!(mem.read_fixed(0x4000, 10), ramp(10));
    }

    #[test]
    fn test_misaligned_read_rejected() {
        let mut mem = HostMemory::new();
        let mut bus = BurstInterface::new(BurstConfig::default(), PortMap::default()).unwrap();
        let err = bus.read(PortKind::Input, &mut mem, 0x1001, 4, 0).unwrap_err();
        assert!(matches!(err, ConvError::Memory(HostMemoryError::AlignmentError { .. })));
    }

    #[test]
    fn test_wrapping_read_rejected() {
        let mut mem = HostMemory::new();
        let mut bus = BurstInterface::new(BurstConfig::default(), PortMap::default()).unwrap();
        let err = bus.read(PortKind::Input, &mut mem, u64::MAX - 3, 4, 0).unwrap_err();
        assert!(matches!(err, ConvError::Memory(HostMemoryError::AddressOverflow { .. })));
        assert_eq!(bus.stats(PortKind::Input), PortStats::default());
    }

    #[test]
    fn test_write_into_input_region_rejected() {
        let mut mem = HostMemory::new();
        mem.allocate_region_with_direction("image", 0x4000, 64, DataDirection::Input).unwrap();
        mem.write_fixed(0x4000, &ramp(4));
        let mut bus = BurstInterface::new(BurstConfig::default(), PortMap::default()).unwrap();

        let err = bus.write_output(&mut mem, 0x4002, Fixed16::ONE, 0).unwrap_err();
        assert!(matches!(
            err,
            ConvError::Memory(HostMemoryError::DirectionViolation { access: "write", .. })
        ));
        bus.flush_output(&mut mem, 0);
        assert_eq!(mem.read_fixed(0x4000, 4), ramp(4));
        assert_eq!(bus.stats(PortKind::Output).bursts, 0);
    }

    #[test]
    fn test_read_outside_regions_rejected() {
        let mut mem = HostMemory::new();
        mem.allocate_region_with_direction("image", 0x4000, 64, DataDirection::Input).unwrap();
        let mut bus = BurstInterface::new(BurstConfig::default(), PortMap::default()).unwrap();

        assert!(bus.read(PortKind::Input, &mut mem, 0x4000, 32, 0).is_ok());
        let err = bus.read(PortKind::Input, &mut mem, 0x4020, 32, 0).unwrap_err();
        assert!(matches!(err, ConvError::Memory(HostMemoryError::OutOfRegion { .. })));
    }

    #[test]
    fn test_reset_clears_timeline() {
        let mut mem = HostMemory::new();
        let mut bus = BurstInterface::new(BurstConfig::default(), PortMap::default()).unwrap();
        bus.read(PortKind::Input, &mut mem, 0x0, 16, 0).unwrap();
        assert!(bus.busy_until(PortKind::Input) > 0);

        bus.reset();
        assert_eq!(bus.busy_until(PortKind::Input), 0);
        assert_eq!(bus.stats(PortKind::Input), PortStats::default());
    }
}
