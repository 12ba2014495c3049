//! Bias and activation stage.
//!
//! Runs as soon as the last input channel of a pixel has been accumulated:
//! adds the per-filter bias to each lane, clamps at zero and hands the
//! results to the output port. Nothing is staged in between.

use crate::device::burst::BurstInterface;
use crate::device::host_memory::{self, HostMemory};
use crate::error::Result;
use crate::fixed::Fixed16;

/// `max(acc + bias, 0)`, saturating.
#[inline]
pub fn bias_relu(acc: Fixed16, bias: Fixed16) -> Fixed16 {
    (acc + bias).relu()
}

/// Where the fused values of one pixel land in the output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSlot {
    /// Address of the first filter of the group at this pixel.
    pub addr: u64,
    /// Filters in the active group.
    pub filters: usize,
}

impl OutputSlot {
    /// Slot for pixel (`out_row`, `out_col`) and the group starting at `first_filter`.
    ///
    /// The output buffer is `[out_row][out_col][filter]`. Fails if the
    /// address wraps.
    pub fn new(
        base: u64,
        out_width: usize,
        out_channels: usize,
        out_row: usize,
        out_col: usize,
        first_filter: usize,
        filters: usize,
    ) -> Result<Self> {
        let index = (out_row * out_width + out_col) * out_channels + first_filter;
        Ok(Self {
            addr: host_memory::address_at(base, index)?,
            filters,
        })
    }
}

/// Fuse the lanes of one pixel and queue them on the output port.
///
/// Spare lanes beyond `slot.filters` are dropped.
pub fn fuse_and_write(
    lanes: &[Fixed16],
    bias: &[Fixed16],
    slot: OutputSlot,
    bus: &mut BurstInterface,
    mem: &mut HostMemory,
    issue_at: u64,
) -> Result<()> {
    for (lane, (&acc, &b)) in lanes.iter().zip(bias).take(slot.filters).enumerate() {
        let addr = host_memory::address_at(slot.addr, lane)?;
        bus.write_output(mem, addr, bias_relu(acc, b), issue_at)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::burst::{BurstConfig, PortKind, PortMap};

    fn f(x: f64) -> Fixed16 {
        Fixed16::from_f64(x)
    }

    #[test]
    fn test_bias_relu() {
        assert_eq!(bias_relu(f(1.5), f(0.25)), f(1.75));
        assert_eq!(bias_relu(f(0.5), f(-1.0)), Fixed16::ZERO);
        assert_eq!(bias_relu(f(-0.25), f(0.25)), Fixed16::ZERO);
        assert_eq!(bias_relu(Fixed16::MAX, Fixed16::ONE), Fixed16::MAX);
    }

    #[test]
    fn test_output_slot_layout() {
        // 4 output columns, 6 filters; pixel (2, 1), second group of 4
        let slot = OutputSlot::new(0x1000, 4, 6, 2, 1, 4, 2).unwrap();
        assert_eq!(slot.addr, 0x1000 + ((2 * 4 + 1) * 6 + 4) as u64 * 2);
        assert_eq!(slot.filters, 2);

        assert!(OutputSlot::new(u64::MAX - 1, 4, 6, 2, 1, 4, 2).is_err());
    }

    #[test]
    fn test_fuse_writes_active_lanes_only() {
        let mut mem = HostMemory::new();
        mem.write_fixed(0x2000, &[f(7.0); 4]);
        let mut bus = BurstInterface::new(BurstConfig::instant(), PortMap::default()).unwrap();

        let lanes = [f(1.0), f(-2.0), f(3.0), f(4.0)];
        let bias = [f(0.5), f(0.5), f(0.5), Fixed16::ZERO];
        let slot = OutputSlot { addr: 0x2000, filters: 3 };
        fuse_and_write(&lanes, &bias, slot, &mut bus, &mut mem, 0).unwrap();
        bus.flush_output(&mut mem, 0);

        assert_eq!(mem.read_fixed(0x2000, 4), vec![f(1.5), Fixed16::ZERO, f(3.5), f(7.0)]);
        assert_eq!(bus.stats(PortKind::Output).elements, 3);
    }
}
