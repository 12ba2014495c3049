//! Control register block.
//!
//! The host programs a run through a small register file: buffer base
//! addresses, channel counts and image geometry, then sets `CTRL.START`
//! and polls `CTRL.DONE`.
//!
//! # Register Map
//!
//! ```text
//! 0x00  CTRL          [0] START (W/R)  [1] DONE (R)  [2] IDLE (R)  [3] ABORT (W)
//! 0x10  INPUT_LO      0x14  INPUT_HI
//! 0x1C  OUTPUT_LO     0x20  OUTPUT_HI
//! 0x28  COEFF_LO      0x2C  COEFF_HI
//! 0x34  BIAS_LO       0x38  BIAS_HI
//! 0x40  IN_CHANNELS
//! 0x48  OUT_CHANNELS
//! 0x50  HEIGHT
//! 0x58  WIDTH
//! ```
//!
//! DONE is sticky until the next START.

use std::fmt;

use crate::config::EngineConfig;
use crate::device::params::KERNEL_SIZE;
use crate::error::{CapacityError, ConvError, RegisterError};

/// Register offsets.
pub mod offsets {
    /// Control and status.
    pub const CTRL: u32 = 0x00;
    /// Input buffer address, low word.
    pub const INPUT_LO: u32 = 0x10;
    /// Input buffer address, high word.
    pub const INPUT_HI: u32 = 0x14;
    /// Output buffer address, low word.
    pub const OUTPUT_LO: u32 = 0x1C;
    /// Output buffer address, high word.
    pub const OUTPUT_HI: u32 = 0x20;
    /// Coefficient buffer address, low word.
    pub const COEFF_LO: u32 = 0x28;
    /// Coefficient buffer address, high word.
    pub const COEFF_HI: u32 = 0x2C;
    /// Bias buffer address, low word.
    pub const BIAS_LO: u32 = 0x34;
    /// Bias buffer address, high word.
    pub const BIAS_HI: u32 = 0x38;
    /// Input channel count.
    pub const IN_CHANNELS: u32 = 0x40;
    /// Output channel count.
    pub const OUT_CHANNELS: u32 = 0x48;
    /// Image height.
    pub const HEIGHT: u32 = 0x50;
    /// Image width.
    pub const WIDTH: u32 = 0x58;
}

/// CTRL bit positions.
pub mod ctrl {
    /// Start a run.
    pub const START: u32 = 1 << 0;
    /// Run finished (sticky).
    pub const DONE: u32 = 1 << 1;
    /// No run in progress.
    pub const IDLE: u32 = 1 << 2;
    /// Abort the current run.
    pub const ABORT: u32 = 1 << 3;
}

/// Static description of one register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterInfo {
    /// Byte offset.
    pub offset: u32,
    /// Register name.
    pub name: &'static str,
}

const REGISTER_TABLE: &[RegisterInfo] = &[
    RegisterInfo { offset: offsets::CTRL, name: "CTRL" },
    RegisterInfo { offset: offsets::INPUT_LO, name: "INPUT_LO" },
    RegisterInfo { offset: offsets::INPUT_HI, name: "INPUT_HI" },
    RegisterInfo { offset: offsets::OUTPUT_LO, name: "OUTPUT_LO" },
    RegisterInfo { offset: offsets::OUTPUT_HI, name: "OUTPUT_HI" },
    RegisterInfo { offset: offsets::COEFF_LO, name: "COEFF_LO" },
    RegisterInfo { offset: offsets::COEFF_HI, name: "COEFF_HI" },
    RegisterInfo { offset: offsets::BIAS_LO, name: "BIAS_LO" },
    RegisterInfo { offset: offsets::BIAS_HI, name: "BIAS_HI" },
    RegisterInfo { offset: offsets::IN_CHANNELS, name: "IN_CHANNELS" },
    RegisterInfo { offset: offsets::OUT_CHANNELS, name: "OUT_CHANNELS" },
    RegisterInfo { offset: offsets::HEIGHT, name: "HEIGHT" },
    RegisterInfo { offset: offsets::WIDTH, name: "WIDTH" },
];

impl RegisterInfo {
    /// Look up a register by offset.
    pub fn lookup(offset: u32) -> Option<&'static RegisterInfo> {
        REGISTER_TABLE.iter().find(|r| r.offset == offset)
    }

    /// All registers in offset order.
    pub fn all() -> &'static [RegisterInfo] {
        REGISTER_TABLE
    }
}

impl fmt::Display for RegisterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ 0x{:02X}", self.name, self.offset)
    }
}

/// Validated parameters of one run, decoded from the registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunParams {
    /// Input image base address.
    pub input_addr: u64,
    /// Output feature map base address.
    pub output_addr: u64,
    /// Coefficient buffer base address.
    pub coeff_addr: u64,
    /// Bias buffer base address.
    pub bias_addr: u64,
    /// Input channels.
    pub in_channels: usize,
    /// Output channels (filters).
    pub out_channels: usize,
    /// Image height.
    pub height: usize,
    /// Image width.
    pub width: usize,
}

impl RunParams {
    /// Output rows (no padding).
    pub fn out_height(&self) -> usize {
        self.height - (KERNEL_SIZE - 1)
    }

    /// Output columns (no padding).
    pub fn out_width(&self) -> usize {
        self.width - (KERNEL_SIZE - 1)
    }

    /// Filter groups needed to cover every output channel.
    pub fn groups(&self, group_size: usize) -> usize {
        self.out_channels.div_ceil(group_size)
    }

    /// Samples in one input row.
    pub fn input_row_len(&self) -> usize {
        self.width * self.in_channels
    }

    /// Samples in the input image.
    pub fn input_len(&self) -> usize {
        self.height * self.input_row_len()
    }

    /// Samples in the output feature map.
    pub fn output_len(&self) -> usize {
        self.out_height() * self.out_width() * self.out_channels
    }

    /// Samples in the coefficient buffer.
    pub fn coefficient_len(&self) -> usize {
        self.out_channels * self.in_channels * KERNEL_SIZE * KERNEL_SIZE
    }
}

/// Register file state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRegisters {
    input_addr: u64,
    output_addr: u64,
    coeff_addr: u64,
    bias_addr: u64,
    in_channels: u32,
    out_channels: u32,
    height: u32,
    width: u32,
    start: bool,
    done: bool,
    idle: bool,
    abort: bool,
}

impl Default for ControlRegisters {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlRegisters {
    /// Reset state: idle, nothing programmed.
    pub fn new() -> Self {
        Self {
            input_addr: 0,
            output_addr: 0,
            coeff_addr: 0,
            bias_addr: 0,
            in_channels: 0,
            out_channels: 0,
            height: 0,
            width: 0,
            start: false,
            done: false,
            idle: true,
            abort: false,
        }
    }

    /// Write a 32-bit register.
    pub fn write(&mut self, offset: u32, value: u32) -> Result<(), RegisterError> {
        let name = RegisterInfo::lookup(offset)
            .map(|r| r.name)
            .ok_or(RegisterError::UnknownOffset(offset))?;
        log::trace!("reg write {} = 0x{:08X}", name, value);

        match offset {
            offsets::CTRL => {
                if value & ctrl::START != 0 {
                    self.start = true;
                }
                if value & ctrl::ABORT != 0 {
                    self.abort = true;
                }
            }
            offsets::INPUT_LO => set_lo(&mut self.input_addr, value),
            offsets::INPUT_HI => set_hi(&mut self.input_addr, value),
            offsets::OUTPUT_LO => set_lo(&mut self.output_addr, value),
            offsets::OUTPUT_HI => set_hi(&mut self.output_addr, value),
            offsets::COEFF_LO => set_lo(&mut self.coeff_addr, value),
            offsets::COEFF_HI => set_hi(&mut self.coeff_addr, value),
            offsets::BIAS_LO => set_lo(&mut self.bias_addr, value),
            offsets::BIAS_HI => set_hi(&mut self.bias_addr, value),
            offsets::IN_CHANNELS => self.in_channels = value,
            offsets::OUT_CHANNELS => self.out_channels = value,
            offsets::HEIGHT => self.height = value,
            offsets::WIDTH => self.width = value,
            _ => return Err(RegisterError::UnknownOffset(offset)),
        }
        Ok(())
    }

    /// Read a 32-bit register.
    pub fn read(&self, offset: u32) -> Result<u32, RegisterError> {
        let value = match offset {
            offsets::CTRL => {
                let mut bits = 0;
                if self.start {
                    bits |= ctrl::START;
                }
                if self.done {
                    bits |= ctrl::DONE;
                }
                if self.idle {
                    bits |= ctrl::IDLE;
                }
                bits
            }
            offsets::INPUT_LO => self.input_addr as u32,
            offsets::INPUT_HI => (self.input_addr >> 32) as u32,
            offsets::OUTPUT_LO => self.output_addr as u32,
            offsets::OUTPUT_HI => (self.output_addr >> 32) as u32,
            offsets::COEFF_LO => self.coeff_addr as u32,
            offsets::COEFF_HI => (self.coeff_addr >> 32) as u32,
            offsets::BIAS_LO => self.bias_addr as u32,
            offsets::BIAS_HI => (self.bias_addr >> 32) as u32,
            offsets::IN_CHANNELS => self.in_channels,
            offsets::OUT_CHANNELS => self.out_channels,
            offsets::HEIGHT => self.height,
            offsets::WIDTH => self.width,
            _ => return Err(RegisterError::UnknownOffset(offset)),
        };
        Ok(value)
    }

    /// Write every parameter register from `params`.
    pub fn program(&mut self, params: &RunParams) -> Result<(), RegisterError> {
        let addr_pairs = [
            (offsets::INPUT_LO, offsets::INPUT_HI, params.input_addr),
            (offsets::OUTPUT_LO, offsets::OUTPUT_HI, params.output_addr),
            (offsets::COEFF_LO, offsets::COEFF_HI, params.coeff_addr),
            (offsets::BIAS_LO, offsets::BIAS_HI, params.bias_addr),
        ];
        for (lo, hi, addr) in addr_pairs {
            self.write(lo, addr as u32)?;
            self.write(hi, (addr >> 32) as u32)?;
        }
        self.write(offsets::IN_CHANNELS, to_reg("IN_CHANNELS", params.in_channels)?)?;
        self.write(offsets::OUT_CHANNELS, to_reg("OUT_CHANNELS", params.out_channels)?)?;
        self.write(offsets::HEIGHT, to_reg("HEIGHT", params.height)?)?;
        self.write(offsets::WIDTH, to_reg("WIDTH", params.width)?)?;
        Ok(())
    }

    /// Decode and check the programmed run against engine limits.
    pub fn run_params(&self, config: &EngineConfig) -> Result<RunParams, ConvError> {
        let min = KERNEL_SIZE as u32;
        if self.height < min {
            return Err(invalid("HEIGHT", self.height, "image must be at least 3 rows").into());
        }
        if self.width < min {
            return Err(invalid("WIDTH", self.width, "image must be at least 3 columns").into());
        }
        if self.in_channels == 0 {
            return Err(invalid("IN_CHANNELS", 0, "need at least one input channel").into());
        }
        if self.out_channels == 0 {
            return Err(invalid("OUT_CHANNELS", 0, "need at least one output channel").into());
        }

        let width = self.width as usize;
        if width > config.max_width {
            return Err(CapacityError::RowTooWide { width, max: config.max_width }.into());
        }
        let in_channels = self.in_channels as usize;
        if in_channels > config.max_input_channels {
            return Err(CapacityError::TooManyInputChannels {
                channels: in_channels,
                max: config.max_input_channels,
            }
            .into());
        }

        Ok(RunParams {
            input_addr: self.input_addr,
            output_addr: self.output_addr,
            coeff_addr: self.coeff_addr,
            bias_addr: self.bias_addr,
            in_channels,
            out_channels: self.out_channels as usize,
            height: self.height as usize,
            width,
        })
    }

    /// Consume a pending START request.
    pub fn take_start(&mut self) -> bool {
        std::mem::take(&mut self.start)
    }

    /// Consume a pending ABORT request.
    pub fn take_abort(&mut self) -> bool {
        std::mem::take(&mut self.abort)
    }

    /// Enter the busy state; clears DONE.
    pub fn set_busy(&mut self) {
        self.idle = false;
        self.done = false;
    }

    /// Return to idle, optionally raising DONE.
    pub fn set_idle(&mut self, done: bool) {
        self.idle = true;
        self.done = done;
    }

    /// DONE flag.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// IDLE flag.
    pub fn is_idle(&self) -> bool {
        self.idle
    }
}

fn set_lo(reg: &mut u64, value: u32) {
    *reg = (*reg & !0xFFFF_FFFF) | u64::from(value);
}

fn set_hi(reg: &mut u64, value: u32) {
    *reg = (*reg & 0xFFFF_FFFF) | (u64::from(value) << 32);
}

fn to_reg(register: &'static str, value: usize) -> Result<u32, RegisterError> {
    u32::try_from(value).map_err(|_| RegisterError::InvalidValue {
        register,
        value: value as u64,
        reason: "does not fit a 32-bit register",
    })
}

fn invalid(register: &'static str, value: u32, reason: &'static str) -> RegisterError {
    RegisterError::InvalidValue {
        register,
        value: u64::from(value),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> RunParams {
        RunParams {
            input_addr: 0x1_0000_0000,
            output_addr: 0x2000,
            coeff_addr: 0x3000,
            bias_addr: 0x4000,
            in_channels: 3,
            out_channels: 6,
            height: 8,
            width: 10,
        }
    }

    #[test]
    fn test_program_round_trips_through_run_params() {
        let mut regs = ControlRegisters::new();
        regs.program(&params()).unwrap();

        assert_eq!(regs.read(offsets::INPUT_HI).unwrap(), 1);
        assert_eq!(regs.read(offsets::INPUT_LO).unwrap(), 0);
        assert_eq!(regs.run_params(&EngineConfig::default()).unwrap(), params());
    }

    #[test]
    fn test_derived_sizes() {
        let p = params();
        assert_eq!(p.out_height(), 6);
        assert_eq!(p.out_width(), 8);
        assert_eq!(p.groups(4), 2);
        assert_eq!(p.input_row_len(), 30);
        assert_eq!(p.output_len(), 6 * 8 * 6);
        assert_eq!(p.coefficient_len(), 6 * 3 * 9);
    }

    #[test]
    fn test_unknown_offset() {
        let mut regs = ControlRegisters::new();
        assert_eq!(regs.write(0x04, 1), Err(RegisterError::UnknownOffset(0x04)));
        assert_eq!(regs.read(0x7C), Err(RegisterError::UnknownOffset(0x7C)));
    }

    #[test]
    fn test_ctrl_bits() {
        let mut regs = ControlRegisters::new();
        assert_eq!(regs.read(offsets::CTRL).unwrap(), ctrl::IDLE);

        regs.write(offsets::CTRL, ctrl::START).unwrap();
        assert!(regs.take_start());
        assert!(!regs.take_start());

        regs.set_busy();
        assert_eq!(regs.read(offsets::CTRL).unwrap(), 0);
        regs.set_idle(true);
        assert_eq!(regs.read(offsets::CTRL).unwrap(), ctrl::DONE | ctrl::IDLE);

        // DONE stays until the next run begins
        regs.set_busy();
        assert!(!regs.is_done());
    }

    #[test]
    fn test_geometry_validation() {
        let config = EngineConfig::default();
        let mut regs = ControlRegisters::new();
        regs.program(&RunParams { height: 2, ..params() }).unwrap();
        assert!(matches!(
            regs.run_params(&config),
            Err(ConvError::Register(RegisterError::InvalidValue { register: "HEIGHT", .. }))
        ));

        regs.program(&RunParams { width: config.max_width + 1, ..params() }).unwrap();
        assert!(regs.run_params(&config).unwrap_err().is_capacity());

        regs.program(&RunParams { in_channels: config.max_input_channels + 1, ..params() }).unwrap();
        assert!(regs.run_params(&config).unwrap_err().is_capacity());

        regs.program(&RunParams { out_channels: 0, ..params() }).unwrap();
        assert!(matches!(regs.run_params(&config), Err(ConvError::Register(_))));
    }

    #[test]
    fn test_lookup() {
        assert_eq!(RegisterInfo::lookup(offsets::WIDTH).unwrap().name, "WIDTH");
        assert!(RegisterInfo::lookup(0x04).is_none());
        assert_eq!(RegisterInfo::all().len(), 13);
    }
}
