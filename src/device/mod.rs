//! Hardware state of the convolution accelerator.
//!
//! This module provides:
//! - Architecture constants ([`params`])
//! - The register-mapped control interface ([`registers`])
//! - On-chip storage: coefficient cache and line buffer bank
//! - The four burst memory ports and the host memory they reach
//!
//! # Architecture Overview
//!
//! ```text
//!              host DDR (HostMemory)
//!   ┌──────────┬──────────┬──────────────┬────────┐
//!   │  input   │  output  │ coefficients │  bias  │
//!   └────┬─────┴────▲─────┴──────┬───────┴───┬────┘
//!    gmem0     gmem1            gmem2 ──────┘
//!        │          │             │
//!   ┌────▼──────────┴─────────────▼──────────────────┐
//!   │ LineBufferBank   FuseStage   CoefficientCache  │
//!   │   (3 rows)     (bias, ReLU)  (group of filters)│
//!   │        └──── AccumulatorSet ─────┘             │
//!   │              ControlRegisters                  │
//!   └────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use conv3_emu::device::{LineBufferBank, RegisterInfo};
//! use conv3_emu::Fixed16;
//!
//! let mut bank = LineBufferBank::new(8, 1);
//! for _ in 0..3 {
//!     bank.enqueue_row(&[Fixed16::ONE; 4]).unwrap();
//! }
//! assert_eq!(bank.window_at(1, 0).unwrap().sample(2, 2), Fixed16::ONE);
//!
//! assert_eq!(RegisterInfo::lookup(0x50).unwrap().name, "HEIGHT");
//! ```

pub mod params;
pub mod registers;
pub mod host_memory;
pub mod burst;
pub mod coeff_cache;
pub mod line_buffer;

pub use burst::{BurstConfig, BurstInterface, PortKind, PortMap, PortStats};
pub use coeff_cache::CoefficientCache;
pub use host_memory::{HostMemory, HostMemoryError, MemoryRegion};
pub use line_buffer::{LineBufferBank, Window};
pub use registers::{ControlRegisters, RegisterInfo, RunParams};
