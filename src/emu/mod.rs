//! Execution engine for the convolution accelerator.
//!
//! This module provides the pipeline that turns staged buffers into an
//! output feature map. It handles:
//! - Sliding-window multiply-accumulate across a filter group
//! - Bias and ReLU fused onto accumulation completion
//! - Row streaming, filter group sequencing and run control
//! - Cycle accounting for the pipelined stages and memory stalls
//!
//! # Example
//!
//! ```
//! use conv3_emu::device::{HostMemory, RunParams};
//! use conv3_emu::emu::{ConvEngine, EngineStatus};
//! use conv3_emu::{EngineConfig, Fixed16};
//!
//! let mut mem = HostMemory::new();
//! mem.write_fixed(0x1000, &[Fixed16::from_f64(0.5); 9]);   // 3x3 image
//! mem.write_fixed(0x2000, &[Fixed16::ONE; 9]);             // one box filter
//! mem.write_fixed(0x3000, &[Fixed16::ZERO]);               // bias
//!
//! let mut engine = ConvEngine::new(EngineConfig::default()).unwrap();
//! engine.program(&RunParams {
//!     input_addr: 0x1000,
//!     output_addr: 0x4000,
//!     coeff_addr: 0x2000,
//!     bias_addr: 0x3000,
//!     in_channels: 1,
//!     out_channels: 1,
//!     height: 3,
//!     width: 3,
//! }).unwrap();
//! engine.start().unwrap();
//! engine.run(&mut mem).unwrap();
//!
//! assert_eq!(engine.status(), EngineStatus::Done);
//! assert_eq!(mem.read_fixed(0x4000, 1), vec![Fixed16::from_f64(4.5)]);
//! ```

pub mod accumulate;
pub mod fuse;
pub mod pipeline;
pub mod engine;

pub use accumulate::AccumulatorSet;
pub use engine::{ConvEngine, EngineStatus, RunStats, StreamPosition};
pub use pipeline::{PipelineClock, StallReason};
