//! conv3-emu library
//!
//! Software model of a streaming 3x3 convolution accelerator: Q4.12
//! fixed-point arithmetic, an on-chip coefficient cache and line buffer
//! bank, a pipelined accumulate/fuse datapath and burst memory ports.

pub mod fixed;
pub mod error;
pub mod config;
pub mod device;
pub mod emu;
pub mod reference;
pub mod testing;

pub use config::{Config, EngineConfig};
pub use error::{CapacityError, ConvError, RegisterError, Result, StateError};
pub use fixed::Fixed16;
