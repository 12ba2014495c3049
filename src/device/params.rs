//! Accelerator architecture constants.
//!
//! Defaults for the synthesized engine. Runtime limits live in
//! [`crate::config::EngineConfig`] and start from these values.

// ============================================================================
// Kernel Geometry
// ============================================================================

/// Kernel height and width. The datapath is specialized to 3x3, stride 1,
/// no padding.
pub const KERNEL_SIZE: usize = 3;

/// Multiply-accumulate steps per input channel for one output pixel.
pub const KERNEL_TAPS: usize = KERNEL_SIZE * KERNEL_SIZE;

/// Rows held by the line buffer bank.
pub const LINE_BUFFER_ROWS: usize = KERNEL_SIZE;

// ============================================================================
// On-chip Capacity
// ============================================================================

/// Worst-case row width the line buffers are sized for (pixels).
pub const MAX_ROW_WIDTH: usize = 512;

/// Input channels the coefficient cache and line buffers hold.
pub const MAX_INPUT_CHANNELS: usize = 64;

/// Output filters cached and computed in lock-step.
pub const FILTER_GROUP_SIZE: usize = 4;

// ============================================================================
// Memory Ports
// ============================================================================

/// Elements per burst transaction.
pub const BURST_LENGTH: usize = 256;

/// Fixed per-transaction latency of the external memory (cycles).
pub const BURST_LATENCY_CYCLES: u32 = 30;

/// Elements moved per cycle once a burst is streaming.
pub const ELEMENTS_PER_CYCLE: u32 = 1;

/// Bytes per stored element (Q4.12 in 16 bits).
pub const ELEMENT_BYTES: usize = 2;

// ============================================================================
// Datapath Pipeline
// ============================================================================

/// Cycles from the last MAC step issue to the accumulator being final.
pub const MAC_LATENCY_CYCLES: u32 = 3;

/// Cycles for bias add, ReLU and output enqueue.
pub const FUSE_LATENCY_CYCLES: u32 = 2;
