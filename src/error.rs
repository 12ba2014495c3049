//! Error types for the convolution engine.
//!
//! Errors fall into the classes the engine distinguishes:
//! - [`CapacityError`]: a request exceeds an on-chip buffer or cache bound.
//!   Rejected at load/enqueue time, never truncated.
//! - [`StateError`]: an operation arrives in the wrong engine or buffer state.
//! - [`RegisterError`]: the control interface was programmed inconsistently.
//!
//! Fixed-point overflow is not an error; see [`crate::fixed`].
//! Every error is fatal to the current run and surfaces through [`ConvError`].

use thiserror::Error;

use crate::device::host_memory::HostMemoryError;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, ConvError>;

/// A request that does not fit an on-chip resource.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CapacityError {
    /// Row wider than the line buffers.
    #[error("row width {width} exceeds line buffer capacity {max}")]
    RowTooWide {
        /// Requested width in pixels.
        width: usize,
        /// Configured maximum width.
        max: usize,
    },

    /// Row length is not a whole number of pixels for the configured channels.
    #[error("row of {len} samples is not a multiple of {channels} channels")]
    RaggedRow {
        /// Samples supplied.
        len: usize,
        /// Channels per pixel.
        channels: usize,
    },

    /// More input channels than the coefficient cache or line buffers hold.
    #[error("{channels} input channels exceed capacity {max}")]
    TooManyInputChannels {
        /// Requested input channels.
        channels: usize,
        /// Configured maximum.
        max: usize,
    },

    /// More filters than one cache group holds.
    #[error("{filters} filters exceed the filter group size {group_size}")]
    TooManyFilters {
        /// Requested filters.
        filters: usize,
        /// Filters per group.
        group_size: usize,
    },

    /// Coefficient or bias slice does not match the declared shape.
    #[error("{what}: expected {expected} values, got {got}")]
    ShapeMismatch {
        /// Which buffer was malformed.
        what: &'static str,
        /// Values the shape requires.
        expected: usize,
        /// Values supplied.
        got: usize,
    },
}

/// An operation issued in a state that does not allow it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    /// The coefficient cache is held by a running filter group.
    #[error("coefficient cache is locked by the active filter group")]
    CacheLocked,

    /// Coefficients were requested before any were loaded.
    #[error("coefficient cache is empty")]
    CacheEmpty,

    /// A window was requested before three rows were buffered.
    #[error("window requested with only {rows_buffered} of 3 rows buffered")]
    NotPrimed {
        /// Rows currently buffered.
        rows_buffered: usize,
    },

    /// Window column or channel lies outside the buffered row.
    #[error("window at column {col} channel {channel} outside row of width {width} x {channels} channels")]
    WindowOutOfRange {
        /// Left column of the window.
        col: usize,
        /// Channel requested.
        channel: usize,
        /// Buffered row width.
        width: usize,
        /// Buffered channels.
        channels: usize,
    },

    /// Host touched the engine while a run was in progress.
    #[error("engine is busy")]
    EngineBusy,

    /// Step requested with no run in progress.
    #[error("engine is not running (status: {status})")]
    NotRunning {
        /// Status at the time of the request.
        status: &'static str,
    },
}

/// Inconsistent control register programming.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegisterError {
    /// Offset does not name a register.
    #[error("no register at offset 0x{0:02X}")]
    UnknownOffset(u32),

    /// Register value out of range for the image geometry.
    #[error("invalid {register} = {value}: {reason}")]
    InvalidValue {
        /// Register name.
        register: &'static str,
        /// Programmed value.
        value: u64,
        /// Why it was rejected.
        reason: &'static str,
    },
}

/// Top-level engine error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConvError {
    /// On-chip capacity exceeded.
    #[error("capacity error: {0}")]
    Capacity(#[from] CapacityError),

    /// Operation not allowed in the current state.
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Control registers programmed inconsistently.
    #[error("register error: {0}")]
    Register(#[from] RegisterError),

    /// Host memory access failed.
    #[error("memory error: {0}")]
    Memory(#[from] HostMemoryError),

    /// Input and output ports mapped onto one bundle.
    #[error("ports '{first}' and '{second}' share bundle '{bundle}'")]
    PortConflict {
        /// First port name.
        first: &'static str,
        /// Second port name.
        second: &'static str,
        /// Shared bundle.
        bundle: String,
    },

    /// Engine configuration rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Run was cancelled by the host.
    #[error("run aborted")]
    Aborted,
}

impl ConvError {
    /// True for capacity errors.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::Capacity(_))
    }

    /// True for state errors.
    pub fn is_state(&self) -> bool {
        matches!(self, Self::State(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifiers() {
        let cap: ConvError = CapacityError::RowTooWide { width: 9, max: 8 }.into();
        assert!(cap.is_capacity());
        assert!(!cap.is_state());

        let state: ConvError = StateError::NotPrimed { rows_buffered: 1 }.into();
        assert!(state.is_state());
        assert!(!state.is_capacity());
    }

    #[test]
    fn test_messages() {
        let err: ConvError = CapacityError::RowTooWide { width: 600, max: 512 }.into();
        assert_eq!(
            err.to_string(),
            "capacity error: row width 600 exceeds line buffer capacity 512"
        );
        assert_eq!(
            RegisterError::UnknownOffset(0x7C).to_string(),
            "no register at offset 0x7C"
        );
    }
}
