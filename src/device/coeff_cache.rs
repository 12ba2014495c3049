//! On-chip coefficient cache.
//!
//! Holds the 3x3 weights of one filter group across every input channel,
//! plus the group's bias. The storage is laid out lane-innermost:
//!
//! ```text
//! weights[channel][kernel row][kernel col][lane]
//!                                          └── one lane per filter in the group
//! ```
//!
//! so [`CoefficientCache::weights_at`] hands the accumulate stage the
//! weights of every filter for one kernel tap as a single contiguous slice.
//! This is the software form of the cache being partitioned across the
//! filter dimension: one lookup feeds all parallel accumulators.
//!
//! Host memory packs coefficients filter-major (`[filter][channel][row][col]`);
//! [`CoefficientCache::load`] transposes on the way in.
//!
//! Once a filter group starts, the engine locks the cache. Loading into a
//! locked cache is a state error.

use crate::device::params::{KERNEL_SIZE, KERNEL_TAPS};
use crate::error::{CapacityError, Result, StateError};
use crate::fixed::Fixed16;

/// Coefficient and bias cache for one filter group.
#[derive(Debug, Clone)]
pub struct CoefficientCache {
    group_size: usize,
    max_input_channels: usize,
    weights: Vec<Fixed16>,
    bias: Vec<Fixed16>,
    input_channels: usize,
    filters: usize,
    loaded: bool,
    locked: bool,
}

impl CoefficientCache {
    /// Create an empty cache sized for `max_input_channels` x `group_size` filters.
    pub fn new(max_input_channels: usize, group_size: usize) -> Self {
        Self {
            group_size,
            max_input_channels,
            weights: vec![Fixed16::ZERO; max_input_channels * KERNEL_TAPS * group_size],
            bias: vec![Fixed16::ZERO; group_size],
            input_channels: 0,
            filters: 0,
            loaded: false,
            locked: false,
        }
    }

    /// Load a filter group.
    ///
    /// `coefficients` is filter-major, `bias.len()` filters by
    /// `input_channels` by 3x3. Fewer filters than the group size leaves
    /// the spare lanes at zero.
    pub fn load(
        &mut self,
        coefficients: &[Fixed16],
        bias: &[Fixed16],
        input_channels: usize,
    ) -> Result<()> {
        if self.locked {
            return Err(StateError::CacheLocked.into());
        }

        let filters = bias.len();
        if filters > self.group_size {
            return Err(CapacityError::TooManyFilters {
                filters,
                group_size: self.group_size,
            }
            .into());
        }
        if input_channels > self.max_input_channels {
            return Err(CapacityError::TooManyInputChannels {
                channels: input_channels,
                max: self.max_input_channels,
            }
            .into());
        }
        if filters == 0 || input_channels == 0 {
            return Err(CapacityError::ShapeMismatch {
                what: "filter group",
                expected: 1,
                got: 0,
            }
            .into());
        }
        let expected = filters * input_channels * KERNEL_TAPS;
        if coefficients.len() != expected {
            return Err(CapacityError::ShapeMismatch {
                what: "coefficients",
                expected,
                got: coefficients.len(),
            }
            .into());
        }

        self.weights.fill(Fixed16::ZERO);
        self.bias.fill(Fixed16::ZERO);

        for (filter, filter_weights) in coefficients.chunks_exact(input_channels * KERNEL_TAPS).enumerate() {
            for (tap_index, &w) in filter_weights.iter().enumerate() {
                // tap_index = channel * 9 + row * 3 + col, same order as the cache
                self.weights[tap_index * self.group_size + filter] = w;
            }
        }
        self.bias[..filters].copy_from_slice(bias);

        self.input_channels = input_channels;
        self.filters = filters;
        self.loaded = true;

        log::debug!(
            "coefficient cache loaded: {} filters x {} channels",
            filters, input_channels
        );
        Ok(())
    }

    /// Weights of every lane for one (channel, kernel row, kernel col) tap.
    #[inline]
    pub fn weights_at(&self, channel: usize, row: usize, col: usize) -> &[Fixed16] {
        debug_assert!(channel < self.input_channels && row < KERNEL_SIZE && col < KERNEL_SIZE);
        let tap = (channel * KERNEL_SIZE + row) * KERNEL_SIZE + col;
        let start = tap * self.group_size;
        &self.weights[start..start + self.group_size]
    }

    /// Single weight lookup, for inspection.
    pub fn weight(&self, filter: usize, channel: usize, row: usize, col: usize) -> Fixed16 {
        self.weights_at(channel, row, col)[filter]
    }

    /// Bias per lane (spare lanes are zero).
    pub fn bias(&self) -> &[Fixed16] {
        &self.bias
    }

    /// Pin the contents for the duration of a filter group.
    pub fn lock(&mut self) -> Result<()> {
        if !self.loaded {
            return Err(StateError::CacheEmpty.into());
        }
        self.locked = true;
        Ok(())
    }

    /// Release the cache at the end of a filter group.
    pub fn unlock(&mut self) {
        self.locked = false;
    }

    /// Drop the contents.
    pub fn clear(&mut self) -> Result<()> {
        if self.locked {
            return Err(StateError::CacheLocked.into());
        }
        self.weights.fill(Fixed16::ZERO);
        self.bias.fill(Fixed16::ZERO);
        self.input_channels = 0;
        self.filters = 0;
        self.loaded = false;
        Ok(())
    }

    /// Filters in the loaded group.
    pub fn filters(&self) -> usize {
        self.filters
    }

    /// Input channels in the loaded group.
    pub fn input_channels(&self) -> usize {
        self.input_channels
    }

    /// Lanes per group.
    pub fn group_size(&self) -> usize {
        self.group_size
    }

    /// Whether a group is loaded.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Whether a running group holds the cache.
    pub fn is_locked(&self) -> bool {
        self.locked
    }
}
